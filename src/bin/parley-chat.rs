//! Interactive chat application for conversing with Gemini.
//!
//! This binary provides a streaming REPL interface for chatting with Gemini
//! models via the generative language API.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings
//! parley-chat
//!
//! # Specify the models
//! parley-chat --text-model gemini-2.5-flash --vision-model gemini-2.5-pro
//!
//! # Set a system instruction
//! parley-chat --system "You are a helpful coding assistant"
//!
//! # Ask one question and exit
//! parley-chat --prompt "What is the capital of France?"
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/image <path>` - Attach an image to the next message
//! - `/clear` - Clear conversation history
//! - `/quit` - Exit the application
//!
//! Ctrl+C while a reply is streaming cancels that reply.  Set `PARLEY_LOG` (e.g. `debug`) for
//! diagnostics on stderr.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use parley::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, Renderer, help_text,
    is_confirmation, parse_command, parse_model,
};
use parley::streaming::{build_request, select_model};
use parley::{Gemini, ImageAttachment};

/// Main entry point for the parley-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PARLEY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("parley-chat [OPTIONS]");
    let api_key = args.api_key.clone();
    let prompt = args.prompt.clone();
    let config = ChatConfig::try_from(args)?;
    let client = Gemini::with_options(api_key, config.base_url.clone(), config.timeout)?;

    if let Some(prompt) = prompt {
        let request = build_request(&prompt, &[], &[], &config);
        let response = client.generate(select_model(&[], &config), &request).await?;
        if let Some(reason) = response.block_reason() {
            return Err(format!("prompt blocked: {reason}").into());
        }
        println!("{}", response.text().unwrap_or_default());
        return Ok(());
    }

    let use_color = config.use_color;
    let session = ChatSession::new(client, config);
    let mut renderer = PlainTextRenderer::with_color(use_color);
    let mut rl = DefaultEditor::new()?;
    let mut staged: Vec<ImageAttachment> = Vec::new();

    // Token for the turn in flight; replaced before every turn
    let current = Arc::new(Mutex::new(CancellationToken::new()));
    let handler_token = Arc::clone(&current);
    ctrlc::set_handler(move || {
        handler_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    })?;

    let stats = session.stats();
    println!(
        "Gemini Chat (text model: {}, vision model: {})",
        stats.text_model, stats.vision_model
    );
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() && staged.is_empty() {
                    continue;
                }
                if !line.is_empty() {
                    let _ = rl.add_history_entry(line);
                }

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => {
                            let answer = rl.readline("Clear the conversation? [y/N] ");
                            match answer {
                                Ok(answer) if is_confirmation(&answer) => match session.clear() {
                                    Ok(()) => renderer.print_info("Conversation cleared."),
                                    Err(err) => renderer.print_error(&err.to_string()),
                                },
                                _ => renderer.print_info("Kept the conversation."),
                            }
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ChatCommand::Model(name) => {
                            session.set_text_model(parse_model(&name));
                            renderer.print_info(&format!("Text model changed to: {name}"));
                        }
                        ChatCommand::VisionModel(name) => {
                            session.set_vision_model(parse_model(&name));
                            renderer.print_info(&format!("Vision model changed to: {name}"));
                        }
                        ChatCommand::System(instruction) => {
                            session.set_system_instruction(instruction.clone());
                            match instruction {
                                Some(text) => renderer
                                    .print_info(&format!("System instruction set to: {text}")),
                                None => renderer.print_info("System instruction cleared."),
                            }
                        }
                        ChatCommand::Temperature(value) => match session.set_temperature(value) {
                            Ok(()) => {
                                renderer.print_info(&format!("temperature set to {value:.2}"))
                            }
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Image(source) => match load_image(&source) {
                            Ok(image) => {
                                renderer.print_info(&format!(
                                    "Attached {} ({} bytes); {} image(s) staged.",
                                    image.mime_type(),
                                    image.len(),
                                    staged.len() + 1
                                ));
                                staged.push(image);
                            }
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Images => print_staged(&staged),
                        ChatCommand::Detach => {
                            staged.clear();
                            renderer.print_info("Attached images removed.");
                        }
                        ChatCommand::History => {
                            renderer.render_transcript(&session.messages());
                        }
                        ChatCommand::Stats => print_stats(&session),
                        ChatCommand::ShowConfig => print_config(&session),
                        ChatCommand::Invalid(message) => renderer.print_error(&message),
                    }
                    continue;
                }

                // Regular message - send to API
                let cancel = CancellationToken::new();
                *current.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();
                let images = std::mem::take(&mut staged);
                if let Err(err) = session.submit(line, images, &mut renderer, &cancel).await {
                    renderer.print_error(&err.to_string());
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

fn load_image(source: &str) -> parley::Result<ImageAttachment> {
    if source.starts_with("data:") {
        return ImageAttachment::from_data_url(source);
    }
    match (source.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => ImageAttachment::from_path(Path::new(&home).join(rest)),
        _ => ImageAttachment::from_path(source),
    }
}

fn print_staged(staged: &[ImageAttachment]) {
    if staged.is_empty() {
        println!("    No images attached.");
        return;
    }
    println!("    Attached images:");
    for (idx, image) in staged.iter().enumerate() {
        println!("      {}. {} ({} bytes)", idx + 1, image.mime_type(), image.len());
    }
}

fn print_stats(session: &ChatSession) {
    let stats = session.stats();
    println!("    Session Statistics:");
    println!("      Messages: {}", stats.message_count);
    println!("      Last turn: {:?}", stats.state);
    println!(
        "      Turns: {} completed / {} failed / {} cancelled",
        stats.turns_completed, stats.turns_failed, stats.turns_cancelled
    );
    println!("      Fragments received: {}", stats.fragments_received);
}

fn print_config(session: &ChatSession) {
    let stats = session.stats();
    println!("    Current Configuration:");
    println!("      Text model: {}", stats.text_model);
    println!("      Vision model: {}", stats.vision_model);
    println!("      Temperature: {:.2}", stats.temperature);
    if let Some(instruction) = stats.system_instruction.as_deref() {
        println!("      System instruction: {}", instruction);
    } else {
        println!("      System instruction: (none)");
    }
}
