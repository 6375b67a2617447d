//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to adjust settings and stage images without sending
//! messages to the API.

use crate::chat::config::MAX_TEMPERATURE;

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the API.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Clear the conversation history (after confirmation).
    Clear,

    /// Set or clear the system instruction.
    /// `None` clears the current instruction.
    System(Option<String>),

    /// Set the sampling temperature.
    Temperature(f32),

    /// Change the model used for text turns.
    Model(String),

    /// Change the model used for image turns.
    VisionModel(String),

    /// Stage an image (file path or data URL) for the next message.
    Image(String),

    /// List staged images.
    Images,

    /// Drop all staged images.
    Detach,

    /// Re-render the transcript.
    History,

    /// Display session statistics.
    Stats,

    /// Show the current configuration.
    ShowConfig,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use parley::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/temperature 0.4").is_some());
/// assert!(parse_command("Hello, Gemini!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let body = input.strip_prefix('/')?;

    let mut parts = body.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" | "new" => ChatCommand::Clear,
        "system" => ChatCommand::System(argument.map(str::to_string)),
        "temperature" | "temp" => match argument {
            Some(arg) => match parse_temperature(arg) {
                Ok(value) => ChatCommand::Temperature(value),
                Err(err) => ChatCommand::Invalid(format!("/temperature {err}")),
            },
            None => ChatCommand::Invalid("/temperature requires a value".to_string()),
        },
        "model" => match argument {
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid("/model requires a model name".to_string()),
        },
        "vision-model" | "vision_model" => match argument {
            Some(model) => ChatCommand::VisionModel(model.to_string()),
            None => ChatCommand::Invalid("/vision-model requires a model name".to_string()),
        },
        "image" | "img" => match argument {
            Some(source) => ChatCommand::Image(source.to_string()),
            None => {
                ChatCommand::Invalid("/image requires a file path or data URL".to_string())
            }
        },
        "images" => ChatCommand::Images,
        "detach" => ChatCommand::Detach,
        "history" => ChatCommand::History,
        "stats" | "status" => ChatCommand::Stats,
        "config" => ChatCommand::ShowConfig,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn parse_temperature(value: &str) -> Result<f32, String> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| format!("expects a value between 0 and {MAX_TEMPERATURE}"))?;
    if parsed.is_finite() && (0.0..=MAX_TEMPERATURE).contains(&parsed) {
        Ok(parsed)
    } else {
        Err(format!("expects a value between 0 and {MAX_TEMPERATURE}"))
    }
}

/// Returns true for an affirmative answer to a confirmation prompt.
pub fn is_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /clear                 Clear the conversation (asks for confirmation)
  /system [text]         Set system instruction (no argument clears it)
  /temperature <v>       Set temperature 0.0-2.0
  /model <name>          Model for text turns (e.g., /model gemini-2.5-flash)
  /vision-model <name>   Model for turns with images
  /image <path|data:…>   Attach an image to the next message
  /images                List attached images
  /detach                Remove attached images
  /history               Show the whole conversation
  /stats                 Show session statistics
  /config                Show current configuration
  /help                  Show this help message
  /quit                  Exit the chat"#
}
