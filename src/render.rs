//! Output rendering for the chat transcript and streaming replies.
//!
//! This module provides the [`Renderer`] trait and a plain-text implementation.

use std::io::{self, Stdout, Write};

use crate::types::{Message, Role};

/// ANSI escape code for dim text (used for image annotations).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the user label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for the model label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for failed replies and errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering the conversation.
///
/// This abstraction allows for different rendering strategies:
/// - Plain text with ANSI styling
/// - Plain text without styling (for piping/redirecting)
/// - Recording renderers in tests
pub trait Renderer: Send {
    /// Called when the model reply for a turn begins.
    fn start_response(&mut self) {}

    /// Print a fragment of the reply.
    ///
    /// This is called incrementally as fragments are streamed from the API.
    fn print_text(&mut self, text: &str);

    /// Called when a reply is complete.
    fn finish_response(&mut self);

    /// Called when a reply failed; `apology` replaces whatever was shown so far.
    fn print_failure(&mut self, apology: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when the reply is cancelled by the user.
    fn print_interrupted(&mut self) {}

    /// Render one transcript entry in full.
    fn render_message(&mut self, message: &Message);

    /// Re-render the whole transcript.
    fn render_transcript(&mut self, messages: &[Message]) {
        for message in messages {
            self.render_message(message);
        }
    }
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    line_start: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            line_start: true,
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn write(&mut self, text: &str) {
        let _ = self.stdout.write_all(text.as_bytes());
        if !text.is_empty() {
            self.line_start = text.ends_with('\n');
        }
        self.flush();
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_color {
            format!("{color}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn end_line(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn start_response(&mut self) {
        self.end_line();
        let label = self.paint(ANSI_GREEN, "Gemini:");
        self.write(&format!("{label}\n"));
    }

    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn finish_response(&mut self) {
        self.end_line();
        self.write("\n");
    }

    fn print_failure(&mut self, apology: &str) {
        self.end_line();
        let apology = self.paint(ANSI_RED, apology);
        self.write(&format!("{apology}\n\n"));
    }

    fn print_error(&mut self, error: &str) {
        self.end_line();
        eprintln!("{}", self.paint(ANSI_RED, &format!("Error: {error}")));
    }

    fn print_info(&mut self, info: &str) {
        self.end_line();
        self.write(&format!("{info}\n"));
    }

    fn print_interrupted(&mut self) {
        self.end_line();
        self.write("[interrupted]\n\n");
    }

    fn render_message(&mut self, message: &Message) {
        self.end_line();
        let label = match message.role() {
            Role::User => self.paint(ANSI_CYAN, "You:"),
            Role::Model => self.paint(ANSI_GREEN, "Gemini:"),
        };
        self.write(&format!("{label}\n"));
        let images = message.images();
        if !images.is_empty() {
            let listing = images
                .iter()
                .map(|image| format!("{} ({} bytes)", image.mime_type(), image.len()))
                .collect::<Vec<_>>()
                .join(", ");
            let annotation = self.paint(ANSI_DIM, &format!("[images: {listing}]"));
            self.write(&format!("{annotation}\n"));
        }
        if message.is_error() {
            let text = self.paint(ANSI_RED, message.text());
            self.write(&text);
        } else {
            self.write(message.text());
        }
        self.end_line();
        self.write("\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert!(!renderer.use_color);
        assert_eq!(renderer.paint(ANSI_RED, "oops"), "oops");
    }

    #[test]
    fn paint_wraps_in_escape_codes() {
        let renderer = PlainTextRenderer::with_color(true);
        assert_eq!(renderer.paint(ANSI_RED, "oops"), "\x1b[31moops\x1b[0m");
    }
}
