//! Chat application module for interactive conversations with Gemini.
//!
//! This module provides a streaming REPL chat interface built on top of the
//! parley client library. It supports:
//!
//! - Streaming replies with incremental display
//! - Image attachments routed to the vision model
//! - Slash commands for session control
//! - Cancellation of the reply in flight
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: Core chat session management and turn sequencing
//! - [`commands`]: Slash command parsing

mod commands;
mod config;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, is_confirmation, parse_command};
pub use config::{
    ChatArgs, ChatConfig, DEFAULT_TEMPERATURE, MAX_TEMPERATURE, parse_model, validate_temperature,
};
pub use session::{APOLOGY_TEXT, ChatSession, SessionStats, TurnOutcome, TurnState};
