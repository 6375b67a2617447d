// Public modules
pub mod chat;
pub mod client;
pub mod error;
pub mod observability;
pub mod render;
pub mod sse;
pub mod streaming;
pub mod transcript;
pub mod types;

// Re-exports
pub use client::Gemini;
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use render::{PlainTextRenderer, Renderer};
pub use streaming::{FragmentSource, FragmentStream, GeminiSource};
pub use transcript::{MessagePatch, Transcript};
pub use types::*;
