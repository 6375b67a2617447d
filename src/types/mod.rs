// Public modules
pub mod content;
pub mod image;
pub mod message;
pub mod model;
pub mod request;
pub mod response;

// Re-exports
pub use content::{Content, Part};
pub use image::{ImageAttachment, ImageMimeType, InlineData};
pub use message::{HistoryTurn, Message, MessageId, Role};
pub use model::{KnownModel, Model};
pub use request::{GenerateContentRequest, GenerationConfig};
pub use response::{Candidate, GenerateContentResponse, PromptFeedback, UsageMetadata};
