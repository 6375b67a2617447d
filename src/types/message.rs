use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ImageAttachment;

/// Opaque identifier of a message within a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// The author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the conversation transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A message typed (and possibly illustrated) by the user.
    User {
        id: MessageId,
        text: String,
        images: Vec<ImageAttachment>,
    },
    /// A reply from the model, filled in as fragments arrive.
    Model {
        id: MessageId,
        text: String,
        is_error: bool,
    },
}

impl Message {
    /// Creates a user message.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the text is blank and no image is attached.
    pub fn user(
        id: MessageId,
        text: impl Into<String>,
        images: Vec<ImageAttachment>,
    ) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() && images.is_empty() {
            return Err(Error::validation(
                "a message needs text or at least one image",
                Some("text".to_string()),
            ));
        }
        Ok(Message::User { id, text, images })
    }

    /// Creates an empty model message awaiting fragments.
    pub fn placeholder(id: MessageId) -> Self {
        Message::Model {
            id,
            text: String::new(),
            is_error: false,
        }
    }

    pub fn id(&self) -> MessageId {
        match self {
            Message::User { id, .. } | Message::Model { id, .. } => *id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::User { .. } => Role::User,
            Message::Model { .. } => Role::Model,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Message::User { text, .. } | Message::Model { text, .. } => text,
        }
    }

    /// Images attached to the message; always empty for model messages.
    pub fn images(&self) -> &[ImageAttachment] {
        match self {
            Message::User { images, .. } => images,
            Message::Model { .. } => &[],
        }
    }

    /// True when a model reply failed and carries the apology text.
    pub fn is_error(&self) -> bool {
        match self {
            Message::User { .. } => false,
            Message::Model { is_error, .. } => *is_error,
        }
    }

    /// The role/text pair sent as history; images are dropped.
    pub fn to_history_turn(&self) -> HistoryTurn {
        HistoryTurn {
            role: self.role(),
            text: self.text().to_string(),
        }
    }
}

/// A text-only turn of prior conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

impl HistoryTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}
