use serde::{Deserialize, Serialize};

use crate::types::{HistoryTurn, ImageAttachment, InlineData, Role};

/// One part of a content entry: text or inline binary data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Part {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },

    /// Inline media, such as an image.
    InlineData {
        /// The payload.
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },

    /// Any part this client does not interpret (function calls, file references, ...).
    Other(serde_json::Value),
}

impl Part {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Creates an inline-data part from an image.
    pub fn image(image: &ImageAttachment) -> Self {
        Part::InlineData {
            inline_data: image.to_inline_data(),
        }
    }

    /// Returns the text of a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A role-tagged list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Content {
    /// `user` or `model`; omitted for system instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// The parts making up this content.
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Creates content for the given role.
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role: Some(role),
            parts,
        }
    }

    /// Creates a user content entry holding a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Creates role-less content, as used for the system instruction.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenates every text part.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}

impl From<&HistoryTurn> for Content {
    fn from(turn: &HistoryTurn) -> Self {
        Content::new(turn.role, vec![Part::text(turn.text.clone())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageMimeType;
    use serde_json::{json, to_value};

    #[test]
    fn text_part_serialization() {
        let content = Content::user_text("Hello");
        assert_eq!(
            to_value(&content).unwrap(),
            json!({"role": "user", "parts": [{"text": "Hello"}]})
        );
    }

    #[test]
    fn image_part_serialization() {
        let image = ImageAttachment::new(ImageMimeType::Png, &b"Hello World"[..]);
        let content = Content::new(Role::User, vec![Part::image(&image), Part::text("describe")]);
        assert_eq!(
            to_value(&content).unwrap(),
            json!({
                "role": "user",
                "parts": [
                    {"inlineData": {"mimeType": "image/png", "data": "SGVsbG8gV29ybGQ="}},
                    {"text": "describe"}
                ]
            })
        );
    }

    #[test]
    fn system_content_has_no_role() {
        assert_eq!(
            to_value(Content::system("Be brief.")).unwrap(),
            json!({"parts": [{"text": "Be brief."}]})
        );
    }

    #[test]
    fn unknown_parts_are_tolerated() {
        let content: Content = serde_json::from_value(json!({
            "role": "model",
            "parts": [
                {"text": "Hel", "thought": false},
                {"functionCall": {"name": "lookup", "args": {}}},
                {"text": "lo"}
            ]
        }))
        .unwrap();
        assert_eq!(content.role, Some(Role::Model));
        assert!(matches!(content.parts[1], Part::Other(_)));
        assert_eq!(content.text(), "Hello");
    }
}
