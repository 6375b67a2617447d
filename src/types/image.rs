use std::fmt;
use std::fs;
use std::path::Path;

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MIME type of an image attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageMimeType {
    Png,
    Jpeg,
    Webp,
    Heic,
    Heif,
    Gif,
    /// Any other `image/*` type; passed through to the API unchanged.
    Other(String),
}

impl ImageMimeType {
    /// Infers the MIME type from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageMimeType::Png),
            "jpg" | "jpeg" => Some(ImageMimeType::Jpeg),
            "webp" => Some(ImageMimeType::Webp),
            "heic" => Some(ImageMimeType::Heic),
            "heif" => Some(ImageMimeType::Heif),
            "gif" => Some(ImageMimeType::Gif),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageMimeType::Png => "image/png",
            ImageMimeType::Jpeg => "image/jpeg",
            ImageMimeType::Webp => "image/webp",
            ImageMimeType::Heic => "image/heic",
            ImageMimeType::Heif => "image/heif",
            ImageMimeType::Gif => "image/gif",
            ImageMimeType::Other(other) => other,
        }
    }
}

impl fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ImageMimeType {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "image/png" => ImageMimeType::Png,
            "image/jpeg" | "image/jpg" => ImageMimeType::Jpeg,
            "image/webp" => ImageMimeType::Webp,
            "image/heic" => ImageMimeType::Heic,
            "image/heif" => ImageMimeType::Heif,
            "image/gif" => ImageMimeType::Gif,
            other => ImageMimeType::Other(other.to_string()),
        }
    }
}

impl Serialize for ImageMimeType {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ImageMimeType {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ImageMimeType::from(s.as_str()))
    }
}

/// Inline binary payload as carried in a request part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// MIME type of the payload.
    pub mime_type: ImageMimeType,
    /// Base64-encoded payload.
    pub data: String,
}

/// An image attached to a user turn.
///
/// Attachments live only in memory for the duration of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    mime_type: ImageMimeType,
    data: Bytes,
}

impl ImageAttachment {
    /// Creates an attachment from raw bytes.
    pub fn new(mime_type: ImageMimeType, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type,
            data: data.into(),
        }
    }

    /// Reads an image file, inferring its MIME type from the extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mime_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageMimeType::from_extension)
            .ok_or_else(|| {
                Error::validation(
                    format!(
                        "unsupported image extension for {} (expected png, jpeg, webp, heic, heif or gif)",
                        path.display()
                    ),
                    Some("image".to_string()),
                )
            })?;
        let data = fs::read(path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        Ok(Self::new(mime_type, data))
    }

    /// Parses a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url.trim().strip_prefix("data:").ok_or_else(|| {
            Error::validation("image data URL must start with 'data:'", Some("image".to_string()))
        })?;
        let (header, payload) = rest.split_once(',').ok_or_else(|| {
            Error::validation("image data URL is missing ','", Some("image".to_string()))
        })?;
        let mime = header.strip_suffix(";base64").ok_or_else(|| {
            Error::validation("image data URL must be base64 encoded", Some("image".to_string()))
        })?;
        if !mime.to_ascii_lowercase().starts_with("image/") {
            return Err(Error::validation(
                format!("data URL carries {mime}, not an image"),
                Some("image".to_string()),
            ));
        }
        let data = base64::engine::general_purpose::STANDARD.decode(payload)?;
        Ok(Self::new(ImageMimeType::from(mime), data))
    }

    pub fn mime_type(&self) -> &ImageMimeType {
        &self.mime_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size of the decoded payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Base64 encoding of the payload.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Self-describing embeddable form: `data:<mime>;base64,<payload>`.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// The request part payload for this image.
    pub fn to_inline_data(&self) -> InlineData {
        InlineData {
            mime_type: self.mime_type.clone(),
            data: self.to_base64(),
        }
    }
}
