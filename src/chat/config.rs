//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the settings record that
//! parameterizes every request.

use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::error::{Error, Result};
use crate::types::{KnownModel, Model};

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

/// Highest temperature the API accepts.
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Command-line arguments for the parley-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Model used for text-only turns.
    #[arrrg(optional, "Model for text turns (default: gemini-2.5-flash)", "MODEL")]
    pub text_model: Option<String>,

    /// Model used for turns with images attached.
    #[arrrg(optional, "Model for image turns (default: gemini-2.5-pro)", "MODEL")]
    pub vision_model: Option<String>,

    /// System instruction for the conversation.
    #[arrrg(optional, "System instruction for the conversation", "TEXT")]
    pub system: Option<String>,

    /// Sampling temperature.
    #[arrrg(optional, "Sampling temperature 0.0-2.0 (default: 1.0)", "TEMP")]
    pub temperature: Option<String>,

    /// API key; falls back to GEMINI_API_KEY.
    #[arrrg(optional, "API key (default: $GEMINI_API_KEY)", "KEY")]
    pub api_key: Option<String>,

    /// Alternate API endpoint.
    #[arrrg(optional, "API base URL", "URL")]
    pub base_url: Option<String>,

    /// Connection timeout.
    #[arrrg(optional, "Connect timeout in seconds (default: 60)", "SECS")]
    pub timeout_secs: Option<u64>,

    /// Send one prompt, print the reply and exit.
    #[arrrg(optional, "Send a single prompt without streaming and exit", "PROMPT")]
    pub prompt: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Settings for a chat session.
///
/// The session reads a snapshot of this record each time it sends a turn, so changes never affect
/// turns already sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Model used when no images are attached.
    pub text_model: Model,

    /// Model used when one or more images are attached.
    pub vision_model: Model,

    /// Optional system instruction.
    pub system_instruction: Option<String>,

    /// Sampling temperature in `[0, 2]`.
    pub temperature: f32,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Alternate API endpoint.
    pub base_url: Option<String>,

    /// Connection timeout.
    pub timeout: Option<Duration>,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Text model: gemini-2.5-flash
    /// - Vision model: gemini-2.5-pro
    /// - Temperature: 1.0
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            text_model: Model::Known(KnownModel::Gemini25Flash),
            vision_model: Model::Known(KnownModel::Gemini25Pro),
            system_instruction: None,
            temperature: DEFAULT_TEMPERATURE,
            use_color: true,
            base_url: None,
            timeout: None,
        }
    }

    /// Sets the text model.
    pub fn with_text_model(mut self, model: Model) -> Self {
        self.text_model = model;
        self
    }

    /// Sets the vision model.
    pub fn with_vision_model(mut self, model: Model) -> Self {
        self.vision_model = model;
        self
    }

    /// Sets the system instruction.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Sets the sampling temperature.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless the value is finite and within `[0, 2]`.
    pub fn with_temperature(mut self, temperature: f32) -> Result<Self> {
        self.temperature = validate_temperature(temperature)?;
        Ok(self)
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the API base URL.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    /// Sets the connection timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<ChatArgs> for ChatConfig {
    type Error = Error;

    fn try_from(args: ChatArgs) -> Result<Self> {
        let mut config = ChatConfig::new();
        if let Some(model) = args.text_model {
            config.text_model = parse_model(&model);
        }
        if let Some(model) = args.vision_model {
            config.vision_model = parse_model(&model);
        }
        if let Some(temperature) = args.temperature {
            config = config.with_temperature(parse_temperature(&temperature)?)?;
        }
        config.system_instruction = args.system.filter(|s| !s.trim().is_empty());
        config.use_color = !args.no_color;
        config.base_url = args.base_url;
        config.timeout = args.timeout_secs.map(Duration::from_secs);
        Ok(config)
    }
}

/// Parses a model name, falling back to a custom identifier.
pub fn parse_model(name: &str) -> Model {
    name.parse()
        .unwrap_or_else(|_| Model::Custom(name.trim().to_string()))
}

/// Parses a temperature given as text; range checking is left to [`validate_temperature`].
pub fn parse_temperature(value: &str) -> Result<f32> {
    value.trim().parse().map_err(|_| {
        Error::validation(
            format!("temperature must be a number, got {value:?}"),
            Some("temperature".to_string()),
        )
    })
}

/// Checks that `temperature` lies within `[0, 2]`.
pub fn validate_temperature(temperature: f32) -> Result<f32> {
    if temperature.is_finite() && (0.0..=MAX_TEMPERATURE).contains(&temperature) {
        Ok(temperature)
    } else {
        Err(Error::validation(
            format!("temperature must be between 0 and {MAX_TEMPERATURE}, got {temperature}"),
            Some("temperature".to_string()),
        ))
    }
}
