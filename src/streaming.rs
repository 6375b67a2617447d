//! Turning one user turn into a stream of text fragments.
//!
//! [`FragmentSource`] is the seam between the chat session and the network: the session hands it
//! the prompt, attached images, prior history and a snapshot of the settings, and consumes the
//! fragments it yields.  [`GeminiSource`] is the implementation backed by [`Gemini`].

use std::pin::Pin;
use std::time::Instant;

use futures::stream::{Stream, StreamExt};

use crate::chat::ChatConfig;
use crate::client::Gemini;
use crate::error::{Error, Result};
use crate::observability::{STREAM_CHUNKS, STREAM_ERRORS, STREAM_FRAGMENTS, STREAM_TTFB};
use crate::types::{
    Content, GenerateContentRequest, GenerateContentResponse, HistoryTurn, ImageAttachment, Model,
    Part, Role,
};

/// Lazy, finite, non-restartable sequence of text fragments in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Produces the fragments of a model reply for one user turn.
#[async_trait::async_trait]
pub trait FragmentSource: Send + Sync {
    /// Issue one request and return its fragments.
    ///
    /// Fails before yielding anything when the request cannot be issued; fails mid-stream when
    /// the response breaks off.  Nothing is retried.
    async fn send(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
        history: &[HistoryTurn],
        config: &ChatConfig,
    ) -> Result<FragmentStream>;
}

/// Choose the model for a turn: the vision model whenever images are attached.
pub fn select_model<'a>(images: &[ImageAttachment], config: &'a ChatConfig) -> &'a Model {
    if images.is_empty() {
        &config.text_model
    } else {
        &config.vision_model
    }
}

/// Text sent in place of an earlier user turn that carried only images.
pub const IMAGE_TURN_TEXT: &str = "[image]";

/// Build the request for a turn.
///
/// Turns with images are single-turn: every image followed by the prompt, no history.  Text-only
/// turns carry the prior history, oldest first, followed by the prompt.
pub fn build_request(
    prompt: &str,
    images: &[ImageAttachment],
    history: &[HistoryTurn],
    config: &ChatConfig,
) -> GenerateContentRequest {
    let contents = if images.is_empty() {
        let mut contents = history_contents(history);
        contents.push(Content::user_text(prompt));
        contents
    } else {
        let mut parts: Vec<Part> = images.iter().map(Part::image).collect();
        if !prompt.trim().is_empty() {
            parts.push(Part::text(prompt));
        }
        vec![Content::new(Role::User, parts)]
    };
    GenerateContentRequest::new(contents)
        .with_system_instruction(config.system_instruction.as_deref())
        .with_temperature(config.temperature)
}

/// Convert prior turns to contents whose roles alternate user, model, user, ...
fn history_contents(history: &[HistoryTurn]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::with_capacity(history.len());
    for turn in history {
        let blank = turn.text.trim().is_empty();
        match turn.role {
            Role::User if blank => contents.push(Content::user_text(IMAGE_TURN_TEXT)),
            Role::Model if blank => {
                // Unanswered question; drop it with the empty reply.
                if contents.last().is_some_and(|c| c.role == Some(Role::User)) {
                    contents.pop();
                }
            }
            _ => contents.push(Content::from(turn)),
        }
    }
    contents
}

/// Map a stream of response chunks to the text fragments they carry.
///
/// Chunks without text yield nothing; a refused prompt ends the stream with [`Error::Blocked`].
///
/// ```
/// # tokio_test::block_on(async {
/// use futures::{StreamExt, stream};
/// use parley::GenerateContentResponse;
/// use parley::streaming::fragments;
///
/// let chunks = stream::iter(vec![Ok(GenerateContentResponse::default())]);
/// let texts: Vec<_> = fragments(chunks).collect().await;
/// assert!(texts.is_empty());
/// # })
/// ```
pub fn fragments<S>(chunks: S) -> FragmentStream
where
    S: Stream<Item = Result<GenerateContentResponse>> + Send + 'static,
{
    let start = Instant::now();
    let mut first = true;
    let stream = chunks.filter_map(move |chunk| {
        if first {
            STREAM_TTFB.add(start.elapsed().as_secs_f64());
            first = false;
        }
        let item = match chunk {
            Ok(chunk) => {
                STREAM_CHUNKS.click();
                if let Some(reason) = chunk.block_reason() {
                    STREAM_ERRORS.click();
                    Some(Err(Error::blocked(reason)))
                } else {
                    chunk.text().map(|text| {
                        STREAM_FRAGMENTS.click();
                        Ok(text)
                    })
                }
            }
            Err(err) => {
                STREAM_ERRORS.click();
                Some(Err(err))
            }
        };
        futures::future::ready(item)
    });
    Box::pin(stream)
}

/// Fragment source backed by the Gemini streaming endpoint.
#[derive(Debug, Clone)]
pub struct GeminiSource {
    client: Gemini,
}

impl GeminiSource {
    pub fn new(client: Gemini) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Gemini {
        &self.client
    }
}

#[async_trait::async_trait]
impl FragmentSource for GeminiSource {
    async fn send(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
        history: &[HistoryTurn],
        config: &ChatConfig,
    ) -> Result<FragmentStream> {
        if prompt.trim().is_empty() && images.is_empty() {
            return Err(Error::validation(
                "nothing to send: prompt and images are both empty",
                Some("prompt".to_string()),
            ));
        }
        let model = select_model(images, config);
        let request = build_request(prompt, images, history, config);
        tracing::debug!(
            model = %model,
            images = images.len(),
            history = history.len(),
            "streaming turn"
        );
        let chunks = self.client.stream_generate(model, &request).await?;
        Ok(fragments(chunks))
    }
}
