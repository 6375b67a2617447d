//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which owns the transcript and the settings and
//! sequences one user turn at a time through the fragment source.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::chat::config::{ChatConfig, validate_temperature};
use crate::client::Gemini;
use crate::error::{Error, Result};
use crate::observability::{
    CHAT_IMAGE_TURNS, CHAT_TURN_CANCELLATIONS, CHAT_TURN_DURATION, CHAT_TURN_FAILURES, CHAT_TURNS,
    CHAT_TURNS_REJECTED,
};
use crate::render::Renderer;
use crate::streaming::{FragmentSource, GeminiSource};
use crate::transcript::{MessagePatch, Transcript};
use crate::types::{HistoryTurn, ImageAttachment, Message, MessageId, Model};

/// Text that replaces a reply whose stream failed.
pub const APOLOGY_TEXT: &str = "Sorry, I ran into a problem answering that. Please try again.";

/// Where the most recent turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No turn has been sent yet.
    Idle,
    /// The request is on its way; no fragment has arrived.
    Sending,
    /// Fragments are arriving.
    Streaming,
    /// The stream ended normally.
    Completed,
    /// The request or stream failed.
    Failed,
    /// The user cancelled the turn.
    Cancelled,
}

impl TurnState {
    /// True while a turn is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, TurnState::Sending | TurnState::Streaming)
    }
}

/// How a call to [`ChatSession::submit`] ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// Nothing to send; the transcript is unchanged.
    Empty,
    /// The reply streamed to completion.
    Completed {
        /// The model message holding the reply.
        message: MessageId,
        /// The full reply.
        text: String,
    },
    /// The request or stream failed; the reply now carries [`APOLOGY_TEXT`].
    Failed {
        /// The model message flagged as an error.
        message: MessageId,
        /// The underlying cause.
        error: Error,
    },
    /// The user cancelled; the reply keeps the text received so far.
    Cancelled {
        /// The partially filled model message.
        message: MessageId,
    },
}

/// Aggregated stats for a chat session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Model for text turns.
    pub text_model: Model,
    /// Model for image turns.
    pub vision_model: Model,
    /// The number of messages in the transcript.
    pub message_count: usize,
    /// The system instruction, if any.
    pub system_instruction: Option<String>,
    /// The sampling temperature.
    pub temperature: f32,
    /// State of the most recent turn.
    pub state: TurnState,
    /// Turns that streamed to completion.
    pub turns_completed: u64,
    /// Turns that ended with an apology.
    pub turns_failed: u64,
    /// Turns cancelled by the user.
    pub turns_cancelled: u64,
    /// Fragments received across all turns.
    pub fragments_received: u64,
}

/// A chat session that manages conversation state and API interactions.
///
/// All methods take `&self`; the transcript and settings sit behind short-lived locks that are
/// never held across an await.  At most one turn is in flight at a time.
pub struct ChatSession<S: FragmentSource = GeminiSource> {
    source: S,
    config: Mutex<ChatConfig>,
    transcript: Mutex<Transcript>,
    state: Mutex<TurnState>,
    busy: AtomicBool,
    turns_completed: AtomicU64,
    turns_failed: AtomicU64,
    turns_cancelled: AtomicU64,
    fragments_received: AtomicU64,
}

impl ChatSession<GeminiSource> {
    /// Creates a new chat session with the given client and configuration.
    pub fn new(client: Gemini, config: ChatConfig) -> Self {
        Self::with_source(GeminiSource::new(client), config)
    }
}

impl<S: FragmentSource> ChatSession<S> {
    /// Creates a new chat session with a custom fragment source.
    pub fn with_source(source: S, config: ChatConfig) -> Self {
        Self {
            source,
            config: Mutex::new(config),
            transcript: Mutex::new(Transcript::new()),
            state: Mutex::new(TurnState::Idle),
            busy: AtomicBool::new(false),
            turns_completed: AtomicU64::new(0),
            turns_failed: AtomicU64::new(0),
            turns_cancelled: AtomicU64::new(0),
            fragments_received: AtomicU64::new(0),
        }
    }

    /// Sends a user turn and streams the reply into the transcript.
    ///
    /// This method:
    /// 1. Appends the user message and an empty model placeholder
    /// 2. Sends the text and images with the history that preceded them
    /// 3. Grows the placeholder and renders each fragment as it arrives
    /// 4. Replaces the placeholder with [`APOLOGY_TEXT`] if anything fails
    ///
    /// A blank turn without images returns [`TurnOutcome::Empty`] and touches nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] while another turn is in flight.  Transport failures are not
    /// errors of this method; they are reported as [`TurnOutcome::Failed`].
    pub async fn submit(
        &self,
        text: &str,
        images: Vec<ImageAttachment>,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        if text.trim().is_empty() && images.is_empty() {
            return Ok(TurnOutcome::Empty);
        }
        let _busy = BusyGuard::acquire(&self.busy)?;
        let start = Instant::now();
        CHAT_TURNS.click();
        if !images.is_empty() {
            CHAT_IMAGE_TURNS.click();
        }

        let config = self.config();
        let (history, placeholder) = {
            let mut transcript = lock(&self.transcript);
            let history = transcript.history();
            transcript.push_user(text, images.clone())?;
            (history, transcript.push_placeholder())
        };
        self.set_state(TurnState::Sending);
        renderer.start_response();

        let outcome = self
            .stream_reply(text, &images, &history, &config, placeholder, renderer, cancel)
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => self.fail(placeholder, error, renderer)?,
        };
        match &outcome {
            TurnOutcome::Completed { .. } => {
                self.turns_completed.fetch_add(1, Ordering::Relaxed);
                self.set_state(TurnState::Completed);
                renderer.finish_response();
            }
            TurnOutcome::Failed { .. } => {
                self.turns_failed.fetch_add(1, Ordering::Relaxed);
                self.set_state(TurnState::Failed);
            }
            TurnOutcome::Cancelled { .. } => {
                CHAT_TURN_CANCELLATIONS.click();
                self.turns_cancelled.fetch_add(1, Ordering::Relaxed);
                self.set_state(TurnState::Cancelled);
                renderer.print_interrupted();
            }
            TurnOutcome::Empty => {}
        }
        CHAT_TURN_DURATION.add(start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_reply(
        &self,
        text: &str,
        images: &[ImageAttachment],
        history: &[HistoryTurn],
        config: &ChatConfig,
        placeholder: MessageId,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let mut fragments = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(TurnOutcome::Cancelled { message: placeholder });
            }
            fragments = self.source.send(text, images, history, config) => fragments?,
        };
        self.set_state(TurnState::Streaming);

        let mut reply = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(id = %placeholder, bytes = reply.len(), "turn cancelled");
                    return Ok(TurnOutcome::Cancelled { message: placeholder });
                }
                next = fragments.next() => next,
            };
            match next {
                Some(Ok(fragment)) => {
                    self.fragments_received.fetch_add(1, Ordering::Relaxed);
                    reply.push_str(&fragment);
                    lock(&self.transcript)
                        .update_by_id(placeholder, MessagePatch::SetText(reply.clone()))?;
                    renderer.print_text(&fragment);
                }
                Some(Err(err)) => return Err(err),
                None => {
                    tracing::debug!(id = %placeholder, bytes = reply.len(), "turn completed");
                    return Ok(TurnOutcome::Completed {
                        message: placeholder,
                        text: reply,
                    });
                }
            }
        }
    }

    fn fail(
        &self,
        placeholder: MessageId,
        error: Error,
        renderer: &mut dyn Renderer,
    ) -> Result<TurnOutcome> {
        CHAT_TURN_FAILURES.click();
        tracing::warn!(id = %placeholder, error = %error, "turn failed");
        lock(&self.transcript)
            .update_by_id(placeholder, MessagePatch::Fail(APOLOGY_TEXT.to_string()))?;
        renderer.print_failure(APOLOGY_TEXT);
        renderer.print_error(&error.to_string());
        Ok(TurnOutcome::Failed {
            message: placeholder,
            error,
        })
    }

    /// Clears the conversation history.  Settings are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] while a turn is in flight.
    pub fn clear(&self) -> Result<()> {
        let _busy = BusyGuard::acquire(&self.busy)?;
        lock(&self.transcript).clear();
        Ok(())
    }

    /// True while a turn is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// State of the most recent turn.
    pub fn state(&self) -> TurnState {
        *lock(&self.state)
    }

    /// Snapshot of the transcript.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.transcript).messages().to_vec()
    }

    /// Returns the number of messages in the conversation.
    pub fn message_count(&self) -> usize {
        lock(&self.transcript).len()
    }

    /// Watches the transcript revision; it changes on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        lock(&self.transcript).subscribe()
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> ChatConfig {
        lock(&self.config).clone()
    }

    /// Sets or clears the system instruction.
    pub fn set_system_instruction(&self, instruction: Option<String>) {
        lock(&self.config).system_instruction = instruction.filter(|s| !s.trim().is_empty());
    }

    /// Sets the sampling temperature.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless the value is within `[0, 2]`.
    pub fn set_temperature(&self, temperature: f32) -> Result<()> {
        lock(&self.config).temperature = validate_temperature(temperature)?;
        Ok(())
    }

    /// Changes the model used for text turns.
    pub fn set_text_model(&self, model: Model) {
        lock(&self.config).text_model = model;
    }

    /// Changes the model used for image turns.
    pub fn set_vision_model(&self, model: Model) {
        lock(&self.config).vision_model = model;
    }

    /// Returns the current session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        let config = self.config();
        SessionStats {
            text_model: config.text_model,
            vision_model: config.vision_model,
            message_count: self.message_count(),
            system_instruction: config.system_instruction,
            temperature: config.temperature,
            state: self.state(),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            turns_failed: self.turns_failed.load(Ordering::Relaxed),
            turns_cancelled: self.turns_cancelled.load(Ordering::Relaxed),
            fragments_received: self.fragments_received.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: TurnState) {
        *lock(&self.state) = state;
    }
}

/// Holds the busy flag for the duration of a turn.
#[derive(Debug)]
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(busy: &'a AtomicBool) -> Result<Self> {
        if busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            CHAT_TURNS_REJECTED.click();
            return Err(Error::Busy);
        }
        Ok(Self { busy })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KnownModel;

    #[test]
    fn new_session_empty() {
        let client = Gemini::new(Some("test-key".to_string())).unwrap();
        let session = ChatSession::new(client, ChatConfig::default());
        assert_eq!(session.message_count(), 0);
        assert_eq!(session.state(), TurnState::Idle);
        assert!(!session.is_busy());
    }

    #[test]
    fn settings_are_mutable() {
        let client = Gemini::new(Some("test-key".to_string())).unwrap();
        let session = ChatSession::new(client, ChatConfig::default());

        session.set_system_instruction(Some("Be helpful".to_string()));
        assert_eq!(
            session.config().system_instruction.as_deref(),
            Some("Be helpful")
        );
        session.set_system_instruction(Some("   ".to_string()));
        assert!(session.config().system_instruction.is_none());

        session.set_temperature(0.3).unwrap();
        assert_eq!(session.config().temperature, 0.3);
        assert!(session.set_temperature(3.0).unwrap_err().is_validation());
        assert_eq!(session.config().temperature, 0.3);

        session.set_text_model(Model::Known(KnownModel::Gemini15Pro));
        session.set_vision_model(Model::Custom("my-vision".to_string()));
        let stats = session.stats();
        assert_eq!(stats.text_model, Model::Known(KnownModel::Gemini15Pro));
        assert_eq!(stats.vision_model, Model::Custom("my-vision".to_string()));
    }

    #[test]
    fn busy_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = BusyGuard::acquire(&flag).unwrap();
        assert!(BusyGuard::acquire(&flag).unwrap_err().is_busy());
        drop(guard);
        assert!(BusyGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn turn_state_activity() {
        assert!(TurnState::Sending.is_active());
        assert!(TurnState::Streaming.is_active());
        assert!(!TurnState::Idle.is_active());
        assert!(!TurnState::Failed.is_active());
    }
}
