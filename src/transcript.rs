//! In-memory conversation transcript.
//!
//! The transcript is an ordered list of [`Message`]s that lives for the duration of the session.
//! Mutations never reorder it, and every mutation bumps a revision counter that the presentation
//! layer can watch to know when to re-render.

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::types::{HistoryTurn, ImageAttachment, Message, MessageId};

/// A change applied to a model message by [`Transcript::update_by_id`].
///
/// Patches set state rather than accumulate it, so applying the same patch twice leaves the
/// message exactly as applying it once.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePatch {
    /// Replace the text of the message.
    SetText(String),
    /// Replace the text and flag the message as failed.
    Fail(String),
}

/// Ordered sequence of messages held in memory.
#[derive(Debug)]
pub struct Transcript {
    messages: Vec<Message>,
    next_id: u64,
    revision: watch::Sender<u64>,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            messages: Vec::new(),
            next_id: 1,
            revision,
        }
    }

    /// Allocates a fresh message id.  Ids are never reused, even across [`Transcript::clear`].
    pub fn next_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Appends a message and returns its id.
    pub fn append(&mut self, message: Message) -> MessageId {
        let id = message.id();
        self.messages.push(message);
        self.bump();
        id
    }

    /// Validates and appends a user message.
    pub fn push_user(
        &mut self,
        text: impl Into<String>,
        images: Vec<ImageAttachment>,
    ) -> Result<MessageId> {
        let id = self.next_id();
        let message = Message::user(id, text, images)?;
        Ok(self.append(message))
    }

    /// Appends an empty model message.
    pub fn push_placeholder(&mut self) -> MessageId {
        let id = self.next_id();
        self.append(Message::placeholder(id))
    }

    /// Applies `patch` to the model message with the given id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `Validation` when the id names a user message,
    /// whose text is immutable.
    pub fn update_by_id(&mut self, id: MessageId, patch: MessagePatch) -> Result<()> {
        let message = self
            .messages
            .iter_mut()
            .find(|message| message.id() == id)
            .ok_or_else(|| Error::not_found(format!("no message {id}"), Some("message".into())))?;
        let Message::Model { text, is_error, .. } = message else {
            return Err(Error::validation(
                format!("{id} is a user message and cannot be edited"),
                Some("id".to_string()),
            ));
        };
        match patch {
            MessagePatch::SetText(new_text) => {
                *text = new_text;
            }
            MessagePatch::Fail(apology) => {
                *text = apology;
                *is_error = true;
            }
        }
        self.bump();
        Ok(())
    }

    /// Discards every message.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.bump();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id() == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Role/text pairs for the whole transcript, images stripped.
    pub fn history(&self) -> Vec<HistoryTurn> {
        self.history_before(self.messages.len())
    }

    /// Role/text pairs for the first `index` messages.
    pub fn history_before(&self, index: usize) -> Vec<HistoryTurn> {
        self.messages[..index.min(self.messages.len())]
            .iter()
            .map(Message::to_history_turn)
            .collect()
    }

    /// Current revision; incremented by every mutation.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Watches the revision counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn append_preserves_order() {
        let mut transcript = Transcript::new();
        let user = transcript.push_user("hello", vec![]).unwrap();
        let model = transcript.push_placeholder();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].id(), user);
        assert_eq!(transcript.messages()[1].id(), model);
        assert_ne!(user, model);
    }

    #[test]
    fn empty_user_message_is_rejected() {
        let mut transcript = Transcript::new();
        assert!(transcript.push_user("", vec![]).unwrap_err().is_validation());
        assert!(transcript.is_empty());
        assert_eq!(transcript.revision(), 0);
    }

    #[test]
    fn update_is_idempotent() {
        let mut transcript = Transcript::new();
        transcript.push_user("hi", vec![]).unwrap();
        let id = transcript.push_placeholder();
        transcript.push_user("again", vec![]).unwrap();

        let patch = MessagePatch::SetText("Hello there".to_string());
        transcript.update_by_id(id, patch.clone()).unwrap();
        let once = transcript.messages().to_vec();
        transcript.update_by_id(id, patch).unwrap();
        assert_eq!(transcript.messages(), &once[..]);
        assert_eq!(transcript.messages()[1].text(), "Hello there");
        assert_eq!(transcript.messages()[2].text(), "again");
    }

    #[test]
    fn fail_sets_error_flag() {
        let mut transcript = Transcript::new();
        let id = transcript.push_placeholder();
        transcript
            .update_by_id(id, MessagePatch::SetText("partial".into()))
            .unwrap();
        transcript
            .update_by_id(id, MessagePatch::Fail("sorry".into()))
            .unwrap();
        let message = transcript.get(id).unwrap();
        assert!(message.is_error());
        assert_eq!(message.text(), "sorry");
    }

    #[test]
    fn user_messages_are_immutable() {
        let mut transcript = Transcript::new();
        let id = transcript.push_user("hello", vec![]).unwrap();
        let err = transcript
            .update_by_id(id, MessagePatch::SetText("edited".into()))
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(transcript.get(id).unwrap().text(), "hello");
    }

    #[test]
    fn unknown_id_is_not_found() {
        let mut transcript = Transcript::new();
        let id = transcript.next_id();
        let err = transcript
            .update_by_id(id, MessagePatch::SetText("x".into()))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn clear_keeps_ids_unique() {
        let mut transcript = Transcript::new();
        let first = transcript.push_user("one", vec![]).unwrap();
        transcript.clear();
        assert!(transcript.is_empty());
        let second = transcript.push_user("two", vec![]).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn history_before_index() {
        let mut transcript = Transcript::new();
        transcript.push_user("q1", vec![]).unwrap();
        let a1 = transcript.push_placeholder();
        transcript
            .update_by_id(a1, MessagePatch::SetText("a1".into()))
            .unwrap();
        transcript.push_user("q2", vec![]).unwrap();

        let history = transcript.history_before(2);
        assert_eq!(
            history,
            vec![HistoryTurn::new(Role::User, "q1"), HistoryTurn::new(Role::Model, "a1")]
        );
        assert_eq!(transcript.history().len(), 3);
        assert_eq!(transcript.history_before(99).len(), 3);
    }

    #[tokio::test]
    async fn subscribers_see_every_mutation() {
        let mut transcript = Transcript::new();
        let mut rx = transcript.subscribe();
        transcript.push_user("hi", vec![]).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
        let id = transcript.push_placeholder();
        transcript
            .update_by_id(id, MessagePatch::SetText("yo".into()))
            .unwrap();
        transcript.clear();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 4);
        assert_eq!(transcript.revision(), 4);
    }
}
