//! Conversation-level tests for the chat session.
//! These drive `ChatSession` with a scripted fragment source and need no network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use parley::chat::{APOLOGY_TEXT, ChatConfig, ChatSession, Renderer, TurnOutcome, TurnState};
use parley::streaming::{FragmentSource, FragmentStream, build_request};
use parley::{
    Error, HistoryTurn, ImageAttachment, ImageMimeType, KnownModel, Message, Model, Part, Result,
    Role,
};

enum Script {
    Reply(Vec<&'static str>),
    FailBeforeStream,
    FailAfter(Vec<&'static str>),
    Gated(Arc<Notify>, &'static str),
    Hang(Vec<&'static str>),
}

#[derive(Debug, Clone)]
struct Call {
    prompt: String,
    images: usize,
    history: Vec<HistoryTurn>,
    config: ChatConfig,
}

struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedSource {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            calls: Arc::default(),
        }
    }

    fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        Arc::clone(&self.calls)
    }
}

fn text_stream(fragments: Vec<&'static str>) -> impl futures::Stream<Item = Result<String>> {
    stream::iter(fragments.into_iter().map(|f| Ok(f.to_string())))
}

#[async_trait::async_trait]
impl FragmentSource for ScriptedSource {
    async fn send(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
        history: &[HistoryTurn],
        config: &ChatConfig,
    ) -> Result<FragmentStream> {
        self.calls.lock().unwrap().push(Call {
            prompt: prompt.to_string(),
            images: images.len(),
            history: history.to_vec(),
            config: config.clone(),
        });
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no script left for this turn");
        match script {
            Script::Reply(fragments) => Ok(Box::pin(text_stream(fragments))),
            Script::FailBeforeStream => Err(Error::connection("connection refused", None)),
            Script::FailAfter(fragments) => Ok(Box::pin(text_stream(fragments).chain(
                stream::once(async { Err(Error::streaming("stream reset", None)) }),
            ))),
            Script::Gated(gate, fragment) => Ok(Box::pin(stream::once(async move {
                gate.notified().await;
                Ok(fragment.to_string())
            }))),
            Script::Hang(fragments) => {
                Ok(Box::pin(text_stream(fragments).chain(stream::pending())))
            }
        }
    }
}

#[derive(Default)]
struct RecordingRenderer {
    printed: String,
    failures: Vec<String>,
    errors: Vec<String>,
    finished: usize,
    interrupted: usize,
    cancel_on_text: Option<CancellationToken>,
}

impl Renderer for RecordingRenderer {
    fn print_text(&mut self, text: &str) {
        self.printed.push_str(text);
        if let Some(token) = &self.cancel_on_text {
            token.cancel();
        }
    }

    fn finish_response(&mut self) {
        self.finished += 1;
    }

    fn print_failure(&mut self, apology: &str) {
        self.failures.push(apology.to_string());
    }

    fn print_error(&mut self, error: &str) {
        self.errors.push(error.to_string());
    }

    fn print_info(&mut self, _info: &str) {}

    fn print_interrupted(&mut self) {
        self.interrupted += 1;
    }

    fn render_message(&mut self, message: &Message) {
        self.printed.push_str(message.text());
    }
}

fn png() -> ImageAttachment {
    ImageAttachment::new(ImageMimeType::Png, &b"\x89PNG fake"[..])
}

#[tokio::test]
async fn completed_turns_add_two_messages_each() {
    let source = ScriptedSource::new(vec![
        Script::Reply(vec!["Hel", "lo", "!"]),
        Script::Reply(vec!["Fine, ", "thanks."]),
        Script::Reply(vec!["Bye."]),
    ]);
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut renderer = RecordingRenderer::default();
    let cancel = CancellationToken::new();

    for prompt in ["Hi", "How are you?", "Goodbye"] {
        let outcome = session
            .submit(prompt, Vec::new(), &mut renderer, &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
    }

    let messages = session.messages();
    assert_eq!(messages.len(), 6);
    let roles: Vec<Role> = messages.iter().map(Message::role).collect();
    assert_eq!(
        roles,
        vec![
            Role::User,
            Role::Model,
            Role::User,
            Role::Model,
            Role::User,
            Role::Model
        ]
    );
    assert!(messages.iter().all(|m| !m.is_error()));
    assert_eq!(session.state(), TurnState::Completed);
    assert_eq!(renderer.finished, 3);
    assert_eq!(session.stats().turns_completed, 3);
    assert_eq!(session.stats().fragments_received, 6);
}

#[tokio::test]
async fn reply_is_concatenation_of_fragments() {
    let fragments = vec!["The ", "quick ", "brown ", "fox", ""];
    let source = ScriptedSource::new(vec![Script::Reply(fragments.clone())]);
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut renderer = RecordingRenderer::default();

    let outcome = session
        .submit("Tell me", Vec::new(), &mut renderer, &CancellationToken::new())
        .await
        .unwrap();

    let expected: String = fragments.concat();
    match outcome {
        TurnOutcome::Completed { text, message } => {
            assert_eq!(text, expected);
            assert_eq!(message, session.messages()[1].id());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(session.messages()[1].text(), expected);
    assert_eq!(renderer.printed, expected);
}

#[tokio::test]
async fn blank_turn_is_a_no_op() {
    let source = ScriptedSource::new(Vec::new());
    let calls = source.calls();
    let session = ChatSession::with_source(source, ChatConfig::new());
    let rx = session.subscribe();
    let mut renderer = RecordingRenderer::default();

    let outcome = session
        .submit("   \n\t", Vec::new(), &mut renderer, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, TurnOutcome::Empty));
    assert_eq!(session.message_count(), 0);
    assert!(calls.lock().unwrap().is_empty());
    assert!(!rx.has_changed().unwrap());
    assert_eq!(session.state(), TurnState::Idle);
}

#[tokio::test]
async fn failure_before_stream_replaces_placeholder_with_apology() {
    let source = ScriptedSource::new(vec![Script::FailBeforeStream]);
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut renderer = RecordingRenderer::default();

    let outcome = session
        .submit("Hello?", Vec::new(), &mut renderer, &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        TurnOutcome::Failed { error, .. } => assert!(error.is_transport()),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].is_error());
    assert_eq!(messages[1].text(), APOLOGY_TEXT);
    assert_eq!(renderer.failures, vec![APOLOGY_TEXT.to_string()]);
    assert_eq!(renderer.errors.len(), 1);
    assert_eq!(session.state(), TurnState::Failed);
}

#[tokio::test]
async fn failure_mid_stream_discards_partial_text() {
    let source = ScriptedSource::new(vec![Script::FailAfter(vec!["Once ", "upon "])]);
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut renderer = RecordingRenderer::default();

    let outcome = session
        .submit("Tell a story", Vec::new(), &mut renderer, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, TurnOutcome::Failed { .. }));
    let reply = &session.messages()[1];
    assert!(reply.is_error());
    assert_eq!(reply.text(), APOLOGY_TEXT);
    assert_eq!(renderer.printed, "Once upon ");
    assert_eq!(session.stats().turns_failed, 1);
}

#[tokio::test]
async fn session_recovers_after_failure() {
    let source = ScriptedSource::new(vec![
        Script::FailBeforeStream,
        Script::Reply(vec!["Back online."]),
    ]);
    let calls = source.calls();
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut renderer = RecordingRenderer::default();
    let cancel = CancellationToken::new();

    session
        .submit("First", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();
    let outcome = session
        .submit("Second", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed { .. }));
    assert_eq!(session.message_count(), 4);
    let calls = calls.lock().unwrap();
    assert_eq!(
        calls[1].history,
        vec![
            HistoryTurn::new(Role::User, "First"),
            HistoryTurn::new(Role::Model, APOLOGY_TEXT),
        ]
    );
}

#[tokio::test]
async fn concurrent_submit_is_rejected_while_busy() {
    let gate = Arc::new(Notify::new());
    let source = ScriptedSource::new(vec![Script::Gated(Arc::clone(&gate), "slow reply")]);
    let calls = source.calls();
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut first_renderer = RecordingRenderer::default();
    let mut second_renderer = RecordingRenderer::default();
    let cancel = CancellationToken::new();

    let first = session.submit("first", Vec::new(), &mut first_renderer, &cancel);
    let second = async {
        tokio::task::yield_now().await;
        assert!(session.is_busy());
        let result = session
            .submit("second", Vec::new(), &mut second_renderer, &cancel)
            .await;
        gate.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert!(matches!(first.unwrap(), TurnOutcome::Completed { .. }));
    assert!(second.unwrap_err().is_busy());
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text(), "first");
    assert_eq!(messages[1].text(), "slow reply");
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn clear_is_rejected_while_busy() {
    let gate = Arc::new(Notify::new());
    let source = ScriptedSource::new(vec![Script::Gated(Arc::clone(&gate), "done")]);
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut renderer = RecordingRenderer::default();
    let cancel = CancellationToken::new();

    let turn = session.submit("hold on", Vec::new(), &mut renderer, &cancel);
    let clear = async {
        tokio::task::yield_now().await;
        let result = session.clear();
        gate.notify_one();
        result
    };
    let (turn, clear) = tokio::join!(turn, clear);

    assert!(turn.is_ok());
    assert!(clear.unwrap_err().is_busy());
    assert_eq!(session.message_count(), 2);
}

#[tokio::test]
async fn text_turns_carry_full_history() {
    let source = ScriptedSource::new(vec![
        Script::Reply(vec!["Paris."]),
        Script::Reply(vec!["About 2 million."]),
    ]);
    let calls = source.calls();
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut renderer = RecordingRenderer::default();
    let cancel = CancellationToken::new();

    session
        .submit("Capital of France?", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();
    session
        .submit("Population?", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();

    let calls = calls.lock().unwrap();
    assert!(calls[0].history.is_empty());
    assert_eq!(calls[1].prompt, "Population?");
    assert_eq!(
        calls[1].history,
        vec![
            HistoryTurn::new(Role::User, "Capital of France?"),
            HistoryTurn::new(Role::Model, "Paris."),
        ]
    );
}

#[tokio::test]
async fn image_turns_reach_the_source_with_images() {
    let source = ScriptedSource::new(vec![
        Script::Reply(vec!["Hello."]),
        Script::Reply(vec!["A cat."]),
    ]);
    let calls = source.calls();
    let config = ChatConfig::new()
        .with_text_model(Model::Known(KnownModel::Gemini25Flash))
        .with_vision_model(Model::Known(KnownModel::Gemini25Pro));
    let session = ChatSession::with_source(source, config);
    let mut renderer = RecordingRenderer::default();
    let cancel = CancellationToken::new();

    session
        .submit("Hi", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();
    session
        .submit("", vec![png(), png()], &mut renderer, &cancel)
        .await
        .unwrap();

    let messages = session.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].images().len(), 2);
    assert_eq!(messages[3].text(), "A cat.");

    let calls = calls.lock().unwrap();
    assert_eq!(calls[1].images, 2);
    assert_eq!(calls[1].prompt, "");

    // The request built for that turn is single-turn and targets the vision model.
    let call = &calls[1];
    let images = vec![png(), png()];
    let request = build_request(&call.prompt, &images, &call.history, &call.config);
    assert_eq!(request.contents.len(), 1);
    assert_eq!(request.contents[0].role, Some(Role::User));
    assert!(
        request.contents[0]
            .parts
            .iter()
            .all(|part| matches!(part, Part::InlineData { .. }))
    );
    assert_eq!(
        parley::streaming::select_model(&images, &call.config),
        &Model::Known(KnownModel::Gemini25Pro)
    );
}

#[tokio::test]
async fn clear_empties_transcript_but_keeps_settings() {
    let source = ScriptedSource::new(vec![
        Script::Reply(vec!["One."]),
        Script::Reply(vec!["Two."]),
    ]);
    let calls = source.calls();
    let session = ChatSession::with_source(source, ChatConfig::new());
    session.set_system_instruction(Some("Answer in one word.".to_string()));
    session.set_temperature(0.4).unwrap();
    session.set_text_model(Model::Custom("gemini-experimental".to_string()));
    let mut renderer = RecordingRenderer::default();
    let cancel = CancellationToken::new();

    session
        .submit("Count", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();
    let before = session.messages();
    session.clear().unwrap();
    assert_eq!(session.message_count(), 0);

    let config = session.config();
    assert_eq!(config.system_instruction.as_deref(), Some("Answer in one word."));
    assert_eq!(config.temperature, 0.4);
    assert_eq!(config.text_model, Model::Custom("gemini-experimental".to_string()));

    session
        .submit("Again", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();
    let calls = calls.lock().unwrap();
    assert!(calls[1].history.is_empty());
    assert_eq!(calls[1].config.temperature, 0.4);
    // Ids keep increasing across a clear.
    assert!(session.messages()[0].id() > before[1].id());
}

#[tokio::test]
async fn settings_changes_apply_to_later_turns_only() {
    let source = ScriptedSource::new(vec![
        Script::Reply(vec!["a"]),
        Script::Reply(vec!["b"]),
    ]);
    let calls = source.calls();
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut renderer = RecordingRenderer::default();
    let cancel = CancellationToken::new();

    session
        .submit("one", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();
    session.set_temperature(0.0).unwrap();
    session
        .submit("two", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].config.temperature, 1.0);
    assert_eq!(calls[1].config.temperature, 0.0);
}

#[tokio::test]
async fn cancellation_keeps_partial_reply() {
    let source = ScriptedSource::new(vec![Script::Hang(vec!["partial"])]);
    let session = ChatSession::with_source(source, ChatConfig::new());
    let cancel = CancellationToken::new();
    let mut renderer = RecordingRenderer {
        cancel_on_text: Some(cancel.clone()),
        ..RecordingRenderer::default()
    };

    let outcome = session
        .submit("Go on forever", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();

    assert!(matches!(outcome, TurnOutcome::Cancelled { .. }));
    let reply = &session.messages()[1];
    assert_eq!(reply.text(), "partial");
    assert!(!reply.is_error());
    assert_eq!(renderer.interrupted, 1);
    assert_eq!(session.state(), TurnState::Cancelled);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn cancelled_before_send_leaves_empty_reply() {
    let source = ScriptedSource::new(vec![Script::Reply(vec!["never"])]);
    let calls = source.calls();
    let session = ChatSession::with_source(source, ChatConfig::new());
    let mut renderer = RecordingRenderer::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = session
        .submit("Stop", Vec::new(), &mut renderer, &cancel)
        .await
        .unwrap();

    assert!(matches!(outcome, TurnOutcome::Cancelled { .. }));
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text(), "");
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn transcript_revision_advances_with_each_fragment() {
    let source = ScriptedSource::new(vec![Script::Reply(vec!["a", "b", "c"])]);
    let session = ChatSession::with_source(source, ChatConfig::new());
    let rx = session.subscribe();
    let mut renderer = RecordingRenderer::default();

    session
        .submit("abc", Vec::new(), &mut renderer, &CancellationToken::new())
        .await
        .unwrap();

    // user message, placeholder, three fragments
    assert_eq!(*rx.borrow(), 5);
}
