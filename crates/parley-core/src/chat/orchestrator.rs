//! Streamed completion orchestration for a single chat turn.
//!
//! A turn runs in two phases so that failures before the first byte can
//! still be reported as a plain HTTP error:
//!
//! 1. [`CompletionOrchestrator::begin`] resolves the chat, takes the chat's
//!    lock, persists the user message, reads the ordered history, and opens
//!    the provider stream (waiting for the provider to accept the request).
//! 2. [`PendingTurn::relay`] forwards every text fragment to a
//!    [`StreamResponder`] while accumulating it, then persists the
//!    accumulated text as the assistant message and closes the responder.
//!
//! Interrupted turns (provider error, client disconnect, deadline) persist
//! whatever was already delivered as a `truncated` assistant message. A
//! turn that delivered nothing persists nothing.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use parley_types::chat::{Message, MessageRole};
use parley_types::config::GlobalConfig;
use parley_types::error::ChatError;
use parley_types::llm::{self, CompletionRequest, LlmError, StopReason, StreamEvent, Usage};

use crate::chat::locks::{ChatLockGuard, ChatLocks};
use crate::chat::repository::ChatRepository;
use crate::chat::responder::StreamResponder;
use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::provider::EventStream;

/// Request parameters applied to every completion.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    /// Deadline for one turn, from opening the provider stream to the last fragment.
    pub timeout: Duration,
}

impl CompletionSettings {
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            system_prompt: config.provider.system_prompt.clone(),
            max_tokens: config.provider.max_tokens,
            temperature: config.provider.temperature,
            timeout: Duration::from_secs(config.completion.timeout_secs),
        }
    }
}

/// How a relayed turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// The provider stream ended normally.
    Completed,
    /// The provider stream failed mid-delivery.
    ProviderFailed(String),
    /// The client went away before the stream ended.
    ClientDisconnected,
    /// The turn ran past its deadline.
    TimedOut,
}

impl TurnStatus {
    pub fn is_interrupted(&self) -> bool {
        !matches!(self, TurnStatus::Completed)
    }
}

/// Result of relaying one turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Number of fragments delivered to the client.
    pub fragments: usize,
    /// The persisted assistant message, if one was written.
    pub assistant_message: Option<Message>,
    /// Set when the assistant message could not be persisted.
    pub persist_error: Option<String>,
    pub usage: Option<Usage>,
    pub stop_reason: Option<StopReason>,
}

/// Drives completion turns against a repository and a provider.
///
/// Generic over `ChatRepository`; the provider is type-erased so it can be
/// selected at runtime.
pub struct CompletionOrchestrator<C: ChatRepository> {
    chat_repo: Arc<C>,
    provider: Arc<BoxLlmProvider>,
    locks: ChatLocks,
    settings: CompletionSettings,
}

impl<C: ChatRepository> CompletionOrchestrator<C> {
    pub fn new(chat_repo: Arc<C>, provider: Arc<BoxLlmProvider>, settings: CompletionSettings) -> Self {
        Self {
            chat_repo,
            provider,
            locks: ChatLocks::new(),
            settings,
        }
    }

    /// Start a turn: everything up to and including opening the provider stream.
    ///
    /// # Errors
    ///
    /// - [`ChatError::NotFound`] if the chat does not exist (nothing is written).
    /// - [`ChatError::Persistence`] if the user message cannot be stored
    ///   (the provider is never called).
    /// - [`ChatError::Provider`] if the provider rejects the request or does
    ///   not answer before the deadline. The user message stays persisted.
    pub async fn begin(
        &self,
        chat_id: &Uuid,
        user_message: String,
    ) -> Result<PendingTurn<C>, ChatError> {
        let chat = self
            .chat_repo
            .get_chat(chat_id)
            .await?
            .ok_or(ChatError::NotFound)?;

        let lock = self.locks.acquire(chat.id).await;

        let user_message = Message::new(chat.id, MessageRole::User, user_message);
        self.chat_repo.save_message(&user_message).await?;

        let history = self.chat_repo.get_messages(&chat.id).await?;
        let request = self.build_request(&history);

        let span = info_span!(
            "chat",
            chat_id = %chat.id,
            gen_ai.operation.name = "chat",
            gen_ai.provider.name = self.provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
        );

        let deadline = Instant::now() + self.settings.timeout;
        let mut events = self.provider.stream(request);

        // Providers report `Connected` before the upstream has answered, so a
        // refusal (401, 429, 5xx) arrives after it. Hold everything up to the
        // first answer-bearing event so a refusal surfaces as an error response
        // instead of an error event on an already-open stream.
        let mut primed: Vec<Result<StreamEvent, LlmError>> = Vec::new();
        let exhausted = loop {
            match timeout_at(deadline, events.next()).await {
                Ok(Some(Ok(StreamEvent::Connected))) => primed.push(Ok(StreamEvent::Connected)),
                Ok(Some(Ok(event))) => {
                    primed.push(Ok(event));
                    break false;
                }
                Ok(Some(Err(e))) => {
                    span.in_scope(|| warn!(error = %e, "Provider rejected completion request"));
                    return Err(ChatError::Provider(e));
                }
                Ok(None) => break true,
                Err(_) => {
                    span.in_scope(|| warn!("Provider did not respond before the deadline"));
                    return Err(ChatError::Provider(LlmError::Timeout(
                        self.settings.timeout.as_secs(),
                    )));
                }
            }
        };

        let primed = futures_util::stream::iter(primed);
        let events: EventStream = if exhausted {
            Box::pin(primed)
        } else {
            Box::pin(primed.chain(events))
        };

        span.in_scope(|| debug!(history_len = history.len(), "Completion stream opened"));

        Ok(PendingTurn {
            chat_id: chat.id,
            user_message,
            events,
            chat_repo: Arc::clone(&self.chat_repo),
            deadline,
            timeout: self.settings.timeout,
            span,
            lock,
        })
    }

    /// Map the ordered history onto a provider request.
    fn build_request(&self, history: &[Message]) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages: history
                .iter()
                .map(|m| llm::Message {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
            system: self.settings.system_prompt.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: true,
        }
    }
}

/// A started turn whose provider stream has not been relayed yet.
///
/// Holds the chat's lock until [`PendingTurn::relay`] returns.
pub struct PendingTurn<C: ChatRepository> {
    chat_id: Uuid,
    user_message: Message,
    events: EventStream,
    chat_repo: Arc<C>,
    deadline: Instant,
    timeout: Duration,
    span: tracing::Span,
    lock: ChatLockGuard,
}

impl<C: ChatRepository> PendingTurn<C> {
    /// The user message persisted by [`CompletionOrchestrator::begin`].
    pub fn user_message(&self) -> &Message {
        &self.user_message
    }

    /// Relay the provider stream to `responder`, then persist the assistant message.
    ///
    /// The responder is dropped (closing the client stream) only after the
    /// assistant message write has been attempted.
    pub async fn relay<R: StreamResponder>(self, mut responder: R) -> TurnOutcome {
        let PendingTurn {
            chat_id,
            user_message: _,
            mut events,
            chat_repo,
            deadline,
            timeout,
            span,
            lock,
        } = self;

        let outcome = async move {
            let mut accumulated = String::new();
            let mut fragments = 0usize;
            let mut usage = None;
            let mut stop_reason = None;

            let status = loop {
                let next = match timeout_at(deadline, events.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        responder.fail(&LlmError::Timeout(timeout.as_secs()).to_string());
                        break TurnStatus::TimedOut;
                    }
                };

                match next {
                    None | Some(Ok(StreamEvent::Done)) => break TurnStatus::Completed,
                    Some(Ok(StreamEvent::TextDelta { text })) => {
                        if text.is_empty() {
                            continue;
                        }
                        let text = normalize_line_endings(text);
                        match timeout_at(deadline, responder.send(&text)).await {
                            Ok(Ok(())) => {
                                accumulated.push_str(&text);
                                fragments += 1;
                            }
                            Ok(Err(_)) => break TurnStatus::ClientDisconnected,
                            Err(_) => {
                                responder.fail(&LlmError::Timeout(timeout.as_secs()).to_string());
                                break TurnStatus::TimedOut;
                            }
                        }
                    }
                    Some(Ok(StreamEvent::Usage(u))) => usage = Some(u),
                    Some(Ok(StreamEvent::MessageDelta { stop_reason: sr })) => {
                        stop_reason = Some(sr)
                    }
                    Some(Ok(StreamEvent::Connected)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, fragments, "Completion stream failed mid-delivery");
                        responder.fail(&e.to_string());
                        break TurnStatus::ProviderFailed(e.to_string());
                    }
                }
            };

            // Stop consuming the provider; dropping the stream cancels the request.
            drop(events);

            if status == TurnStatus::ClientDisconnected {
                info!(fragments, "Client disconnected, provider stream cancelled");
            }

            let current = tracing::Span::current();
            if let Some(ref u) = usage {
                current.record("gen_ai.usage.input_tokens", u.input_tokens);
                current.record("gen_ai.usage.output_tokens", u.output_tokens);
            }
            if let Some(ref sr) = stop_reason {
                current.record("gen_ai.response.finish_reasons", sr.to_string().as_str());
            }

            let (assistant_message, persist_error) =
                persist_assistant(chat_repo.as_ref(), chat_id, accumulated, &status).await;

            // Closing the client stream happens only after the write attempt.
            drop(responder);

            info!(fragments, outcome = ?status, "Completion turn finished");

            TurnOutcome {
                status,
                fragments,
                assistant_message,
                persist_error,
                usage,
                stop_reason,
            }
        }
        .instrument(span)
        .await;

        drop(lock);
        outcome
    }
}

/// Fold `\r\n` and bare `\r` into `\n`.
///
/// Applied before a fragment is both delivered and accumulated, so the
/// stored message matches what the client received byte for byte.
fn normalize_line_endings(text: String) -> String {
    if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        text
    }
}

/// Persist the assistant side of a turn.
///
/// Completed turns always persist (even empty content); interrupted turns
/// persist only non-empty content, flagged as truncated.
async fn persist_assistant<C: ChatRepository>(
    chat_repo: &C,
    chat_id: Uuid,
    content: String,
    status: &TurnStatus,
) -> (Option<Message>, Option<String>) {
    let interrupted = status.is_interrupted();
    if interrupted && content.is_empty() {
        return (None, None);
    }

    let mut message = Message::new(chat_id, MessageRole::Assistant, content);
    if interrupted {
        message = message.truncated();
    }

    match chat_repo.save_message(&message).await {
        Ok(()) => (Some(message), None),
        Err(e) => {
            error!(error = %e, "Failed to persist assistant message after delivery");
            (None, Some(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parley_types::llm::{CompletionResponse, ProviderCapabilities};

    use crate::chat::responder::ResponderClosed;
    use crate::chat::test_support::InMemoryChatRepository;
    use crate::llm::provider::LlmProvider;

    #[derive(Clone)]
    enum Step {
        Text(&'static str),
        Pause(u64),
        Usage(u32, u32),
        Stop(StopReason),
        Fail(&'static str),
        Hang,
    }

    /// Replays the same script on every `stream` call.
    struct ScriptedProvider {
        script: Vec<Step>,
        capabilities: ProviderCapabilities,
        requests: Arc<Mutex<Vec<CompletionRequest>>>,
        stream_calls: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl ScriptedProvider {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script,
                capabilities: ProviderCapabilities {
                    streaming: true,
                    max_context_tokens: 8_000,
                    max_output_tokens: 1_000,
                },
                requests: Arc::new(Mutex::new(Vec::new())),
                stream_calls: Arc::new(AtomicUsize::new(0)),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> &ProviderCapabilities {
            &self.capabilities
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::InvalidRequest("streaming only".to_string()))
        }

        fn stream(&self, request: CompletionRequest) -> EventStream {
            self.requests.lock().unwrap().push(request);
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            let script = self.script.clone();
            let flag = DropFlag(Arc::clone(&self.dropped));
            Box::pin(async_stream::stream! {
                let _flag = flag;
                // Real providers announce the connection before the upstream answers.
                yield Ok(StreamEvent::Connected);
                for step in script {
                    match step {
                        Step::Text(t) => yield Ok(StreamEvent::TextDelta { text: t.to_string() }),
                        Step::Pause(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                        Step::Usage(i, o) => yield Ok(StreamEvent::Usage(Usage { input_tokens: i, output_tokens: o })),
                        Step::Stop(sr) => yield Ok(StreamEvent::MessageDelta { stop_reason: sr }),
                        Step::Fail(msg) => {
                            yield Err(LlmError::Stream(msg.to_string()));
                            return;
                        }
                        Step::Hang => futures_util::future::pending::<()>().await,
                    }
                }
                yield Ok(StreamEvent::Done);
            })
        }
    }

    #[derive(Default)]
    struct Recording {
        sent: Vec<String>,
        failures: Vec<String>,
        closed_at_drop: bool,
    }

    /// Responder that records deliveries and can simulate a disconnect.
    struct RecordingResponder {
        log: Arc<Mutex<Recording>>,
        accept: Option<usize>,
        stall: Option<usize>,
        closed: bool,
    }

    impl RecordingResponder {
        fn new() -> (Self, Arc<Mutex<Recording>>) {
            let log = Arc::new(Mutex::new(Recording::default()));
            (
                Self {
                    log: Arc::clone(&log),
                    accept: None,
                    stall: None,
                    closed: false,
                },
                log,
            )
        }

        /// Accept `n` fragments, then behave as if the client hung up.
        fn disconnect_after(mut self, n: usize) -> Self {
            self.accept = Some(n);
            self
        }

        /// Accept `n` fragments, then block forever on the next send.
        fn stall_after(mut self, n: usize) -> Self {
            self.stall = Some(n);
            self
        }
    }

    impl StreamResponder for RecordingResponder {
        async fn send(&mut self, fragment: &str) -> Result<(), ResponderClosed> {
            let delivered = self.log.lock().unwrap().sent.len();
            if self.stall.is_some_and(|n| delivered >= n) {
                futures_util::future::pending::<()>().await;
            }
            if self.closed || self.accept.is_some_and(|n| delivered >= n) {
                self.closed = true;
                return Err(ResponderClosed);
            }
            self.log.lock().unwrap().sent.push(fragment.to_string());
            Ok(())
        }

        fn fail(&mut self, message: &str) {
            self.log.lock().unwrap().failures.push(message.to_string());
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    impl Drop for RecordingResponder {
        fn drop(&mut self) {
            if let Ok(mut log) = self.log.lock() {
                log.closed_at_drop = true;
            }
        }
    }

    fn settings(timeout: Duration) -> CompletionSettings {
        CompletionSettings {
            model: "test-model".to_string(),
            system_prompt: Some("Be brief.".to_string()),
            max_tokens: 64,
            temperature: Some(0.2),
            timeout,
        }
    }

    struct Harness {
        repo: Arc<InMemoryChatRepository>,
        orchestrator: Arc<CompletionOrchestrator<InMemoryChatRepository>>,
        requests: Arc<Mutex<Vec<CompletionRequest>>>,
        stream_calls: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    fn harness_with_timeout(script: Vec<Step>, timeout: Duration) -> Harness {
        let provider = ScriptedProvider::new(script);
        let requests = Arc::clone(&provider.requests);
        let stream_calls = Arc::clone(&provider.stream_calls);
        let dropped = Arc::clone(&provider.dropped);
        let repo = Arc::new(InMemoryChatRepository::new());
        let orchestrator = Arc::new(CompletionOrchestrator::new(
            Arc::clone(&repo),
            Arc::new(BoxLlmProvider::new(provider)),
            settings(timeout),
        ));
        Harness {
            repo,
            orchestrator,
            requests,
            stream_calls,
            dropped,
        }
    }

    fn harness(script: Vec<Step>) -> Harness {
        harness_with_timeout(script, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_hello_turn_streams_and_persists() {
        let h = harness(vec![Step::Text("Hi"), Step::Text(" there"), Step::Text("!")]);
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        assert_eq!(turn.user_message().content, "Hello");

        let (responder, log) = RecordingResponder::new();
        let outcome = turn.relay(responder).await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.fragments, 3);
        assert_eq!(log.lock().unwrap().sent, vec!["Hi", " there", "!"]);
        assert!(log.lock().unwrap().closed_at_drop);

        let history = h.repo.get_messages(&chat.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[0].content, "Hello");
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert_eq!(history[1].content, "Hi there!");
        assert!(!history[1].truncated);
        assert_eq!(outcome.assistant_message.unwrap().id, history[1].id);
    }

    #[tokio::test]
    async fn test_provider_receives_full_ordered_history() {
        let h = harness(vec![Step::Text("ok")]);
        let chat = h.repo.seed_chat().await;

        for prompt in ["first", "second"] {
            let turn = h.orchestrator.begin(&chat.id, prompt.to_string()).await.unwrap();
            let (responder, _) = RecordingResponder::new();
            turn.relay(responder).await;
        }

        let requests = h.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        let contents: Vec<&str> = second.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "ok", "second"]);
        assert_eq!(second.messages[1].role, MessageRole::Assistant);
        assert_eq!(second.system.as_deref(), Some("Be brief."));
        assert_eq!(second.model, "test-model");
        assert!(second.stream);
    }

    #[tokio::test]
    async fn test_unknown_chat_writes_nothing() {
        let h = harness(vec![Step::Text("never")]);
        let result = h.orchestrator.begin(&Uuid::now_v7(), "Hello".to_string()).await;

        assert!(matches!(result, Err(ChatError::NotFound)));
        assert_eq!(h.repo.message_count(), 0);
        assert_eq!(h.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_user_write_failure_skips_provider() {
        let h = harness(vec![Step::Text("never")]);
        let chat = h.repo.seed_chat().await;
        h.repo.fail_writes(true);

        let result = h.orchestrator.begin(&chat.id, "Hello".to_string()).await;

        assert!(matches!(result, Err(ChatError::Persistence(_))));
        assert_eq!(h.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_refusal_after_connect_surfaces_before_streaming() {
        // Connected, then the upstream's 401.
        let h = harness(vec![Step::Fail("401 Unauthorized")]);
        let chat = h.repo.seed_chat().await;

        let result = h.orchestrator.begin(&chat.id, "Hello".to_string()).await;

        assert!(matches!(result, Err(ChatError::Provider(LlmError::Stream(ref m))) if m.contains("401")));
        assert!(h.dropped.load(Ordering::SeqCst));
        // The user turn was accepted before the provider was asked.
        let history = h.repo.get_messages(&chat.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_persists_truncated_partial() {
        let h = harness(vec![Step::Text("Hi"), Step::Fail("connection reset")]);
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        let (responder, log) = RecordingResponder::new();
        let outcome = turn.relay(responder).await;

        assert!(matches!(outcome.status, TurnStatus::ProviderFailed(ref m) if m.contains("connection reset")));
        let log = log.lock().unwrap();
        assert_eq!(log.sent, vec!["Hi"]);
        assert_eq!(log.failures.len(), 1);

        let history = h.repo.get_messages(&chat.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hi");
        assert!(history[1].truncated);
    }

    #[tokio::test]
    async fn test_failure_before_any_fragment_persists_nothing() {
        let h = harness(vec![Step::Usage(3, 0), Step::Fail("overloaded")]);
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        let (responder, _) = RecordingResponder::new();
        let outcome = turn.relay(responder).await;

        assert!(outcome.status.is_interrupted());
        assert!(outcome.assistant_message.is_none());
        assert_eq!(h.repo.count_messages(&chat.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_provider() {
        let h = harness(vec![Step::Text("Hi"), Step::Text(" there"), Step::Hang]);
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        let (responder, log) = RecordingResponder::new();
        let outcome = turn.relay(responder.disconnect_after(1)).await;

        assert_eq!(outcome.status, TurnStatus::ClientDisconnected);
        assert_eq!(outcome.fragments, 1);
        assert!(h.dropped.load(Ordering::SeqCst), "provider stream should be dropped");
        assert_eq!(log.lock().unwrap().sent, vec!["Hi"]);

        let history = h.repo.get_messages(&chat.id).await.unwrap();
        assert_eq!(history[1].content, "Hi");
        assert!(history[1].truncated);
    }

    #[tokio::test]
    async fn test_deadline_stops_a_stalled_stream() {
        let h = harness_with_timeout(
            vec![Step::Text("Hi"), Step::Hang],
            Duration::from_millis(50),
        );
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        let (responder, log) = RecordingResponder::new();
        let outcome = turn.relay(responder).await;

        assert_eq!(outcome.status, TurnStatus::TimedOut);
        assert!(h.dropped.load(Ordering::SeqCst));
        assert_eq!(log.lock().unwrap().failures.len(), 1);
        let assistant = outcome.assistant_message.unwrap();
        assert_eq!(assistant.content, "Hi");
        assert!(assistant.truncated);
    }

    #[tokio::test]
    async fn test_assistant_write_failure_is_reported_not_fatal() {
        let h = harness(vec![Step::Text("Hi"), Step::Text("!")]);
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        h.repo.fail_writes(true);
        let (responder, log) = RecordingResponder::new();
        let outcome = turn.relay(responder).await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(log.lock().unwrap().sent, vec!["Hi", "!"]);
        assert!(outcome.assistant_message.is_none());
        assert!(outcome.persist_error.is_some());
        assert!(log.lock().unwrap().closed_at_drop);
    }

    #[tokio::test]
    async fn test_usage_and_stop_reason_are_recorded() {
        let h = harness(vec![
            Step::Text("Hi"),
            Step::Stop(StopReason::MaxTokens),
            Step::Usage(12, 1),
        ]);
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        let (responder, log) = RecordingResponder::new();
        let outcome = turn.relay(responder).await;

        assert_eq!(outcome.stop_reason, Some(StopReason::MaxTokens));
        assert_eq!(outcome.usage.map(|u| u.input_tokens), Some(12));
        // Only text reaches the client.
        assert_eq!(log.lock().unwrap().sent, vec!["Hi"]);
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_chat_do_not_interleave() {
        let h = harness(vec![Step::Text("a"), Step::Pause(10), Step::Text("b")]);
        let chat = h.repo.seed_chat().await;

        let first = h.orchestrator.begin(&chat.id, "one".to_string()).await.unwrap();

        let second = {
            let orchestrator = Arc::clone(&h.orchestrator);
            let chat_id = chat.id;
            tokio::spawn(async move {
                let turn = orchestrator.begin(&chat_id, "two".to_string()).await.unwrap();
                let (responder, _) = RecordingResponder::new();
                turn.relay(responder).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        // The second turn is parked on the chat lock and has written nothing.
        assert_eq!(h.repo.count_messages(&chat.id).await.unwrap(), 1);

        let (responder, _) = RecordingResponder::new();
        first.relay(responder).await;
        second.await.unwrap();

        let history = h.repo.get_messages(&chat.id).await.unwrap();
        let roles: Vec<MessageRole> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User,
                MessageRole::Assistant
            ]
        );
        assert_eq!(history[1].content, "ab");
        assert_eq!(history[2].content, "two");
    }

    #[tokio::test]
    async fn test_silent_provider_after_connect_times_out_in_begin() {
        let h = harness_with_timeout(vec![Step::Hang], Duration::from_millis(50));
        let chat = h.repo.seed_chat().await;

        let result = h.orchestrator.begin(&chat.id, "Hello".to_string()).await;

        assert!(matches!(result, Err(ChatError::Provider(LlmError::Timeout(_)))));
        assert_eq!(h.repo.count_messages(&chat.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_completion_is_persisted_as_empty_message() {
        let h = harness(vec![]);
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        let (responder, log) = RecordingResponder::new();
        let outcome = turn.relay(responder).await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert!(log.lock().unwrap().sent.is_empty());
        let assistant = outcome.assistant_message.unwrap();
        assert_eq!(assistant.content, "");
        assert!(!assistant.truncated);
    }

    #[tokio::test]
    async fn test_line_endings_match_between_client_and_store() {
        let h = harness(vec![Step::Text("one\r\ntwo\rthree")]);
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        let (responder, log) = RecordingResponder::new();
        let outcome = turn.relay(responder).await;

        assert_eq!(log.lock().unwrap().sent, vec!["one\ntwo\nthree"]);
        assert_eq!(outcome.assistant_message.unwrap().content, "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn test_deadline_during_client_send_reports_error() {
        let h = harness_with_timeout(
            vec![Step::Text("Hi"), Step::Text(" there")],
            Duration::from_millis(50),
        );
        let chat = h.repo.seed_chat().await;

        let turn = h.orchestrator.begin(&chat.id, "Hello".to_string()).await.unwrap();
        let (responder, log) = RecordingResponder::new();
        let outcome = turn.relay(responder.stall_after(1)).await;

        assert_eq!(outcome.status, TurnStatus::TimedOut);
        let log = log.lock().unwrap();
        assert_eq!(log.sent, vec!["Hi"]);
        assert_eq!(log.failures, vec![LlmError::Timeout(0).to_string()]);
        let assistant = outcome.assistant_message.unwrap();
        assert_eq!(assistant.content, "Hi");
        assert!(assistant.truncated);
    }
}
