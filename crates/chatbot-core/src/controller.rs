use std::sync::Arc;
use std::time::Duration;

use chatbot_api::{ChatBackend, ChatOptions, ChatRequest, EventStream, Message};
use chrono::Utc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;

use crate::coalesce::DEFAULT_FLUSH_INTERVAL;
use crate::error::{Error, Result};
use crate::reducer::{Step, StreamReducer, TurnOutcome};
use crate::store::SharedChatStore;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    /// Use `/stream-chat` instead of the one-shot `/chat` endpoint.
    pub streaming: bool,
    pub options: ChatOptions,
    /// How long streamed text may sit in the buffer before it is shown.
    pub flush_interval: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            streaming: true,
            options: ChatOptions::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Sends user messages and drives the replies into a [`SharedChatStore`].
///
/// At most one reply is in flight at a time; a send while the store is
/// loading is rejected with [`Error::TurnInFlight`].
pub struct ChatController {
    backend: Arc<dyn ChatBackend>,
    store: SharedChatStore,
    settings: ChatSettings,
    revisions: Arc<watch::Sender<u64>>,
    /// Store epoch, republished whenever the transcript is cleared or
    /// replaced so a running turn stops at once.
    resets: watch::Sender<u64>,
}

impl ChatController {
    pub fn new(backend: Arc<dyn ChatBackend>, store: SharedChatStore) -> Self {
        let (revision, epoch) = {
            let state = store.lock();
            (state.revision(), state.epoch())
        };
        let (revisions, _) = watch::channel(revision);
        let (resets, _) = watch::channel(epoch);
        Self {
            backend,
            store,
            settings: ChatSettings::default(),
            revisions: Arc::new(revisions),
            resets,
        }
    }

    pub fn with_settings(mut self, settings: ChatSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &SharedChatStore {
        &self.store
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ChatSettings {
        &mut self.settings
    }

    /// Store revisions, published after every batch of mutations.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }

    /// Switch to `session_id`, replacing the transcript with `history`.
    /// A reply still streaming for the previous session is abandoned.
    pub fn open_session(&self, session_id: impl Into<String>, history: Vec<Message>) {
        let epoch = {
            let mut state = self.store.lock();
            state.reset();
            state.set_session_id(session_id);
            state.replace_messages(history);
            state.epoch()
        };
        self.resets.send_replace(epoch);
        publish(&self.store, &self.revisions);
    }

    /// Drop the local transcript. A reply still streaming is abandoned and
    /// any text it had buffered is discarded.
    pub fn clear_messages(&self) {
        let epoch = {
            let mut state = self.store.lock();
            state.clear_messages();
            state.epoch()
        };
        self.resets.send_replace(epoch);
        publish(&self.store, &self.revisions);
    }

    /// Record `text` as a user message and start fetching the reply.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn send_message(&self, text: &str) -> Result<TurnHandle> {
        if text.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }

        let (request, reducer, resets) = {
            let mut state = self.store.lock();
            if state.is_loading() {
                return Err(Error::TurnInFlight);
            }
            let session_id = state.session_id().ok_or(Error::NoSession)?.to_string();

            let now = Utc::now();
            let id = state.next_local_id();
            state.add_message(Message::user(id, &session_id, text, now));
            state.begin_assistant_message(now);
            state.set_loading(true);

            let reducer = StreamReducer::attach(&state, self.settings.flush_interval);
            (
                ChatRequest::new(session_id, text, self.settings.options),
                reducer,
                self.resets.subscribe(),
            )
        };
        publish(&self.store, &self.revisions);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let turn = Turn {
            store: Arc::clone(&self.store),
            revisions: Arc::clone(&self.revisions),
            reducer,
            cancel: cancel_rx,
            resets,
        };
        let backend = Arc::clone(&self.backend);
        let task = if self.settings.streaming {
            let events = backend.stream_chat(request);
            tokio::spawn(turn.stream(events))
        } else {
            tokio::spawn(turn.reply(backend, request))
        };

        Ok(TurnHandle {
            cancel: Some(cancel_tx),
            task,
            outcome: None,
        })
    }
}

fn publish(store: &SharedChatStore, revisions: &watch::Sender<u64>) {
    let revision = store.lock().revision();
    revisions.send_replace(revision);
}

// ---------------------------------------------------------------------------
// TurnHandle
// ---------------------------------------------------------------------------

/// An in-flight reply.
///
/// Dropping the handle cancels the reply, like [`cancel`](TurnHandle::cancel).
pub struct TurnHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<TurnOutcome>,
    outcome: Option<TurnOutcome>,
}

impl TurnHandle {
    /// Stop the reply. The connection is closed and whatever the assistant
    /// message accumulated so far stays in the store.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the reply to end. Safe to call again after it returned.
    pub async fn wait(&mut self) -> TurnOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(%err, "reply task ended abnormally");
                TurnOutcome::Failed(err.to_string())
            }
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    pub async fn finished(mut self) -> TurnOutcome {
        self.wait().await
    }
}

// ---------------------------------------------------------------------------
// Turn driver (runs in spawned task)
// ---------------------------------------------------------------------------

struct Turn {
    store: SharedChatStore,
    revisions: Arc<watch::Sender<u64>>,
    reducer: StreamReducer,
    cancel: oneshot::Receiver<()>,
    /// Changes when the transcript is cleared or replaced. Closed once the
    /// controller is gone, after which no reset can happen.
    resets: watch::Receiver<u64>,
}

impl Turn {
    /// Pull events until the reply ends, flushing coalesced text when its
    /// deadline passes.
    async fn stream(mut self, mut events: EventStream) -> TurnOutcome {
        let mut resets_open = true;
        loop {
            let deadline = self.reducer.deadline();
            let step = tokio::select! {
                biased;

                // Fires on an explicit cancel and when the handle is dropped.
                _ = &mut self.cancel => {
                    tracing::debug!("reply cancelled by caller");
                    self.reducer.finish_cancelled(&mut self.store.lock(), Utc::now())
                }

                changed = self.resets.changed(), if resets_open => {
                    resets_open = changed.is_ok();
                    // A stale reducer detaches here without touching the store.
                    self.reducer.flush_due(&mut self.store.lock(), Instant::now())
                }

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.reducer.flush_due(&mut self.store.lock(), Instant::now())
                }

                item = events.next() => {
                    let mut state = self.store.lock();
                    match item {
                        Some(Ok(event)) => self.reducer.apply(&mut state, event, Instant::now(), Utc::now()),
                        Some(Err(err)) => {
                            tracing::error!(%err, "reply stream failed");
                            self.reducer.finish_failed(&mut state, Utc::now(), err.to_string())
                        }
                        None => self.reducer.finish_truncated(&mut state, Utc::now()),
                    }
                }
            };

            publish(&self.store, &self.revisions);
            if let Step::Finished(outcome) = step {
                return outcome;
            }
        }
    }

    /// Await a one-shot reply.
    async fn reply(mut self, backend: Arc<dyn ChatBackend>, request: ChatRequest) -> TurnOutcome {
        let result = tokio::select! {
            biased;
            _ = &mut self.cancel => None,
            Ok(()) = self.resets.changed() => None,
            result = backend.chat(request) => Some(result),
        };

        let step = {
            let mut state = self.store.lock();
            match result {
                None => self.reducer.finish_cancelled(&mut state, Utc::now()),
                Some(Ok(response)) => self.reducer.apply_response(&mut state, response, Utc::now()),
                Some(Err(err)) => {
                    tracing::error!(%err, "chat request failed");
                    self.reducer.finish_failed(&mut state, Utc::now(), err.to_string())
                }
            }
        };
        publish(&self.store, &self.revisions);

        match step {
            Step::Finished(outcome) => outcome,
            Step::Continue => TurnOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chatbot_api::{ChatResponse, Error as ApiError, StreamEvent};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::store::ChatStore;

    enum Item {
        Event(StreamEvent),
        Fail(&'static str),
    }

    /// Replays a fixed script for every request.
    struct Scripted {
        script: Vec<StreamEvent>,
        failure: Option<&'static str>,
        /// Keep the connection open after the script instead of closing it.
        hang: bool,
        reply: Option<ChatResponse>,
        requests: Mutex<Vec<ChatRequest>>,
        /// Hanging connections not yet dropped by the client.
        open: Arc<AtomicUsize>,
    }

    struct Connection(Arc<AtomicUsize>);

    impl Drop for Connection {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Scripted {
        fn new(script: Vec<StreamEvent>) -> Self {
            Self {
                script,
                failure: None,
                hang: false,
                reply: None,
                requests: Mutex::new(Vec::new()),
                open: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for Scripted {
        fn stream_chat(&self, request: ChatRequest) -> EventStream {
            self.requests.lock().push(request);
            let mut items: Vec<Item> = self.script.iter().cloned().map(Item::Event).collect();
            if let Some(message) = self.failure {
                items.push(Item::Fail(message));
            }
            let events = tokio_stream::iter(items).map(|item| match item {
                Item::Event(event) => Ok(event),
                Item::Fail(message) => Err(ApiError::Sse(message.into())),
            });
            if self.hang {
                self.open.fetch_add(1, Ordering::SeqCst);
                let connection = Connection(Arc::clone(&self.open));
                EventStream::new(events.chain(tokio_stream::pending()).map(move |item| {
                    let _connection = &connection;
                    item
                }))
            } else {
                EventStream::new(events)
            }
        }

        async fn chat(&self, request: ChatRequest) -> std::result::Result<ChatResponse, ApiError> {
            self.requests.lock().push(request);
            self.reply.clone().ok_or(ApiError::Api {
                status: 500,
                message: "Internal Server Error".into(),
            })
        }
    }

    fn controller(backend: Scripted) -> (ChatController, Arc<Scripted>) {
        let backend = Arc::new(backend);
        let store = ChatStore::shared();
        store.lock().set_session_id("s-1");
        let controller = ChatController::new(backend.clone(), store);
        (controller, backend)
    }

    fn assistant_text(controller: &ChatController) -> String {
        controller
            .store()
            .lock()
            .last_assistant()
            .map(|m| m.text().to_string())
            .unwrap_or_default()
    }

    async fn wait_until(controller: &ChatController, mut done: impl FnMut(&ChatStore) -> bool) {
        let mut revisions = controller.subscribe();
        while !done(&*controller.store().lock()) {
            revisions.changed().await.expect("controller alive");
        }
    }

    fn chunk(text: &str) -> StreamEvent {
        StreamEvent::text(text)
    }

    #[tokio::test(start_paused = true)]
    async fn streams_a_reply_into_the_store() {
        let (controller, backend) = controller(Scripted::new(vec![
            chunk("Hel"),
            chunk("lo"),
            StreamEvent::Done { tokens_used: None },
        ]));

        let outcome = controller
            .send_message("say hello")
            .expect("send")
            .finished()
            .await;

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(assistant_text(&controller), "Hello");
        let store = controller.store().lock();
        assert!(!store.is_loading());
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.messages()[0].text(), "say hello");

        let requests = backend.requests.lock();
        assert_eq!(requests[0].session_id, "s-1");
        assert_eq!(requests[0].options, ChatOptions::default());
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_invalid_sends() {
        let (controller, _) = controller(Scripted::new(vec![]));
        assert_eq!(controller.send_message("   ").err(), Some(Error::EmptyMessage));

        controller.store().lock().reset();
        assert_eq!(controller.send_message("hi").err(), Some(Error::NoSession));
        assert!(controller.store().lock().messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_send_while_streaming_is_rejected() {
        let (controller, backend) = controller(Scripted::new(vec![chunk("thinking")]).hanging());

        let mut first = controller.send_message("one").expect("first send");
        assert_eq!(controller.send_message("two").err(), Some(Error::TurnInFlight));
        assert_eq!(controller.store().lock().messages().len(), 2);

        first.cancel();
        assert_eq!(first.wait().await, TurnOutcome::Cancelled);
        assert_eq!(first.wait().await, TurnOutcome::Cancelled);
        assert_eq!(backend.requests.lock().len(), 1);

        // The slot is free again once the first reply ended.
        let second = controller.send_message("two").expect("second send");
        drop(second);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_keeps_partial_content() {
        let (controller, _) = controller(Scripted::new(vec![chunk("partial")]).hanging());

        let mut turn = controller.send_message("go").expect("send");
        wait_until(&controller, |store| {
            store.last_assistant().is_some_and(|m| m.text() == "partial")
        })
        .await;

        turn.cancel();
        assert_eq!(turn.wait().await, TurnOutcome::Cancelled);
        assert_eq!(assistant_text(&controller), "partial");
        assert!(!controller.store().lock().is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let (controller, _) = controller(Scripted::new(vec![]).hanging());

        drop(controller.send_message("go").expect("send"));
        wait_until(&controller, |store| !store.is_loading()).await;
        assert_eq!(controller.store().lock().messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn truncated_stream_surfaces_an_error() {
        let (controller, _) = controller(Scripted::new(vec![chunk("half")]));

        let outcome = controller.send_message("go").expect("send").finished().await;

        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(assistant_text(&controller), "half");
        assert!(!controller.store().lock().is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_ends_the_turn() {
        let mut backend = Scripted::new(vec![chunk("a")]);
        backend.failure = Some("connection reset");
        let (controller, _) = controller(backend);

        let outcome = controller.send_message("go").expect("send").finished().await;

        let TurnOutcome::Failed(message) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(message.contains("connection reset"));
        assert_eq!(assistant_text(&controller), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn coalesced_text_appears_while_the_stream_is_open() {
        let (controller, _) = controller(Scripted::new(vec![chunk("a"), chunk("b")]).hanging());

        let mut turn = controller.send_message("go").expect("send");
        wait_until(&controller, |store| {
            store.last_assistant().is_some_and(|m| m.text() == "ab")
        })
        .await;
        assert!(controller.store().lock().is_loading());

        turn.cancel();
        turn.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_mid_reply_discards_buffered_text() {
        let (controller, _) = controller(Scripted::new(vec![chunk("stale")]).hanging());
        let mut controller = controller;
        controller.settings_mut().flush_interval = Duration::from_secs(60);

        let mut turn = controller.send_message("go").expect("send");
        tokio::task::yield_now().await;
        controller.clear_messages();

        assert_eq!(turn.wait().await, TurnOutcome::Cancelled);
        let store = controller.store().lock();
        assert!(store.messages().is_empty());
        assert!(store.streaming_text().is_empty());
        assert!(!store.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_an_idle_stream_closes_it_at_once() {
        let (controller, backend) = controller(Scripted::new(vec![]).hanging());

        let mut turn = controller.send_message("go").expect("send");
        tokio::task::yield_now().await;
        assert_eq!(backend.open.load(Ordering::SeqCst), 1);

        controller.clear_messages();
        let outcome = tokio::time::timeout(Duration::from_secs(2), turn.wait())
            .await
            .expect("turn ends after clear");
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(backend.open.load(Ordering::SeqCst), 0);

        let next = controller.send_message("again").expect("send after clear");
        tokio::task::yield_now().await;
        assert_eq!(backend.open.load(Ordering::SeqCst), 1);
        drop(next);
    }

    #[tokio::test(start_paused = true)]
    async fn opening_a_session_abandons_the_running_reply() {
        let (controller, backend) = controller(Scripted::new(vec![chunk("old")]).hanging());

        let mut turn = controller.send_message("go").expect("send");
        controller.open_session("s-2", Vec::new());

        let outcome = tokio::time::timeout(Duration::from_secs(2), turn.wait())
            .await
            .expect("turn ends after switching sessions");
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(backend.open.load(Ordering::SeqCst), 0);

        let store = controller.store().lock();
        assert_eq!(store.session_id(), Some("s-2"));
        assert!(store.messages().is_empty());
        assert!(!store.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn server_cancel_event_ends_the_turn() {
        let (controller, _) = controller(Scripted::new(vec![
            chunk("so far"),
            StreamEvent::Cancelled {
                message: Some("Generation cancelled by user".into()),
            },
        ]));

        let outcome = controller.send_message("go").expect("send").finished().await;
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(assistant_text(&controller), "so far");
    }

    #[tokio::test(start_paused = true)]
    async fn non_streaming_mode_uses_the_one_shot_reply() {
        let mut backend = Scripted::new(vec![]);
        backend.reply = Some(
            serde_json::from_value(json!({
                "output": "pong",
                "intermediate_steps": [],
                "tool_steps": [],
                "message": {
                    "id": 5,
                    "session_id": "s-1",
                    "role": "assistant",
                    "content": "pong",
                    "tool_calls": null,
                    "created_at": "2025-01-04T10:22:31",
                    "model": "qwen-plus",
                    "tokens_used": null,
                    "tool_steps": []
                }
            }))
            .expect("reply"),
        );
        let (controller, backend) = controller(backend);
        let mut controller = controller;
        controller.settings_mut().streaming = false;
        controller.settings_mut().options.enable_memory = true;

        let outcome = controller.send_message("ping").expect("send").finished().await;

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(assistant_text(&controller), "pong");
        assert!(backend.requests.lock()[0].options.enable_memory);
    }

    #[tokio::test(start_paused = true)]
    async fn non_streaming_failure_is_reported() {
        let (controller, _) = controller(Scripted::new(vec![]));
        let mut controller = controller;
        controller.settings_mut().streaming = false;

        let outcome = controller.send_message("ping").expect("send").finished().await;
        assert!(matches!(outcome, TurnOutcome::Failed(ref m) if m.contains("500")));
        assert!(!controller.store().lock().is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn opening_a_session_loads_history() {
        let (controller, _) = controller(Scripted::new(vec![]));
        let history = vec![Message::user(1, "s-2", "earlier", Utc::now())];

        controller.open_session("s-2", history);

        let store = controller.store().lock();
        assert_eq!(store.session_id(), Some("s-2"));
        assert_eq!(store.messages()[0].text(), "earlier");
    }
}
