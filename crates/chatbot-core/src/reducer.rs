//! Folds a reply's [`StreamEvent`]s into the [`ChatStore`].
//!
//! The reducer owns the text coalescer for one request. Events are applied
//! strictly in arrival order; buffered text is flushed before any other
//! event kind is applied, so the transcript never shows a tool step or a
//! final state ahead of text that arrived earlier.

use std::time::Duration;

use chatbot_api::timestamp::{self, Timestamp};
use chatbot_api::{ChatResponse, Error as ApiError, StreamEvent, TokenUsage, ToolStep};
use serde_json::Value;
use tokio::time::Instant;

use crate::coalesce::Coalescer;
use crate::store::ChatStore;

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// The server reported an error, or the transport failed.
    Failed(String),
    Cancelled,
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished(TurnOutcome),
}

pub struct StreamReducer {
    coalescer: Coalescer,
    /// Store epoch at attach time; a mismatch means the transcript was
    /// cleared underneath this request.
    epoch: u64,
    finished: bool,
}

impl StreamReducer {
    /// Start reducing a request against `store`'s current transcript.
    pub fn attach(store: &ChatStore, flush_interval: Duration) -> Self {
        Self {
            coalescer: Coalescer::new(flush_interval),
            epoch: store.epoch(),
            finished: false,
        }
    }

    /// When buffered text must be flushed, if any is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.coalescer.deadline()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn apply(
        &mut self,
        store: &mut ChatStore,
        event: StreamEvent,
        now: Instant,
        at: Timestamp,
    ) -> Step {
        if self.finished {
            tracing::debug!(?event, "ignoring event after the reply finished");
            return Step::Continue;
        }
        if let Some(step) = self.detach_if_stale(store) {
            return step;
        }

        match event {
            StreamEvent::Message { content } | StreamEvent::StreamChunk { content } => {
                if let Some(text) = self.coalescer.push(&content, now) {
                    store.append_streaming_text(&text);
                }
                Step::Continue
            }
            StreamEvent::Thought { content } => {
                self.flush(store);
                store.set_thought(&content, at);
                Step::Continue
            }
            StreamEvent::ToolStart { tool, input } => {
                self.flush(store);
                let input = match input {
                    Value::Null => Value::Object(Default::default()),
                    Value::Object(map) => Value::Object(map),
                    other => serde_json::json!({ "input": other }),
                };
                let id = store.next_local_id();
                if !store.append_tool_step(ToolStep::running(id, tool, input, at)) {
                    tracing::warn!("tool_start without an assistant message; discarded");
                }
                Step::Continue
            }
            StreamEvent::ToolResult {
                result,
                error,
                duration_ms,
            } => {
                // Checked before flushing so a discarded result leaves the
                // store as it was.
                if !store.has_running_tool_step() {
                    tracing::warn!("tool_result without a running tool step; discarded");
                    return Step::Continue;
                }
                self.flush(store);
                store.update_last_running_tool_step(|step| step.finish(result, error, duration_ms, at));
                Step::Continue
            }
            StreamEvent::Done { tokens_used } => self.terminal(store, at, tokens_used, TurnOutcome::Completed),
            StreamEvent::Error { message } => {
                tracing::warn!(%message, "server reported an error");
                self.terminal(store, at, None, TurnOutcome::Failed(message))
            }
            StreamEvent::Cancelled { message } => {
                tracing::debug!(?message, "server cancelled the reply");
                self.terminal(store, at, None, TurnOutcome::Cancelled)
            }
        }
    }

    /// Flush buffered text whose coalescing deadline has passed.
    pub fn flush_due(&mut self, store: &mut ChatStore, now: Instant) -> Step {
        if self.finished {
            return Step::Continue;
        }
        if let Some(step) = self.detach_if_stale(store) {
            return step;
        }
        if let Some(text) = self.coalescer.take_due(now) {
            store.append_streaming_text(&text);
        }
        Step::Continue
    }

    /// The connection closed without a terminal event.
    pub fn finish_truncated(&mut self, store: &mut ChatStore, at: Timestamp) -> Step {
        tracing::warn!("event stream closed before a terminal event");
        self.finish_failed(store, at, ApiError::StreamTruncated.to_string())
    }

    /// The transport failed mid-request.
    pub fn finish_failed(&mut self, store: &mut ChatStore, at: Timestamp, message: String) -> Step {
        self.terminal(store, at, None, TurnOutcome::Failed(message))
    }

    /// The caller gave up on the request.
    pub fn finish_cancelled(&mut self, store: &mut ChatStore, at: Timestamp) -> Step {
        self.terminal(store, at, None, TurnOutcome::Cancelled)
    }

    /// Fill the in-progress assistant message from a non-streaming reply.
    pub fn apply_response(
        &mut self,
        store: &mut ChatStore,
        response: ChatResponse,
        at: Timestamp,
    ) -> Step {
        if self.finished {
            return Step::Continue;
        }
        if let Some(step) = self.detach_if_stale(store) {
            return step;
        }
        let ChatResponse {
            output,
            tool_steps,
            message,
            ..
        } = response;

        for info in tool_steps {
            let id = store.next_local_id();
            let mut step = ToolStep::running(id, info.tool_name, info.tool_input, at);
            step.finish(info.tool_output, info.tool_error, info.duration_ms, at);
            if info.status.is_terminal() {
                step.status = info.status;
            }
            if !store.append_tool_step(step) {
                tracing::warn!("tool step without an assistant message; discarded");
            }
        }
        store.update_last_assistant(|assistant| {
            assistant.content = Some(output);
            assistant.model = message.model;
            if message.id > 0 {
                assistant.id = message.id;
                assistant.created_at = message.created_at;
            }
            for step in &mut assistant.tool_steps {
                step.message_id = assistant.id;
            }
        });
        self.terminal(store, at, message.tokens_used, TurnOutcome::Completed)
    }

    fn flush(&mut self, store: &mut ChatStore) {
        if let Some(text) = self.coalescer.flush() {
            store.append_streaming_text(&text);
        }
    }

    /// Flush, stamp the thought duration and usage, and end loading.
    fn terminal(
        &mut self,
        store: &mut ChatStore,
        at: Timestamp,
        tokens_used: Option<TokenUsage>,
        outcome: TurnOutcome,
    ) -> Step {
        if self.finished {
            return Step::Finished(outcome);
        }
        self.finished = true;
        if store.epoch() != self.epoch {
            self.coalescer.reset();
            return Step::Finished(outcome);
        }

        self.flush(store);
        store.update_last_assistant(|message| {
            if let (Some(started), None) = (message.thought_started_at, message.thought_duration_ms) {
                message.thought_duration_ms = Some(timestamp::elapsed_ms(started, at));
            }
            if tokens_used.is_some() {
                message.tokens_used = tokens_used;
            }
        });
        store.complete_streaming_message();
        Step::Finished(outcome)
    }

    /// A cleared transcript abandons the request: buffered text is dropped
    /// and nothing further is applied.
    fn detach_if_stale(&mut self, store: &ChatStore) -> Option<Step> {
        if store.epoch() == self.epoch {
            return None;
        }
        tracing::debug!("transcript cleared during the reply; dropping buffered text");
        self.coalescer.reset();
        self.finished = true;
        Some(Step::Finished(TurnOutcome::Cancelled))
    }
}
