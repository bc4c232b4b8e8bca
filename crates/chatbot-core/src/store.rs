//! The client-side conversation state.

use std::sync::Arc;

use chatbot_api::timestamp::Timestamp;
use chatbot_api::{Message, ToolStatus, ToolStep};
use parking_lot::Mutex;

pub type SharedChatStore = Arc<Mutex<ChatStore>>;

/// Single source of truth for what the presentation layer shows.
///
/// The message list is append-only except for the trailing assistant
/// message, which is updated in place while its reply streams in, and for
/// [`clear_messages`](ChatStore::clear_messages) / [`reset`](ChatStore::reset).
/// Every mutation bumps [`revision`](ChatStore::revision).
#[derive(Debug)]
pub struct ChatStore {
    session_id: Option<String>,
    messages: Vec<Message>,
    is_loading: bool,
    streaming_text: String,
    current_thought: String,
    revision: u64,
    /// Bumped whenever buffers are cleared from outside a turn, so a turn
    /// still holding buffered text can tell it is stale.
    epoch: u64,
    next_local_id: i64,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self {
            session_id: None,
            messages: Vec::new(),
            is_loading: false,
            streaming_text: String::new(),
            current_thought: String::new(),
            revision: 0,
            epoch: 0,
            next_local_id: -1,
        }
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedChatStore {
        Arc::new(Mutex::new(Self::new()))
    }

    // -- reads --------------------------------------------------------------

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn streaming_text(&self) -> &str {
        &self.streaming_text
    }

    pub fn current_thought(&self) -> &str {
        &self.current_thought
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The trailing message, if it belongs to the assistant.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_assistant())
    }

    /// Whether the trailing assistant message has a tool step still running.
    pub fn has_running_tool_step(&self) -> bool {
        self.last_assistant()
            .is_some_and(|m| m.tool_steps.iter().any(|s| s.status == ToolStatus::Running))
    }

    // -- writes -------------------------------------------------------------

    /// Allocate an id for a message or tool step that has not reached the
    /// server. Local ids are negative so they never collide with server ids.
    pub fn next_local_id(&mut self) -> i64 {
        let id = self.next_local_id;
        self.next_local_id -= 1;
        id
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
        self.touch();
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Append the empty assistant message a reply will stream into.
    ///
    /// Returns `false` without mutating when there is no session.
    pub fn begin_assistant_message(&mut self, at: Timestamp) -> bool {
        let Some(session_id) = self.session_id.clone() else {
            return false;
        };
        let id = self.next_local_id();
        self.messages.push(Message::assistant(id, &session_id, at));
        self.streaming_text.clear();
        self.current_thought.clear();
        self.touch();
        true
    }

    /// Mutate the trailing assistant message. A no-op returning `false` when
    /// the last message is missing or not from the assistant.
    pub fn update_last_assistant(&mut self, f: impl FnOnce(&mut Message)) -> bool {
        let Some(message) = self.messages.last_mut().filter(|m| m.is_assistant()) else {
            return false;
        };
        f(message);
        self.touch();
        true
    }

    /// Append visible streamed text to the buffer and the trailing assistant
    /// message.
    pub fn append_streaming_text(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.streaming_text.push_str(delta);
        self.update_last_assistant(|message| {
            message.content.get_or_insert_with(String::new).push_str(delta);
        });
        self.touch();
    }

    /// Replace the current thought. The first thought of a message records
    /// when thinking started.
    pub fn set_thought(&mut self, thought: &str, at: Timestamp) {
        self.current_thought = thought.to_string();
        self.update_last_assistant(|message| {
            message.thought = Some(thought.to_string());
            message.thought_started_at.get_or_insert(at);
        });
        self.touch();
    }

    /// Attach `step` to the trailing assistant message, numbering it after
    /// the steps already there.
    pub fn append_tool_step(&mut self, mut step: ToolStep) -> bool {
        self.update_last_assistant(|message| {
            step.message_id = message.id;
            step.step_number = message.tool_steps.len() as u32 + 1;
            message.tool_steps.push(step);
        })
    }

    /// Mutate the most recently started step that is still running.
    pub fn update_last_running_tool_step(&mut self, f: impl FnOnce(&mut ToolStep)) -> bool {
        let Some(step) = self
            .messages
            .last_mut()
            .filter(|m| m.is_assistant())
            .and_then(|m| {
                m.tool_steps
                    .iter_mut()
                    .rev()
                    .find(|s| s.status == ToolStatus::Running)
            })
        else {
            return false;
        };
        f(step);
        self.touch();
        true
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
        self.touch();
    }

    /// End the in-progress reply: clear the transient buffers and drop the
    /// loading flag. The assistant message keeps everything it accumulated.
    pub fn complete_streaming_message(&mut self) {
        self.streaming_text.clear();
        self.current_thought.clear();
        self.is_loading = false;
        self.touch();
    }

    /// Clear the transient buffers. Any turn still buffering text is stale
    /// from here on.
    pub fn clear_streaming(&mut self) {
        self.streaming_text.clear();
        self.current_thought.clear();
        self.epoch += 1;
        self.touch();
    }

    /// Drop the whole transcript, keeping the session.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.is_loading = false;
        self.clear_streaming();
    }

    /// Replace the transcript with history loaded from the server.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.touch();
    }

    /// Forget the session and everything in it.
    pub fn reset(&mut self) {
        self.session_id = None;
        self.clear_messages();
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}
