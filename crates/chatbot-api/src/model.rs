//! Conversation data model shared by the backend and the client store.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::timestamp::{self, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(with = "crate::timestamp")]
    pub created_at: Timestamp,
    #[serde(with = "crate::timestamp")]
    pub updated_at: Timestamp,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub message_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A single entry in a session transcript.
///
/// Messages created locally (before the server has assigned ids) carry
/// negative ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub thought_duration_ms: Option<u64>,
    /// When the first thought delta for this message arrived.
    #[serde(default, with = "crate::timestamp::option")]
    pub thought_started_at: Option<Timestamp>,
    #[serde(default)]
    pub tool_calls: Option<Value>,
    #[serde(with = "crate::timestamp")]
    pub created_at: Timestamp,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "deserialize_usage")]
    pub tokens_used: Option<TokenUsage>,
    #[serde(default)]
    pub tool_steps: Vec<ToolStep>,
}

impl Message {
    fn new(id: i64, session_id: &str, role: Role, content: Option<String>, at: Timestamp) -> Self {
        Self {
            id,
            session_id: session_id.to_string(),
            role,
            content,
            thought: None,
            thought_duration_ms: None,
            thought_started_at: None,
            tool_calls: None,
            created_at: at,
            model: None,
            tokens_used: None,
            tool_steps: Vec::new(),
        }
    }

    pub fn user(id: i64, session_id: &str, content: impl Into<String>, at: Timestamp) -> Self {
        Self::new(id, session_id, Role::User, Some(content.into()), at)
    }

    /// An empty assistant message, ready to receive streamed content.
    pub fn assistant(id: i64, session_id: &str, at: Timestamp) -> Self {
        Self::new(id, session_id, Role::Assistant, None, at)
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ToolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolStatus::Pending => "pending",
            ToolStatus::Running => "running",
            ToolStatus::Completed => "completed",
            ToolStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => ToolStatus::Running,
            "completed" | "success" => ToolStatus::Completed,
            "failed" | "error" => ToolStatus::Failed,
            _ => ToolStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Failed)
    }
}

impl<'de> Deserialize<'de> for ToolStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ToolStatus::parse(&raw))
    }
}

/// One tool invocation made while producing an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStep {
    pub id: i64,
    pub message_id: i64,
    pub step_number: u32,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_output: Option<String>,
    #[serde(default)]
    pub tool_error: Option<String>,
    #[serde(with = "crate::timestamp")]
    pub started_at: Timestamp,
    #[serde(default, with = "crate::timestamp::option")]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub status: ToolStatus,
}

impl ToolStep {
    /// A freshly started step. `message_id` and `step_number` are assigned
    /// when the step is attached to a message.
    pub fn running(id: i64, tool_name: impl Into<String>, tool_input: Value, at: Timestamp) -> Self {
        Self {
            id,
            message_id: 0,
            step_number: 0,
            tool_name: tool_name.into(),
            tool_input,
            tool_output: None,
            tool_error: None,
            started_at: at,
            completed_at: None,
            duration_ms: None,
            status: ToolStatus::Running,
        }
    }

    /// Move a running step into its terminal state.
    ///
    /// A reported error marks the step failed; otherwise it completes with
    /// `output` (empty when the server sent none). The server's duration wins
    /// over the locally measured one.
    pub fn finish(
        &mut self,
        output: Option<String>,
        error: Option<String>,
        duration_ms: Option<u64>,
        at: Timestamp,
    ) {
        self.status = if error.is_some() {
            ToolStatus::Failed
        } else {
            ToolStatus::Completed
        };
        self.tool_output = Some(output.unwrap_or_default());
        self.tool_error = error;
        self.completed_at = Some(at);
        self.duration_ms = Some(duration_ms.unwrap_or_else(|| timestamp::elapsed_ms(self.started_at, at)));
    }
}

/// Accepts either a usage object or a bare total token count.
pub(crate) fn deserialize_usage<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<TokenUsage>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Detailed(TokenUsage),
        Total(u32),
    }

    Ok(Option::<Wire>::deserialize(deserializer)?.map(|wire| match wire {
        Wire::Detailed(usage) => usage,
        Wire::Total(total_tokens) => TokenUsage {
            total_tokens,
            ..Default::default()
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn backend_message_parses_with_integer_usage() {
        let message: Message = serde_json::from_value(json!({
            "id": 7,
            "session_id": "s-1",
            "role": "assistant",
            "content": "hi",
            "tool_calls": null,
            "created_at": "2025-01-04T10:22:31.123456",
            "model": "qwen-plus",
            "tokens_used": 42,
            "tool_steps": []
        }))
        .expect("message");

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "hi");
        assert_eq!(message.tokens_used.map(|u| u.total_tokens), Some(42));
        assert!(message.thought.is_none());
    }

    #[test]
    fn tool_step_status_tolerates_unknown_values() {
        let step: ToolStep = serde_json::from_value(json!({
            "id": 1,
            "message_id": 7,
            "step_number": 1,
            "tool_name": "calculator",
            "tool_input": {"expression": "6*7"},
            "tool_output": null,
            "tool_error": null,
            "started_at": "2025-01-04T10:22:31",
            "completed_at": null,
            "duration_ms": null,
            "status": "queued"
        }))
        .expect("tool step");

        assert_eq!(step.status, ToolStatus::Pending);
        assert!(step.completed_at.is_none());
    }

    #[test]
    fn finishing_a_step_prefers_server_duration() {
        let start = Utc.with_ymd_and_hms(2025, 1, 4, 10, 0, 0).unwrap();
        let end = start + chrono::Duration::milliseconds(900);

        let mut measured = ToolStep::running(-1, "search", json!({"q": "x"}), start);
        measured.finish(Some("42".into()), None, None, end);
        assert_eq!(measured.status, ToolStatus::Completed);
        assert_eq!(measured.duration_ms, Some(900));

        let mut reported = ToolStep::running(-2, "search", json!({}), start);
        reported.finish(None, Some("boom".into()), Some(120), end);
        assert_eq!(reported.status, ToolStatus::Failed);
        assert_eq!(reported.tool_output.as_deref(), Some(""));
        assert_eq!(reported.duration_ms, Some(120));
    }
}
