use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::model::{TokenUsage, deserialize_usage};

/// One event of a `/stream-chat` response.
///
/// The protocol for a single request is:
///
/// ```text
/// (Message | StreamChunk | Thought | ToolStart ToolResult)*
/// Done | Error | Cancelled
/// ```
///
/// Missing or `null` string fields decode as empty strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of agent answer text.
    Message {
        #[serde(default, deserialize_with = "nullable_string")]
        content: String,
    },

    /// A chunk of raw model output.
    StreamChunk {
        #[serde(default, deserialize_with = "nullable_string")]
        content: String,
    },

    /// The agent's current reasoning. Replaces any earlier thought.
    Thought {
        #[serde(default, deserialize_with = "nullable_string")]
        content: String,
    },

    /// A tool invocation started.
    ToolStart {
        #[serde(default, deserialize_with = "nullable_string")]
        tool: String,
        #[serde(default)]
        input: Value,
    },

    /// The most recently started tool finished.
    ToolResult {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },

    /// Generation is complete.
    Done {
        #[serde(default, deserialize_with = "deserialize_usage")]
        tokens_used: Option<TokenUsage>,
    },

    /// The server failed while generating.
    Error {
        #[serde(default, deserialize_with = "nullable_string")]
        message: String,
    },

    /// Generation was stopped on the server.
    Cancelled {
        #[serde(default)]
        message: Option<String>,
    },
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        StreamEvent::StreamChunk {
            content: content.into(),
        }
    }

    /// Whether this event ends the stream for its request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done { .. } | StreamEvent::Error { .. } | StreamEvent::Cancelled { .. }
        )
    }
}

fn nullable_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
