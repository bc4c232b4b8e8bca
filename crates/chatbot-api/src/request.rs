//! Request and response bodies for the chat, config and session endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Message, ToolStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    pub enable_tool_calls: bool,
    pub enable_memory: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            enable_tool_calls: true,
            enable_memory: false,
        }
    }
}

/// Body of `POST /chat` and `POST /stream-chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub options: ChatOptions,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>, options: ChatOptions) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            options,
        }
    }
}

/// Summary of one tool call in a non-streaming reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStepInfo {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_output: Option<String>,
    #[serde(default)]
    pub tool_error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub status: ToolStatus,
}

/// Reply of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub output: String,
    #[serde(default)]
    pub intermediate_steps: Vec<Value>,
    #[serde(default)]
    pub tool_steps: Vec<ToolStepInfo>,
    pub message: Message,
}

/// Public backend settings from `GET /config`, for display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub model_name: String,
    pub temperature: f64,
    pub max_iterations: u32,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSession {
    pub user_id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearOutcome {
    pub success: bool,
    #[serde(default)]
    pub deleted_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}
