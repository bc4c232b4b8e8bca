pub mod backend;
pub mod error;
pub mod event;
pub mod model;
pub mod request;
pub mod timestamp;

pub use backend::{ChatBackend, EventStream};
pub use error::Error;
pub use event::StreamEvent;
pub use model::{Message, Role, Session, TokenUsage, ToolStatus, ToolStep};
pub use request::{
    BackendConfig, CancelOutcome, ChatOptions, ChatRequest, ChatResponse, ClearOutcome,
    CreateSession, ToolStepInfo,
};

pub type Result<T> = std::result::Result<T, Error>;
