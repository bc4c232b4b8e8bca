/// Errors that can occur when talking to the chat backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(Box<dyn std::error::Error + Send + Sync>),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sse error: {0}")]
    Sse(String),

    #[error("invalid url: {0}")]
    Url(String),

    /// The connection closed before a `done` or `error` event arrived.
    #[error("stream closed before the reply completed")]
    StreamTruncated,
}

impl Error {
    pub fn http(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Http(Box::new(err))
    }
}
