use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::error::Error;
use crate::event::StreamEvent;
use crate::request::{ChatRequest, ChatResponse};

/// A live `/stream-chat` response.
///
/// Yields events in arrival order. Dropping it closes the underlying
/// connection.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>,
}

impl EventStream {
    pub fn new(stream: impl Stream<Item = Result<StreamEvent, Error>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// The chat operations a client needs from the agent service.
///
/// Implemented over HTTP by `chatbot-http`; tests implement it with
/// scripted event lists.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a streaming reply for `request`.
    fn stream_chat(&self, request: ChatRequest) -> EventStream;

    /// Request a complete, non-streaming reply.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, Error>;
}
