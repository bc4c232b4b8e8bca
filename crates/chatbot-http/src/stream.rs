//! Opens a `/stream-chat` connection and decodes its newline-delimited
//! `data: ` lines into [`StreamEvent`]s.

use std::sync::Arc;

use chatbot_api::{ChatRequest, Error, StreamEvent};
use futures::Stream;
use reqwest::header::ACCEPT;
use tokio_stream::StreamExt;

use crate::{ClientState, check_status};

pub(crate) fn open(
    state: Arc<ClientState>,
    request: ChatRequest,
) -> impl Stream<Item = Result<StreamEvent, Error>> + Send {
    async_stream::try_stream! {
        let url = state.endpoint(&["stream-chat"])?;
        tracing::debug!(session_id = %request.session_id, "opening event stream");

        let resp = state
            .client
            .post(url)
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(Error::http)?;
        let resp = check_status(resp).await?;

        let mut events = Box::pin(decode(resp.bytes_stream()));
        while let Some(event) = events.next().await {
            yield event?;
        }
        tracing::debug!(session_id = %request.session_id, "event stream closed");
    }
}

/// Decode a `/stream-chat` byte stream into typed events.
///
/// The body is split on `\n`; a line may straddle any number of chunks.
/// Each `data: ` line is parsed on its own and yielded as soon as its
/// newline arrives. Other lines, and payloads that are not valid events,
/// are skipped. A transport error ends the stream.
pub(crate) fn decode<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamEvent, Error>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut lines = LineBuffer::default();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(Error::http)?;
            for line in lines.push(chunk.as_ref()) {
                if let Some(event) = parse_line(&line) {
                    yield event;
                }
            }
        }
        // A last line without its newline still counts.
        if let Some(event) = lines.finish().as_deref().and_then(parse_line) {
            yield event;
        }
    }
}

/// Carries a partial line across chunk boundaries.
///
/// Buffers bytes rather than text so a UTF-8 sequence split between two
/// chunks is reassembled before decoding.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `chunk` and return every line it completed, without the
    /// line terminator.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            lines.push(to_text(&line[..end]));
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(to_text(&line))
    }
}

fn to_text(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn parse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!(%err, payload, "skipping malformed stream event");
            None
        }
    }
}
