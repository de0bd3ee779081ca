//! Upstream streaming response → downstream SSE response.
//!
//! Each relayed response gets exactly one reader task. The task owns the
//! [`StreamReframer`] and the sending half of a bounded channel; the downstream
//! body is the receiving half. Frames are therefore written strictly in decode
//! order, nothing is buffered beyond the channel capacity, and the downstream
//! body ends as soon as the reader task returns (the sender is dropped), on
//! success and on failure alike.

use std::convert::Infallible;
use std::fmt::Display;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::Response;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use medrelay_core::DeliveryError;

use crate::encoder::SseEncoder;
use crate::reframer::{StreamReframer, frame_payload};

/// Message of the terminal frame written when the upstream body fails mid-read.
pub const STREAM_ERROR_MESSAGE: &str = "stream processing error";

/// How a single relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream ended normally.
    Completed { frames: usize },
    /// Upstream answered with a non-success status; one error frame was sent.
    Rejected { status: u16 },
    /// Reading the upstream body failed; a terminal error frame was sent.
    Failed { frames: usize },
    /// The downstream client went away before the upstream finished.
    Disconnected { frames: usize },
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayPipeline {
    /// Frames that may be queued for a slow downstream reader.
    capacity: usize,
}

impl Default for RelayPipeline {
    fn default() -> Self {
        Self { capacity: 32 }
    }
}

impl RelayPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Relay an upstream HTTP response as a downstream SSE response.
    pub fn relay(&self, upstream: reqwest::Response) -> Response {
        let status = upstream.status().as_u16();
        sse_response(self.relay_chunks(status, upstream.bytes_stream()))
    }

    /// Relay a raw chunk stream that arrived with the given upstream status.
    ///
    /// A non-success status yields a single error frame naming the status;
    /// the chunks are not read at all.
    pub fn relay_chunks<S, E>(&self, status: u16, chunks: S) -> ReceiverStream<Bytes>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if !(200..300).contains(&status) {
            let outcome = RelayOutcome::Rejected { status };
            warn!(?outcome, "upstream rejected stream request");
            let err = DeliveryError::upstream(status, "non-success status");
            return single_frame(SseEncoder::error_frame(err.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        tokio::spawn(async move {
            let outcome = pump(chunks, &tx).await;
            debug!(?outcome, "relay finished");
        });
        ReceiverStream::new(rx)
    }
}

/// Drive one upstream body to completion, writing encoded frames to `tx`.
pub async fn pump<S, E>(chunks: S, tx: &mpsc::Sender<Bytes>) -> RelayOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut reframer = StreamReframer::new();
    let mut frames = 0usize;

    while let Some(next) = chunks.next().await {
        match next {
            Ok(chunk) => {
                let lines = reframer.feed(&chunk);
                if !forward_lines(&lines, tx, &mut frames).await {
                    return RelayOutcome::Disconnected { frames };
                }
            }
            Err(err) => {
                warn!(error = %err, frames, "upstream stream failed mid-relay");
                let _ = tx.send(SseEncoder::error_frame(STREAM_ERROR_MESSAGE)).await;
                return RelayOutcome::Failed { frames };
            }
        }
    }

    let lines = reframer.flush();
    if !forward_lines(&lines, tx, &mut frames).await {
        return RelayOutcome::Disconnected { frames };
    }

    RelayOutcome::Completed { frames }
}

/// Returns `false` once the downstream receiver is gone.
async fn forward_lines(lines: &[String], tx: &mpsc::Sender<Bytes>, frames: &mut usize) -> bool {
    let values = lines.iter().filter_map(parse_line);
    forward_payloads(values, tx, frames).await
}

fn parse_line(line: &String) -> Option<JsonValue> {
    let payload = frame_payload(line)?;
    match serde_json::from_str::<JsonValue>(payload) {
        Ok(v) => Some(v),
        Err(err) => {
            warn!(error = %err, "dropping malformed frame line");
            None
        }
    }
}

/// Encode and send each payload in order. A payload that fails to encode is
/// replaced by an error frame and the rest still go out.
async fn forward_payloads<T, I>(payloads: I, tx: &mpsc::Sender<Bytes>, frames: &mut usize) -> bool
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    for payload in payloads {
        if tx.send(SseEncoder::encode_or_error(&payload)).await.is_err() {
            return false;
        }
        *frames += 1;
    }
    true
}

fn single_frame(frame: Bytes) -> ReceiverStream<Bytes> {
    let (tx, rx) = mpsc::channel(1);
    // Capacity 1 and a fresh channel: this cannot fail.
    let _ = tx.try_send(frame);
    ReceiverStream::new(rx)
}

/// Wrap a frame stream in a streaming SSE response.
pub fn sse_response(frames: ReceiverStream<Bytes>) -> Response {
    let body = Body::from_stream(frames.map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    apply_sse_headers(response.headers_mut());
    response
}

/// A complete SSE response consisting of one terminal error frame.
pub fn error_response(message: impl Into<String>) -> Response {
    let mut response = Response::new(Body::from(SseEncoder::error_frame(message)));
    apply_sse_headers(response.headers_mut());
    response
}

fn apply_sse_headers(headers: &mut HeaderMap) {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}
