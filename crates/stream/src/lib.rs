//! `medrelay-stream` — upstream-to-downstream SSE relay.
//!
//! The relay consumes a chunked byte stream from an upstream HTTP response,
//! re-frames it into complete `data: ` lines regardless of where the chunk
//! boundaries fall, and re-encodes each line as a well-formed Server-Sent
//! Event for the downstream client.
//!
//! - `reframer`: chunk-boundary independent line framing
//! - `encoder`: `data: <json>\n\n` wire encoding
//! - `pipeline`: reader loop + downstream HTTP response

pub mod encoder;
pub mod pipeline;
pub mod reframer;

pub use encoder::SseEncoder;
pub use pipeline::{RelayOutcome, RelayPipeline, STREAM_ERROR_MESSAGE, error_response, sse_response};
pub use reframer::{DATA_PREFIX, StreamReframer, frame_payload};
