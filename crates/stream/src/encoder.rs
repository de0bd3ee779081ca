//! Server-Sent Event wire encoding.

use bytes::Bytes;
use serde::Serialize;
use tracing::warn;

use medrelay_core::{DeliveryError, Frame, Metadata};

/// Encodes payloads as `data: <json>\n\n`.
///
/// Output is compact JSON with no whitespace variation, so consumers that strip
/// the `data: ` prefix and split on blank lines always see the same bytes.
#[derive(Debug, Default, Copy, Clone)]
pub struct SseEncoder;

impl SseEncoder {
    /// Encode one payload.
    pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Bytes, DeliveryError> {
        let json =
            serde_json::to_string(payload).map_err(|e| DeliveryError::encoding(e.to_string()))?;

        let mut out = String::with_capacity(json.len() + 8);
        out.push_str("data: ");
        out.push_str(&json);
        out.push_str("\n\n");
        Ok(Bytes::from(out))
    }

    /// Encode one payload, substituting an error frame if it cannot be serialized.
    ///
    /// A failure here only affects this frame; the caller keeps relaying.
    pub fn encode_or_error<T: Serialize + ?Sized>(payload: &T) -> Bytes {
        match Self::encode(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "frame could not be encoded; sending error frame instead");
                Self::error_frame(err.to_string())
            }
        }
    }

    /// A terminal `{status:"error", message}` frame.
    pub fn error_frame(message: impl Into<String>) -> Bytes {
        let frame: Frame<Metadata> = Frame::error(message);
        // A `Frame::Error` is two strings; it always serializes.
        Self::encode(&frame).unwrap_or_else(|_| {
            Bytes::from_static(b"data: {\"status\":\"error\",\"message\":\"encoding error\"}\n\n")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("payload refused to serialize"))
        }
    }

    #[test]
    fn encodes_exact_wire_format() {
        let frame: Frame = Frame::streaming("A");
        let bytes = SseEncoder::encode(&frame).unwrap();
        assert_eq!(
            &bytes[..],
            b"data: {\"status\":\"streaming\",\"content\":\"A\"}\n\n"
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let payload = json!({"b": [1, 2, {"c": null}], "a": "x y"});
        let first = SseEncoder::encode(&payload).unwrap();
        let second = SseEncoder::encode(&payload).unwrap();
        assert_eq!(first, second);
        assert!(!first[6..first.len() - 2].contains(&b'\n'));
    }

    #[test]
    fn unserializable_payload_is_an_encoding_error() {
        let err = SseEncoder::encode(&Unserializable).unwrap_err();
        assert!(matches!(err, DeliveryError::Encoding(_)));
    }

    #[test]
    fn encode_or_error_substitutes_error_frame() {
        let bytes = SseEncoder::encode_or_error(&Unserializable);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.ends_with("\n\n"));

        let frame: Frame = serde_json::from_str(text["data: ".len()..].trim()).unwrap();
        match frame {
            Frame::Error { message } => assert!(message.contains("payload refused")),
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn error_frame_shape() {
        let bytes = SseEncoder::error_frame("stream processing error");
        assert_eq!(
            &bytes[..],
            b"data: {\"status\":\"error\",\"message\":\"stream processing error\"}\n\n"
        );
    }
}
