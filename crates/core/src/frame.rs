//! Protocol frames carried by the chat stream.
//!
//! The upstream backend emits one JSON object per `data: ` line. Each object
//! carries a `status` discriminant: `streaming` for a partial content fragment,
//! `complete` for the terminal payload, `error` for a terminal failure. Frame
//! order is the upstream emission order and is preserved end-to-end.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Discriminant of a [`Frame`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Streaming,
    Complete,
    Error,
}

impl FrameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameStatus::Streaming => "streaming",
            FrameStatus::Complete => "complete",
            FrameStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FrameStatus::Streaming)
    }
}

/// One decoded unit of streamed data.
///
/// `M` is the extra metadata attached to the terminal payload. Backends differ
/// in what they attach (a conversation title, the persona that answered, a
/// list of sources), so the default [`Metadata`] keeps all of them optional;
/// callers that know their backend can plug in a tighter type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Frame<M = Metadata> {
    Streaming {
        content: String,
    },
    Complete {
        response: String,
        #[serde(flatten)]
        meta: M,
    },
    Error {
        message: String,
    },
}

/// Optional metadata found on `complete` frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<JsonValue>,
}

impl<M> Frame<M> {
    pub fn streaming(content: impl Into<String>) -> Self {
        Self::Streaming {
            content: content.into(),
        }
    }

    pub fn complete(response: impl Into<String>, meta: M) -> Self {
        Self::Complete {
            response: response.into(),
            meta,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn status(&self) -> FrameStatus {
        match self {
            Frame::Streaming { .. } => FrameStatus::Streaming,
            Frame::Complete { .. } => FrameStatus::Complete,
            Frame::Error { .. } => FrameStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn streaming_frame_uses_status_tag() {
        let frame: Frame = Frame::streaming("A");
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v, json!({"status": "streaming", "content": "A"}));
    }

    #[test]
    fn complete_frame_flattens_metadata() {
        let raw = json!({
            "status": "complete",
            "response": "done",
            "title": "Dosage",
            "persona": "general_med"
        });
        let frame: Frame = serde_json::from_value(raw).unwrap();
        match &frame {
            Frame::Complete { response, meta } => {
                assert_eq!(response, "done");
                assert_eq!(meta.title.as_deref(), Some("Dosage"));
                assert_eq!(meta.persona.as_deref(), Some("general_med"));
                assert!(meta.sources.is_none());
            }
            other => panic!("expected complete frame, got {other:?}"),
        }
        assert!(frame.is_terminal());
    }

    #[test]
    fn error_frame_is_terminal() {
        let frame: Frame = Frame::error("stream processing error");
        assert_eq!(frame.status(), FrameStatus::Error);
        assert!(frame.is_terminal());
        assert!(!Frame::<Metadata>::streaming("x").is_terminal());
    }
}
