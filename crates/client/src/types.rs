//! Payloads carried by the client queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medrelay_core::MessageId;

/// One image to analyze, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub image: String,
}

impl AnalysisRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

/// A vote on one assistant message, in the shape `POST /api/feedback` takes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    pub message_id: MessageId,
    pub feedback: i16,
    pub message_content: String,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackSubmission {
    pub fn new(message_id: impl Into<MessageId>, helpful: bool, message_content: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            feedback: i16::from(helpful),
            message_content: message_content.into(),
            timestamp: Utc::now(),
        }
    }
}
