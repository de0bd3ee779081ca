//! Message feedback persistence.
//!
//! Feedback is keyed by the caller-supplied [`MessageId`]. Storing feedback for
//! an id that already exists updates the vote instead of failing, so clients
//! may resubmit freely.

pub mod in_memory;
pub mod postgres;
pub mod retry;

pub use in_memory::InMemoryFeedbackStore;
pub use postgres::PostgresFeedbackStore;
pub use retry::RetryingFeedbackStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medrelay_core::MessageId;
use medrelay_queue::Retryable;

/// A thumbs-up / thumbs-down vote on one assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub message_id: MessageId,
    /// `1` for helpful, `0` for not helpful.
    pub feedback: i16,
    #[serde(default)]
    pub message_content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl FeedbackRecord {
    pub fn new(message_id: impl Into<MessageId>, feedback: i16) -> Self {
        Self {
            message_id: message_id.into(),
            feedback,
            message_content: String::new(),
            timestamp: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.message_content = content.into();
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    /// A non-blank id and a vote of 0 or 1.
    pub fn is_valid(&self) -> bool {
        !self.message_id.is_blank() && matches!(self.feedback, 0 | 1)
    }
}

/// Row returned by an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFeedback {
    pub id: i64,
    pub feedback: i16,
}

/// Feedback store error.
///
/// [`code`](FeedbackStoreError::code) reports the driver-level code the error
/// came from (`ETIMEDOUT`, `ECONNREFUSED`, a SQLSTATE) so it can be echoed to
/// clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedbackStoreError {
    #[error("database connection timed out: {0}")]
    Timeout(String),
    #[error("could not connect to database: {0}")]
    ConnectionRefused(String),
    #[error("duplicate message id: {0}")]
    Duplicate(String),
    #[error("missing required fields: {0}")]
    MissingField(String),
    #[error("storage error: {message}")]
    Storage {
        code: Option<String>,
        message: String,
    },
}

impl FeedbackStoreError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            code: None,
            message: message.into(),
        }
    }

    /// Build an error from a driver or SQLSTATE code.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "ETIMEDOUT" => Self::Timeout(message),
            "ECONNREFUSED" => Self::ConnectionRefused(message),
            "23505" => Self::Duplicate(message),
            "23502" => Self::MissingField(message),
            other => Self::Storage {
                code: Some(other.to_string()),
                message,
            },
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            FeedbackStoreError::Timeout(_) => Some("ETIMEDOUT"),
            FeedbackStoreError::ConnectionRefused(_) => Some("ECONNREFUSED"),
            FeedbackStoreError::Duplicate(_) => Some("23505"),
            FeedbackStoreError::MissingField(_) => Some("23502"),
            FeedbackStoreError::Storage { code, .. } => code.as_deref(),
        }
    }
}

impl Retryable for FeedbackStoreError {
    fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FeedbackStoreError::Duplicate(_) | FeedbackStoreError::MissingField(_)
        )
    }
}

/// Idempotent feedback persistence.
#[async_trait::async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Insert the record, or update the vote of an existing record with the
    /// same message id.
    async fn upsert(&self, record: &FeedbackRecord) -> Result<StoredFeedback, FeedbackStoreError>;

    async fn get(&self, message_id: &MessageId) -> Result<Option<StoredFeedback>, FeedbackStoreError>;
}

#[async_trait::async_trait]
impl<S: FeedbackStore + ?Sized> FeedbackStore for std::sync::Arc<S> {
    async fn upsert(&self, record: &FeedbackRecord) -> Result<StoredFeedback, FeedbackStoreError> {
        (**self).upsert(record).await
    }

    async fn get(&self, message_id: &MessageId) -> Result<Option<StoredFeedback>, FeedbackStoreError> {
        (**self).get(message_id).await
    }
}
