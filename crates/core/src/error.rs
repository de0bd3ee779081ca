//! Delivery error model.
//!
//! Every failure that crosses a delivery boundary (an outbound job submission,
//! an upstream stream, a frame encode) is expressed as a [`DeliveryError`].
//! The variant decides what happens next: transient failures are retried up to
//! a bound, validation conflicts are surfaced immediately, and protocol or
//! encoding errors terminate one relay session or one frame respectively.

use std::time::Duration;

use thiserror::Error;

/// Result type used by delivery code paths.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Delivery-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Timeout, refused connection, reset, or a server-side hiccup.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// The remote side rejected the submission (duplicate id, missing field).
    #[error("validation conflict: {0}")]
    ValidationConflict(String),

    /// The streamed source answered with a non-success status.
    #[error("upstream responded with status: {status}")]
    UpstreamProtocol { status: u16, message: String },

    /// A payload could not be serialized.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Coarse retry classification of a [`DeliveryError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// May succeed if attempted again.
    Retryable,
    /// Retrying cannot change the outcome.
    Permanent,
}

impl DeliveryError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientNetwork(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ValidationConflict(msg.into())
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::UpstreamProtocol {
            status,
            message: msg.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// A bounded outbound request ran out of time.
    ///
    /// Timeouts are indistinguishable from network failures for retry purposes.
    pub fn timeout(after: Duration) -> Self {
        Self::TransientNetwork(format!("request timed out after {}ms", after.as_millis()))
    }

    pub fn class(&self) -> FailureClass {
        match self {
            DeliveryError::TransientNetwork(_) => FailureClass::Retryable,
            DeliveryError::ValidationConflict(_)
            | DeliveryError::UpstreamProtocol { .. }
            | DeliveryError::Encoding(_) => FailureClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }

    /// Short machine-readable code, used in logs and JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DeliveryError::TransientNetwork(_) => "transient_network",
            DeliveryError::ValidationConflict(_) => "validation_conflict",
            DeliveryError::UpstreamProtocol { .. } => "upstream_protocol",
            DeliveryError::Encoding(_) => "encoding",
        }
    }

    /// Classify a non-success HTTP status returned by a job's remote endpoint.
    ///
    /// 400, 409 and 422 mean the request itself is unacceptable; everything
    /// else (5xx, 408, 429, ...) is treated as transient.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            400 | 409 | 422 => Self::ValidationConflict(format!("{status}: {body}")),
            _ => Self::TransientNetwork(format!("{status}: {body}")),
        }
    }
}
