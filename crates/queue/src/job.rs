//! Job records and the events published about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medrelay_core::{DeliveryError, JobId};

/// A unit of work owned by a [`JobQueue`](crate::JobQueue) until it reaches a
/// terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJob<P> {
    pub id: JobId,
    pub payload: P,
    /// When this attempt was queued. Refreshed on every retry.
    pub submitted_at: DateTime<Utc>,
    /// Number of tries that already failed.
    pub attempt: u32,
}

impl<P> PendingJob<P> {
    pub fn new(payload: P) -> Self {
        Self {
            id: JobId::new(),
            payload,
            submitted_at: Utc::now(),
            attempt: 0,
        }
    }

    /// The same job, queued again as its next attempt.
    pub fn retried(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            submitted_at: Utc::now(),
            ..self
        }
    }
}

/// Why a job ended in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Every allowed try failed with a retryable error.
    Exhausted,
    /// The failure was permanent; no retry was attempted.
    Rejected,
}

/// Lifecycle notifications for jobs in a queue.
///
/// `Succeeded` and `Failed` are terminal and hand the job back to the
/// observer; exactly one of them is published per enqueued job.
#[derive(Debug, Clone)]
pub enum JobEvent<P, O> {
    Enqueued {
        id: JobId,
    },
    Started {
        id: JobId,
        attempt: u32,
    },
    /// The job failed and was queued again as `next_attempt`.
    Retrying {
        id: JobId,
        next_attempt: u32,
        error: DeliveryError,
    },
    Succeeded {
        job: PendingJob<P>,
        output: O,
    },
    Failed {
        job: PendingJob<P>,
        error: DeliveryError,
        reason: FailureReason,
    },
}

impl<P, O> JobEvent<P, O> {
    pub fn id(&self) -> JobId {
        match self {
            JobEvent::Enqueued { id }
            | JobEvent::Started { id, .. }
            | JobEvent::Retrying { id, .. } => *id,
            JobEvent::Succeeded { job, .. } | JobEvent::Failed { job, .. } => job.id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Succeeded { .. } | JobEvent::Failed { .. })
    }
}
