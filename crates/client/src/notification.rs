//! User-visible notifications derived from job events.

use serde::Serialize;

use medrelay_core::JobId;
use medrelay_queue::{FailureReason, JobEvent};

/// Which client queue a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Analysis,
    Feedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Error,
}

/// A short, non-blocking message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub job_id: JobId,
    pub kind: JobKind,
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    /// The notification for a terminal event; `None` for progress events.
    pub fn from_event<P, O>(kind: JobKind, event: &JobEvent<P, O>) -> Option<Self> {
        let (job_id, level, message) = match event {
            JobEvent::Succeeded { job, .. } => (job.id, NotificationLevel::Info, success_text(kind).to_string()),
            JobEvent::Failed { job, error, reason } => {
                let message = match reason {
                    FailureReason::Exhausted => exhausted_text(kind).to_string(),
                    FailureReason::Rejected => format!("{}: {}", rejected_text(kind), error),
                };
                (job.id, NotificationLevel::Error, message)
            }
            _ => return None,
        };

        Some(Self {
            job_id,
            kind,
            level,
            message,
        })
    }

    pub fn is_error(&self) -> bool {
        self.level == NotificationLevel::Error
    }
}

fn success_text(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Analysis => "Analysis complete",
        JobKind::Feedback => "Feedback saved",
    }
}

fn exhausted_text(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Analysis => "Failed to analyze image after multiple attempts. Please try again.",
        JobKind::Feedback => "Failed to save feedback after multiple attempts",
    }
}

fn rejected_text(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Analysis => "The image was rejected",
        JobKind::Feedback => "Feedback was rejected",
    }
}
