//! `medrelay-client` — client-side job submission.
//!
//! A [`ClientSession`] owns one ordered queue for image analyses and one for
//! feedback votes. Both submit over HTTP, retry transient failures, pause
//! while the host is suspended and resume when it becomes active again.
//! Outcomes surface as [`Notification`]s instead of errors so a caller never
//! blocks on delivery.

pub mod notification;
pub mod session;
pub mod submitter;
pub mod types;

pub use notification::{JobKind, Notification, NotificationLevel};
pub use session::{ClientConfig, ClientError, ClientSession};
pub use submitter::HttpSubmitter;
pub use types::{AnalysisRequest, FeedbackSubmission};
