//! `medrelay-queue` — single-flight job delivery.
//!
//! A [`JobQueue`] accepts fire-and-forget payloads, submits them one at a time
//! through a [`JobHandler`], and retries failures according to a
//! [`RetryPolicy`]. Results are published as [`JobEvent`]s. A
//! [`LifecycleResumer`] restarts an idle queue when the host signals that it
//! became active again.

pub mod job;
pub mod queue;
pub mod resumer;
pub mod retry;

pub use job::{FailureReason, JobEvent, PendingJob};
pub use queue::{DrainStats, JobHandler, JobQueue, QueueConfig, QueueSnapshot};
pub use resumer::{HostActivity, HostState, LifecycleResumer, Resumable};
pub use retry::{BackoffStrategy, Retryable, RetryDecision, RetryPolicy, execute_with_retry};
