use std::time::Duration;

use tracing::warn;

use medrelay_core::MessageId;
use medrelay_queue::{RetryPolicy, execute_with_retry};

use super::{FeedbackRecord, FeedbackStore, FeedbackStoreError, StoredFeedback};

/// Adapter that retries transient store failures in place.
///
/// Constraint violations (`23505`, `23502`) are returned after the first try.
#[derive(Debug, Clone)]
pub struct RetryingFeedbackStore<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S> RetryingFeedbackStore<S> {
    /// Three tries, waiting 1s then 2s between them.
    pub fn new(store: S) -> Self {
        Self::with_policy(
            store,
            RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(4)),
        )
    }

    pub fn with_policy(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait::async_trait]
impl<S: FeedbackStore> FeedbackStore for RetryingFeedbackStore<S> {
    async fn upsert(&self, record: &FeedbackRecord) -> Result<StoredFeedback, FeedbackStoreError> {
        execute_with_retry(&self.policy, |attempt| async move {
            let result = self.store.upsert(record).await;
            if let Err(err) = &result {
                warn!(
                    message_id = %record.message_id,
                    attempt = attempt + 1,
                    code = err.code().unwrap_or("none"),
                    error = %err,
                    "feedback upsert failed"
                );
            }
            result
        })
        .await
    }

    async fn get(&self, message_id: &MessageId) -> Result<Option<StoredFeedback>, FeedbackStoreError> {
        execute_with_retry(&self.policy, |_| self.store.get(message_id)).await
    }
}
