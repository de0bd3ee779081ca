use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

use medrelay_core::MessageId;

use super::{FeedbackRecord, FeedbackStore, FeedbackStoreError, StoredFeedback};

#[derive(Debug, Clone)]
struct Row {
    id: i64,
    feedback: i16,
    updated_at: DateTime<Utc>,
}

/// In-memory feedback store for tests/dev.
///
/// Failures can be scripted with [`fail_next`](Self::fail_next); each queued
/// error is returned by one upsert before the store behaves normally again.
#[derive(Debug, Default)]
pub struct InMemoryFeedbackStore {
    rows: RwLock<HashMap<MessageId, Row>>,
    faults: Mutex<VecDeque<FeedbackStoreError>>,
}

impl InMemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next upsert fail with `err`. Calls accumulate in order.
    pub fn fail_next(&self, err: FeedbackStoreError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back(err);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the row for `message_id` was last written.
    pub fn updated_at(&self, message_id: &MessageId) -> Option<DateTime<Utc>> {
        self.rows
            .read()
            .ok()
            .and_then(|rows| rows.get(message_id).map(|r| r.updated_at))
    }

    fn take_fault(&self) -> Option<FeedbackStoreError> {
        self.faults.lock().ok().and_then(|mut f| f.pop_front())
    }
}

#[async_trait::async_trait]
impl FeedbackStore for InMemoryFeedbackStore {
    async fn upsert(&self, record: &FeedbackRecord) -> Result<StoredFeedback, FeedbackStoreError> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        if record.message_id.is_blank() {
            return Err(FeedbackStoreError::MissingField("message_id".to_string()));
        }

        let mut rows = self
            .rows
            .write()
            .map_err(|_| FeedbackStoreError::storage("lock poisoned"))?;

        let next_id = rows.len() as i64 + 1;
        let now = Utc::now();
        let row = rows
            .entry(record.message_id.clone())
            .and_modify(|row| {
                row.feedback = record.feedback;
                row.updated_at = now;
            })
            .or_insert_with(|| Row {
                id: next_id,
                feedback: record.feedback,
                updated_at: now,
            });

        Ok(StoredFeedback {
            id: row.id,
            feedback: row.feedback,
        })
    }

    async fn get(&self, message_id: &MessageId) -> Result<Option<StoredFeedback>, FeedbackStoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| FeedbackStoreError::storage("lock poisoned"))?;
        Ok(rows.get(message_id).map(|row| StoredFeedback {
            id: row.id,
            feedback: row.feedback,
        }))
    }
}
