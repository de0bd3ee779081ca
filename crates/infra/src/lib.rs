//! Infrastructure layer: persistence collaborators.

pub mod feedback;
pub mod memory;

pub use feedback::{
    FeedbackRecord, FeedbackStore, FeedbackStoreError, InMemoryFeedbackStore,
    PostgresFeedbackStore, RetryingFeedbackStore, StoredFeedback,
};
pub use memory::{
    InMemoryMemoryStore, MemoryStore, MemoryStoreError, NewMemory, PostgresMemoryStore,
    SIMILAR_LIMIT, SIMILARITY_THRESHOLD, SimilarQuestion, cosine_similarity,
};
