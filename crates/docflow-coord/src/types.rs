use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, CoordError>;

#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    /// The store could not be reached or the request failed in transit.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// The adapter cannot express this operation.
    #[error("operation not supported by {adapter}: {operation}")]
    Unsupported {
        adapter: &'static str,
        operation: String,
    },

    /// The key holds a different structure than the operation expects.
    #[error("wrong type for key {key}")]
    WrongType { key: String },

    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// A compare-and-swap loop lost every race it was allowed to retry.
    #[error("too much contention on {key}")]
    ContentionExhausted { key: String },
}

impl CoordError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CoordError::Unavailable(_))
    }
}

/// Atomic primitives shared by every worker process. Each method is a single
/// store operation; callers never compose a read-modify-write out of them
/// except under a lock obtained with [`CoordinationStore::try_lock`].
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Add or rescore a member. Returns `true` when the member is new.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool>;
    /// Returns `true` when the member was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;
    async fn zcard(&self, key: &str) -> Result<u64>;
    /// Remove members whose score lies in `[min, max]`; returns how many.
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;
    /// Set a field only if it does not exist yet.
    async fn hset_nx(&self, key: &str, field: &str, value: String) -> Result<bool>;
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>>;
    /// Atomically add `delta` to an integer field (missing fields count as 0).
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Remove whatever lives under `key`. Returns `true` if something existed.
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    /// Delete every key matching a `*` glob.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;
    /// Logical keys starting with `prefix`, sorted.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Take `key` for `ttl` if nobody holds it. `token` identifies the holder.
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;
    /// Release only if still held under `token`.
    async fn unlock(&self, key: &str, token: &str) -> Result<bool>;
}
