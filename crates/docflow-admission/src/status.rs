use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use docflow_common::{ExecutionStatus, StatusValue};
use docflow_coord::{CoordError, CoordinationStore};

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::keys::RateLimitKeyBuilder;

const F_STATUS: &str = "status";
const F_COMPLETED: &str = "completed_files";
const F_FAILED: &str = "failed_files";
const F_TOTAL: &str = "total_files";
const F_CREATED: &str = "created_at";
const F_UPDATED: &str = "updated_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStatusRecord {
    pub workflow_id: String,
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub completed_files: u64,
    pub failed_files: u64,
    pub total_files: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionStatusRecord {
    pub fn processed_files(&self) -> u64 {
        self.completed_files + self.failed_files
    }

    /// Share of files processed, in percent. `None` while the total is unknown.
    pub fn progress(&self) -> Option<f64> {
        (self.total_files > 0)
            .then(|| (self.processed_files() as f64 / self.total_files as f64 * 100.0).min(100.0))
    }

    fn from_fields(
        workflow_id: &str,
        execution_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<Self, CoordError> {
        let key = RateLimitKeyBuilder::execution_status(workflow_id, execution_id);
        let corrupt = |reason: String| CoordError::Corrupt {
            key: key.clone(),
            reason,
        };

        let status = fields
            .get(F_STATUS)
            .ok_or_else(|| corrupt("missing status".into()))
            .and_then(|raw| ExecutionStatus::from_str(raw).map_err(|e| corrupt(e.to_string())))?;
        let counter = |field: &str| -> Result<u64, CoordError> {
            match fields.get(field) {
                None => Ok(0),
                Some(raw) => raw
                    .parse::<i64>()
                    .map(|n| n.max(0) as u64)
                    .map_err(|e| corrupt(format!("{field}: {e}"))),
            }
        };
        let timestamp = |field: &str| -> Option<DateTime<Utc>> {
            fields
                .get(field)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        let updated_at = timestamp(F_UPDATED).unwrap_or_else(Utc::now);
        Ok(Self {
            workflow_id: workflow_id.to_string(),
            execution_id: execution_id.to_string(),
            status,
            completed_files: counter(F_COMPLETED)?,
            failed_files: counter(F_FAILED)?,
            total_files: counter(F_TOTAL)?,
            created_at: timestamp(F_CREATED).unwrap_or(updated_at),
            updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusLookup {
    Found(ExecutionStatusRecord),
    /// No record; never created or already expired.
    Missing,
    /// The store could not answer. Callers must not treat this as absent.
    Unknown,
}

/// Live status and file counters per execution, kept in a coordination-store
/// hash so any worker can update them.
pub struct ExecutionStatusTracker {
    store: Arc<dyn CoordinationStore>,
    config: TrackerConfig,
}

impl ExecutionStatusTracker {
    pub fn new(store: Arc<dyn CoordinationStore>, config: TrackerConfig) -> Self {
        Self { store, config }
    }

    /// Start tracking. Calling it again for the same execution keeps the
    /// existing status, counters and creation time.
    pub async fn create(
        &self,
        workflow_id: &str,
        execution_id: &str,
        total_files: u64,
    ) -> Result<(), TrackerError> {
        let key = RateLimitKeyBuilder::execution_status(workflow_id, execution_id);
        let now = Utc::now().to_rfc3339();

        let created = self
            .store
            .hset_nx(&key, F_STATUS, ExecutionStatus::Pending.as_str().to_string())
            .await?;
        self.store.hset_nx(&key, F_COMPLETED, "0".into()).await?;
        self.store.hset_nx(&key, F_FAILED, "0".into()).await?;
        self.store.hset_nx(&key, F_CREATED, now.clone()).await?;
        self.store
            .hset(&key, &[(F_TOTAL, total_files.to_string()), (F_UPDATED, now)])
            .await?;
        self.store.expire(&key, self.config.active_ttl).await?;

        tracing::debug!(workflow_id, execution_id, total_files, created, "execution tracking started");
        Ok(())
    }

    /// Record a new status. Any accepted representation is canonicalized
    /// first; an unrecognized value fails before the store is touched.
    pub async fn update_status<'a>(
        &self,
        workflow_id: &str,
        execution_id: &str,
        status: impl Into<StatusValue<'a>>,
    ) -> Result<ExecutionStatus, TrackerError> {
        let status = ExecutionStatus::parse(status)?;
        let key = RateLimitKeyBuilder::execution_status(workflow_id, execution_id);

        self.store
            .hset(
                &key,
                &[
                    (F_STATUS, status.as_str().to_string()),
                    (F_UPDATED, Utc::now().to_rfc3339()),
                ],
            )
            .await?;
        let ttl = if status.is_terminal() {
            self.config.terminal_ttl
        } else {
            self.config.active_ttl
        };
        self.store.expire(&key, ttl).await?;

        tracing::debug!(workflow_id, execution_id, status = %status, "execution status updated");
        Ok(status)
    }

    pub async fn increment_completed(
        &self,
        workflow_id: &str,
        execution_id: &str,
    ) -> Result<u64, TrackerError> {
        self.increment(workflow_id, execution_id, F_COMPLETED).await
    }

    pub async fn increment_failed(
        &self,
        workflow_id: &str,
        execution_id: &str,
    ) -> Result<u64, TrackerError> {
        self.increment(workflow_id, execution_id, F_FAILED).await
    }

    async fn increment(
        &self,
        workflow_id: &str,
        execution_id: &str,
        field: &str,
    ) -> Result<u64, TrackerError> {
        let key = RateLimitKeyBuilder::execution_status(workflow_id, execution_id);
        let now = Utc::now().to_rfc3339();

        // A record whose create was lost or that already expired is seeded
        // so it stays readable instead of holding a lone counter.
        let seeded = self
            .store
            .hset_nx(&key, F_STATUS, ExecutionStatus::Pending.as_str().to_string())
            .await?;
        if seeded {
            self.store.hset_nx(&key, F_CREATED, now.clone()).await?;
            tracing::debug!(workflow_id, execution_id, "counter hit an untracked execution, record seeded");
        }

        let value = self.store.hincr(&key, field, 1).await?;
        self.store.hset(&key, &[(F_UPDATED, now)]).await?;
        let fields = self.store.hget_all(&key).await?;
        self.store.expire(&key, self.ttl_for(&fields)).await?;
        Ok(value.max(0) as u64)
    }

    /// A terminal record keeps its short TTL when late counters arrive.
    fn ttl_for(&self, fields: &HashMap<String, String>) -> Duration {
        let terminal = fields
            .get(F_STATUS)
            .and_then(|raw| ExecutionStatus::from_str(raw).ok())
            .is_some_and(ExecutionStatus::is_terminal);
        if terminal {
            self.config.terminal_ttl
        } else {
            self.config.active_ttl
        }
    }

    pub async fn get(&self, workflow_id: &str, execution_id: &str) -> StatusLookup {
        let key = RateLimitKeyBuilder::execution_status(workflow_id, execution_id);
        let fields = match self.store.hget_all(&key).await {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(workflow_id, execution_id, error = %e, "execution status unavailable");
                return StatusLookup::Unknown;
            }
        };
        if fields.is_empty() {
            return StatusLookup::Missing;
        }
        match ExecutionStatusRecord::from_fields(workflow_id, execution_id, &fields) {
            Ok(record) => StatusLookup::Found(record),
            Err(e) => {
                tracing::warn!(workflow_id, execution_id, error = %e, "unreadable execution status");
                StatusLookup::Unknown
            }
        }
    }

    pub async fn delete(&self, workflow_id: &str, execution_id: &str) -> Result<bool, TrackerError> {
        let key = RateLimitKeyBuilder::execution_status(workflow_id, execution_id);
        Ok(self.store.delete(&key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use docflow_coord::MemoryCoordStore;

    fn tracker() -> (ExecutionStatusTracker, MemoryCoordStore) {
        let store = MemoryCoordStore::new();
        (
            ExecutionStatusTracker::new(Arc::new(store.clone()), TrackerConfig::default()),
            store,
        )
    }

    fn found(lookup: StatusLookup) -> ExecutionStatusRecord {
        match lookup {
            StatusLookup::Found(r) => r,
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let (t, _) = tracker();
        t.create("wf", "ex", 4).await.unwrap();
        let r = found(t.get("wf", "ex").await);
        assert_eq!(r.status, ExecutionStatus::Pending);
        assert_eq!((r.completed_files, r.failed_files, r.total_files), (0, 0, 4));
        assert_eq!(r.progress(), Some(0.0));
    }

    #[tokio::test]
    async fn create_twice_keeps_progress() {
        let (t, _) = tracker();
        t.create("wf", "ex", 2).await.unwrap();
        t.update_status("wf", "ex", ExecutionStatus::Executing).await.unwrap();
        t.increment_completed("wf", "ex").await.unwrap();

        t.create("wf", "ex", 2).await.unwrap();
        let r = found(t.get("wf", "ex").await);
        assert_eq!(r.status, ExecutionStatus::Executing);
        assert_eq!(r.completed_files, 1);
        assert_eq!(r.progress(), Some(50.0));
    }

    #[tokio::test]
    async fn status_representations_normalize() {
        let (t, _) = tracker();
        t.create("wf", "ex", 1).await.unwrap();
        for raw in ["PENDING", "ExecutionStatus.PENDING", "pending"] {
            assert_eq!(
                t.update_status("wf", "ex", raw).await.unwrap(),
                ExecutionStatus::Pending
            );
        }
        let owned = String::from("executing");
        assert_eq!(
            t.update_status("wf", "ex", &owned).await.unwrap(),
            ExecutionStatus::Executing
        );
    }

    #[tokio::test]
    async fn unrecognized_status_fails_without_writing() {
        let (t, _) = tracker();
        t.create("wf", "ex", 1).await.unwrap();
        let err = t.update_status("wf", "ex", "EXECUTING_ISH").await.unwrap_err();
        assert!(matches!(err, TrackerError::InvalidStatus(_)));
        assert_eq!(found(t.get("wf", "ex").await).status, ExecutionStatus::Pending);
    }

    #[tokio::test]
    async fn counters_increment() {
        let (t, _) = tracker();
        t.create("wf", "ex", 3).await.unwrap();
        assert_eq!(t.increment_completed("wf", "ex").await.unwrap(), 1);
        assert_eq!(t.increment_completed("wf", "ex").await.unwrap(), 2);
        assert_eq!(t.increment_failed("wf", "ex").await.unwrap(), 1);
        let r = found(t.get("wf", "ex").await);
        assert_eq!(r.processed_files(), 3);
        assert_eq!(r.progress(), Some(100.0));
    }

    #[tokio::test]
    async fn missing_and_unknown_are_distinct() {
        let (t, store) = tracker();
        assert_eq!(t.get("wf", "nope").await, StatusLookup::Missing);
        store.set_available(false);
        assert_eq!(t.get("wf", "nope").await, StatusLookup::Unknown);
        assert!(matches!(
            t.increment_completed("wf", "nope").await.unwrap_err(),
            TrackerError::Coordination(_)
        ));
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let (t, _) = tracker();
        t.create("wf", "ex", 1).await.unwrap();
        assert!(t.delete("wf", "ex").await.unwrap());
        assert_eq!(t.get("wf", "ex").await, StatusLookup::Missing);
        assert!(!t.delete("wf", "ex").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_status_shortens_ttl() {
        let store = MemoryCoordStore::new();
        let t = ExecutionStatusTracker::new(
            Arc::new(store.clone()),
            TrackerConfig {
                active_ttl: Duration::from_secs(600),
                terminal_ttl: Duration::from_secs(60),
            },
        );
        t.create("wf", "ex", 1).await.unwrap();
        t.update_status("wf", "ex", ExecutionStatus::Completed).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(t.get("wf", "ex").await, StatusLookup::Found(_)));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(t.get("wf", "ex").await, StatusLookup::Missing);
    }

    #[tokio::test]
    async fn increment_without_create_stays_readable() {
        let (t, _) = tracker();
        assert_eq!(t.increment_completed("wf", "ex").await.unwrap(), 1);

        let r = found(t.get("wf", "ex").await);
        assert_eq!(r.status, ExecutionStatus::Pending);
        assert_eq!((r.completed_files, r.failed_files, r.total_files), (1, 0, 0));
        assert_eq!(r.progress(), None);
    }

    #[tokio::test]
    async fn increment_does_not_reset_status() {
        let (t, _) = tracker();
        t.create("wf", "ex", 2).await.unwrap();
        t.update_status("wf", "ex", ExecutionStatus::Executing).await.unwrap();
        t.increment_failed("wf", "ex").await.unwrap();
        assert_eq!(found(t.get("wf", "ex").await).status, ExecutionStatus::Executing);
    }

    #[tokio::test(start_paused = true)]
    async fn late_increment_keeps_terminal_ttl() {
        let store = MemoryCoordStore::new();
        let t = ExecutionStatusTracker::new(
            Arc::new(store.clone()),
            TrackerConfig {
                active_ttl: Duration::from_secs(600),
                terminal_ttl: Duration::from_secs(60),
            },
        );
        t.create("wf", "ex", 2).await.unwrap();
        t.update_status("wf", "ex", ExecutionStatus::Error).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(t.increment_completed("wf", "ex").await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(matches!(t.get("wf", "ex").await, StatusLookup::Found(_)));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(t.get("wf", "ex").await, StatusLookup::Missing);
    }
}
