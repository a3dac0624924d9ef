use std::collections::HashMap;

use async_trait::async_trait;

use docflow_common::{ExecutionStatus, FileExecutionRecord, NewFileExecution, OrgLimit};

use crate::error::Result;

/// Durable per-org ceilings, owned by tenant administration.
#[async_trait]
pub trait OrgLimitStore: Send + Sync {
    async fn get(&self, org_id: &str) -> Result<Option<OrgLimit>>;
    async fn upsert(&self, org_id: &str, limit: u32) -> Result<OrgLimit>;
    /// Returns `true` if a row existed.
    async fn delete(&self, org_id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<OrgLimit>>;
}

/// Durable file-level records. Transitions go through
/// [`FileExecutionRecord::transition`], so every implementation enforces the
/// same forward-only state machine.
#[async_trait]
pub trait FileExecutionStore: Send + Sync {
    /// Insert a `PENDING` record, or return the existing one for the same
    /// `(execution_id, file_hash, file_path)`. The flag is `true` on insert.
    async fn create_or_get(&self, new: NewFileExecution) -> Result<(FileExecutionRecord, bool)>;
    async fn get(&self, id: &str) -> Result<Option<FileExecutionRecord>>;
    async fn list_for_execution(&self, execution_id: &str) -> Result<Vec<FileExecutionRecord>>;
    /// Returns the record and whether it moved; `false` means it was already
    /// in `to`, which happens when a message is redelivered.
    async fn transition(
        &self,
        id: &str,
        to: ExecutionStatus,
        error: Option<String>,
        execution_time: Option<f64>,
    ) -> Result<(FileExecutionRecord, bool)>;
    /// Per-status counts, used to spot files stuck in `QUEUED` or `EXECUTING`.
    async fn count_by_status(&self, execution_id: &str) -> Result<HashMap<ExecutionStatus, u64>>;
}
