use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use docflow_common::{ExecutionStatus, FileExecutionRecord, NewFileExecution, OrgLimit};

use crate::error::{Result, StoreError};
use crate::types::{FileExecutionStore, OrgLimitStore};

#[derive(Debug, Default)]
pub struct MemoryOrgLimitStore {
    limits: DashMap<String, OrgLimit>,
}

impl MemoryOrgLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrgLimitStore for MemoryOrgLimitStore {
    async fn get(&self, org_id: &str) -> Result<Option<OrgLimit>> {
        Ok(self.limits.get(org_id).map(|v| v.value().clone()))
    }

    async fn upsert(&self, org_id: &str, limit: u32) -> Result<OrgLimit> {
        if limit == 0 {
            return Err(StoreError::InvalidLimit(limit));
        }
        let row = OrgLimit {
            org_id: org_id.to_string(),
            concurrent_request_limit: limit,
            modified_at: Utc::now(),
        };
        self.limits.insert(org_id.to_string(), row.clone());
        Ok(row)
    }

    async fn delete(&self, org_id: &str) -> Result<bool> {
        Ok(self.limits.remove(org_id).is_some())
    }

    async fn list(&self) -> Result<Vec<OrgLimit>> {
        let mut rows: Vec<OrgLimit> = self.limits.iter().map(|e| e.value().clone()).collect();
        rows.sort_by(|a, b| a.org_id.cmp(&b.org_id));
        Ok(rows)
    }
}

type UniqueKey = (String, String, String);

#[derive(Debug, Default)]
pub struct MemoryFileExecutionStore {
    records: DashMap<String, FileExecutionRecord>,
    by_unique_key: DashMap<UniqueKey, String>,
}

impl MemoryFileExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileExecutionStore for MemoryFileExecutionStore {
    async fn create_or_get(&self, new: NewFileExecution) -> Result<(FileExecutionRecord, bool)> {
        let key = (
            new.execution_id.clone(),
            new.file_hash.clone(),
            new.file_path.clone(),
        );
        // The unique-index entry is held while the record is written, so two
        // racing dispatches of the same file cannot both insert.
        match self.by_unique_key.entry(key) {
            Entry::Occupied(existing) => {
                let id = existing.get().clone();
                drop(existing);
                let record = self
                    .records
                    .get(&id)
                    .map(|r| r.value().clone())
                    .ok_or(StoreError::NotFound { id })?;
                Ok((record, false))
            }
            Entry::Vacant(slot) => {
                let record =
                    FileExecutionRecord::new(uuid::Uuid::new_v4().to_string(), new, Utc::now());
                self.records.insert(record.id.clone(), record.clone());
                slot.insert(record.id.clone());
                Ok((record, true))
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<FileExecutionRecord>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn list_for_execution(&self, execution_id: &str) -> Result<Vec<FileExecutionRecord>> {
        let mut rows: Vec<FileExecutionRecord> = self
            .records
            .iter()
            .filter(|r| r.execution_id == execution_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn transition(
        &self,
        id: &str,
        to: ExecutionStatus,
        error: Option<String>,
        execution_time: Option<f64>,
    ) -> Result<(FileExecutionRecord, bool)> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let changed = record.transition(to, error, execution_time, Utc::now())?;
        Ok((record.value().clone(), changed))
    }

    async fn count_by_status(&self, execution_id: &str) -> Result<HashMap<ExecutionStatus, u64>> {
        let mut counts = HashMap::new();
        for r in self.records.iter().filter(|r| r.execution_id == execution_id) {
            *counts.entry(r.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
