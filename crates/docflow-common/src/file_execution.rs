use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution_status::ExecutionStatus;

/// Input for registering a file with an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewFileExecution {
    pub execution_id: String,
    pub file_name: String,
    pub file_path: String,
    pub file_hash: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Durable per-file record. At most one exists per
/// `(execution_id, file_hash, file_path)`, so a retried dispatch finds the
/// record created by the first attempt instead of creating a second one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileExecutionRecord {
    pub id: String,
    pub execution_id: String,
    pub file_name: String,
    pub file_path: String,
    pub file_hash: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub status: ExecutionStatus,
    /// Seconds spent executing, set when the file reaches a terminal state.
    pub execution_time: Option<f64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid file execution transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

impl FileExecutionRecord {
    pub fn new(id: impl Into<String>, new: NewFileExecution, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            execution_id: new.execution_id,
            file_name: new.file_name,
            file_path: new.file_path,
            file_hash: new.file_hash,
            file_size: new.file_size,
            mime_type: new.mime_type,
            status: ExecutionStatus::Pending,
            execution_time: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity used for the uniqueness constraint.
    pub fn unique_key(&self) -> (&str, &str, &str) {
        (&self.execution_id, &self.file_hash, &self.file_path)
    }

    /// Apply a forward transition. Returns `Ok(false)` when the record is
    /// already in `to` (a redelivered message), `Ok(true)` when it moved.
    pub fn transition(
        &mut self,
        to: ExecutionStatus,
        error: Option<String>,
        execution_time: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<bool, InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        if self.status == to {
            return Ok(false);
        }

        self.status = to;
        self.updated_at = now;
        if to == ExecutionStatus::Error {
            self.error = Some(error.unwrap_or_else(|| "unknown error".to_string()));
        }
        if execution_time.is_some() {
            self.execution_time = execution_time;
        }
        Ok(true)
    }
}
