use std::time::Duration;

use docflow_common::InvalidStatusValue;
use docflow_coord::CoordError;
use docflow_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// Another admission for the same org held the lock for the whole wait.
    /// Callers should retry; this is not a rejection.
    #[error("could not acquire admission lock for org {org_id} within {waited:?}")]
    LockAcquisitionFailed { org_id: String, waited: Duration },
}

impl AdmissionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdmissionError::LockAcquisitionFailed { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    InvalidStatus(#[from] InvalidStatusValue),

    #[error(transparent)]
    Coordination(#[from] CoordError),
}

#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    #[error(transparent)]
    Coordination(#[from] CoordError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
