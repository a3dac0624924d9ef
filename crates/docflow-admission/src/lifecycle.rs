use std::sync::Arc;

use tracing::Instrument;

use docflow_common::{ExecutionContext, ExecutionStatus, FileExecutionRecord, NewFileExecution};
use docflow_store::{FileExecutionStore, StoreError};

use crate::admission::{AdmissionController, AdmissionDecision};
use crate::error::AdmissionError;
use crate::status::{ExecutionStatusTracker, StatusLookup};

/// How a worker finished with one file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Completed { execution_time: f64 },
    Failed {
        error: String,
        execution_time: Option<f64>,
    },
    Stopped,
}

impl FileOutcome {
    fn status(&self) -> ExecutionStatus {
        match self {
            FileOutcome::Completed { .. } => ExecutionStatus::Completed,
            FileOutcome::Failed { .. } => ExecutionStatus::Error,
            FileOutcome::Stopped => ExecutionStatus::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Completed,
    Stopped,
    Error,
}

impl From<TerminalStatus> for ExecutionStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Completed => ExecutionStatus::Completed,
            TerminalStatus::Stopped => ExecutionStatus::Stopped,
            TerminalStatus::Error => ExecutionStatus::Error,
        }
    }
}

/// Brackets one execution: admission on the way in, live tracking while
/// files are processed, slot release on the way out.
///
/// Durable file records are authoritative. Tracker and release failures are
/// logged and never fail the caller, since the files they describe have
/// already been processed.
pub struct ExecutionLifecycle {
    admission: Arc<AdmissionController>,
    tracker: Arc<ExecutionStatusTracker>,
    files: Arc<dyn FileExecutionStore>,
}

impl ExecutionLifecycle {
    pub fn new(
        admission: Arc<AdmissionController>,
        tracker: Arc<ExecutionStatusTracker>,
        files: Arc<dyn FileExecutionStore>,
    ) -> Self {
        Self {
            admission,
            tracker,
            files,
        }
    }

    pub async fn begin(
        &self,
        ctx: &ExecutionContext,
        total_files: u64,
    ) -> Result<AdmissionDecision, AdmissionError> {
        let decision = self.admission.try_admit(ctx).await?;
        if decision.is_admitted() {
            if let Err(e) = self
                .tracker
                .create(&ctx.workflow_id, &ctx.execution_id, total_files)
                .await
            {
                tracing::warn!(
                    org_id = %ctx.org_id,
                    execution_id = %ctx.execution_id,
                    error = %e,
                    "execution tracking not started"
                );
            }
        }
        Ok(decision)
    }

    /// Persist a file for dispatch. A redelivered dispatch gets the existing
    /// record back instead of a duplicate.
    pub async fn register_file(
        &self,
        ctx: &ExecutionContext,
        new: NewFileExecution,
    ) -> Result<FileExecutionRecord, StoreError> {
        let (record, created) = self.files.create_or_get(new).await?;
        if !created {
            tracing::debug!(
                execution_id = %ctx.execution_id,
                file_execution_id = %record.id,
                "file already registered"
            );
        }
        Ok(record)
    }

    /// Move a file forward without finishing it, e.g. to QUEUED or READY.
    pub async fn advance_file(
        &self,
        record_id: &str,
        to: ExecutionStatus,
    ) -> Result<FileExecutionRecord, StoreError> {
        let (record, _) = self.files.transition(record_id, to, None, None).await?;
        Ok(record)
    }

    /// Persist a file's terminal state, then bump the matching counter. The
    /// counter only moves when the durable record did, so a redelivered
    /// message is not counted twice.
    pub async fn record_file(
        &self,
        ctx: &ExecutionContext,
        record_id: &str,
        outcome: FileOutcome,
    ) -> Result<FileExecutionRecord, StoreError> {
        let span = ctx.span("record_file");
        async move {
            let to = outcome.status();
            let (error, execution_time) = match outcome {
                FileOutcome::Completed { execution_time } => (None, Some(execution_time)),
                FileOutcome::Failed {
                    error,
                    execution_time,
                } => (Some(error), execution_time),
                FileOutcome::Stopped => (None, None),
            };

            let (record, moved) = self
                .files
                .transition(record_id, to, error, execution_time)
                .await?;
            if !moved {
                tracing::debug!(file_execution_id = record_id, "file outcome already recorded");
                return Ok(record);
            }

            let counted = match to {
                ExecutionStatus::Completed => {
                    self.tracker
                        .increment_completed(&ctx.workflow_id, &ctx.execution_id)
                        .await
                }
                ExecutionStatus::Error => {
                    self.tracker
                        .increment_failed(&ctx.workflow_id, &ctx.execution_id)
                        .await
                }
                _ => return Ok(record),
            };
            if let Err(e) = counted {
                tracing::warn!(file_execution_id = record_id, error = %e, "file counter not updated");
            }
            Ok(record)
        }
        .instrument(span)
        .await
    }

    /// Record the terminal status and give the admission slot back. Returns
    /// whether a slot was released.
    pub async fn finish(&self, ctx: &ExecutionContext, status: TerminalStatus) -> bool {
        let span = ctx.span("finish");
        async move {
            let status = ExecutionStatus::from(status);
            if let Err(e) = self
                .tracker
                .update_status(&ctx.workflow_id, &ctx.execution_id, status)
                .await
            {
                tracing::warn!(error = %e, "final status not tracked");
            }
            self.reconcile(ctx).await;
            self.admission.release(&ctx.org_id, &ctx.execution_id).await
        }
        .instrument(span)
        .await
    }

    /// Compare tracker counters with durable records and log drift. The
    /// durable side wins; the tracker is never rewritten from it.
    async fn reconcile(&self, ctx: &ExecutionContext) {
        let durable = match self.files.count_by_status(&ctx.execution_id).await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::debug!(error = %e, "skipping counter reconciliation");
                return;
            }
        };
        let StatusLookup::Found(live) =
            self.tracker.get(&ctx.workflow_id, &ctx.execution_id).await
        else {
            return;
        };

        let completed = durable.get(&ExecutionStatus::Completed).copied().unwrap_or(0);
        let failed = durable.get(&ExecutionStatus::Error).copied().unwrap_or(0);
        if completed != live.completed_files || failed != live.failed_files {
            tracing::warn!(
                durable_completed = completed,
                durable_failed = failed,
                tracked_completed = live.completed_files,
                tracked_failed = live.failed_files,
                "live file counters drifted from durable records"
            );
        }
        let unfinished: u64 = durable
            .iter()
            .filter(|(status, _)| !status.is_terminal())
            .map(|(_, n)| n)
            .sum();
        if unfinished > 0 {
            tracing::warn!(unfinished, "execution finished with files still in flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdmissionConfig, TrackerConfig};
    use crate::limits::LimitConfigCache;
    use docflow_coord::MemoryCoordStore;
    use docflow_store::{MemoryFileExecutionStore, MemoryOrgLimitStore};

    fn lifecycle() -> (ExecutionLifecycle, Arc<AdmissionController>, Arc<ExecutionStatusTracker>) {
        let store = Arc::new(MemoryCoordStore::new());
        let config = AdmissionConfig::default();
        let limits = Arc::new(LimitConfigCache::new(
            store.clone(),
            Arc::new(MemoryOrgLimitStore::new()),
            config.default_org_limit,
            config.limit_cache_ttl,
        ));
        let admission = Arc::new(AdmissionController::new(store.clone(), limits, config));
        let tracker = Arc::new(ExecutionStatusTracker::new(store, TrackerConfig::default()));
        let lc = ExecutionLifecycle::new(
            admission.clone(),
            tracker.clone(),
            Arc::new(MemoryFileExecutionStore::new()),
        );
        (lc, admission, tracker)
    }

    fn file(ex: &str, path: &str) -> NewFileExecution {
        NewFileExecution {
            execution_id: ex.into(),
            file_name: path.into(),
            file_path: format!("/in/{path}"),
            file_hash: format!("sha-{path}"),
            file_size: 1024,
            mime_type: Some("application/pdf".into()),
        }
    }

    #[tokio::test]
    async fn full_execution_bracket() {
        let (lc, admission, tracker) = lifecycle();
        let ctx = ExecutionContext::new("acme", "wf", "ex-1");

        assert!(lc.begin(&ctx, 2).await.unwrap().is_admitted());
        assert_eq!(admission.usage("acme").await.unwrap().org_count, 1);

        let a = lc.register_file(&ctx, file("ex-1", "a.pdf")).await.unwrap();
        let b = lc.register_file(&ctx, file("ex-1", "b.pdf")).await.unwrap();
        lc.advance_file(&a.id, ExecutionStatus::Queued).await.unwrap();
        lc.advance_file(&a.id, ExecutionStatus::Executing).await.unwrap();

        lc.record_file(&ctx, &a.id, FileOutcome::Completed { execution_time: 1.5 })
            .await
            .unwrap();
        let failed = lc
            .record_file(
                &ctx,
                &b.id,
                FileOutcome::Failed {
                    error: "unreadable".into(),
                    execution_time: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("unreadable"));

        assert!(lc.finish(&ctx, TerminalStatus::Completed).await);
        assert_eq!(admission.usage("acme").await.unwrap().org_count, 0);

        let StatusLookup::Found(r) = tracker.get("wf", "ex-1").await else {
            panic!("record missing");
        };
        assert_eq!(r.status, ExecutionStatus::Completed);
        assert_eq!((r.completed_files, r.failed_files), (1, 1));
    }

    #[tokio::test]
    async fn redelivered_outcome_is_counted_once() {
        let (lc, _, tracker) = lifecycle();
        let ctx = ExecutionContext::new("acme", "wf", "ex-2");
        lc.begin(&ctx, 1).await.unwrap();

        let rec = lc.register_file(&ctx, file("ex-2", "a.pdf")).await.unwrap();
        let again = lc.register_file(&ctx, file("ex-2", "a.pdf")).await.unwrap();
        assert_eq!(again.id, rec.id);

        for _ in 0..2 {
            lc.record_file(&ctx, &rec.id, FileOutcome::Completed { execution_time: 0.2 })
                .await
                .unwrap();
        }
        let StatusLookup::Found(r) = tracker.get("wf", "ex-2").await else {
            panic!("record missing");
        };
        assert_eq!(r.completed_files, 1);
    }

    #[tokio::test]
    async fn finishing_twice_releases_once() {
        let (lc, _, _) = lifecycle();
        let ctx = ExecutionContext::new("acme", "wf", "ex-3");
        lc.begin(&ctx, 0).await.unwrap();
        assert!(lc.finish(&ctx, TerminalStatus::Stopped).await);
        assert!(!lc.finish(&ctx, TerminalStatus::Stopped).await);
    }
}
