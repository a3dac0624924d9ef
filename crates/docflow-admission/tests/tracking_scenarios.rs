use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use docflow_admission::{
    AdmissionConfig, AdmissionController, ExecutionLifecycle, ExecutionStatusTracker, FileOutcome,
    LimitConfigCache, StatusLookup, TerminalStatus, TrackerConfig, TrackerError,
};
use docflow_common::{ExecutionContext, ExecutionStatus, NewFileExecution};
use docflow_coord::MemoryCoordStore;
use docflow_store::{MemoryFileExecutionStore, MemoryOrgLimitStore};

fn tracker(store: &MemoryCoordStore) -> Arc<ExecutionStatusTracker> {
    Arc::new(ExecutionStatusTracker::new(
        Arc::new(store.clone()),
        TrackerConfig::default(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_not_lost() {
    let store = MemoryCoordStore::new();
    let t = tracker(&store);
    t.create("wf", "ex", 40).await.unwrap();

    let tasks = (0..40).map(|i| {
        let t = t.clone();
        tokio::spawn(async move {
            if i % 4 == 0 {
                t.increment_failed("wf", "ex").await
            } else {
                t.increment_completed("wf", "ex").await
            }
        })
    });
    for r in join_all(tasks).await {
        r.unwrap().unwrap();
    }

    let StatusLookup::Found(record) = t.get("wf", "ex").await else {
        panic!("record missing");
    };
    assert_eq!(record.completed_files, 30);
    assert_eq!(record.failed_files, 10);
    assert_eq!(record.progress(), Some(100.0));
}

#[tokio::test]
async fn status_inputs_share_one_canonical_value() {
    let store = MemoryCoordStore::new();
    let t = tracker(&store);
    t.create("wf", "ex", 1).await.unwrap();

    let canonical = t
        .update_status("wf", "ex", ExecutionStatus::Pending)
        .await
        .unwrap();
    for raw in ["PENDING", "ExecutionStatus.PENDING", "pending", " Pending "] {
        assert_eq!(t.update_status("wf", "ex", raw).await.unwrap(), canonical);
    }
    assert!(matches!(
        t.update_status("wf", "ex", "Status.PENDING").await,
        Err(TrackerError::InvalidStatus(_))
    ));
    assert!(matches!(
        t.update_status("wf", "ex", "").await,
        Err(TrackerError::InvalidStatus(_))
    ));
}

#[tokio::test]
async fn tracker_outage_does_not_block_file_processing() {
    let store = MemoryCoordStore::new();
    let config = AdmissionConfig {
        lock_wait: Duration::from_millis(100),
        ..AdmissionConfig::default()
    };
    let limits = Arc::new(LimitConfigCache::new(
        Arc::new(store.clone()),
        Arc::new(MemoryOrgLimitStore::new()),
        config.default_org_limit,
        config.limit_cache_ttl,
    ));
    let admission = Arc::new(AdmissionController::new(
        Arc::new(store.clone()),
        limits,
        config,
    ));
    let files = Arc::new(MemoryFileExecutionStore::new());
    let lc = ExecutionLifecycle::new(admission, tracker(&store), files);

    let ctx = ExecutionContext::new("acme", "wf", "ex-1");
    assert!(lc.begin(&ctx, 1).await.unwrap().is_admitted());
    let rec = lc
        .register_file(
            &ctx,
            NewFileExecution {
                execution_id: "ex-1".into(),
                file_name: "invoice.pdf".into(),
                file_path: "/inbox/invoice.pdf".into(),
                file_hash: "abc123".into(),
                file_size: 2048,
                mime_type: Some("application/pdf".into()),
            },
        )
        .await
        .unwrap();

    store.set_available(false);
    let done = lc
        .record_file(&ctx, &rec.id, FileOutcome::Completed { execution_time: 3.0 })
        .await
        .unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert!(!lc.finish(&ctx, TerminalStatus::Completed).await);

    // outage over: the slot is still held until a retry or the sweeper frees it
    store.set_available(true);
    assert!(lc.finish(&ctx, TerminalStatus::Completed).await);
}
