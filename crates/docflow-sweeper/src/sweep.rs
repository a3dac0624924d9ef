use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use docflow_admission::{AdmissionController, SweepReport};
use docflow_coord::CoordError;

use crate::metrics::SharedMetrics;

pub async fn sweep_once(
    admission: &AdmissionController,
    metrics: &SharedMetrics,
    now: DateTime<Utc>,
) -> Result<SweepReport, CoordError> {
    metrics.sweeps_total.fetch_add(1, Ordering::Relaxed);
    match admission.sweep_all_stale_at(now).await {
        Ok(report) => {
            metrics
                .slots_reclaimed_total
                .fetch_add(report.reclaimed, Ordering::Relaxed);
            metrics.org_sets_last.store(report.org_sets, Ordering::Relaxed);
            metrics
                .last_success_unix
                .store(now.timestamp().max(0) as u64, Ordering::Relaxed);
            Ok(report)
        }
        Err(e) => {
            metrics.sweep_errors_total.fetch_add(1, Ordering::Relaxed);
            Err(e)
        }
    }
}

pub async fn sweep_loop(
    admission: Arc<AdmissionController>,
    metrics: Arc<SharedMetrics>,
    interval: Duration,
) {
    info!(interval_secs = interval.as_secs(), "sweep loop started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match sweep_once(&admission, &metrics, Utc::now()).await {
            Ok(report) if report.reclaimed > 0 => info!(
                org_sets = report.org_sets,
                reclaimed = report.reclaimed,
                "sweep reclaimed stale slots"
            ),
            Ok(report) => tracing::debug!(org_sets = report.org_sets, "sweep found nothing stale"),
            Err(e) => warn!(error = %e, "sweep failed, retrying next interval"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use docflow_admission::{AdmissionConfig, LimitConfigCache};
    use docflow_common::ExecutionContext;
    use docflow_coord::MemoryCoordStore;
    use docflow_store::MemoryOrgLimitStore;

    fn admission(store: &MemoryCoordStore) -> AdmissionController {
        let config = AdmissionConfig::default();
        let cache = Arc::new(LimitConfigCache::new(
            Arc::new(store.clone()),
            Arc::new(MemoryOrgLimitStore::new()),
            config.default_org_limit,
            config.limit_cache_ttl,
        ));
        AdmissionController::new(Arc::new(store.clone()), cache, config)
    }

    #[tokio::test]
    async fn sweep_counts_reclaimed_slots() {
        let store = MemoryCoordStore::new();
        let ctl = admission(&store);
        let metrics = SharedMetrics::default();
        let start = Utc::now() - chrono::Duration::hours(8);
        for (org, ex) in [("a", "1"), ("b", "2")] {
            ctl.try_admit_at(&ExecutionContext::new(org, "wf", ex), start)
                .await
                .unwrap();
        }

        let now = Utc::now();
        let report = sweep_once(&ctl, &metrics, now).await.unwrap();
        assert_eq!(report.org_sets, 2);
        assert_eq!(metrics.slots_reclaimed_total.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.sweeps_total.load(Ordering::Relaxed), 1);
        assert_eq!(
            metrics.last_success_unix.load(Ordering::Relaxed),
            now.timestamp() as u64
        );
    }

    #[tokio::test]
    async fn failed_sweep_is_counted() {
        let store = MemoryCoordStore::new();
        let ctl = admission(&store);
        let metrics = SharedMetrics::default();
        store.set_available(false);

        assert!(sweep_once(&ctl, &metrics, Utc::now()).await.is_err());
        assert_eq!(metrics.sweep_errors_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.last_success_unix.load(Ordering::Relaxed), 0);
    }
}
