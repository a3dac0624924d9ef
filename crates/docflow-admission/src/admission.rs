use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;

use docflow_common::util::epoch_secs;
use docflow_common::ExecutionContext;
use docflow_coord::{CoordError, CoordinationStore};

use crate::config::AdmissionConfig;
use crate::error::AdmissionError;
use crate::keys::RateLimitKeyBuilder;
use crate::limits::LimitConfigCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    OrgLimitExceeded,
    GlobalLimitExceeded,
}

impl RejectionReason {
    pub const fn code(self) -> &'static str {
        match self {
            RejectionReason::OrgLimitExceeded => "ORG_LIMIT_EXCEEDED",
            RejectionReason::GlobalLimitExceeded => "GLOBAL_LIMIT_EXCEEDED",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub current_usage: u64,
    pub limit: u64,
}

impl Rejection {
    /// `"{current}/{limit}"` for org rejections. Global capacity numbers are
    /// never shown to clients.
    pub fn usage_display(&self) -> Option<String> {
        match self.reason {
            RejectionReason::OrgLimitExceeded => {
                Some(format!("{}/{}", self.current_usage, self.limit))
            }
            RejectionReason::GlobalLimitExceeded => None,
        }
    }

    pub fn client_message(&self) -> String {
        match self.reason {
            RejectionReason::OrgLimitExceeded => format!(
                "Organization has reached the maximum concurrent requests limit ({}/{}). \
                 Please try again later.",
                self.current_usage, self.limit
            ),
            RejectionReason::GlobalLimitExceeded => {
                "System is at capacity. Please try again later.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// `degraded` is set when the coordination store could not be consulted
    /// and the execution was let through unchecked.
    Admitted { degraded: bool },
    Rejected(Rejection),
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted { .. })
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AdmissionDecision::Rejected(r) => Some(r),
            AdmissionDecision::Admitted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub org_id: String,
    pub org_count: u64,
    pub org_limit: u64,
    pub global_count: u64,
    pub global_limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Org sets visited, not counting the global set.
    pub org_sets: u64,
    pub reclaimed: u64,
}

/// Sliding-window admission over per-org and global slot sets.
pub struct AdmissionController {
    store: Arc<dyn CoordinationStore>,
    limits: Arc<LimitConfigCache>,
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        limits: Arc<LimitConfigCache>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            store,
            limits,
            config,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub async fn try_admit(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<AdmissionDecision, AdmissionError> {
        self.try_admit_at(ctx, Utc::now()).await
    }

    /// Admit or reject at `now`. The org lock serializes admissions within
    /// one org; the global count is read without a global lock, so racing
    /// orgs can overshoot the global ceiling by at most one slot each.
    pub async fn try_admit_at(
        &self,
        ctx: &ExecutionContext,
        now: DateTime<Utc>,
    ) -> Result<AdmissionDecision, AdmissionError> {
        let span = ctx.span("try_admit");
        async move {
            let lock_key = RateLimitKeyBuilder::org_lock(&ctx.org_id);
            let token = uuid::Uuid::new_v4().to_string();

            match self.acquire_lock(&lock_key, &token).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(waited_ms = self.config.lock_wait.as_millis() as u64, "admission lock busy");
                    return Err(AdmissionError::LockAcquisitionFailed {
                        org_id: ctx.org_id.clone(),
                        waited: self.config.lock_wait,
                    });
                }
                Err(e) => return Ok(fail_open(&e)),
            }

            let outcome = self.check_and_occupy(ctx, now).await;

            if let Err(e) = self.store.unlock(&lock_key, &token).await {
                tracing::debug!(error = %e, "admission lock release failed, it will expire");
            }

            match outcome {
                Ok(decision) => Ok(decision),
                Err(e) => Ok(fail_open(&e)),
            }
        }
        .instrument(span)
        .await
    }

    async fn acquire_lock(&self, key: &str, token: &str) -> Result<bool, CoordError> {
        let deadline = Instant::now() + self.config.lock_wait;
        loop {
            if self.store.try_lock(key, token, self.config.lock_ttl).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.config.lock_poll_interval).await;
        }
    }

    async fn check_and_occupy(
        &self,
        ctx: &ExecutionContext,
        now: DateTime<Utc>,
    ) -> Result<AdmissionDecision, CoordError> {
        let org_key = RateLimitKeyBuilder::org_slots(&ctx.org_id);
        let global_key = RateLimitKeyBuilder::global_slots();

        self.purge(&org_key, now).await?;
        self.purge(global_key, now).await?;

        let org_count = self.store.zcard(&org_key).await?;
        let org_limit = u64::from(self.limits.get_limit(&ctx.org_id).await);
        if org_count >= org_limit {
            tracing::info!(org_count, org_limit, "admission rejected: org limit");
            return Ok(AdmissionDecision::Rejected(Rejection {
                reason: RejectionReason::OrgLimitExceeded,
                current_usage: org_count,
                limit: org_limit,
            }));
        }

        let global_count = self.store.zcard(global_key).await?;
        let global_limit = u64::from(self.config.global_limit);
        if global_count >= global_limit {
            tracing::warn!(global_count, global_limit, "admission rejected: global limit");
            return Ok(AdmissionDecision::Rejected(Rejection {
                reason: RejectionReason::GlobalLimitExceeded,
                current_usage: global_count,
                limit: global_limit,
            }));
        }

        let score = epoch_secs(now);
        self.store.zadd(&org_key, &ctx.execution_id, score).await?;
        self.store.zadd(global_key, &ctx.execution_id, score).await?;
        tracing::info!(
            org_usage = org_count + 1,
            org_limit,
            global_usage = global_count + 1,
            "execution admitted"
        );
        Ok(AdmissionDecision::Admitted { degraded: false })
    }

    async fn purge(&self, key: &str, now: DateTime<Utc>) -> Result<u64, CoordError> {
        let cutoff = epoch_secs(now) - self.config.slot_retention.as_secs_f64();
        let removed = self
            .store
            .zrem_range_by_score(key, f64::NEG_INFINITY, cutoff)
            .await?;
        if removed > 0 {
            tracing::info!(key, removed, "reclaimed stale admission slots");
        }
        Ok(removed)
    }

    /// Free the execution's slots. Safe to call more than once or for an
    /// execution that was never admitted. Returns whether anything was held.
    pub async fn release(&self, org_id: &str, execution_id: &str) -> bool {
        let org_key = RateLimitKeyBuilder::org_slots(org_id);
        let org = self.store.zrem(&org_key, execution_id).await;
        let global = self
            .store
            .zrem(RateLimitKeyBuilder::global_slots(), execution_id)
            .await;
        match (org, global) {
            (Ok(org), Ok(global)) => {
                if org || global {
                    tracing::info!(org_id, execution_id, "admission slot released");
                }
                org || global
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(
                    org_id,
                    execution_id,
                    error = %e,
                    "failed to release admission slot, the sweeper will reclaim it"
                );
                false
            }
        }
    }

    pub async fn usage(&self, org_id: &str) -> Result<Usage, CoordError> {
        self.usage_at(org_id, Utc::now()).await
    }

    /// Current occupancy. Slots past the retention horizon are purged first
    /// so leaked slots do not show up as load.
    pub async fn usage_at(&self, org_id: &str, now: DateTime<Utc>) -> Result<Usage, CoordError> {
        let org_key = RateLimitKeyBuilder::org_slots(org_id);
        let global_key = RateLimitKeyBuilder::global_slots();
        self.purge(&org_key, now).await?;
        self.purge(global_key, now).await?;

        let org_count = self.store.zcard(&org_key).await?;
        let global_count = self.store.zcard(global_key).await?;
        Ok(Usage {
            org_id: org_id.to_string(),
            org_count,
            org_limit: u64::from(self.limits.get_limit(org_id).await),
            global_count,
            global_limit: u64::from(self.config.global_limit),
        })
    }

    /// Reclaim one org's slots older than the retention horizon.
    pub async fn sweep_stale_at(&self, org_id: &str, now: DateTime<Utc>) -> Result<u64, CoordError> {
        self.purge(&RateLimitKeyBuilder::org_slots(org_id), now).await
    }

    pub async fn sweep_all_stale(&self) -> Result<SweepReport, CoordError> {
        self.sweep_all_stale_at(Utc::now()).await
    }

    /// Reclaim stale slots in every org set and the global set. Orgs that
    /// fail are logged and skipped so one bad key cannot stall the sweep.
    pub async fn sweep_all_stale_at(&self, now: DateTime<Utc>) -> Result<SweepReport, CoordError> {
        let keys = self
            .store
            .scan_prefix(RateLimitKeyBuilder::org_slots_prefix())
            .await?;

        let mut report = SweepReport::default();
        for key in &keys {
            if RateLimitKeyBuilder::org_id_from_slots_key(key).is_none() {
                continue;
            }
            report.org_sets += 1;
            match self.purge(key, now).await {
                Ok(n) => report.reclaimed += n,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping org set"),
            }
        }
        report.reclaimed += self.purge(RateLimitKeyBuilder::global_slots(), now).await?;
        Ok(report)
    }
}

fn fail_open(err: &CoordError) -> AdmissionDecision {
    tracing::warn!(
        error = %err,
        "coordination store unavailable, admitting without limit check"
    );
    AdmissionDecision::Admitted { degraded: true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;
    use docflow_coord::MemoryCoordStore;
    use docflow_store::MemoryOrgLimitStore;

    fn controller(global_limit: u32) -> (AdmissionController, MemoryCoordStore, Arc<LimitConfigCache>) {
        let store = MemoryCoordStore::new();
        let config = AdmissionConfig {
            global_limit,
            lock_wait: Duration::from_millis(200),
            lock_poll_interval: Duration::from_millis(10),
            ..AdmissionConfig::default()
        };
        let limits = Arc::new(LimitConfigCache::new(
            Arc::new(store.clone()),
            Arc::new(MemoryOrgLimitStore::new()),
            config.default_org_limit,
            config.limit_cache_ttl,
        ));
        (
            AdmissionController::new(Arc::new(store.clone()), limits.clone(), config),
            store,
            limits,
        )
    }

    fn ctx(org: &str, ex: &str) -> ExecutionContext {
        ExecutionContext::new(org, "wf", ex)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn org_limit_rejects_with_usage() {
        let (ctl, _, limits) = controller(100);
        limits.set_limit("acme", 1).await.unwrap();

        assert!(ctl.try_admit_at(&ctx("acme", "e1"), t0()).await.unwrap().is_admitted());
        let decision = ctl.try_admit_at(&ctx("acme", "e2"), t0()).await.unwrap();
        let rejection = decision.rejection().unwrap();
        assert_eq!(rejection.reason, RejectionReason::OrgLimitExceeded);
        assert_eq!(rejection.usage_display().as_deref(), Some("1/1"));
        assert!(rejection.client_message().contains("(1/1)"));

        // another org is unaffected
        assert!(ctl.try_admit_at(&ctx("other", "e3"), t0()).await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn global_limit_hides_numbers() {
        let (ctl, _, _) = controller(2);
        assert!(ctl.try_admit_at(&ctx("a", "e1"), t0()).await.unwrap().is_admitted());
        assert!(ctl.try_admit_at(&ctx("b", "e2"), t0()).await.unwrap().is_admitted());

        let decision = ctl.try_admit_at(&ctx("c", "e3"), t0()).await.unwrap();
        let rejection = decision.rejection().unwrap();
        assert_eq!(rejection.reason, RejectionReason::GlobalLimitExceeded);
        assert_eq!(rejection.usage_display(), None);
        assert_eq!(
            rejection.client_message(),
            "System is at capacity. Please try again later."
        );
        assert_eq!(rejection.reason.code(), "GLOBAL_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn release_frees_both_sets_and_is_idempotent() {
        let (ctl, _, _) = controller(100);
        ctl.try_admit_at(&ctx("acme", "e1"), t0()).await.unwrap();
        let usage = ctl.usage_at("acme", t0()).await.unwrap();
        assert_eq!((usage.org_count, usage.global_count), (1, 1));

        assert!(ctl.release("acme", "e1").await);
        assert!(!ctl.release("acme", "e1").await);
        assert!(!ctl.release("acme", "never-admitted").await);

        let usage = ctl.usage_at("acme", t0()).await.unwrap();
        assert_eq!((usage.org_count, usage.global_count), (0, 0));
    }

    #[tokio::test]
    async fn admission_purges_expired_slots() {
        let (ctl, _, limits) = controller(100);
        limits.set_limit("acme", 1).await.unwrap();
        ctl.try_admit_at(&ctx("acme", "leaked"), t0()).await.unwrap();

        let later = t0() + chrono::Duration::hours(6) + chrono::Duration::seconds(1);
        assert!(ctl
            .try_admit_at(&ctx("acme", "fresh"), later)
            .await
            .unwrap()
            .is_admitted());
    }

    #[tokio::test]
    async fn busy_lock_is_retryable_not_rejection() {
        let (ctl, store, _) = controller(100);
        store
            .try_lock(
                &RateLimitKeyBuilder::org_lock("acme"),
                "someone-else",
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        let err = ctl.try_admit_at(&ctx("acme", "e1"), t0()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, AdmissionError::LockAcquisitionFailed { ref org_id, .. } if org_id == "acme"));
    }

    #[tokio::test]
    async fn unavailable_store_fails_open() {
        let (ctl, store, _) = controller(100);
        store.set_available(false);
        let decision = ctl.try_admit_at(&ctx("acme", "e1"), t0()).await.unwrap();
        assert_eq!(decision, AdmissionDecision::Admitted { degraded: true });
        assert!(!ctl.release("acme", "e1").await);
    }

    #[tokio::test]
    async fn sweep_reclaims_across_orgs() {
        let (ctl, _, _) = controller(100);
        ctl.try_admit_at(&ctx("a", "old-a"), t0()).await.unwrap();
        ctl.try_admit_at(&ctx("b", "old-b"), t0()).await.unwrap();
        let recent = t0() + chrono::Duration::hours(5);
        ctl.try_admit_at(&ctx("b", "new-b"), recent).await.unwrap();

        let report = ctl
            .sweep_all_stale_at(t0() + chrono::Duration::hours(7))
            .await
            .unwrap();
        assert_eq!(report.org_sets, 2);
        // two org entries plus their two global entries
        assert_eq!(report.reclaimed, 4);

        let usage = ctl
            .usage_at("b", t0() + chrono::Duration::hours(7))
            .await
            .unwrap();
        assert_eq!((usage.org_count, usage.global_count), (1, 1));
    }

    #[tokio::test]
    async fn usage_ignores_leaked_slots() {
        let (ctl, _, _) = controller(100);
        ctl.try_admit_at(&ctx("acme", "leaked"), t0()).await.unwrap();
        let fresh = t0() + chrono::Duration::hours(5);
        ctl.try_admit_at(&ctx("acme", "live"), fresh).await.unwrap();

        let usage = ctl
            .usage_at("acme", t0() + chrono::Duration::hours(6) + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!((usage.org_count, usage.global_count), (1, 1));
    }
}
