//! Operator actions on caches, custom limits and usage.

use std::sync::Arc;

use serde::Serialize;

use docflow_coord::{CoordError, CoordinationStore};
use docflow_store::{OrgLimitStore, StoreError};

use crate::admission::AdmissionController;
use crate::error::OpsError;
use crate::keys::RateLimitKeyBuilder;
use crate::limits::LimitConfigCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityLevel {
    Normal,
    Warning,
    Critical,
}

impl CapacityLevel {
    pub fn from_percent(pct: f64) -> Self {
        if pct >= 90.0 {
            CapacityLevel::Critical
        } else if pct >= 70.0 {
            CapacityLevel::Warning
        } else {
            CapacityLevel::Normal
        }
    }

    pub fn banner(self) -> Option<&'static str> {
        match self {
            CapacityLevel::Normal => None,
            CapacityLevel::Warning => Some("WARNING: usage is above 70% of capacity"),
            CapacityLevel::Critical => Some("CRITICAL: usage is above 90% of capacity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub org_id: String,
    pub org_count: u64,
    pub org_limit: u64,
    pub org_percent: f64,
    /// `false` when the org runs on the system default.
    pub custom_limit: bool,
    pub global_count: u64,
    pub global_limit: u64,
    pub global_percent: f64,
    /// Worse of the org and global levels.
    pub level: CapacityLevel,
}

fn percent(count: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 100.0;
    }
    count as f64 / limit as f64 * 100.0
}

pub struct Operator {
    store: Arc<dyn CoordinationStore>,
    limits: Arc<dyn OrgLimitStore>,
    cache: Arc<LimitConfigCache>,
    admission: Arc<AdmissionController>,
}

impl Operator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        limits: Arc<dyn OrgLimitStore>,
        cache: Arc<LimitConfigCache>,
        admission: Arc<AdmissionController>,
    ) -> Self {
        Self {
            store,
            limits,
            cache,
            admission,
        }
    }

    pub async fn clear_org_cache(&self, org_id: &str) -> Result<bool, OpsError> {
        let key = RateLimitKeyBuilder::org_limit_cache(org_id);
        Ok(self.store.delete(&key).await?)
    }

    /// Drop every cached org limit. Adapters that cannot delete by pattern
    /// get the keys enumerated and removed one at a time.
    pub async fn clear_all_caches(&self) -> Result<u64, OpsError> {
        let pattern = RateLimitKeyBuilder::org_limit_cache_pattern();
        match self.store.delete_pattern(&pattern).await {
            Ok(n) => {
                tracing::info!(deleted = n, "cleared all limit caches");
                Ok(n)
            }
            Err(CoordError::Unsupported { adapter, .. }) => {
                tracing::info!(adapter, "pattern delete unsupported, deleting keys one by one");
                let keys = self
                    .store
                    .scan_prefix(RateLimitKeyBuilder::org_limit_cache_prefix())
                    .await?;
                let mut deleted = 0;
                for key in keys {
                    if self.store.delete(&key).await? {
                        deleted += 1;
                    }
                }
                Ok(deleted)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Invalidate the cache of every org that has a custom limit. Returns the
    /// number of orgs visited.
    pub async fn clear_custom_limit_caches(&self) -> Result<usize, OpsError> {
        let rows = self.limits.list().await?;
        for row in &rows {
            self.cache.invalidate(&row.org_id).await;
        }
        tracing::info!(orgs = rows.len(), "cleared caches for orgs with custom limits");
        Ok(rows.len())
    }

    pub async fn set_custom_limit(&self, org_id: &str, limit: u32) -> Result<(), OpsError> {
        self.cache.set_limit(org_id, limit).await?;
        Ok(())
    }

    /// The org falls back to the system default afterwards.
    pub async fn delete_custom_limit(&self, org_id: &str) -> Result<bool, StoreError> {
        self.cache.delete_limit(org_id).await
    }

    pub async fn usage_report(&self, org_id: &str) -> Result<UsageReport, OpsError> {
        let usage = self.admission.usage(org_id).await?;
        let custom_limit = self.limits.get(org_id).await?.is_some();

        let org_percent = percent(usage.org_count, usage.org_limit);
        let global_percent = percent(usage.global_count, usage.global_limit);
        Ok(UsageReport {
            org_id: usage.org_id,
            org_count: usage.org_count,
            org_limit: usage.org_limit,
            org_percent,
            custom_limit,
            global_count: usage.global_count,
            global_limit: usage.global_limit,
            global_percent,
            level: CapacityLevel::from_percent(org_percent.max(global_percent)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdmissionConfig;
    use docflow_common::ExecutionContext;
    use docflow_coord::MemoryCoordStore;
    use docflow_store::MemoryOrgLimitStore;

    struct Fixture {
        ops: Operator,
        store: MemoryCoordStore,
        cache: Arc<LimitConfigCache>,
        admission: Arc<AdmissionController>,
    }

    fn fixture() -> Fixture {
        let store = MemoryCoordStore::new();
        let limits = Arc::new(MemoryOrgLimitStore::new());
        let config = AdmissionConfig {
            global_limit: 10,
            ..AdmissionConfig::default()
        };
        let cache = Arc::new(LimitConfigCache::new(
            Arc::new(store.clone()),
            limits.clone(),
            config.default_org_limit,
            config.limit_cache_ttl,
        ));
        let admission = Arc::new(AdmissionController::new(
            Arc::new(store.clone()),
            cache.clone(),
            config,
        ));
        Fixture {
            ops: Operator::new(
                Arc::new(store.clone()),
                limits,
                cache.clone(),
                admission.clone(),
            ),
            store,
            cache,
            admission,
        }
    }

    #[test]
    fn capacity_thresholds() {
        assert_eq!(CapacityLevel::from_percent(69.9), CapacityLevel::Normal);
        assert_eq!(CapacityLevel::from_percent(70.0), CapacityLevel::Warning);
        assert_eq!(CapacityLevel::from_percent(90.0), CapacityLevel::Critical);
        assert!(CapacityLevel::Normal.banner().is_none());
    }

    #[tokio::test]
    async fn clear_all_caches_deletes_only_limit_entries() {
        let f = fixture();
        f.cache.get_limit("a").await;
        f.cache.get_limit("b").await;
        f.store.set("unrelated", "x".into(), None).await.unwrap();

        assert_eq!(f.ops.clear_all_caches().await.unwrap(), 2);
        assert!(f.store.get("unrelated").await.unwrap().is_some());
        assert!(!f.ops.clear_org_cache("a").await.unwrap());
    }

    #[tokio::test]
    async fn clear_all_caches_falls_back_to_prefix_scan() {
        let f = fixture();
        f.store.set_pattern_delete(false);
        f.cache.get_limit("a").await;
        f.cache.get_limit("b").await;
        f.store.set("rate_limit:cache:other", "x".into(), None).await.unwrap();
        let ctx = ExecutionContext::new("a", "wf", "e1");
        assert!(f.admission.try_admit(&ctx).await.unwrap().is_admitted());

        assert_eq!(f.ops.clear_all_caches().await.unwrap(), 2);
        assert!(f
            .store
            .scan_prefix(RateLimitKeyBuilder::org_limit_cache_prefix())
            .await
            .unwrap()
            .is_empty());
        assert!(f.store.get("rate_limit:cache:other").await.unwrap().is_some());
        assert_eq!(f.admission.usage("a").await.unwrap().org_count, 1);
    }

    #[tokio::test]
    async fn custom_limit_lifecycle() {
        let f = fixture();
        f.ops.set_custom_limit("acme", 4).await.unwrap();
        assert_eq!(f.cache.get_limit("acme").await, 4);
        assert_eq!(f.ops.clear_custom_limit_caches().await.unwrap(), 1);

        assert!(f.ops.delete_custom_limit("acme").await.unwrap());
        assert_eq!(f.cache.get_limit("acme").await, 20);
    }

    #[tokio::test]
    async fn usage_report_flags_capacity() {
        let f = fixture();
        f.ops.set_custom_limit("acme", 4).await.unwrap();
        for ex in ["e1", "e2", "e3", "e4"] {
            let ctx = ExecutionContext::new("acme", "wf", ex);
            assert!(f.admission.try_admit(&ctx).await.unwrap().is_admitted());
        }

        let report = f.ops.usage_report("acme").await.unwrap();
        assert!(report.custom_limit);
        assert_eq!((report.org_count, report.org_limit), (4, 4));
        assert_eq!(report.org_percent, 100.0);
        assert_eq!(report.global_percent, 40.0);
        assert_eq!(report.level, CapacityLevel::Critical);

        let idle = f.ops.usage_report("idle").await.unwrap();
        assert!(!idle.custom_limit);
        assert_eq!(idle.org_count, 0);
        // global usage alone is below the warning line
        assert_eq!(idle.level, CapacityLevel::Normal);
    }
}
