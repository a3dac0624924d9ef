use std::sync::Arc;
use std::time::Duration;

use docflow_common::OrgLimit;
use docflow_coord::CoordinationStore;
use docflow_store::{OrgLimitStore, StoreError};

use crate::keys::RateLimitKeyBuilder;

/// Per-org concurrency ceilings, mirrored into the coordination store so
/// every worker sees the same cached value.
///
/// Writes go through [`LimitConfigCache::set_limit`] and
/// [`LimitConfigCache::delete_limit`], which drop the shared cache entry
/// right after the durable write. The TTL only matters when that
/// invalidation is lost.
pub struct LimitConfigCache {
    store: Arc<dyn CoordinationStore>,
    limits: Arc<dyn OrgLimitStore>,
    default_limit: u32,
    ttl: Duration,
}

impl LimitConfigCache {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        limits: Arc<dyn OrgLimitStore>,
        default_limit: u32,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            limits,
            default_limit: default_limit.max(1),
            ttl,
        }
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    pub async fn get_limit(&self, org_id: &str) -> u32 {
        let key = RateLimitKeyBuilder::org_limit_cache(org_id);
        let mut cache_reachable = true;
        match self.store.get(&key).await {
            Ok(Some(raw)) => match raw.parse::<u32>() {
                Ok(limit) if limit > 0 => return limit,
                _ => tracing::warn!(org_id, value = %raw, "discarding corrupt cached limit"),
            },
            Ok(None) => {}
            Err(e) => {
                cache_reachable = false;
                tracing::warn!(org_id, error = %e, "limit cache unavailable, reading durable config");
            }
        }

        let (limit, authoritative) = self.load(org_id).await;
        if authoritative && cache_reachable {
            if let Err(e) = self
                .store
                .set(&key, limit.to_string(), Some(self.ttl))
                .await
            {
                tracing::debug!(org_id, error = %e, "failed to populate limit cache");
            }
        }
        limit
    }

    /// Durable value, or the default. The flag is `false` when the default
    /// stands in for a failed read and must not be cached.
    async fn load(&self, org_id: &str) -> (u32, bool) {
        match self.limits.get(org_id).await {
            Ok(Some(row)) => (row.concurrent_request_limit.max(1), true),
            Ok(None) => (self.default_limit, true),
            Err(e) => {
                tracing::warn!(
                    org_id,
                    error = %e,
                    default = self.default_limit,
                    "durable limit lookup failed, using default"
                );
                (self.default_limit, false)
            }
        }
    }

    pub async fn set_limit(&self, org_id: &str, limit: u32) -> Result<OrgLimit, StoreError> {
        let row = self.limits.upsert(org_id, limit).await?;
        self.invalidate(org_id).await;
        tracing::info!(org_id, limit, "org limit updated");
        Ok(row)
    }

    /// Returns whether a custom limit existed.
    pub async fn delete_limit(&self, org_id: &str) -> Result<bool, StoreError> {
        let existed = self.limits.delete(org_id).await?;
        self.invalidate(org_id).await;
        tracing::info!(org_id, existed, "org limit removed");
        Ok(existed)
    }

    /// Drop the cached entry. Returns whether one was present.
    pub async fn invalidate(&self, org_id: &str) -> bool {
        match self
            .store
            .delete(&RateLimitKeyBuilder::org_limit_cache(org_id))
            .await
        {
            Ok(existed) => {
                tracing::debug!(org_id, existed, "limit cache invalidated");
                existed
            }
            Err(e) => {
                tracing::warn!(
                    org_id,
                    error = %e,
                    ttl_secs = self.ttl.as_secs(),
                    "limit cache invalidation failed, stale value lives until TTL"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_coord::MemoryCoordStore;
    use docflow_store::MemoryOrgLimitStore;

    fn cache() -> (LimitConfigCache, MemoryCoordStore, Arc<MemoryOrgLimitStore>) {
        let store = MemoryCoordStore::new();
        let limits = Arc::new(MemoryOrgLimitStore::new());
        let cache = LimitConfigCache::new(
            Arc::new(store.clone()),
            limits.clone(),
            20,
            Duration::from_secs(600),
        );
        (cache, store, limits)
    }

    #[tokio::test]
    async fn absent_row_yields_default_and_is_cached() {
        let (cache, store, _) = cache();
        assert_eq!(cache.get_limit("acme").await, 20);
        assert_eq!(
            store
                .get(&RateLimitKeyBuilder::org_limit_cache("acme"))
                .await
                .unwrap()
                .as_deref(),
            Some("20")
        );
    }

    #[tokio::test]
    async fn writes_bypassing_the_cache_stay_hidden_until_invalidated() {
        let (cache, _, limits) = cache();
        assert_eq!(cache.get_limit("acme").await, 20);

        limits.upsert("acme", 3).await.unwrap();
        assert_eq!(cache.get_limit("acme").await, 20);

        assert!(cache.invalidate("acme").await);
        assert_eq!(cache.get_limit("acme").await, 3);
    }

    #[tokio::test]
    async fn set_and_delete_push_invalidate() {
        let (cache, _, _) = cache();
        assert_eq!(cache.get_limit("acme").await, 20);

        cache.set_limit("acme", 5).await.unwrap();
        assert_eq!(cache.get_limit("acme").await, 5);

        assert!(cache.delete_limit("acme").await.unwrap());
        assert_eq!(cache.get_limit("acme").await, 20);
        assert!(!cache.delete_limit("acme").await.unwrap());
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let (cache, _, _) = cache();
        assert!(matches!(
            cache.set_limit("acme", 0).await.unwrap_err(),
            StoreError::InvalidLimit(0)
        ));
    }

    #[tokio::test]
    async fn unreachable_cache_reads_durable_config() {
        let (cache, store, limits) = cache();
        limits.upsert("acme", 4).await.unwrap();
        store.set_available(false);
        assert_eq!(cache.get_limit("acme").await, 4);
        assert!(!cache.invalidate("acme").await);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_replaced() {
        let (cache, store, limits) = cache();
        limits.upsert("acme", 6).await.unwrap();
        store
            .set(
                &RateLimitKeyBuilder::org_limit_cache("acme"),
                "six".into(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(cache.get_limit("acme").await, 6);
    }
}
