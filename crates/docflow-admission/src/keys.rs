//! Key layout in the coordination store. Every process must agree on these,
//! so they are built in exactly one place.

const ORG_LIMIT_CACHE_PREFIX: &str = "rate_limit:cache:org_limit:";
const ORG_SLOTS_PREFIX: &str = "api_deployment:rate_limit:org:";
const GLOBAL_SLOTS: &str = "api_deployment:rate_limit:global";
const ORG_LOCK_PREFIX: &str = "lock:rate_limit:org:";
const EXECUTION_PREFIX: &str = "execution:";

pub struct RateLimitKeyBuilder;

impl RateLimitKeyBuilder {
    pub fn org_slots(org_id: &str) -> String {
        format!("{ORG_SLOTS_PREFIX}{org_id}")
    }

    pub fn global_slots() -> &'static str {
        GLOBAL_SLOTS
    }

    pub fn org_slots_prefix() -> &'static str {
        ORG_SLOTS_PREFIX
    }

    /// Inverse of [`RateLimitKeyBuilder::org_slots`].
    pub fn org_id_from_slots_key(key: &str) -> Option<&str> {
        key.strip_prefix(ORG_SLOTS_PREFIX).filter(|org| !org.is_empty())
    }

    pub fn org_lock(org_id: &str) -> String {
        format!("{ORG_LOCK_PREFIX}{org_id}")
    }

    pub fn org_limit_cache(org_id: &str) -> String {
        format!("{ORG_LIMIT_CACHE_PREFIX}{org_id}")
    }

    pub fn org_limit_cache_prefix() -> &'static str {
        ORG_LIMIT_CACHE_PREFIX
    }

    pub fn org_limit_cache_pattern() -> String {
        format!("{ORG_LIMIT_CACHE_PREFIX}*")
    }

    pub fn execution_status(workflow_id: &str, execution_id: &str) -> String {
        format!("{EXECUTION_PREFIX}{workflow_id}:{execution_id}")
    }
}
