use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-org override of the concurrent execution ceiling. Orgs without one
/// fall back to the system default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrgLimit {
    pub org_id: String,
    pub concurrent_request_limit: u32,
    pub modified_at: DateTime<Utc>,
}
