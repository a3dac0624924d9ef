use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionConfig {
    /// Ceiling for orgs without an `OrgLimit` row.
    pub default_org_limit: u32,
    pub global_limit: u32,
    /// Slots older than this are reclaimed on the next purge.
    pub slot_retention: Duration,
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
    pub lock_poll_interval: Duration,
    pub limit_cache_ttl: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            default_org_limit: 20,
            global_limit: 100,
            slot_retention: Duration::from_secs(6 * 60 * 60),
            lock_ttl: Duration::from_secs(2),
            lock_wait: Duration::from_secs(5),
            lock_poll_interval: Duration::from_millis(50),
            limit_cache_ttl: Duration::from_secs(600),
        }
    }
}

impl AdmissionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            default_org_limit: parse_or(&lookup, "DOCFLOW_DEFAULT_ORG_LIMIT", d.default_org_limit)
                .max(1),
            global_limit: parse_or(&lookup, "DOCFLOW_GLOBAL_LIMIT", d.global_limit).max(1),
            slot_retention: secs_or(&lookup, "DOCFLOW_SLOT_RETENTION_SECS", d.slot_retention),
            lock_ttl: millis_or(&lookup, "DOCFLOW_ADMISSION_LOCK_TTL_MS", d.lock_ttl),
            lock_wait: millis_or(&lookup, "DOCFLOW_ADMISSION_LOCK_WAIT_MS", d.lock_wait),
            lock_poll_interval: millis_or(
                &lookup,
                "DOCFLOW_ADMISSION_LOCK_POLL_MS",
                d.lock_poll_interval,
            ),
            limit_cache_ttl: secs_or(&lookup, "DOCFLOW_LIMIT_CACHE_TTL_SECS", d.limit_cache_ttl),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// TTL applied on every mutation while the execution is running.
    pub active_ttl: Duration,
    /// Shorter TTL once a terminal status is recorded.
    pub terminal_ttl: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            active_ttl: Duration::from_secs(6 * 60 * 60),
            terminal_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            active_ttl: secs_or(&lookup, "DOCFLOW_STATUS_TTL_SECS", d.active_ttl),
            terminal_ttl: secs_or(&lookup, "DOCFLOW_STATUS_TERMINAL_TTL_SECS", d.terminal_ttl),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable config value");
                default
            }
        },
        None => default,
    }
}

fn secs_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_or(lookup, key, default.as_secs()))
}

fn millis_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_millis(parse_or(lookup, key, default.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let c = AdmissionConfig::default();
        assert_eq!(c.default_org_limit, 20);
        assert_eq!(c.global_limit, 100);
        assert_eq!(c.slot_retention, Duration::from_secs(21_600));
        assert_eq!(c.lock_ttl, Duration::from_secs(2));
        assert_eq!(c.lock_wait, Duration::from_secs(5));
        assert_eq!(c.limit_cache_ttl, Duration::from_secs(600));
    }

    #[test]
    fn lookup_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = [
            ("DOCFLOW_DEFAULT_ORG_LIMIT", "7"),
            ("DOCFLOW_GLOBAL_LIMIT", "lots"),
            ("DOCFLOW_ADMISSION_LOCK_WAIT_MS", "250"),
        ]
        .into_iter()
        .collect();
        let c = AdmissionConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.default_org_limit, 7);
        assert_eq!(c.global_limit, 100);
        assert_eq!(c.lock_wait, Duration::from_millis(250));
    }

    #[test]
    fn zero_limits_are_clamped() {
        let c = AdmissionConfig::from_lookup(|k| {
            (k == "DOCFLOW_DEFAULT_ORG_LIMIT").then(|| "0".to_string())
        });
        assert_eq!(c.default_org_limit, 1);
    }

    #[test]
    fn tracker_terminal_ttl_override() {
        let c = TrackerConfig::from_lookup(|k| {
            (k == "DOCFLOW_STATUS_TERMINAL_TTL_SECS").then(|| "60".to_string())
        });
        assert_eq!(c.terminal_ttl, Duration::from_secs(60));
        assert_eq!(c.active_ttl, TrackerConfig::default().active_ttl);
    }
}
