use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::types::{CoordError, CoordinationStore, Result};

/// In-process stand-in for the shared store, used by tests and single-node
/// development. `set_available(false)` makes every call fail the way a lost
/// connection would; `set_pattern_delete(false)` makes it refuse glob
/// deletes like an adapter without server-side pattern matching.
#[derive(Debug, Clone)]
pub struct MemoryCoordStore {
    inner: Arc<RwLock<Inner>>,
    available: Arc<AtomicBool>,
    pattern_delete: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(HashMap<String, f64>),
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

impl Inner {
    fn live(&self, key: &str, now: Instant) -> Option<&Entry> {
        self.entries.get(key).filter(|e| e.live(now))
    }

    /// Mutable access to a live entry, dropping it first if it has expired.
    fn live_mut(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| !e.live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn zset_mut(&mut self, key: &str, now: Instant) -> Result<&mut HashMap<String, f64>> {
        if self.live_mut(key, now).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::ZSet(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::ZSet(set)) => Ok(set),
            _ => Err(CoordError::WrongType { key: key.to_string() }),
        }
    }

    fn hash_mut(&mut self, key: &str, now: Instant) -> Result<&mut HashMap<String, String>> {
        if self.live_mut(key, now).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Hash(hash)) => Ok(hash),
            _ => Err(CoordError::WrongType { key: key.to_string() }),
        }
    }

    /// Empty collections disappear, matching how the real store behaves.
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|e| &e.value) {
            Some(Value::ZSet(set)) => set.is_empty(),
            Some(Value::Hash(hash)) => hash.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }
}

impl MemoryCoordStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            available: Arc::new(AtomicBool::new(true)),
            pattern_delete: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_pattern_delete(&self, supported: bool) {
        self.pattern_delete.store(supported, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordError::Unavailable("connection refused".to_string()))
        }
    }
}

impl Default for MemoryCoordStore {
    fn default() -> Self {
        Self::new()
    }
}

/// `*` matches any run of characters, everything else is literal.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !text.starts_with(first) || text.len() < first.len() + last.len() || !text.ends_with(last) {
        return false;
    }
    let mut rest = &text[first.len()..text.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

#[async_trait]
impl CoordinationStore for MemoryCoordStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let set = inner.zset_mut(key, Instant::now())?;
        Ok(set.insert(member.to_string(), score).is_none())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let removed = match inner.live_mut(key, Instant::now()).map(|e| &mut e.value) {
            None => false,
            Some(Value::ZSet(set)) => set.remove(member).is_some(),
            Some(_) => return Err(CoordError::WrongType { key: key.to_string() }),
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.check()?;
        let inner = self.inner.read().await;
        match inner.live(key, Instant::now()).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::ZSet(set)) => Ok(set.len() as u64),
            Some(_) => Err(CoordError::WrongType { key: key.to_string() }),
        }
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let removed = match inner.live_mut(key, Instant::now()).map(|e| &mut e.value) {
            None => 0,
            Some(Value::ZSet(set)) => {
                let before = set.len();
                set.retain(|_, score| *score < min || *score > max);
                (before - set.len()) as u64
            }
            Some(_) => return Err(CoordError::WrongType { key: key.to_string() }),
        };
        inner.drop_if_empty(key);
        Ok(removed)
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let hash = inner.hash_mut(key, Instant::now())?;
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: String) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let hash = inner.hash_mut(key, Instant::now())?;
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value);
        Ok(true)
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.check()?;
        let inner = self.inner.read().await;
        match inner.live(key, Instant::now()).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(CoordError::WrongType { key: key.to_string() }),
        }
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let hash = inner.hash_mut(key, Instant::now())?;
        let current = match hash.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|e| CoordError::Corrupt {
                key: format!("{key}/{field}"),
                reason: e.to_string(),
            })?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let inner = self.inner.read().await;
        match inner.live(key, Instant::now()).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(CoordError::WrongType { key: key.to_string() }),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        Ok(inner.entries.remove(key).is_some_and(|e| e.live(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        match inner.live_mut(key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        self.check()?;
        if !self.pattern_delete.load(Ordering::SeqCst) {
            return Err(CoordError::Unsupported {
                adapter: "memory",
                operation: format!("delete_pattern({pattern})"),
            });
        }
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, e)| e.live(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            inner.entries.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        let inner = self.inner.read().await;
        let now = Instant::now();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        if inner.live_mut(key, now).is_some() {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(token.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let held = matches!(
            inner.live_mut(key, Instant::now()).map(|e| &e.value),
            Some(Value::Str(holder)) if holder == token
        );
        if held {
            inner.entries.remove(key);
        }
        Ok(held)
    }
}
