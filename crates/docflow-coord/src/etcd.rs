use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, DeleteOptions, GetOptions, KeyValue, PutOptions, Txn, TxnOp,
};
use tokio::sync::Mutex;

use crate::types::{CoordError, CoordinationStore, Result};

/// Bounded retries for compare-and-swap loops.
const CAS_ATTEMPTS: usize = 16;

/// etcd-backed store.
///
/// etcd has flat keys only, so structures are spread over child keys:
/// a sorted-set member lives at `{key}/{member}` with its score as the value,
/// and a hash field at `{key}/{field}`. TTLs are leases attached to every
/// child key.
#[derive(Clone)]
pub struct EtcdCoordStore {
    client: Arc<Mutex<Client>>,
}

fn unavailable(e: etcd_client::Error) -> CoordError {
    CoordError::Unavailable(e.to_string())
}

fn child_prefix(key: &str) -> String {
    format!("{key}/")
}

fn child_key(key: &str, member: &str) -> String {
    format!("{key}/{member}")
}

fn value_string(kv: &KeyValue) -> Result<String> {
    String::from_utf8(kv.value().to_vec()).map_err(|e| CoordError::Corrupt {
        key: String::from_utf8_lossy(kv.key()).to_string(),
        reason: e.to_string(),
    })
}

impl EtcdCoordStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let c = Client::connect(endpoints, None).await.map_err(unavailable)?;
        Ok(Self {
            client: Arc::new(Mutex::new(c)),
        })
    }

    fn ttl_to_seconds(ttl: Duration) -> i64 {
        let mut secs = (ttl.as_millis() as f64 / 1000.0).ceil() as i64;
        if secs <= 0 {
            secs = 1;
        }
        secs
    }

    async fn grant(&self, ttl: Duration) -> Result<i64> {
        let mut cli = self.client.lock().await;
        let lease = cli
            .lease_grant(Self::ttl_to_seconds(ttl), None)
            .await
            .map_err(unavailable)?;
        Ok(lease.id())
    }

    async fn get_one(&self, key: &str) -> Result<Option<KeyValue>> {
        let mut cli = self.client.lock().await;
        let resp = cli.get(key, None).await.map_err(unavailable)?;
        Ok(resp.kvs().first().cloned())
    }

    async fn get_children(&self, key: &str) -> Result<Vec<KeyValue>> {
        let mut cli = self.client.lock().await;
        let resp = cli
            .get(child_prefix(key), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(unavailable)?;
        Ok(resp.kvs().to_vec())
    }

    /// Put that keeps an existing key's lease; a brand-new key gets none.
    async fn put_keeping_lease(&self, key: &str, value: String) -> Result<()> {
        let txn = Txn::new()
            .when([Compare::version(key, CompareOp::Greater, 0)])
            .and_then([TxnOp::put(
                key,
                value.clone(),
                Some(PutOptions::new().with_ignore_lease()),
            )])
            .or_else([TxnOp::put(key, value, None)]);
        let mut cli = self.client.lock().await;
        cli.txn(txn).await.map_err(unavailable)?;
        Ok(())
    }

    /// Re-put `kv` under a new lease unless it changed since it was read.
    async fn attach_lease(&self, kv: &KeyValue, lease: i64) -> Result<bool> {
        let key = kv.key().to_vec();
        let txn = Txn::new()
            .when([Compare::mod_revision(
                key.clone(),
                CompareOp::Equal,
                kv.mod_revision(),
            )])
            .and_then([TxnOp::put(
                key,
                kv.value().to_vec(),
                Some(PutOptions::new().with_lease(lease)),
            )]);
        let mut cli = self.client.lock().await;
        let resp = cli.txn(txn).await.map_err(unavailable)?;
        Ok(resp.succeeded())
    }
}

#[async_trait]
impl CoordinationStore for EtcdCoordStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        let mut cli = self.client.lock().await;
        let resp = cli
            .put(
                child_key(key, member),
                score.to_string(),
                Some(PutOptions::new().with_prev_key()),
            )
            .await
            .map_err(unavailable)?;
        Ok(resp.prev_key().is_none())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut cli = self.client.lock().await;
        let resp = cli
            .delete(child_key(key, member), None)
            .await
            .map_err(unavailable)?;
        Ok(resp.deleted() > 0)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut cli = self.client.lock().await;
        let opts = GetOptions::new().with_prefix().with_count_only();
        let resp = cli
            .get(child_prefix(key), Some(opts))
            .await
            .map_err(unavailable)?;
        Ok(resp.count().max(0) as u64)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let members = self.get_children(key).await?;
        let mut removed = 0;
        for kv in members {
            let Ok(score) = value_string(&kv)?.parse::<f64>() else {
                tracing::warn!(key = %String::from_utf8_lossy(kv.key()), "skipping unparsable score");
                continue;
            };
            if score < min || score > max {
                continue;
            }
            // A member rescored since the read keeps its new score.
            let txn = Txn::new()
                .when([Compare::mod_revision(
                    kv.key().to_vec(),
                    CompareOp::Equal,
                    kv.mod_revision(),
                )])
                .and_then([TxnOp::delete(kv.key().to_vec(), None)]);
            let mut cli = self.client.lock().await;
            if cli.txn(txn).await.map_err(unavailable)?.succeeded() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        for (field, value) in fields {
            self.put_keeping_lease(&child_key(key, field), value.clone())
                .await?;
        }
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: String) -> Result<bool> {
        let field_key = child_key(key, field);
        let txn = Txn::new()
            .when([Compare::version(field_key.clone(), CompareOp::Equal, 0)])
            .and_then([TxnOp::put(field_key, value, None)]);
        let mut cli = self.client.lock().await;
        let resp = cli.txn(txn).await.map_err(unavailable)?;
        Ok(resp.succeeded())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let prefix = child_prefix(key);
        let mut out = HashMap::new();
        for kv in self.get_children(key).await? {
            let raw = String::from_utf8_lossy(kv.key()).to_string();
            if let Some(field) = raw.strip_prefix(&prefix) {
                out.insert(field.to_string(), value_string(&kv)?);
            }
        }
        Ok(out)
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let field_key = child_key(key, field);
        for _ in 0..CAS_ATTEMPTS {
            let current = self.get_one(&field_key).await?;
            let (cmp, base, opts) = match &current {
                Some(kv) => {
                    let base = value_string(kv)?.parse::<i64>().map_err(|e| {
                        CoordError::Corrupt {
                            key: field_key.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    (
                        Compare::mod_revision(
                            field_key.clone(),
                            CompareOp::Equal,
                            kv.mod_revision(),
                        ),
                        base,
                        Some(PutOptions::new().with_ignore_lease()),
                    )
                }
                None => (
                    Compare::version(field_key.clone(), CompareOp::Equal, 0),
                    0,
                    None,
                ),
            };
            let next = base + delta;
            let txn = Txn::new()
                .when([cmp])
                .and_then([TxnOp::put(field_key.clone(), next.to_string(), opts)]);
            let mut cli = self.client.lock().await;
            if cli.txn(txn).await.map_err(unavailable)?.succeeded() {
                return Ok(next);
            }
        }
        Err(CoordError::ContentionExhausted { key: field_key })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.get_one(key).await? {
            Some(kv) => Ok(Some(value_string(&kv)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let opts = match ttl {
            Some(ttl) => Some(PutOptions::new().with_lease(self.grant(ttl).await?)),
            None => None,
        };
        let mut cli = self.client.lock().await;
        cli.put(key, value, opts).await.map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut cli = self.client.lock().await;
        let own = cli.delete(key, None).await.map_err(unavailable)?;
        let children = cli
            .delete(child_prefix(key), Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(unavailable)?;
        Ok(own.deleted() + children.deleted() > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let lease = self.grant(ttl).await?;
        let mut targets: Vec<KeyValue> = self.get_children(key).await?;
        if let Some(own) = self.get_one(key).await? {
            targets.push(own);
        }
        let found = !targets.is_empty();

        for mut kv in targets {
            let mut attempts = 0;
            while !self.attach_lease(&kv, lease).await? {
                attempts += 1;
                if attempts >= CAS_ATTEMPTS {
                    return Err(CoordError::ContentionExhausted {
                        key: String::from_utf8_lossy(kv.key()).to_string(),
                    });
                }
                let raw = String::from_utf8_lossy(kv.key()).to_string();
                match self.get_one(&raw).await? {
                    Some(fresh) => kv = fresh,
                    None => break,
                }
            }
        }
        Ok(found)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let prefix = pattern.strip_suffix('*').filter(|p| !p.contains(['*', '?', '[']));
        let Some(prefix) = prefix else {
            return Err(CoordError::Unsupported {
                adapter: "etcd",
                operation: format!("delete_pattern({pattern})"),
            });
        };
        let mut cli = self.client.lock().await;
        let resp = cli
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(unavailable)?;
        Ok(resp.deleted().max(0) as u64)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut cli = self.client.lock().await;
        let opts = GetOptions::new().with_prefix().with_keys_only();
        let resp = cli.get(prefix, Some(opts)).await.map_err(unavailable)?;

        let mut keys = BTreeSet::new();
        for kv in resp.kvs() {
            let raw = String::from_utf8_lossy(kv.key()).to_string();
            let logical = match raw[prefix.len().min(raw.len())..].find('/') {
                Some(idx) => raw[..prefix.len() + idx].to_string(),
                None => raw,
            };
            keys.insert(logical);
        }
        Ok(keys.into_iter().collect())
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let lease = self.grant(ttl).await?;
        let txn = Txn::new()
            .when([Compare::version(key, CompareOp::Equal, 0)])
            .and_then([TxnOp::put(
                key,
                token,
                Some(PutOptions::new().with_lease(lease)),
            )]);
        let mut cli = self.client.lock().await;
        let acquired = cli.txn(txn).await.map_err(unavailable)?.succeeded();
        if !acquired {
            if let Err(e) = cli.lease_revoke(lease).await {
                tracing::debug!(error = %e, key, "failed to revoke unused lock lease");
            }
        }
        Ok(acquired)
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool> {
        let txn = Txn::new()
            .when([Compare::value(key, CompareOp::Equal, token)])
            .and_then([TxnOp::delete(key, None)]);
        let mut cli = self.client.lock().await;
        let resp = cli.txn(txn).await.map_err(unavailable)?;
        Ok(resp.succeeded())
    }
}
