use super::{CacheBackend, CacheEntry};
use crate::errors::{RiskError, RiskResult};
use crate::risk::normalize::Fingerprint;
use crate::state::EngineCounters;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

type Shared<T> = Option<Result<T, RiskError>>;

enum Role<T> {
    Lead(watch::Sender<Shared<T>>),
    Follow(watch::Receiver<Shared<T>>),
}

/// Results whose JSON encoding exceeds this are served but not cached.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Read-through cache with single-flight.
///
/// For one fingerprint at most one computation runs at a time; concurrent
/// callers subscribe to it through a watch channel. If the leader is dropped
/// before publishing, a waiting caller takes over.
///
/// A missing backend (cache disabled) or a failing one degrades to bypass:
/// every lookup misses, results are not stored, single-flight still applies.
/// Backend calls and payload encoding run on the blocking pool.
pub struct CacheGateway<T> {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
    max_payload_bytes: usize,
    inflight: Mutex<HashMap<Fingerprint, watch::Receiver<Shared<T>>>>,
    counters: Arc<EngineCounters>,
}

impl<T> CacheGateway<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        backend: Option<Arc<dyn CacheBackend>>,
        ttl: Duration,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            backend,
            ttl,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            inflight: Mutex::new(HashMap::new()),
            counters,
        }
    }

    pub fn with_max_payload(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Cached value for `fingerprint`, if present and fresh. Stale or
    /// undecodable entries are evicted here (lazy expiry).
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<T> {
        let backend = self.backend.clone()?;
        let counters = self.counters.clone();
        let key = fingerprint.to_string();

        match tokio::task::spawn_blocking(move || read_entry(backend.as_ref(), &counters, &key)).await {
            Ok(hit) => hit,
            Err(e) => {
                EngineCounters::bump(&self.counters.cache_errors);
                tracing::warn!(fingerprint = %fingerprint, error = %e, "cache read task failed, bypassing");
                None
            }
        }
    }

    pub async fn store(&self, fingerprint: &Fingerprint, value: T, ttl: Duration) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let counters = self.counters.clone();
        let key = fingerprint.to_string();
        let limit = self.max_payload_bytes;

        let task = tokio::task::spawn_blocking(move || {
            write_entry(backend.as_ref(), &counters, &key, &value, ttl, limit)
        });
        if let Err(e) = task.await {
            EngineCounters::bump(&self.counters.cache_errors);
            tracing::warn!(fingerprint = %fingerprint, error = %e, "cache write task failed, result not cached");
        }
    }

    /// Return the cached value or run `compute` exactly once across all
    /// concurrent callers for this fingerprint.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &Fingerprint, compute: F) -> RiskResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RiskResult<T>>,
    {
        let tx = loop {
            if let Some(hit) = self.lookup(fingerprint).await {
                return Ok(hit);
            }

            let mut rx = match self.join_or_lead(fingerprint) {
                Role::Lead(tx) => break tx,
                Role::Follow(rx) => rx,
            };

            EngineCounters::bump(&self.counters.coalesced_waits);
            tracing::debug!(fingerprint = %fingerprint, "joining in-flight computation");

            // Err means the leader dropped without publishing; retry and possibly lead.
            let published = rx.wait_for(|v| v.is_some()).await.is_ok();
            let shared = if published { rx.borrow().clone() } else { None };
            if let Some(result) = shared {
                return result;
            }
        };

        let guard = InflightGuard {
            inflight: &self.inflight,
            fingerprint,
        };

        // A previous leader may have stored between our lookup and taking the lead.
        if let Some(hit) = self.lookup(fingerprint).await {
            tx.send_replace(Some(Ok(hit.clone())));
            drop(guard);
            return Ok(hit);
        }

        EngineCounters::bump(&self.counters.cache_misses);
        let result = compute().await;

        if let Ok(value) = &result {
            self.store(fingerprint, value.clone(), self.ttl).await;
        }
        tx.send_replace(Some(result.clone()));
        drop(guard);
        result
    }

    fn join_or_lead(&self, fingerprint: &Fingerprint) -> Role<T> {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rx) = map.get(fingerprint) {
            return Role::Follow(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        map.insert(fingerprint.clone(), rx);
        Role::Lead(tx)
    }
}

fn read_entry<T: DeserializeOwned>(
    backend: &dyn CacheBackend,
    counters: &EngineCounters,
    key: &str,
) -> Option<T> {
    match backend.get(key) {
        Ok(Some(entry)) if entry.is_stale(Utc::now()) => {
            tracing::debug!(fingerprint = %key, "evicting stale cache entry");
            evict(backend, counters, key);
            None
        }
        Ok(Some(entry)) => match serde_json::from_str::<T>(&entry.payload) {
            Ok(value) => {
                EngineCounters::bump(&counters.cache_hits);
                tracing::debug!(fingerprint = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(fingerprint = %key, error = %e, "undecodable cache entry, evicting");
                evict(backend, counters, key);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            EngineCounters::bump(&counters.cache_errors);
            tracing::warn!(fingerprint = %key, error = %e, "cache backend unavailable, bypassing");
            None
        }
    }
}

fn write_entry<T: Serialize>(
    backend: &dyn CacheBackend,
    counters: &EngineCounters,
    key: &str,
    value: &T,
    ttl: Duration,
    limit: usize,
) {
    let mut buf = CappedBuf { bytes: Vec::new(), limit };
    if let Err(e) = serde_json::to_writer(&mut buf, value) {
        if e.is_io() {
            tracing::info!(fingerprint = %key, limit_bytes = limit, "result too large to cache");
        } else {
            tracing::warn!(fingerprint = %key, error = %e, "cache payload encode failed");
        }
        return;
    }
    let payload = match String::from_utf8(buf.bytes) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(fingerprint = %key, error = %e, "cache payload encode failed");
            return;
        }
    };

    let entry = CacheEntry::new(key, payload, ttl.as_secs());
    if let Err(e) = backend.put(&entry) {
        EngineCounters::bump(&counters.cache_errors);
        tracing::warn!(fingerprint = %key, error = %e, "cache store failed, result not cached");
    }
}

fn evict(backend: &dyn CacheBackend, counters: &EngineCounters, key: &str) {
    if let Err(e) = backend.remove(key) {
        EngineCounters::bump(&counters.cache_errors);
        tracing::warn!(fingerprint = %key, error = %e, "cache eviction failed");
    }
}

/// Encode target that refuses to grow past `limit`, so oversized results
/// stop encoding early instead of buffering in full.
struct CappedBuf {
    bytes: Vec<u8>,
    limit: usize,
}

impl std::io::Write for CappedBuf {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if self.bytes.len() + data.len() > self.limit {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "payload over cache limit"));
        }
        self.bytes.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Clears the in-flight slot when the leader finishes or is cancelled.
struct InflightGuard<'a, T> {
    inflight: &'a Mutex<HashMap<Fingerprint, watch::Receiver<Shared<T>>>>,
    fingerprint: &'a Fingerprint,
}

impl<T> Drop for InflightGuard<'_, T> {
    fn drop(&mut self) {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(self.fingerprint);
    }
}
