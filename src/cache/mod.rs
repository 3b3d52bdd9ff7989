pub mod gateway;
pub mod sqlite;

use crate::errors::{RiskError, RiskResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

pub use gateway::CacheGateway;

/// One stored result. Payload is the JSON-encoded result type.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(fingerprint: impl Into<String>, payload: String, ttl_secs: u64) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            payload,
            created_at: Utc::now(),
            ttl_secs,
        }
    }

    #[inline]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at).num_milliseconds();
        age < 0 || age as u128 >= u128::from(self.ttl_secs) * 1000
    }
}

/// Storage behind the gateway. Errors are reported, never fatal: the gateway
/// turns them into a cache bypass.
pub trait CacheBackend: Send + Sync {
    fn get(&self, fingerprint: &str) -> RiskResult<Option<CacheEntry>>;
    fn put(&self, entry: &CacheEntry) -> RiskResult<()>;
    fn remove(&self, fingerprint: &str) -> RiskResult<()>;
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, fingerprint: &str) -> RiskResult<Option<CacheEntry>> {
        let map = self
            .entries
            .lock()
            .map_err(|e| RiskError::Cache(format!("lock poisoned: {e}")))?;
        Ok(map.get(fingerprint).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> RiskResult<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|e| RiskError::Cache(format!("lock poisoned: {e}")))?;
        map.insert(entry.fingerprint.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, fingerprint: &str) -> RiskResult<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|e| RiskError::Cache(format!("lock poisoned: {e}")))?;
        map.remove(fingerprint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness() {
        let mut entry = CacheEntry::new("fp", "{}".into(), 60);
        let now = entry.created_at;
        assert!(!entry.is_stale(now));
        assert!(!entry.is_stale(now + chrono::Duration::seconds(59)));
        assert!(entry.is_stale(now + chrono::Duration::seconds(60)));
        entry.ttl_secs = 0;
        assert!(entry.is_stale(now));
    }

    #[test]
    fn test_memory_roundtrip() {
        let cache = MemoryCache::new();
        let entry = CacheEntry::new("abc", "[1,2]".into(), 10);
        cache.put(&entry).unwrap();
        assert_eq!(cache.get("abc").unwrap(), Some(entry));
        cache.remove("abc").unwrap();
        assert_eq!(cache.get("abc").unwrap(), None);
        assert!(cache.is_empty());
    }
}
