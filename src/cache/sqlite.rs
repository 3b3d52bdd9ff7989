use super::{CacheBackend, CacheEntry};
use crate::db::DbPool;
use crate::errors::{RiskError, RiskResult};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

/// Cache table in the shared SQLite database. Every failure maps to
/// `RiskError::Cache` so the gateway can bypass it.
pub struct SqliteCache {
    db: DbPool,
}

impl SqliteCache {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> RiskResult<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.db
            .lock()
            .map_err(|e| RiskError::Cache(format!("lock poisoned: {e}")))
    }
}

fn cache_err(e: rusqlite::Error) -> RiskError {
    RiskError::Cache(e.to_string())
}

impl CacheBackend for SqliteCache {
    fn get(&self, fingerprint: &str) -> RiskResult<Option<CacheEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT payload, created_at, ttl_secs FROM simulation_cache WHERE fingerprint = ?1",
                [fingerprint],
                |row| {
                    let payload: String = row.get(0)?;
                    let created_at: String = row.get(1)?;
                    let ttl_secs: i64 = row.get(2)?;
                    Ok((payload, created_at, ttl_secs))
                },
            )
            .optional()
            .map_err(cache_err)?;

        let Some((payload, created_at, ttl_secs)) = row else {
            return Ok(None);
        };
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| RiskError::Cache(format!("bad created_at `{created_at}`: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(CacheEntry {
            fingerprint: fingerprint.to_string(),
            payload,
            created_at,
            ttl_secs: ttl_secs.max(0) as u64,
        }))
    }

    fn put(&self, entry: &CacheEntry) -> RiskResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO simulation_cache (fingerprint, payload, created_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                entry.fingerprint,
                entry.payload,
                entry.created_at.to_rfc3339(),
                i64::try_from(entry.ttl_secs).unwrap_or(i64::MAX),
            ],
        )
        .map_err(cache_err)?;
        Ok(())
    }

    fn remove(&self, fingerprint: &str) -> RiskResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM simulation_cache WHERE fingerprint = ?1", [fingerprint])
            .map_err(cache_err)?;
        Ok(())
    }
}
