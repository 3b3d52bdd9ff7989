use crate::errors::{RiskError, RiskResult};
use crate::state::PriceRow;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type DbPool = Arc<Mutex<Connection>>;

const SCHEMA: &str = include_str!("../migrations/001_init.sql");

pub fn init_db(data_dir: &Path) -> RiskResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| RiskError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("market_data.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA cache_size=-64000;")?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

/// Private in-memory database with the full schema. Used by tests and by
/// callers that want an ephemeral store.
pub fn init_memory_db() -> RiskResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Durable time-series store for daily price history.
/// `put` and `put_many` are all-or-nothing per call.
pub trait PriceStore: Send + Sync {
    fn put(&self, ticker: &str, rows: &[PriceRow]) -> RiskResult<usize>;
    /// Several tickers in one transaction; one bad row rejects the whole batch.
    fn put_many(&self, batches: &[(String, Vec<PriceRow>)]) -> RiskResult<usize>;
    fn get(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> RiskResult<Vec<PriceRow>>;
}

pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn write(&self, batches: &[(&str, &[PriceRow])]) -> RiskResult<usize> {
        for (ticker, rows) in batches {
            validate_rows(ticker, rows)?;
        }

        let mut conn = self.db.lock().map_err(|e| RiskError::Database(format!("lock poisoned: {e}")))?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO market_prices (date, ticker, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (date, ticker) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume",
            )?;
            for (ticker, rows) in batches {
                for row in rows.iter() {
                    stmt.execute(rusqlite::params![
                        row.date.to_string(),
                        *ticker,
                        row.open,
                        row.high,
                        row.low,
                        row.close,
                        row.volume,
                    ])?;
                }
                written += rows.len();
            }
        }
        tx.commit()?;

        for (ticker, rows) in batches {
            tracing::info!(ticker = %ticker, rows = rows.len(), "price history stored");
        }
        Ok(written)
    }
}

impl PriceStore for SqliteStore {
    fn put(&self, ticker: &str, rows: &[PriceRow]) -> RiskResult<usize> {
        self.write(&[(ticker, rows)])
    }

    fn put_many(&self, batches: &[(String, Vec<PriceRow>)]) -> RiskResult<usize> {
        let borrowed: Vec<(&str, &[PriceRow])> =
            batches.iter().map(|(t, rows)| (t.as_str(), rows.as_slice())).collect();
        self.write(&borrowed)
    }

    fn get(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> RiskResult<Vec<PriceRow>> {
        let conn = self.db.lock().map_err(|e| RiskError::Database(format!("lock: {e}")))?;
        let mut stmt = conn.prepare(
            "SELECT date, open, high, low, close, volume FROM market_prices
             WHERE ticker = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![ticker, start.to_string(), end.to_string()],
            |row| {
                let date: String = row.get(0)?;
                Ok((date, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
            },
        )?;

        let mut out = Vec::new();
        for r in rows {
            let (date, open, high, low, close, volume): (String, f64, f64, f64, f64, f64) = r?;
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| RiskError::Database(format!("bad date `{date}`: {e}")))?;
            out.push(PriceRow { date, open, high, low, close, volume });
        }
        Ok(out)
    }
}

/// Rejects non-finite fields, a non-positive close or negative volume.
pub fn validate_rows(ticker: &str, rows: &[PriceRow]) -> RiskResult<()> {
    match rows.iter().find(|r| !row_is_valid(r)) {
        Some(bad) => Err(RiskError::DataUnavailable(format!(
            "{ticker}: invalid row for {}, nothing written",
            bad.date
        ))),
        None => Ok(()),
    }
}

fn row_is_valid(row: &PriceRow) -> bool {
    [row.open, row.high, row.low, row.close, row.volume]
        .iter()
        .all(|v| v.is_finite())
        && row.close > 0.0
        && row.volume >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(day: u32, close: f64) -> PriceRow {
        PriceRow {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_put_get_range_ordered() {
        let store = SqliteStore::new(init_memory_db().unwrap());
        store.put("AAPL", &[row(3, 103.0), row(1, 101.0), row(2, 102.0)]).unwrap();
        store.put("MSFT", &[row(1, 300.0)]).unwrap();

        let rows = store.get("AAPL", d(1), d(2)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d(1));
        assert_eq!(rows[1].close, 102.0);
        assert_eq!(store.get("AAPL", d(1), d(31)).unwrap().len(), 3);
    }

    #[test]
    fn test_upsert_replaces() {
        let store = SqliteStore::new(init_memory_db().unwrap());
        store.put("AAPL", &[row(1, 101.0)]).unwrap();
        store.put("AAPL", &[row(1, 99.0)]).unwrap();
        let rows = store.get("AAPL", d(1), d(1)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, 99.0);
    }

    #[test]
    fn test_invalid_row_writes_nothing() {
        let store = SqliteStore::new(init_memory_db().unwrap());
        let err = store.put("AAPL", &[row(1, 101.0), row(2, f64::NAN)]).unwrap_err();
        assert!(matches!(err, RiskError::DataUnavailable(_)));
        assert!(store.get("AAPL", d(1), d(31)).unwrap().is_empty());
    }

    #[test]
    fn test_put_many_is_one_transaction() {
        let store = SqliteStore::new(init_memory_db().unwrap());
        let batches = vec![
            ("AAPL".to_string(), vec![row(1, 101.0), row(2, 102.0)]),
            ("MSFT".to_string(), vec![row(1, 300.0), row(2, 0.0)]),
        ];
        let err = store.put_many(&batches).unwrap_err();
        assert!(matches!(err, RiskError::DataUnavailable(ref m) if m.starts_with("MSFT")));
        assert!(store.get("AAPL", d(1), d(31)).unwrap().is_empty());

        let written = store.put_many(&batches[..1]).unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.get("AAPL", d(1), d(31)).unwrap().len(), 2);
    }
}
