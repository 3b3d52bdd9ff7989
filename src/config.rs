use crate::cache::gateway::DEFAULT_MAX_PAYLOAD_BYTES;
use crate::errors::{RiskError, RiskResult};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub yahoo_base_url: String,
    pub binance_base_url: String,
    pub engine: EngineConfig,
}

/// Knobs for the simulation engine. Threaded through `RiskEngine`, never global.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max batches executing at once. Never changes the partition.
    pub worker_concurrency: usize,
    pub batch_timeout: Duration,
    pub request_timeout: Duration,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Results encoding larger than this are not cached.
    pub cache_max_payload_bytes: usize,
    pub history_lookback_days: i64,
    pub stress_default_days: u32,
    pub stress_default_paths: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_concurrency(),
            batch_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
            cache_max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            history_lookback_days: 365,
            stress_default_days: 252,
            stress_default_paths: 10_000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> RiskResult<Self> {
        dotenvy::dotenv().ok();

        let server_port = parse_env("SERVER_PORT", "3001")?;

        let worker_concurrency: usize =
            parse_env("WORKER_CONCURRENCY", &default_concurrency().to_string())?;
        if worker_concurrency == 0 {
            return Err(RiskError::Config("WORKER_CONCURRENCY must be >= 1".into()));
        }

        let batch_timeout_ms: u64 = parse_env("BATCH_TIMEOUT_MS", "30000")?;
        let request_timeout_ms: u64 = parse_env("REQUEST_TIMEOUT_MS", "120000")?;
        let cache_enabled: bool = parse_env("CACHE_ENABLED", "true")?;
        let cache_ttl_secs: u64 = parse_env("CACHE_TTL_SECS", "3600")?;
        let cache_max_payload_bytes: usize =
            parse_env("CACHE_MAX_PAYLOAD_BYTES", &DEFAULT_MAX_PAYLOAD_BYTES.to_string())?;
        let history_lookback_days: i64 = parse_env("HISTORY_LOOKBACK_DAYS", "365")?;
        let stress_default_days: u32 = parse_env("STRESS_DEFAULT_DAYS", "252")?;
        let stress_default_paths: usize = parse_env("STRESS_DEFAULT_PATHS", "10000")?;

        Ok(Self {
            server_port,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            yahoo_base_url: env_var_or(
                "YAHOO_BASE_URL",
                "https://query1.finance.yahoo.com/v8/finance/chart",
            ),
            binance_base_url: env_var_or("BINANCE_BASE_URL", "https://api.binance.com/api/v3"),
            engine: EngineConfig {
                worker_concurrency,
                batch_timeout: Duration::from_millis(batch_timeout_ms),
                request_timeout: Duration::from_millis(request_timeout_ms),
                cache_enabled,
                cache_ttl: Duration::from_secs(cache_ttl_secs),
                cache_max_payload_bytes,
                history_lookback_days,
                stress_default_days,
                stress_default_paths,
            },
        })
    }
}

fn parse_env<T>(key: &str, default: &str) -> RiskResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_var_or(key, default)
        .parse::<T>()
        .map_err(|e| RiskError::Config(format!("{key}: {e}")))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
