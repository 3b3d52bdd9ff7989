use crate::cache::sqlite::SqliteCache;
use crate::cache::{CacheBackend, CacheGateway};
use crate::config::{AppConfig, EngineConfig};
use crate::db::{validate_rows, DbPool, PriceStore, SqliteStore};
use crate::errors::{RiskError, RiskResult};
use crate::execution::orchestrator::Orchestrator;
use crate::execution::pool::{BlockingPool, WorkerPool};
use crate::feeds::market_data::{HttpMarketData, MarketDataSource};
use crate::models::calibration::{self, MarketEstimate, MIN_CLOSES};
use crate::risk::metrics;
use crate::risk::normalize::{self, canonical_ticker, SimulationParams};
use crate::risk::stress::{self, ScenarioContext, StressDefaults};
use crate::state::{EngineCounters, PriceRow, SimulationRequest, SimulationResult, StressRequest, StressResult};
use chrono::NaiveDate;
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;

/// The risk engine context. Owns the worker pool, the result cache and the
/// market-data collaborators; nothing here is process-global.
pub struct RiskEngine {
    config: EngineConfig,
    orchestrator: Orchestrator,
    cache: CacheGateway<SimulationResult>,
    store: Arc<dyn PriceStore>,
    source: Arc<dyn MarketDataSource>,
    counters: Arc<EngineCounters>,
}

impl RiskEngine {
    pub fn new(
        config: EngineConfig,
        pool: Arc<dyn WorkerPool>,
        cache_backend: Option<Arc<dyn CacheBackend>>,
        store: Arc<dyn PriceStore>,
        source: Arc<dyn MarketDataSource>,
    ) -> Self {
        let counters = Arc::new(EngineCounters::new());
        let cache_backend = if config.cache_enabled { cache_backend } else { None };

        Self {
            orchestrator: Orchestrator::new(pool, config.request_timeout, counters.clone()),
            cache: CacheGateway::new(cache_backend, config.cache_ttl, counters.clone())
                .with_max_payload(config.cache_max_payload_bytes),
            config,
            store,
            source,
            counters,
        }
    }

    /// Production wiring: blocking worker pool, SQLite cache and store, HTTP market data.
    pub fn from_config(config: &AppConfig, db: DbPool) -> Self {
        let engine_cfg = config.engine.clone();
        let pool = Arc::new(BlockingPool::new(engine_cfg.worker_concurrency, engine_cfg.batch_timeout));
        let cache: Arc<dyn CacheBackend> = Arc::new(SqliteCache::new(db.clone()));
        let store = Arc::new(SqliteStore::new(db));
        let source = Arc::new(HttpMarketData::new(&config.yahoo_base_url, &config.binance_base_url));

        tracing::info!(
            workers = engine_cfg.worker_concurrency,
            cache_enabled = engine_cfg.cache_enabled,
            cache_ttl_secs = engine_cfg.cache_ttl.as_secs(),
            cache_max_payload_bytes = engine_cfg.cache_max_payload_bytes,
            "risk engine configured"
        );
        Self::new(engine_cfg, pool, Some(cache), store, source)
    }

    pub fn counters(&self) -> &Arc<EngineCounters> {
        &self.counters
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Monte Carlo VaR/CVaR for one parameter set. Identical requests share
    /// one computation and one cached result.
    pub async fn simulate(&self, req: SimulationRequest) -> RiskResult<SimulationResult> {
        let result = self.run_simulation(req).await;
        self.record_failure("simulate", &result);
        result
    }

    pub async fn stress_test(&self, req: StressRequest) -> RiskResult<StressResult> {
        let result = async {
            let params = normalize::normalize_stress(&req)?;
            stress::run_scenario(self, &params, self.stress_defaults()).await
        }
        .await;
        self.record_failure("stress_test", &result);
        result
    }

    /// Fetch history for every ticker, then store it all in one transaction.
    /// A failed or empty fetch, or any invalid row, fails the call before
    /// anything is written. Duplicate tickers are fetched once. Returns rows
    /// written.
    pub async fn ingest(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> RiskResult<usize> {
        if tickers.is_empty() {
            return Err(RiskError::invalid("tickers", "at least one ticker is required"));
        }
        if start > end {
            return Err(RiskError::invalid("start", format!("{start} is after end {end}")));
        }
        let mut tickers = tickers
            .iter()
            .map(|t| canonical_ticker(t))
            .collect::<RiskResult<Vec<_>>>()?;
        let mut seen = HashSet::new();
        tickers.retain(|t| seen.insert(t.clone()));

        let fetched = futures_util::future::try_join_all(tickers.iter().map(|ticker| async move {
            let rows = self.source.fetch_history(ticker, start, end).await?;
            if rows.is_empty() {
                return Err(RiskError::DataUnavailable(format!("{ticker}: no rows between {start} and {end}")));
            }
            validate_rows(ticker, &rows)?;
            Ok::<_, RiskError>((ticker.clone(), rows))
        }))
        .await;

        let fetched = match fetched {
            Ok(f) => f,
            Err(e) => {
                EngineCounters::bump(&self.counters.requests_failed);
                tracing::warn!(error = %e, "ingestion aborted, nothing written");
                return Err(e);
            }
        };

        let store = self.store.clone();
        let written = tokio::task::spawn_blocking(move || store.put_many(&fetched))
            .await
            .map_err(|e| RiskError::Database(format!("store task: {e}")))??;
        tracing::info!(tickers = tickers.len(), rows = written, "ingestion complete");
        Ok(written)
    }

    /// Volatility and drift for `ticker` from the configured lookback window.
    /// Falls back to the market-data source when the store has too little.
    pub async fn market_estimate(&self, ticker: &str) -> RiskResult<MarketEstimate> {
        let end = chrono::Utc::now().date_naive();
        let start = end - chrono::Duration::days(self.config.history_lookback_days.max(1));

        let stored = self.get_rows(ticker.to_string(), start, end).await?;
        if stored.len() >= MIN_CLOSES {
            return calibration::estimate_from_rows(&stored);
        }

        tracing::info!(ticker = %ticker, stored = stored.len(), "history too short, fetching");
        let fetched = self.source.fetch_history(ticker, start, end).await?;
        let estimate = calibration::estimate_from_rows(&fetched)?;
        self.put_rows(ticker.to_string(), fetched).await?;

        tracing::info!(
            ticker = %ticker,
            volatility = estimate.volatility,
            drift = estimate.drift,
            observations = estimate.observations,
            "calibrated from market history"
        );
        Ok(estimate)
    }

    async fn run_simulation(&self, req: SimulationRequest) -> RiskResult<SimulationResult> {
        let params = normalize::normalize_simulation(&req)?;
        self.cache
            .get_or_compute(&params.fingerprint, || self.compute(&params))
            .await
    }

    async fn compute(&self, params: &SimulationParams) -> RiskResult<SimulationResult> {
        let distribution = self.orchestrator.run(params).await?;
        let summary = metrics::summarize(distribution.terminal, params.initial_price)?;

        tracing::info!(
            ticker = %params.ticker,
            mean = summary.mean_price,
            var_95 = summary.at_95.var,
            cvar_95 = summary.at_95.cvar,
            "risk metrics computed"
        );

        Ok(SimulationResult {
            ticker: params.ticker.clone(),
            fingerprint: params.fingerprint.to_string(),
            seed: params.seed,
            days: params.days,
            paths: params.paths,
            mean_price: summary.mean_price,
            std_error: summary.std_error,
            var_95: summary.at_95.var,
            cvar_95: summary.at_95.cvar,
            var_99: summary.at_99.var,
            cvar_99: summary.at_99.cvar,
            terminal_prices: summary.sorted,
            path_matrix: distribution.paths,
        })
    }

    fn stress_defaults(&self) -> StressDefaults {
        StressDefaults {
            days: i64::from(self.config.stress_default_days),
            paths: i64::try_from(self.config.stress_default_paths).unwrap_or(i64::MAX),
        }
    }

    fn record_failure<T>(&self, op: &'static str, result: &RiskResult<T>) {
        if let Err(e) = result {
            EngineCounters::bump(&self.counters.requests_failed);
            if e.is_caller_error() {
                tracing::debug!(op, error = %e, "request rejected");
            } else {
                tracing::warn!(op, error = %e, retryable = e.is_retryable(), "request failed");
            }
        }
    }

    // SQLite calls are blocking; keep them off the async workers.

    async fn get_rows(&self, ticker: String, start: NaiveDate, end: NaiveDate) -> RiskResult<Vec<PriceRow>> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.get(&ticker, start, end))
            .await
            .map_err(|e| RiskError::Database(format!("store task: {e}")))?
    }

    async fn put_rows(&self, ticker: String, rows: Vec<PriceRow>) -> RiskResult<usize> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.put(&ticker, &rows))
            .await
            .map_err(|e| RiskError::Database(format!("store task: {e}")))?
    }
}

impl ScenarioContext for RiskEngine {
    fn simulate(&self, req: SimulationRequest) -> BoxFuture<'_, RiskResult<SimulationResult>> {
        Box::pin(self.run_simulation(req))
    }

    fn market_estimate<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, RiskResult<MarketEstimate>> {
        Box::pin(RiskEngine::market_estimate(self, ticker))
    }
}
