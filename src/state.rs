use crate::config::AppConfig;
use crate::engine::RiskEngine;
use crate::errors::RiskError;
use chrono::NaiveDate;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ── Requests INTO the engine ──

/// Raw simulation request as it arrives from a caller. Integer fields are
/// signed so that out-of-range input is reported as `InvalidParameter`
/// rather than a decode failure.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimulationRequest {
    pub ticker: String,
    pub initial_price: f64,
    pub days: i64,
    pub volatility: f64,
    pub drift: f64,
    pub paths: i64,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Return the full (paths x days+1) matrix. Off by default to bound memory.
    #[serde(default)]
    pub include_paths: bool,
}

impl SimulationRequest {
    pub fn new(
        ticker: impl Into<String>,
        initial_price: f64,
        days: i64,
        volatility: f64,
        drift: f64,
        paths: i64,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            initial_price,
            days,
            volatility,
            drift,
            paths,
            seed: None,
            include_paths: false,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_paths_matrix(mut self) -> Self {
        self.include_paths = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ScenarioKind {
    #[serde(rename = "price_shock")]
    PriceShock,
    #[serde(rename = "vol_shock")]
    VolatilityShock,
}

impl ScenarioKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PriceShock => "price_shock",
            Self::VolatilityShock => "vol_shock",
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for ScenarioKind {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price_shock" | "priceshock" => Ok(Self::PriceShock),
            "vol_shock" | "volatility_shock" | "volatilityshock" => Ok(Self::VolatilityShock),
            other => Err(RiskError::InvalidScenario(format!(
                "unknown scenario_type `{other}` (expected price_shock or vol_shock)"
            ))),
        }
    }
}

/// Raw stress request. `scenario_type` stays a string until normalization so
/// an unknown label surfaces as `InvalidScenario`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StressRequest {
    pub ticker: String,
    pub scenario_type: String,
    pub shock_value: f64,
    pub initial_price: f64,
    #[serde(default)]
    pub volatility: Option<f64>,
    #[serde(default)]
    pub drift: Option<f64>,
    #[serde(default)]
    pub days: Option<i64>,
    #[serde(default)]
    pub paths: Option<i64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl StressRequest {
    pub fn new(
        ticker: impl Into<String>,
        scenario_type: impl Into<String>,
        shock_value: f64,
        initial_price: f64,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            scenario_type: scenario_type.into(),
            shock_value,
            initial_price,
            volatility: None,
            drift: None,
            days: None,
            paths: None,
            seed: None,
        }
    }
}

// ── Results OUT of the engine ──

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimulationResult {
    pub ticker: String,
    pub fingerprint: String,
    pub seed: u64,
    pub days: u32,
    pub paths: usize,
    pub mean_price: f64,
    /// Monte Carlo standard error of `mean_price`.
    pub std_error: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    pub var_99: f64,
    pub cvar_99: f64,
    /// Sorted ascending, length == paths.
    pub terminal_prices: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_matrix: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StressOutcome {
    PriceShock {
        new_price: f64,
        estimated_loss: f64,
    },
    VolatilityShock {
        baseline_volatility: f64,
        shocked_volatility: f64,
        normal_var_99: f64,
        new_var_99: f64,
        baseline_mean_price: f64,
        shocked_mean_price: f64,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StressResult {
    pub ticker: String,
    pub scenario: ScenarioKind,
    pub shock_value: f64,
    pub initial_price: f64,
    pub outcome: StressOutcome,
}

// ── Market history ──

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ── Engine counters (lock-free) ──

pub struct EngineCounters {
    pub computations_run: AtomicU64,
    pub batches_run: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_errors: AtomicU64,
    pub coalesced_waits: AtomicU64,
    pub requests_failed: AtomicU64,
}

impl EngineCounters {
    pub fn new() -> Self {
        Self {
            computations_run: AtomicU64::new(0),
            batches_run: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_errors: AtomicU64::new(0),
            coalesced_waits: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        use portable_atomic::Ordering::Relaxed;
        serde_json::json!({
            "computations_run": self.computations_run.load(Relaxed),
            "batches_run": self.batches_run.load(Relaxed),
            "cache_hits": self.cache_hits.load(Relaxed),
            "cache_misses": self.cache_misses.load(Relaxed),
            "cache_errors": self.cache_errors.load(Relaxed),
            "coalesced_waits": self.coalesced_waits.load(Relaxed),
            "requests_failed": self.requests_failed.load(Relaxed),
        })
    }
}

impl Default for EngineCounters {
    fn default() -> Self {
        Self::new()
    }
}

// ── Application shared state (HTTP layer) ──

pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<RiskEngine>,
}

impl AppState {
    pub fn new(config: AppConfig, engine: Arc<RiskEngine>) -> Arc<Self> {
        Arc::new(Self { config, engine })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_parse() {
        assert_eq!("price_shock".parse::<ScenarioKind>(), Ok(ScenarioKind::PriceShock));
        assert_eq!("VOL_SHOCK".parse::<ScenarioKind>(), Ok(ScenarioKind::VolatilityShock));
        assert_eq!(
            "volatility_shock".parse::<ScenarioKind>(),
            Ok(ScenarioKind::VolatilityShock)
        );
        let err = "unknown".parse::<ScenarioKind>().unwrap_err();
        assert!(matches!(err, RiskError::InvalidScenario(_)));
    }

    #[test]
    fn test_stress_outcome_wire_format() {
        let result = StressResult {
            ticker: "AAPL".into(),
            scenario: ScenarioKind::PriceShock,
            shock_value: 0.3,
            initial_price: 100.0,
            outcome: StressOutcome::PriceShock {
                new_price: 70.0,
                estimated_loss: 30.0,
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["scenario"], "price_shock");
        assert_eq!(json["outcome"]["kind"], "price_shock");
        assert_eq!(json["outcome"]["new_price"], 70.0);
    }

    #[test]
    fn test_request_defaults_on_decode() {
        let req: SimulationRequest = serde_json::from_str(
            r#"{"ticker":"AAPL","initial_price":100.0,"days":252,"volatility":0.2,"drift":0.05,"paths":1000}"#,
        )
        .unwrap();
        assert_eq!(req.seed, None);
        assert!(!req.include_paths);
    }
}
