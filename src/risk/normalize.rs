//! Parameter normalization and request fingerprinting.
//!
//! Every request is validated and reduced to a canonical, typed field set
//! before anything is dispatched. The fingerprint is SHA-256 over that field
//! set in sorted key order, with floats hashed by bit pattern, so two requests
//! with the same values always map to the same cache key.

use crate::errors::{RiskError, RiskResult};
use crate::state::{ScenarioKind, SimulationRequest, StressRequest};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Upper bound on paths per request (keeps the terminal vector in memory bounds).
pub const MAX_PATHS: i64 = 10_000_000;
/// Upper bound on horizon: 100 trading years.
pub const MAX_DAYS: i64 = 25_200;
/// Upper bound on cells returned when the full path matrix is requested.
pub const MAX_MATRIX_CELLS: i64 = 5_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 bytes of the digest, used as the default global seed.
    pub fn derived_seed(&self) -> u64 {
        self.0
            .get(..16)
            .and_then(|prefix| u64::from_str_radix(prefix, 16).ok())
            .unwrap_or(0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed canonical value. The tag byte keeps `1` (int) and `1.0` (float) apart.
#[derive(Debug, Clone, Copy)]
enum Canon<'a> {
    Str(&'a str),
    Float(f64),
    Int(u64),
    Bool(bool),
    Absent,
}

fn fingerprint(domain: &str, fields: &BTreeMap<&'static str, Canon<'_>>) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(b"\n");
    for (key, value) in fields {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        match value {
            Canon::Str(s) => {
                hasher.update(b"s");
                hasher.update((s.len() as u64).to_be_bytes());
                hasher.update(s.as_bytes());
            }
            Canon::Float(x) => {
                // -0.0 and 0.0 are the same request
                let x = if *x == 0.0 { 0.0 } else { *x };
                hasher.update(b"f");
                hasher.update(x.to_bits().to_be_bytes());
            }
            Canon::Int(n) => {
                hasher.update(b"i");
                hasher.update(n.to_be_bytes());
            }
            Canon::Bool(b) => {
                hasher.update(b"b");
                hasher.update([*b as u8]);
            }
            Canon::Absent => hasher.update(b"-"),
        }
        hasher.update(b";");
    }
    let digest = hasher.finalize();
    Fingerprint(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Validated simulation parameters. Only constructible through `normalize_simulation`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    pub ticker: String,
    pub initial_price: f64,
    pub days: u32,
    pub volatility: f64,
    pub drift: f64,
    pub paths: usize,
    pub seed: u64,
    pub include_paths: bool,
    pub fingerprint: Fingerprint,
}

pub fn normalize_simulation(req: &SimulationRequest) -> RiskResult<SimulationParams> {
    let ticker = canonical_ticker(&req.ticker)?;
    let initial_price = require_positive("initial_price", req.initial_price)?;
    let days = require_count("days", req.days, MAX_DAYS)?;
    let volatility = require_non_negative("volatility", req.volatility)?;
    let drift = require_finite("drift", req.drift)?;
    let paths = require_count("paths", req.paths, MAX_PATHS)?;

    if req.include_paths && req.paths.saturating_mul(req.days + 1) > MAX_MATRIX_CELLS {
        return Err(RiskError::invalid(
            "include_paths",
            format!("path matrix would exceed {MAX_MATRIX_CELLS} cells"),
        ));
    }

    let mut fields = BTreeMap::new();
    fields.insert("days", Canon::Int(days as u64));
    fields.insert("drift", Canon::Float(drift));
    fields.insert("include_paths", Canon::Bool(req.include_paths));
    fields.insert("initial_price", Canon::Float(initial_price));
    fields.insert("paths", Canon::Int(paths as u64));
    fields.insert("seed", req.seed.map(Canon::Int).unwrap_or(Canon::Absent));
    fields.insert("ticker", Canon::Str(&ticker));
    fields.insert("volatility", Canon::Float(volatility));
    let fingerprint = fingerprint("simulate", &fields);

    let seed = req.seed.unwrap_or_else(|| fingerprint.derived_seed());

    Ok(SimulationParams {
        ticker,
        initial_price,
        days: days as u32,
        volatility,
        drift,
        paths: paths as usize,
        seed,
        include_paths: req.include_paths,
        fingerprint,
    })
}

/// Validated stress parameters. Market overrides stay optional; the engine
/// fills them from history or configured defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct StressParams {
    pub ticker: String,
    pub scenario: ScenarioKind,
    pub shock_value: f64,
    pub initial_price: f64,
    pub volatility: Option<f64>,
    pub drift: Option<f64>,
    pub days: Option<i64>,
    pub paths: Option<i64>,
    pub seed: u64,
    pub fingerprint: Fingerprint,
}

/// Validate a stress request and fingerprint it.
///
/// A price shock is a fractional drop applied to the spot price, so it is
/// restricted to [0, 1]: 0 leaves the price unchanged, 1 wipes it out.
/// Rises (negative values) and drops past zero are rejected rather than
/// producing a negative or inflated shocked price. A volatility shock scales
/// volatility by `1 + shock_value` and only needs to stay >= -1.
pub fn normalize_stress(req: &StressRequest) -> RiskResult<StressParams> {
    let scenario: ScenarioKind = req.scenario_type.parse()?;
    let ticker = canonical_ticker(&req.ticker)?;
    let initial_price = require_positive("initial_price", req.initial_price)?;
    let shock_value = require_finite("shock_value", req.shock_value)?;

    match scenario {
        ScenarioKind::PriceShock => {
            if !(0.0..=1.0).contains(&shock_value) {
                return Err(RiskError::invalid("shock_value", "price shock must lie in [0, 1]"));
            }
        }
        ScenarioKind::VolatilityShock => {
            if shock_value < -1.0 {
                return Err(RiskError::invalid(
                    "shock_value",
                    "volatility shock must be >= -1 (scaled volatility cannot go negative)",
                ));
            }
        }
    }

    let volatility = req
        .volatility
        .map(|v| require_non_negative("volatility", v))
        .transpose()?;
    let drift = req.drift.map(|d| require_finite("drift", d)).transpose()?;
    let days = req
        .days
        .map(|d| require_count("days", d, MAX_DAYS))
        .transpose()?;
    let paths = req
        .paths
        .map(|p| require_count("paths", p, MAX_PATHS))
        .transpose()?;

    let mut fields = BTreeMap::new();
    fields.insert("days", days.map(|d| Canon::Int(d as u64)).unwrap_or(Canon::Absent));
    fields.insert("drift", drift.map(Canon::Float).unwrap_or(Canon::Absent));
    fields.insert("initial_price", Canon::Float(initial_price));
    fields.insert("paths", paths.map(|p| Canon::Int(p as u64)).unwrap_or(Canon::Absent));
    fields.insert("scenario", Canon::Str(scenario.label()));
    fields.insert("seed", req.seed.map(Canon::Int).unwrap_or(Canon::Absent));
    fields.insert("shock_value", Canon::Float(shock_value));
    fields.insert("ticker", Canon::Str(&ticker));
    fields.insert("volatility", volatility.map(Canon::Float).unwrap_or(Canon::Absent));
    let fingerprint = fingerprint("stress", &fields);

    let seed = req.seed.unwrap_or_else(|| fingerprint.derived_seed());

    Ok(StressParams {
        ticker,
        scenario,
        shock_value,
        initial_price,
        volatility,
        drift,
        days,
        paths,
        seed,
        fingerprint,
    })
}

pub fn canonical_ticker(raw: &str) -> RiskResult<String> {
    let ticker = raw.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err(RiskError::invalid("ticker", "must be non-empty"));
    }
    if ticker.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RiskError::invalid("ticker", "must not contain whitespace"));
    }
    Ok(ticker)
}

fn require_finite(field: &'static str, x: f64) -> RiskResult<f64> {
    if x.is_finite() {
        Ok(x)
    } else {
        Err(RiskError::invalid(field, format!("must be finite, got {x}")))
    }
}

fn require_positive(field: &'static str, x: f64) -> RiskResult<f64> {
    let x = require_finite(field, x)?;
    if x > 0.0 {
        Ok(x)
    } else {
        Err(RiskError::invalid(field, format!("must be > 0, got {x}")))
    }
}

fn require_non_negative(field: &'static str, x: f64) -> RiskResult<f64> {
    let x = require_finite(field, x)?;
    if x >= 0.0 {
        Ok(x)
    } else {
        Err(RiskError::invalid(field, format!("must be >= 0, got {x}")))
    }
}

fn require_count(field: &'static str, n: i64, max: i64) -> RiskResult<i64> {
    if n < 1 {
        return Err(RiskError::invalid(field, format!("must be >= 1, got {n}")));
    }
    if n > max {
        return Err(RiskError::invalid(field, format!("must be <= {max}, got {n}")));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SimulationRequest {
        SimulationRequest::new("AAPL", 100.0, 252, 0.2, 0.05, 10_000)
    }

    #[test]
    fn test_rejects_zero_paths() {
        let mut req = base();
        req.paths = 0;
        match normalize_simulation(&req) {
            Err(RiskError::InvalidParameter { field, .. }) => assert_eq!(field, "paths"),
            other => panic!("expected InvalidParameter(paths), got {other:?}"),
        }
    }

    #[test]
    fn test_names_offending_field() {
        let cases: Vec<(SimulationRequest, &str)> = vec![
            (SimulationRequest { ticker: "  ".into(), ..base() }, "ticker"),
            (SimulationRequest { initial_price: 0.0, ..base() }, "initial_price"),
            (SimulationRequest { days: -3, ..base() }, "days"),
            (SimulationRequest { volatility: -0.1, ..base() }, "volatility"),
            (SimulationRequest { drift: f64::NAN, ..base() }, "drift"),
        ];
        for (req, expected) in cases {
            match normalize_simulation(&req) {
                Err(RiskError::InvalidParameter { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected InvalidParameter({expected}), got {other:?}"),
            }
        }
    }

    #[test]
    fn test_negative_drift_and_zero_vol_allowed() {
        let req = SimulationRequest { drift: -0.3, volatility: 0.0, ..base() };
        assert!(normalize_simulation(&req).is_ok());
    }

    #[test]
    fn test_fingerprint_stable_and_canonical() {
        let a = normalize_simulation(&base()).unwrap();
        let b = normalize_simulation(&SimulationRequest { ticker: " aapl ".into(), ..base() }).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.seed, b.seed);
        assert_eq!(a.fingerprint.as_str().len(), 64);

        let c = normalize_simulation(&SimulationRequest { paths: 10_001, ..base() }).unwrap();
        assert_ne!(a.fingerprint, c.fingerprint);

        let d = normalize_simulation(&base().with_seed(7)).unwrap();
        assert_ne!(a.fingerprint, d.fingerprint);
        assert_eq!(d.seed, 7);
    }

    #[test]
    fn test_negative_zero_drift_same_fingerprint() {
        let a = normalize_simulation(&SimulationRequest { drift: 0.0, ..base() }).unwrap();
        let b = normalize_simulation(&SimulationRequest { drift: -0.0, ..base() }).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_matrix_size_bounded() {
        let req = SimulationRequest::new("AAPL", 100.0, 252, 0.2, 0.05, 100_000).with_paths_matrix();
        assert!(matches!(
            normalize_simulation(&req),
            Err(RiskError::InvalidParameter { field: "include_paths", .. })
        ));
    }

    #[test]
    fn test_stress_unknown_scenario() {
        let req = StressRequest::new("AAPL", "unknown", 0.2, 100.0);
        assert!(matches!(normalize_stress(&req), Err(RiskError::InvalidScenario(_))));
    }

    #[test]
    fn test_stress_price_shock_range() {
        assert!(normalize_stress(&StressRequest::new("AAPL", "price_shock", 0.0, 100.0)).is_ok());
        assert!(normalize_stress(&StressRequest::new("AAPL", "price_shock", 1.0, 100.0)).is_ok());
        for rejected in [1.5, -0.1] {
            assert!(matches!(
                normalize_stress(&StressRequest::new("AAPL", "price_shock", rejected, 100.0)),
                Err(RiskError::InvalidParameter { field: "shock_value", .. })
            ));
        }
        assert!(matches!(
            normalize_stress(&StressRequest::new("AAPL", "vol_shock", -2.0, 100.0)),
            Err(RiskError::InvalidParameter { field: "shock_value", .. })
        ));
    }

    #[test]
    fn test_stress_and_simulate_fingerprints_disjoint() {
        let sim = normalize_simulation(&base()).unwrap();
        let stress = normalize_stress(&StressRequest::new("AAPL", "vol_shock", 0.5, 100.0)).unwrap();
        assert_ne!(sim.fingerprint, stress.fingerprint);
    }
}
