use crate::errors::{RiskError, RiskResult};
use statrs::statistics::Statistics;

/// Default confidence for simulation responses.
pub const SIM_CONFIDENCE: f64 = 0.95;
/// Confidence for stress baselines and the secondary simulation metric.
pub const STRESS_CONFIDENCE: f64 = 0.99;

/// Quantile of an ascending-sorted sample using linear interpolation between
/// order statistics (h = (n - 1) * q, the NumPy default).
///
/// Pure function. Caller guarantees `sorted` is non-empty and ascending.
#[inline]
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = h - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// VaR and CVaR at one confidence level, both as non-negative losses
/// relative to the initial price.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TailRisk {
    pub confidence: f64,
    /// (1 - alpha) quantile of terminal prices
    pub threshold: f64,
    pub var: f64,
    pub cvar: f64,
}

/// VaR_a  = max(0, S0 - Q_{1-a})
/// CVaR_a = max(0, S0 - mean{ S : S <= Q_{1-a} })
///
/// The tail always contains at least the lowest order statistic, and its mean
/// cannot exceed the threshold, so cvar >= var holds by construction.
pub fn tail_risk(sorted: &[f64], initial_price: f64, confidence: f64) -> TailRisk {
    let threshold = quantile_sorted(sorted, 1.0 - confidence);
    let tail_len = sorted.partition_point(|&s| s <= threshold).max(1);
    let tail_mean = sorted[..tail_len].iter().mean();

    TailRisk {
        confidence,
        threshold,
        var: (initial_price - threshold).max(0.0),
        cvar: (initial_price - tail_mean).max(0.0),
    }
}

#[inline]
pub fn value_at_risk(sorted: &[f64], initial_price: f64, confidence: f64) -> f64 {
    tail_risk(sorted, initial_price, confidence).var
}

#[inline]
pub fn conditional_var(sorted: &[f64], initial_price: f64, confidence: f64) -> f64 {
    tail_risk(sorted, initial_price, confidence).cvar
}

/// Everything the engine reports about a terminal distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSummary {
    pub mean_price: f64,
    pub std_error: f64,
    pub at_95: TailRisk,
    pub at_99: TailRisk,
    /// Ascending.
    pub sorted: Vec<f64>,
}

/// Sort and summarize a terminal distribution. No randomness re-enters here.
pub fn summarize(mut terminal: Vec<f64>, initial_price: f64) -> RiskResult<RiskSummary> {
    if terminal.is_empty() {
        return Err(RiskError::AggregationError("empty terminal distribution".into()));
    }
    if let Some(bad) = terminal.iter().find(|s| !s.is_finite()) {
        return Err(RiskError::SimulationFailed(format!(
            "non-finite terminal price {bad}; parameters overflow f64"
        )));
    }

    terminal.sort_by(f64::total_cmp);

    let n = terminal.len();
    let mean_price = terminal.iter().mean();
    let std_error = if n > 1 {
        terminal.iter().std_dev() / (n as f64).sqrt()
    } else {
        0.0
    };

    let at_95 = tail_risk(&terminal, initial_price, SIM_CONFIDENCE);
    let at_99 = tail_risk(&terminal, initial_price, STRESS_CONFIDENCE);

    Ok(RiskSummary {
        mean_price,
        std_error,
        at_95,
        at_99,
        sorted: terminal,
    })
}
