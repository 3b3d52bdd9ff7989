use super::TRADING_DAYS_PER_YEAR;
use crate::errors::{RiskError, RiskResult};
use crate::state::PriceRow;
use statrs::statistics::Statistics;

/// At least two returns are needed for a sample standard deviation.
pub const MIN_CLOSES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MarketEstimate {
    pub volatility: f64,
    pub drift: f64,
    pub last_close: f64,
    pub observations: usize,
}

/// Historical estimator for the GBM inputs.
///
/// r_i   = ln(C_i / C_{i-1})            daily log return
/// sigma = std(r) * sqrt(252)           sample std dev, annualized
/// mu    = mean(r) * 252 + sigma^2 / 2  arithmetic drift recovered from log drift
///
/// Pure function over an ordered close series.
pub fn estimate_from_closes(closes: &[f64]) -> RiskResult<MarketEstimate> {
    if closes.len() < MIN_CLOSES {
        return Err(RiskError::DataUnavailable(format!(
            "need at least {MIN_CLOSES} closes to calibrate, have {}",
            closes.len()
        )));
    }
    if let Some(bad) = closes.iter().find(|c| !(c.is_finite() && **c > 0.0)) {
        return Err(RiskError::DataUnavailable(format!("invalid close price {bad}")));
    }

    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();

    let daily_mean = returns.iter().mean();
    let daily_std = returns.iter().std_dev();

    let volatility = daily_std * TRADING_DAYS_PER_YEAR.sqrt();
    let drift = daily_mean * TRADING_DAYS_PER_YEAR + 0.5 * volatility * volatility;

    Ok(MarketEstimate {
        volatility,
        drift,
        last_close: closes[closes.len() - 1],
        observations: returns.len(),
    })
}

/// Rows must already be ordered by date (the store returns them that way).
pub fn estimate_from_rows(rows: &[PriceRow]) -> RiskResult<MarketEstimate> {
    let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
    estimate_from_closes(&closes)
}
