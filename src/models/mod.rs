pub mod calibration;
pub mod gbm;

/// Trading days per year. Sets both the GBM step (dt = 1/252) and the
/// annualization of historical returns.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
