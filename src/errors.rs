/// Domain-specific error types for the risk engine.
/// Caller errors are rejected before any batch is dispatched. System errors
/// propagate with enough detail to tell the two classes apart. Cache backend
/// failures never reach the caller: the gateway logs them and bypasses.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskError {
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("simulation failed: {0}")]
    SimulationFailed(String),

    #[error("aggregation error: {0}")]
    AggregationError(String),

    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("cache backend error: {0}")]
    Cache(String),

    #[error("config error: {0}")]
    Config(String),
}

impl RiskError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        RiskError::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    /// True when the caller can fix the request and resubmit.
    #[inline]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            RiskError::InvalidParameter { .. } | RiskError::InvalidScenario(_)
        )
    }

    /// Batch failures and timeouts replay deterministically, so they are safe to retry.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, RiskError::SimulationFailed(_))
    }
}

impl From<reqwest::Error> for RiskError {
    fn from(e: reqwest::Error) -> Self {
        RiskError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for RiskError {
    fn from(e: serde_json::Error) -> Self {
        RiskError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for RiskError {
    fn from(e: rusqlite::Error) -> Self {
        RiskError::Database(e.to_string())
    }
}

impl From<std::io::Error> for RiskError {
    fn from(e: std::io::Error) -> Self {
        RiskError::Database(e.to_string())
    }
}

pub type RiskResult<T> = Result<T, RiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(RiskError::invalid("paths", "must be >= 1").is_caller_error());
        assert!(RiskError::InvalidScenario("unknown".into()).is_caller_error());
        assert!(!RiskError::SimulationFailed("batch 3 timed out".into()).is_caller_error());
        assert!(RiskError::SimulationFailed("x".into()).is_retryable());
        assert!(!RiskError::AggregationError("x".into()).is_retryable());
    }

    #[test]
    fn test_invalid_parameter_names_field() {
        let e = RiskError::invalid("initial_price", "must be > 0");
        assert_eq!(e.to_string(), "invalid parameter `initial_price`: must be > 0");
    }
}
