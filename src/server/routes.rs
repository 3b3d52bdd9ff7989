use crate::errors::RiskError;
use crate::state::{AppState, SimulationRequest, SimulationResult, StressRequest, StressResult};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::NaiveDate;
use std::sync::Arc;

#[derive(serde::Deserialize)]
pub struct IngestRequest {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Engine error on the wire. Caller errors are 400, collaborator outages
/// 502, everything else 500.
pub struct ApiError(RiskError);

impl From<RiskError> for ApiError {
    fn from(e: RiskError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(e: &RiskError) -> StatusCode {
    match e {
        RiskError::InvalidParameter { .. } | RiskError::InvalidScenario(_) => StatusCode::BAD_REQUEST,
        RiskError::DataUnavailable(_) | RiskError::Network(_) => StatusCode::BAD_GATEWAY,
        RiskError::SimulationFailed(_)
        | RiskError::AggregationError(_)
        | RiskError::Parse(_)
        | RiskError::Database(_)
        | RiskError::Cache(_)
        | RiskError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = Json(serde_json::json!({
            "error": self.0.to_string(),
            "caller_error": self.0.is_caller_error(),
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}

/// POST /api/simulate
pub async fn simulate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SimulationRequest>,
) -> Result<Json<SimulationResult>, ApiError> {
    let request_id = uuid::Uuid::new_v4();
    tracing::info!(%request_id, ticker = %req.ticker, paths = req.paths, days = req.days, "simulate request");

    let result = state.engine.simulate(req).await.map_err(|e| {
        tracing::warn!(%request_id, error = %e, "simulate failed");
        ApiError(e)
    })?;
    Ok(Json(result))
}

/// POST /api/stress-test
pub async fn stress_test(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StressRequest>,
) -> Result<Json<StressResult>, ApiError> {
    let request_id = uuid::Uuid::new_v4();
    tracing::info!(
        %request_id,
        ticker = %req.ticker,
        scenario = %req.scenario_type,
        shock = req.shock_value,
        "stress request"
    );

    let result = state.engine.stress_test(req).await.map_err(|e| {
        tracing::warn!(%request_id, error = %e, "stress test failed");
        ApiError(e)
    })?;
    Ok(Json(result))
}

/// POST /api/ingest
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request_id = uuid::Uuid::new_v4();
    tracing::info!(%request_id, tickers = ?req.tickers, start = %req.start, end = %req.end, "ingest request");

    let rows_written = state.engine.ingest(&req.tickers, req.start, req.end).await?;
    Ok(Json(serde_json::json!({
        "tickers": req.tickers,
        "rows_written": rows_written,
    })))
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let cfg = state.engine.config();
    Json(serde_json::json!({
        "status": "ok",
        "workers": cfg.worker_concurrency,
        "cache_enabled": cfg.cache_enabled,
        "data_dir": state.config.data_dir.display().to_string(),
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /api/counters -- lock-free reads
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.engine.counters().snapshot())
}

pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/api/simulate", axum::routing::post(simulate))
        .route("/api/stress-test", axum::routing::post(stress_test))
        .route("/api/ingest", axum::routing::post(ingest))
        .route("/api/health", axum::routing::get(health))
        .route("/api/counters", axum::routing::get(get_counters))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
