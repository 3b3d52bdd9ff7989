use super::normalize::StressParams;
use crate::errors::RiskResult;
use crate::models::calibration::MarketEstimate;
use crate::state::{ScenarioKind, SimulationRequest, SimulationResult, StressOutcome, StressResult};
use futures_util::future::BoxFuture;

/// What a scenario needs from the engine: the simulation pipeline and a
/// historical estimate for inputs the request left out.
pub trait ScenarioContext: Send + Sync {
    fn simulate(&self, req: SimulationRequest) -> BoxFuture<'_, RiskResult<SimulationResult>>;

    fn market_estimate<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, RiskResult<MarketEstimate>>;
}

/// Horizon and path count used when a volatility shock does not specify them.
#[derive(Debug, Clone, Copy)]
pub struct StressDefaults {
    pub days: i64,
    pub paths: i64,
}

/// new_price = S0 * (1 - shock). Pure; no simulation.
#[inline]
pub fn price_shock(initial_price: f64, shock_value: f64) -> StressOutcome {
    let new_price = initial_price * (1.0 - shock_value);
    StressOutcome::PriceShock {
        new_price,
        estimated_loss: initial_price - new_price,
    }
}

/// Exhaustive dispatch over scenario kinds.
pub async fn run_scenario(
    ctx: &dyn ScenarioContext,
    params: &StressParams,
    defaults: StressDefaults,
) -> RiskResult<StressResult> {
    let outcome = match params.scenario {
        ScenarioKind::PriceShock => price_shock(params.initial_price, params.shock_value),
        ScenarioKind::VolatilityShock => volatility_shock(ctx, params, defaults).await?,
    };

    tracing::info!(
        ticker = %params.ticker,
        scenario = %params.scenario,
        shock = params.shock_value,
        "stress scenario complete"
    );

    Ok(StressResult {
        ticker: params.ticker.clone(),
        scenario: params.scenario,
        shock_value: params.shock_value,
        initial_price: params.initial_price,
        outcome,
    })
}

/// Baseline and shocked runs at sigma and sigma * (1 + shock). Both share the
/// stress seed (common random numbers), so the VaR gap comes from the shock
/// alone and not from sampling noise.
async fn volatility_shock(
    ctx: &dyn ScenarioContext,
    params: &StressParams,
    defaults: StressDefaults,
) -> RiskResult<StressOutcome> {
    let (volatility, drift) = match (params.volatility, params.drift) {
        (Some(v), Some(d)) => (v, d),
        (v, d) => {
            let est = ctx.market_estimate(&params.ticker).await?;
            (v.unwrap_or(est.volatility), d.unwrap_or(est.drift))
        }
    };
    let shocked_volatility = volatility * (1.0 + params.shock_value);

    let baseline_req = SimulationRequest {
        ticker: params.ticker.clone(),
        initial_price: params.initial_price,
        days: params.days.unwrap_or(defaults.days),
        volatility,
        drift,
        paths: params.paths.unwrap_or(defaults.paths),
        seed: Some(params.seed),
        include_paths: false,
    };
    let shocked_req = SimulationRequest {
        volatility: shocked_volatility,
        ..baseline_req.clone()
    };

    let (baseline, shocked) =
        futures_util::future::try_join(ctx.simulate(baseline_req), ctx.simulate(shocked_req)).await?;

    Ok(StressOutcome::VolatilityShock {
        baseline_volatility: volatility,
        shocked_volatility,
        normal_var_99: baseline.var_99,
        new_var_99: shocked.var_99,
        baseline_mean_price: baseline.mean_price,
        shocked_mean_price: shocked.mean_price,
    })
}
