//! Geometric Brownian motion path generator.
//!
//! S_{t+1} = S_t * exp((mu - sigma^2/2) * dt + sigma * sqrt(dt) * Z),  Z ~ N(0, 1)
//!
//! with dt = 1/252. One ChaCha8 stream per batch, seeded from the batch spec,
//! so a batch is a pure function of its inputs and can run on any worker.

use super::TRADING_DAYS_PER_YEAR;
use crate::execution::partition::BatchSpec;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

/// Per-request inputs shared by every batch. Stack-allocated, Copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GbmParams {
    pub initial_price: f64,
    pub days: u32,
    pub volatility: f64,
    pub drift: f64,
}

impl GbmParams {
    /// Per-step log drift: (mu - sigma^2/2) * dt
    #[inline]
    fn step_drift(&self) -> f64 {
        let dt = 1.0 / TRADING_DAYS_PER_YEAR;
        (self.drift - 0.5 * self.volatility * self.volatility) * dt
    }

    /// Per-step diffusion scale: sigma * sqrt(dt)
    #[inline]
    fn step_diffusion(&self) -> f64 {
        let dt = 1.0 / TRADING_DAYS_PER_YEAR;
        self.volatility * dt.sqrt()
    }
}

/// Output of one batch. `terminal` is in generation order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    pub index: usize,
    pub terminal: Vec<f64>,
    /// Full trajectories (len = days + 1 each), only when requested.
    pub paths: Option<Vec<Vec<f64>>>,
}

/// Simulate one batch. Pure: same (params, spec, keep_paths) -> same output, bit for bit.
pub fn generate_batch(params: &GbmParams, spec: &BatchSpec, keep_paths: bool) -> BatchOutput {
    let mut rng = ChaCha8Rng::seed_from_u64(spec.seed);
    let drift = params.step_drift();
    let diffusion = params.step_diffusion();
    let steps = params.days as usize;

    let mut terminal = Vec::with_capacity(spec.size);
    let mut paths = keep_paths.then(|| Vec::with_capacity(spec.size));

    for _ in 0..spec.size {
        let mut price = params.initial_price;
        let mut trajectory = paths.as_ref().map(|_| {
            let mut t = Vec::with_capacity(steps + 1);
            t.push(price);
            t
        });

        for _ in 0..steps {
            let z: f64 = StandardNormal.sample(&mut rng);
            price *= (drift + diffusion * z).exp();
            if let Some(t) = trajectory.as_mut() {
                t.push(price);
            }
        }

        terminal.push(price);
        if let (Some(all), Some(t)) = (paths.as_mut(), trajectory) {
            all.push(t);
        }
    }

    BatchOutput {
        index: spec.index,
        terminal,
        paths,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GbmParams {
        GbmParams {
            initial_price: 100.0,
            days: 10,
            volatility: 0.2,
            drift: 0.05,
        }
    }

    fn spec(seed: u64, size: usize) -> BatchSpec {
        BatchSpec { index: 0, size, seed }
    }

    #[test]
    fn test_same_seed_bit_identical() {
        let a = generate_batch(&params(), &spec(42, 200), false);
        let b = generate_batch(&params(), &spec(42, 200), false);
        assert_eq!(a, b);
        let c = generate_batch(&params(), &spec(43, 200), false);
        assert_ne!(a.terminal, c.terminal);
    }

    #[test]
    fn test_zero_vol_is_deterministic_growth() {
        let p = GbmParams { volatility: 0.0, ..params() };
        let out = generate_batch(&p, &spec(1, 5), false);
        let expected = 100.0 * (0.05 * 10.0 / 252.0_f64).exp();
        for s in out.terminal {
            assert!((s - expected).abs() < 1e-9, "terminal {s} != {expected}");
        }
    }

    #[test]
    fn test_paths_shape_and_terminal_agree() {
        let out = generate_batch(&params(), &spec(9, 7), true);
        let paths = out.paths.expect("paths requested");
        assert_eq!(paths.len(), 7);
        for (row, &last) in paths.iter().zip(out.terminal.iter()) {
            assert_eq!(row.len(), 11);
            assert_eq!(row[0], 100.0);
            assert_eq!(*row.last().unwrap(), last);
        }
    }

    #[test]
    fn test_prices_stay_positive() {
        let p = GbmParams { volatility: 1.5, drift: -0.5, days: 252, ..params() };
        let out = generate_batch(&p, &spec(3, 100), false);
        assert!(out.terminal.iter().all(|&s| s > 0.0 && s.is_finite()));
    }
}
