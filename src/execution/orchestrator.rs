use super::aggregate::{self, Distribution};
use super::partition;
use super::pool::{self, BatchFuture, BatchJob, WorkerPool};
use crate::errors::{RiskError, RiskResult};
use crate::models::gbm::GbmParams;
use crate::risk::normalize::SimulationParams;
use crate::state::EngineCounters;
use portable_atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fan-out / fan-in coordinator for one simulation request.
///
/// partition -> submit every batch -> barrier -> aggregate
///
/// A batch error, a batch timeout, or the request timeout fails the whole
/// request with `SimulationFailed`. There is no partial aggregation.
pub struct Orchestrator {
    pool: Arc<dyn WorkerPool>,
    request_timeout: Duration,
    counters: Arc<EngineCounters>,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<dyn WorkerPool>,
        request_timeout: Duration,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            pool,
            request_timeout,
            counters,
        }
    }

    pub async fn run(&self, params: &SimulationParams) -> RiskResult<Distribution> {
        let started = Instant::now();
        let gbm = GbmParams {
            initial_price: params.initial_price,
            days: params.days,
            volatility: params.volatility,
            drift: params.drift,
        };
        let plan = partition::partition(params.paths, params.seed);

        EngineCounters::bump(&self.counters.computations_run);
        tracing::info!(
            ticker = %params.ticker,
            fingerprint = %params.fingerprint,
            paths = params.paths,
            days = params.days,
            batches = plan.len(),
            concurrency = self.pool.concurrency(),
            "dispatching simulation"
        );

        let futures: Vec<BatchFuture> = plan
            .iter()
            .map(|spec| {
                self.pool.submit(BatchJob {
                    params: gbm,
                    spec: *spec,
                    keep_paths: params.include_paths,
                })
            })
            .collect();

        let outputs = match tokio::time::timeout(self.request_timeout, pool::await_all(futures)).await {
            Ok(Ok(outputs)) => outputs,
            Ok(Err(e)) => {
                tracing::error!(fingerprint = %params.fingerprint, error = %e, "batch failed, request aborted");
                return Err(e);
            }
            Err(_) => {
                tracing::error!(
                    fingerprint = %params.fingerprint,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "simulation request timed out"
                );
                return Err(RiskError::SimulationFailed(format!(
                    "request timed out after {}ms",
                    self.request_timeout.as_millis()
                )));
            }
        };

        self.counters
            .batches_run
            .fetch_add(outputs.len() as u64, Ordering::Relaxed);

        let distribution = aggregate::aggregate(&plan, outputs, params.paths)?;

        tracing::info!(
            fingerprint = %params.fingerprint,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "simulation complete"
        );
        Ok(distribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::pool::BlockingPool;
    use crate::models::gbm::BatchOutput;
    use crate::risk::normalize::normalize_simulation;
    use crate::state::SimulationRequest;

    /// Fails one batch index, delegates the rest.
    struct FaultyPool {
        inner: BlockingPool,
        fail_index: usize,
    }

    impl WorkerPool for FaultyPool {
        fn submit(&self, job: BatchJob) -> BatchFuture {
            if job.spec.index == self.fail_index {
                let index = job.spec.index;
                return Box::pin(async move {
                    Err(RiskError::SimulationFailed(format!("batch {index} worker failed")))
                });
            }
            self.inner.submit(job)
        }

        fn concurrency(&self) -> usize {
            self.inner.concurrency()
        }
    }

    /// Never completes batch 0.
    struct StallingPool;

    impl WorkerPool for StallingPool {
        fn submit(&self, job: BatchJob) -> BatchFuture {
            Box::pin(async move {
                if job.spec.index == 0 {
                    std::future::pending::<()>().await;
                }
                Ok(crate::models::gbm::generate_batch(&job.params, &job.spec, false))
            })
        }

        fn concurrency(&self) -> usize {
            1
        }
    }

    /// Returns a short batch to trip the aggregator.
    struct ShortBatchPool;

    impl WorkerPool for ShortBatchPool {
        fn submit(&self, job: BatchJob) -> BatchFuture {
            Box::pin(async move {
                Ok(BatchOutput {
                    index: job.spec.index,
                    terminal: vec![100.0; job.spec.size.saturating_sub(1)],
                    paths: None,
                })
            })
        }

        fn concurrency(&self) -> usize {
            1
        }
    }

    fn params(paths: i64) -> SimulationParams {
        normalize_simulation(&SimulationRequest::new("TEST", 100.0, 20, 0.25, 0.03, paths).with_seed(11))
            .unwrap()
    }

    fn orchestrator(pool: Arc<dyn WorkerPool>, timeout: Duration) -> Orchestrator {
        Orchestrator::new(pool, timeout, Arc::new(EngineCounters::new()))
    }

    #[tokio::test]
    async fn test_distribution_length_matches_paths() {
        let orch = orchestrator(Arc::new(BlockingPool::new(4, Duration::from_secs(30))), Duration::from_secs(60));
        for paths in [1, 999, 2_501] {
            let dist = orch.run(&params(paths)).await.unwrap();
            assert_eq!(dist.terminal.len(), paths as usize);
        }
    }

    #[tokio::test]
    async fn test_identical_across_pool_sizes() {
        let p = params(5_300);
        let one = orchestrator(Arc::new(BlockingPool::new(1, Duration::from_secs(30))), Duration::from_secs(60))
            .run(&p)
            .await
            .unwrap();
        let eight = orchestrator(Arc::new(BlockingPool::new(8, Duration::from_secs(30))), Duration::from_secs(60))
            .run(&p)
            .await
            .unwrap();
        let one_bits: Vec<u64> = one.terminal.iter().map(|x| x.to_bits()).collect();
        let eight_bits: Vec<u64> = eight.terminal.iter().map(|x| x.to_bits()).collect();
        assert_eq!(one_bits, eight_bits);
    }

    #[tokio::test]
    async fn test_failed_batch_fails_request() {
        let pool = FaultyPool {
            inner: BlockingPool::new(2, Duration::from_secs(30)),
            fail_index: 2,
        };
        let counters = Arc::new(EngineCounters::new());
        let orch = Orchestrator::new(Arc::new(pool), Duration::from_secs(60), counters.clone());
        let err = orch.run(&params(4_000)).await.unwrap_err();
        assert!(matches!(err, RiskError::SimulationFailed(_)), "got {err:?}");
        assert_eq!(counters.batches_run.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let orch = orchestrator(Arc::new(StallingPool), Duration::from_millis(50));
        let err = orch.run(&params(2_000)).await.unwrap_err();
        match err {
            RiskError::SimulationFailed(msg) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("expected SimulationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_short_batch_is_aggregation_error() {
        let orch = orchestrator(Arc::new(ShortBatchPool), Duration::from_secs(5));
        let err = orch.run(&params(1_500)).await.unwrap_err();
        assert!(matches!(err, RiskError::AggregationError(_)), "got {err:?}");
    }
}
