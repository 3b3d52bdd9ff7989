use super::partition::BatchSpec;
use crate::errors::{RiskError, RiskResult};
use crate::models::gbm::{self, BatchOutput, GbmParams};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Everything a worker needs to run one batch. Copy, no shared state.
#[derive(Debug, Clone, Copy)]
pub struct BatchJob {
    pub params: GbmParams,
    pub spec: BatchSpec,
    pub keep_paths: bool,
}

pub type BatchFuture = BoxFuture<'static, RiskResult<BatchOutput>>;

/// Execution substrate for batches.
/// `submit` is lazy: no work starts until the returned future is polled, so
/// dropping it cancels a batch that has not started yet.
pub trait WorkerPool: Send + Sync {
    fn submit(&self, job: BatchJob) -> BatchFuture;

    /// Max batches in flight. Informational only; never affects the partition.
    fn concurrency(&self) -> usize;
}

/// Barrier over submitted batches. Results come back in submission order;
/// the first error wins and the remaining futures are dropped.
pub async fn await_all(futures: Vec<BatchFuture>) -> RiskResult<Vec<BatchOutput>> {
    futures_util::future::try_join_all(futures).await
}

/// Runs batches on tokio's blocking thread pool, at most `concurrency` at once.
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    concurrency: usize,
    batch_timeout: Duration,
}

impl BlockingPool {
    pub fn new(concurrency: usize, batch_timeout: Duration) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            batch_timeout,
        }
    }
}

impl WorkerPool for BlockingPool {
    fn submit(&self, job: BatchJob) -> BatchFuture {
        let permits = self.permits.clone();
        let batch_timeout = self.batch_timeout;

        Box::pin(async move {
            let index = job.spec.index;
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| RiskError::SimulationFailed("worker pool closed".into()))?;

            // The permit moves into the worker so it is released when the batch
            // actually finishes, even if we stop waiting for it.
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                gbm::generate_batch(&job.params, &job.spec, job.keep_paths)
            });

            match tokio::time::timeout(batch_timeout, handle).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(RiskError::SimulationFailed(format!(
                    "batch {index} worker failed: {e}"
                ))),
                Err(_) => Err(RiskError::SimulationFailed(format!(
                    "batch {index} timed out after {}ms",
                    batch_timeout.as_millis()
                ))),
            }
        })
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }
}
