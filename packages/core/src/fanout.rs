//! Per-sensor fan-out.
//!
//! One job is spawned per sensor on a [`JoinSet`]; the call returns only
//! after every job has settled. A failing or panicking job is logged with
//! the sensor id and never affects its siblings. When a concurrency limit
//! is configured, jobs queue on a shared [`Semaphore`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::AppError;
use crate::types::Sensor;

#[derive(Clone, Default)]
pub struct Fanout {
    semaphore: Option<Arc<Semaphore>>,
}

/// Outcome counts for one fan-out round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl Fanout {
    /// `None` (or `Some(0)`) launches every job at once.
    pub fn new(concurrency: Option<usize>) -> Self {
        Self {
            semaphore: concurrency
                .filter(|limit| *limit > 0)
                .map(|limit| Arc::new(Semaphore::new(limit))),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Run `job` once per sensor and wait for all of them.
    pub async fn run<F, Fut>(&self, task: &str, sensors: Vec<Sensor>, job: F) -> FanoutSummary
    where
        F: Fn(Sensor) -> Fut,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let mut in_flight = JoinSet::new();

        for sensor in sensors {
            let sensor_id = sensor.id.clone();
            let semaphore = self.semaphore.clone();
            let fut = job(sensor);

            in_flight.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                (sensor_id, fut.await)
            });
        }

        let mut summary = FanoutSummary::default();
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((_, Ok(()))) => summary.succeeded += 1,
                Ok((sensor_id, Err(err))) => {
                    summary.failed += 1;
                    tracing::warn!(task, sensor = %sensor_id, "Sensor poll failed: {}", err);
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(task, "Sensor poll task aborted: {}", err);
                }
            }
        }

        summary
    }
}
