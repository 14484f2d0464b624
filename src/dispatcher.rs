//! The dispatch entry point and worker selection
//!
//! One call per inbound request, after the surrounding container has
//! resolved the application. Selection is pluggable; the default is uniform
//! random, which needs no shared cursor between concurrent dispatches at the
//! cost of wasted probes as the pool saturates.

use crate::application::Application;
use crate::config::Config;
use crate::error::DispatchError;
use crate::exchange::{Exchange, ServerResponse};
use crate::pipeline::Pipeline;
use crate::pool::WorkerPool;
use crate::worker::Handoff;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Picks the next worker index to probe.
pub trait SelectionStrategy: Send + Sync {
    fn pick(&self, len: usize) -> usize;
}

/// Uniform random selection. No fairness guarantee and no cross-dispatch
/// shared state.
pub struct RandomSelect;

impl SelectionStrategy for RandomSelect {
    fn pick(&self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// FIFO-ish fairness via a shared atomic cursor.
#[derive(Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl SelectionStrategy for RoundRobin {
    fn pick(&self, len: usize) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % len
    }
}

pub struct Dispatcher {
    pool: WorkerPool,
    strategy: Box<dyn SelectionStrategy>,
    probe_limit: usize,
    handoff_timeout: Duration,
}

impl Dispatcher {
    pub fn new(pipeline: Pipeline, config: &Config) -> Self {
        Self::with_strategy(pipeline, config, Box::new(RandomSelect))
    }

    pub fn with_strategy(
        pipeline: Pipeline,
        config: &Config,
        strategy: Box<dyn SelectionStrategy>,
    ) -> Self {
        Self {
            pool: WorkerPool::new(pipeline, config.pool_size),
            strategy,
            probe_limit: config.dispatch_probes,
            handoff_timeout: Duration::from_millis(config.handoff_timeout_ms),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run one request through the application's pipeline on one of its
    /// workers and return the accumulated response state.
    pub async fn dispatch(
        &self,
        app: &Arc<Application>,
        exchange: Exchange,
    ) -> Result<ServerResponse, DispatchError> {
        if !app.is_connected() {
            return Err(DispatchError::ApplicationNotReady(app.name().to_string()));
        }

        // May spawn the pool on first use or replace dead workers.
        let workers = self.pool.workers_for(app).await;

        let mut exchange = exchange;
        for probe in 0..self.probe_limit {
            let index = self.strategy.pick(workers.len());
            let worker = &workers[index];
            if worker.is_waiting() {
                match worker.handle_request(exchange, self.handoff_timeout).await {
                    Ok(done) => {
                        debug!(
                            app = %app.name(),
                            worker = index,
                            probes = probe + 1,
                            "request dispatched"
                        );
                        return Ok(done.response);
                    }
                    // Lost the reservation race, or the worker died before
                    // accepting; keep probing with the exchange we got back.
                    Err(Handoff::Busy(ex)) | Err(Handoff::Gone(ex)) => exchange = ex,
                    Err(Handoff::Timeout) => {
                        return Err(DispatchError::HandoffTimeout {
                            timeout_ms: self.handoff_timeout.as_millis() as u64,
                        })
                    }
                    Err(Handoff::Lost) => return Err(DispatchError::WorkerGone),
                }
            }
            // Yield instead of sleeping: held workers get to run, and the
            // exhaustion bound stays a probe count, not a time window.
            tokio::task::yield_now().await;
        }

        Err(DispatchError::DispatchExhausted {
            probes: self.probe_limit,
        })
    }
}
