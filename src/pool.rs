//! Per-application worker pools
//!
//! One pool of exactly `pool_size` workers per application, created lazily on
//! the first request for that application. Worker lists are immutable
//! snapshots swapped atomically behind a read-mostly lock, so a dispatch
//! probing a snapshot never races healing installing a new one.

use crate::application::Application;
use crate::pipeline::Pipeline;
use crate::worker::Worker;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Immutable view of one application's workers.
pub type WorkerSnapshot = Arc<Vec<Arc<Worker>>>;

pub struct WorkerPool {
    pipeline: Pipeline,
    pool_size: usize,
    pools: RwLock<HashMap<String, WorkerSnapshot>>,
}

impl WorkerPool {
    pub fn new(pipeline: Pipeline, pool_size: usize) -> Self {
        Self {
            pipeline,
            pool_size,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Return the application's worker list, creating it on first use and
    /// replacing any worker whose loop has terminated. Always returns
    /// exactly `pool_size` workers.
    pub async fn workers_for(&self, app: &Arc<Application>) -> WorkerSnapshot {
        // Fast path: an existing snapshot with every worker still alive.
        {
            let pools = self.pools.read().await;
            if let Some(snapshot) = pools.get(app.name()) {
                if !snapshot.iter().any(|w| w.is_finished()) {
                    return snapshot.clone();
                }
            }
        }

        let mut pools = self.pools.write().await;
        match pools.entry(app.name().to_string()) {
            Entry::Occupied(mut entry) => {
                // Re-check under the write lock; a concurrent healer may
                // have already swapped in a fresh snapshot.
                if !entry.get().iter().any(|w| w.is_finished()) {
                    return entry.get().clone();
                }
                let healed: Vec<Arc<Worker>> = entry
                    .get()
                    .iter()
                    .enumerate()
                    .map(|(index, worker)| {
                        if worker.is_finished() {
                            warn!(
                                app = %app.name(),
                                worker = index,
                                "replacing terminated worker"
                            );
                            worker.reap();
                            Worker::spawn(index, app.clone(), self.pipeline.clone())
                        } else {
                            worker.clone()
                        }
                    })
                    .collect();
                let snapshot: WorkerSnapshot = Arc::new(healed);
                entry.insert(snapshot.clone());
                snapshot
            }
            Entry::Vacant(entry) => {
                let workers: Vec<Arc<Worker>> = (0..self.pool_size)
                    .map(|index| Worker::spawn(index, app.clone(), self.pipeline.clone()))
                    .collect();
                info!(app = %app.name(), workers = self.pool_size, "worker pool created");
                entry.insert(Arc::new(workers)).clone()
            }
        }
    }
}
