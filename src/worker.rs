//! Persistent workers and the request handoff protocol
//!
//! Each worker is one long-lived tokio task bound to a single application.
//! The handoff is channel-shaped rather than lock-shaped: the dispatcher
//! reserves the worker with a state compare-exchange, sends the exchange on
//! a depth-1 channel, and awaits a oneshot completion under a timeout. Every
//! path (success, timeout, panic) releases its resources by dropping them;
//! there is no manual unlock to forget.

use crate::application::Application;
use crate::exchange::Exchange;
use crate::pipeline::Pipeline;
use http::StatusCode;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const WAITING: u8 = 0;
const HANDLING: u8 = 1;
const FINISHED: u8 = 2;

/// One unit of work: the exchange plus the channel completion is published on.
struct Job {
    exchange: Exchange,
    done_tx: oneshot::Sender<Exchange>,
}

/// Why a handoff did not produce a result. Internal to the dispatch loop;
/// the dispatcher lowers these into its public error taxonomy.
pub(crate) enum Handoff {
    /// Lost the reservation race; the exchange comes back for the next probe.
    Busy(Exchange),
    /// The worker task is gone; the exchange comes back for the next probe.
    Gone(Exchange),
    /// The worker accepted the job but died before publishing.
    Lost,
    /// The worker did not publish within the bound. The exchange stays with
    /// the worker; its late result is abandoned.
    Timeout,
}

/// A persistent execution unit, identified by pool index + application name.
pub struct Worker {
    index: usize,
    app: Arc<Application>,
    state: Arc<AtomicU8>,
    job_tx: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn a worker task and return its handle. The pipeline and the
    /// application reference are injected here; the loop reads no ambient
    /// state.
    pub fn spawn(index: usize, app: Arc<Application>, pipeline: Pipeline) -> Arc<Self> {
        let state = Arc::new(AtomicU8::new(WAITING));
        let (job_tx, job_rx) = mpsc::channel(1);
        let handle = tokio::spawn(worker_loop(
            index,
            app.clone(),
            pipeline,
            state.clone(),
            job_rx,
        ));
        Arc::new(Self {
            index,
            app,
            state,
            job_tx,
            handle,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// True only while the worker is parked with no request assigned.
    pub fn is_waiting(&self) -> bool {
        self.state.load(Ordering::SeqCst) == WAITING
    }

    /// True once the worker's loop has terminated, for any reason.
    pub fn is_finished(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FINISHED || self.handle.is_finished()
    }

    /// Release whatever remains of a terminated worker's task.
    pub fn reap(&self) {
        debug!(app = %self.app.name(), worker = self.index, "reaping terminated worker");
        self.handle.abort();
    }

    /// Hand a request to this worker and wait for its published result.
    ///
    /// The compare-exchange is the single-owner guarantee: of any number of
    /// concurrent dispatches, exactly one moves the worker `Waiting ->
    /// Handling` and gets to send. On timeout the exchange is abandoned to
    /// the worker, which stays `Handling` (unselectable) until it finishes
    /// and discovers nobody is listening.
    pub(crate) async fn handle_request(
        &self,
        exchange: Exchange,
        timeout: Duration,
    ) -> Result<Exchange, Handoff> {
        if self
            .state
            .compare_exchange(WAITING, HANDLING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Handoff::Busy(exchange));
        }

        let (done_tx, done_rx) = oneshot::channel();
        if let Err(err) = self.job_tx.try_send(Job { exchange, done_tx }) {
            return Err(match err {
                TrySendError::Closed(job) => {
                    // The task is dead; make that visible to the pool now
                    // rather than on its next scan.
                    self.state.store(FINISHED, Ordering::SeqCst);
                    Handoff::Gone(job.exchange)
                }
                // Capacity 1 and we hold the reservation, so a full channel
                // means the state machine was violated. Treat as busy.
                TrySendError::Full(job) => Handoff::Busy(job.exchange),
            });
        }

        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(done)) => Ok(done),
            Ok(Err(_)) => Err(Handoff::Lost),
            Err(_) => Err(Handoff::Timeout),
        }
    }
}

/// Marks the worker `Finished` when its task terminates, normally or by
/// panic. Healing is the pool's job; this only makes the death observable.
struct FinishGuard {
    index: usize,
    app: String,
    state: Arc<AtomicU8>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.state.store(FINISHED, Ordering::SeqCst);
        debug!(app = %self.app, worker = self.index, "worker loop terminated");
    }
}

async fn worker_loop(
    index: usize,
    app: Arc<Application>,
    pipeline: Pipeline,
    state: Arc<AtomicU8>,
    mut job_rx: mpsc::Receiver<Job>,
) {
    let _finish = FinishGuard {
        index,
        app: app.name().to_string(),
        state: state.clone(),
    };

    while let Some(Job {
        mut exchange,
        done_tx,
    }) = job_rx.recv().await
    {
        // The pipeline is synchronous; a panicking valve unwinds here. The
        // exchange is exclusively ours, so observing it mid-unwind is fine.
        match panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(&mut exchange))) {
            Ok(Ok(())) => {}
            Ok(Err(valve_err)) => {
                // Recoverable: this request gets a 500, the worker lives on.
                error!(
                    app = %app.name(),
                    worker = index,
                    id = %exchange.request.id,
                    error = %valve_err,
                    "pipeline stage failed"
                );
                exchange.response.status = StatusCode::INTERNAL_SERVER_ERROR;
                exchange.response.append_body(format!("\n{valve_err}").as_bytes());
            }
            Err(cause) => {
                // Fatal: publish a best-effort 500, then let the panic take
                // the task down so the pool replaces this worker.
                error!(
                    app = %app.name(),
                    worker = index,
                    id = %exchange.request.id,
                    "worker hit an unrecoverable error, terminating"
                );
                exchange.response.status = StatusCode::INTERNAL_SERVER_ERROR;
                exchange
                    .response
                    .append_body(b"\nworker terminated while handling this request");
                let _ = done_tx.send(exchange);
                panic::resume_unwind(cause);
            }
        }

        if done_tx.send(exchange).is_err() {
            // The dispatcher timed out and abandoned this request.
            warn!(
                app = %app.name(),
                worker = index,
                "discarding late result for an abandoned request"
            );
        }
        state.store(WAITING, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ServerRequest;
    use crate::pipeline::{Valve, ValveError};
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    fn app() -> Arc<Application> {
        let app = Application::new("test");
        app.set_connected(true);
        Arc::new(app)
    }

    fn exchange(path: &str) -> Exchange {
        Exchange::new(ServerRequest::new(
            Method::GET,
            path.to_string(),
            HeaderMap::new(),
            Bytes::new(),
        ))
    }

    struct AppendValve(&'static str);

    impl Valve for AppendValve {
        fn name(&self) -> &str {
            self.0
        }

        fn invoke(&self, exchange: &mut Exchange) -> Result<(), ValveError> {
            exchange.response.append_body(self.0.as_bytes());
            Ok(())
        }
    }

    /// Fails for /fail, panics for /boom, blocks while the gate is closed.
    struct TrapValve {
        gate_open: Arc<AtomicBool>,
    }

    impl Valve for TrapValve {
        fn name(&self) -> &str {
            "trap"
        }

        fn invoke(&self, exchange: &mut Exchange) -> Result<(), ValveError> {
            match exchange.request.path.as_str() {
                "/fail" => Err(ValveError::new("trap", "synthetic failure")),
                "/boom" => panic!("synthetic fatal error"),
                "/hold" => {
                    while !self.gate_open.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    fn trap_pipeline() -> (Pipeline, Arc<AtomicBool>) {
        let gate = Arc::new(AtomicBool::new(false));
        let pipeline = Pipeline::new(vec![
            Box::new(TrapValve {
                gate_open: gate.clone(),
            }),
            Box::new(AppendValve("done")),
        ]);
        (pipeline, gate)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn handoff_returns_after_full_pipeline_ran() {
        let pipeline = Pipeline::new(vec![Box::new(AppendValve("a")), Box::new(AppendValve("b"))]);
        let worker = Worker::spawn(0, app(), pipeline);

        let done = worker
            .handle_request(exchange("/ok"), Duration::from_secs(1))
            .await
            .map_err(|_| "handoff failed")
            .unwrap();
        assert_eq!(done.response.body(), b"ab");

        // Published result implies the worker is selectable again shortly.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(worker.is_waiting());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reserved_worker_reports_busy() {
        let (pipeline, gate) = trap_pipeline();
        let worker = Worker::spawn(0, app(), pipeline);

        let held = worker.clone();
        let first = tokio::spawn(async move {
            held.handle_request(exchange("/hold"), Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!worker.is_waiting());

        match worker
            .handle_request(exchange("/ok"), Duration::from_secs(1))
            .await
        {
            Err(Handoff::Busy(ex)) => assert_eq!(ex.request.path, "/ok"),
            _ => panic!("expected busy"),
        }

        gate.store(true, Ordering::SeqCst);
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_pipeline_times_out_within_the_bound() {
        let (pipeline, gate) = trap_pipeline();
        let worker = Worker::spawn(0, app(), pipeline);

        let started = Instant::now();
        let result = worker
            .handle_request(exchange("/hold"), Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(Handoff::Timeout)));
        // Bounded by the handoff timeout, not by how long the stage blocks.
        assert!(started.elapsed() < Duration::from_millis(200));

        // The worker is still handling the abandoned request.
        assert!(!worker.is_waiting());
        assert!(!worker.is_finished());

        // Once released it discards the stale result and serves again.
        gate.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(worker.is_waiting());
        let done = worker
            .handle_request(exchange("/ok"), Duration::from_secs(1))
            .await
            .map_err(|_| "handoff failed")
            .unwrap();
        assert_eq!(done.response.body(), b"done");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stage_failure_is_recovered_and_isolated() {
        let (pipeline, _gate) = trap_pipeline();
        let worker = Worker::spawn(0, app(), pipeline);

        let failed = worker
            .handle_request(exchange("/fail"), Duration::from_secs(1))
            .await
            .map_err(|_| "handoff failed")
            .unwrap();
        assert_eq!(failed.response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8_lossy(failed.response.body()).to_string();
        assert!(body.contains("synthetic failure"));

        // Next request on the same worker is processed normally.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let ok = worker
            .handle_request(exchange("/ok"), Duration::from_secs(1))
            .await
            .map_err(|_| "handoff failed")
            .unwrap();
        assert_eq!(ok.response.status, StatusCode::OK);
        assert_eq!(ok.response.body(), b"done");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_publishes_500_and_finishes_the_worker() {
        let (pipeline, _gate) = trap_pipeline();
        let worker = Worker::spawn(0, app(), pipeline);

        let done = worker
            .handle_request(exchange("/boom"), Duration::from_secs(1))
            .await
            .map_err(|_| "handoff failed")
            .unwrap();
        assert_eq!(done.response.status, StatusCode::INTERNAL_SERVER_ERROR);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(worker.is_finished());

        // A finished worker never accepts another handoff.
        match worker
            .handle_request(exchange("/ok"), Duration::from_secs(1))
            .await
        {
            Err(Handoff::Busy(_)) | Err(Handoff::Gone(_)) => {}
            _ => panic!("finished worker accepted a request"),
        }
    }
}
