//! Harness coordinator.
//!
//! Fans out one worker thread per requested connection against a single
//! endpoint, waits for every worker to terminate and turns the elapsed
//! wall-clock time into throughput figures.

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::limits;
use crate::report::{Metrics, RunReport, TimingRecord};
use crate::worker::{Worker, WorkerOutcome, WorkerSettings, WorkerStatus};
use std::fmt;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Coordinator-level failures. Worker failures never show up here.
#[derive(Debug)]
pub enum HarnessError {
    /// The OS refused to create a worker thread.
    Spawn { worker: usize, source: io::Error },
    /// The deadline watchdog thread could not be created.
    Watchdog(io::Error),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::Spawn { worker, source } => {
                write!(f, "Failed to spawn worker {worker}: {source}")
            }
            HarnessError::Watchdog(e) => write!(f, "Failed to spawn deadline watchdog: {e}"),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HarnessError::Spawn { source, .. } => Some(source),
            HarnessError::Watchdog(e) => Some(e),
        }
    }
}

/// Load generation run against one endpoint.
pub struct Harness {
    endpoint: Arc<Endpoint>,
    workers: usize,
    settings: Arc<WorkerSettings>,
    deadline: Option<Duration>,
    cancel: CancelToken,
}

impl Harness {
    pub fn new(config: &Config) -> Self {
        Harness {
            endpoint: Arc::new(Endpoint::new(&config.endpoint)),
            workers: config.workers,
            settings: Arc::new(WorkerSettings {
                round_trips: config.round_trips,
                // A connect cannot be interrupted by cancel(), so the deadline bounds it.
                connect_timeout: config.io_timeout.or(config.deadline),
                io_timeout: config.io_timeout,
                response_buffer: config.response_buffer,
            }),
            deadline: config.deadline,
            cancel: CancelToken::new(),
        }
    }

    /// Token that stops every in-flight worker of this harness when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Spawn all workers, wait for them and compute the run's metrics.
    pub fn run(&self) -> Result<RunReport, HarnessError> {
        self.run_with(spawn_thread)
    }

    /// Like [`Harness::run`], with `spawn` starting each worker.
    pub fn run_with<F>(&self, mut spawn: F) -> Result<RunReport, HarnessError>
    where
        F: FnMut(Worker) -> io::Result<JoinHandle<WorkerOutcome>>,
    {
        ensure_fd_limit(self.workers);

        info!(
            endpoint = %self.endpoint,
            workers = self.workers,
            round_trips = self.settings.round_trips,
            io_timeout_ms = self.settings.io_timeout.map(|t| t.as_millis() as u64),
            deadline_secs = self.deadline.map(|d| d.as_secs_f64()),
            "Starting load generation"
        );

        let watchdog = match self.deadline {
            Some(deadline) => Some(
                Watchdog::spawn(deadline, self.cancel.clone()).map_err(HarnessError::Watchdog)?,
            ),
            None => None,
        };

        let mut timing = TimingRecord::start();
        // Grows as workers start; the count alone may exceed what can be allocated.
        let mut handles = Vec::new();

        for worker_id in 0..self.workers {
            let worker = Worker::new(
                worker_id,
                Arc::clone(&self.endpoint),
                Arc::clone(&self.settings),
                self.cancel.clone(),
            );

            match spawn(worker) {
                Ok(handle) => handles.push((worker_id, handle)),
                Err(e) => {
                    error!(worker = worker_id, error = %e, "Failed to spawn worker");
                    // Abort the run, but release what is already connected.
                    self.cancel.cancel();
                    join_all(handles);
                    if let Some(watchdog) = watchdog {
                        watchdog.stop();
                    }
                    return Err(HarnessError::Spawn {
                        worker: worker_id,
                        source: e,
                    });
                }
            }
        }

        debug!(workers = handles.len(), "All workers spawned");

        let outcomes = join_all(handles);
        timing.finish();

        if let Some(watchdog) = watchdog {
            watchdog.stop();
        }

        let metrics = Metrics::compute(self.settings.round_trips, &outcomes, timing.elapsed());
        info!(
            completed = metrics.completed_workers,
            failed = metrics.failed_workers(),
            elapsed_ms = metrics.elapsed.as_millis() as u64,
            "All workers finished"
        );

        Ok(RunReport {
            started_at: timing.started_at(),
            cancelled: self.cancel.is_cancelled(),
            metrics,
            outcomes,
        })
    }
}

/// Start a worker on its own named OS thread.
pub fn spawn_thread(worker: Worker) -> io::Result<JoinHandle<WorkerOutcome>> {
    thread::Builder::new()
        .name(format!("worker-{}", worker.id))
        .spawn(move || worker.run())
}

/// Wait for every worker, in spawn order.
fn join_all(handles: Vec<(usize, JoinHandle<WorkerOutcome>)>) -> Vec<WorkerOutcome> {
    handles
        .into_iter()
        .map(|(worker, handle)| {
            handle.join().unwrap_or_else(|_| {
                error!(worker, "Worker panicked");
                WorkerOutcome {
                    worker,
                    completed: 0,
                    status: WorkerStatus::Panicked,
                }
            })
        })
        .collect()
}

fn ensure_fd_limit(workers: usize) {
    let wanted = limits::required_fds(workers);
    match limits::raise_fd_limit(wanted) {
        Ok(limit) if limit < wanted => {
            warn!(
                limit,
                wanted, "File descriptor limit too low; some connections may fail"
            );
        }
        Ok(limit) => debug!(limit, "File descriptor limit"),
        Err(e) => warn!(error = %e, "Could not adjust file descriptor limit"),
    }
}

/// Cancels the run once the deadline passes, unless stopped first.
struct Watchdog {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    fn spawn(deadline: Duration, cancel: CancelToken) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("deadline".to_string())
            .spawn(move || {
                // Any message or a dropped sender means the run is over.
                if let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(deadline) {
                    warn!(
                        deadline_secs = deadline.as_secs_f64(),
                        "Deadline reached, cancelling workers"
                    );
                    cancel.cancel();
                }
            })?;

        Ok(Self { stop, handle })
    }

    fn stop(self) {
        drop(self.stop);
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_RESPONSE_BUFFER, DEFAULT_ROUND_TRIPS};
    use crate::test_support::{socket_path, Behavior, TestService};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(endpoint: &Path, workers: usize) -> Config {
        Config {
            endpoint: endpoint.to_path_buf(),
            workers,
            round_trips: DEFAULT_ROUND_TRIPS,
            io_timeout: Some(Duration::from_secs(10)),
            deadline: None,
            response_buffer: DEFAULT_RESPONSE_BUFFER,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_echo_service_three_workers() {
        let service = TestService::start("harness-echo", Behavior::Echo);
        let report = Harness::new(&config(&service.path, 3)).run().unwrap();

        let ids: Vec<_> = report.outcomes.iter().map(|o| o.worker).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(report.outcomes.iter().all(|o| o.is_success() && o.completed == 99));

        let metrics = &report.metrics;
        assert_eq!(metrics.workers, 3);
        assert_eq!(metrics.messages_per_connection, 99);
        assert_eq!(metrics.total_messages, 297);
        assert_eq!(metrics.confirmed_messages, 297);
        assert!(metrics.per_connection_rate > 0.0);
        assert!(metrics.total_rate > 0.0);
        assert!(!report.cancelled);
        assert_eq!(service.accepted(), 3);
    }

    #[test]
    fn test_missing_endpoint_still_reports() {
        let path = socket_path("harness-missing");
        let report = Harness::new(&config(&path, 5)).run().unwrap();

        assert_eq!(report.outcomes.len(), 5);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o.status, WorkerStatus::ConnectFailed(_)) && o.completed == 0));

        // Attempted totals are fixed regardless of outcome
        assert_eq!(report.metrics.total_messages, 495);
        assert_eq!(report.metrics.confirmed_messages, 0);
        assert_eq!(report.metrics.completed_workers, 0);
    }

    #[test]
    fn test_failures_are_isolated() {
        let service = TestService::start("harness-close", Behavior::CloseAfter(10));
        let mut cfg = config(&service.path, 4);
        cfg.round_trips = 5;

        // Every worker finishes before the service hangs up
        let report = Harness::new(&cfg).run().unwrap();
        assert!(report.outcomes.iter().all(|o| o.is_success()));

        cfg.round_trips = 20;
        let report = Harness::new(&cfg).run().unwrap();
        assert_eq!(report.outcomes.len(), 4);
        for outcome in &report.outcomes {
            assert_eq!(outcome.completed, 10);
            assert!(!outcome.is_success());
        }
        assert_eq!(report.metrics.total_messages, 80);
        assert_eq!(report.metrics.confirmed_messages, 40);
    }

    #[test]
    fn test_io_timeout_fails_silent_service() {
        let service = TestService::start("harness-silent", Behavior::Silent);
        let mut cfg = config(&service.path, 2);
        cfg.io_timeout = Some(Duration::from_millis(100));

        let report = Harness::new(&cfg).run().unwrap();
        for outcome in &report.outcomes {
            assert!(matches!(
                outcome.status,
                WorkerStatus::ReceiveFailed { iteration: 0, .. }
            ));
        }
        assert!(!report.cancelled);
    }

    #[test]
    fn test_deadline_cancels_blocked_workers() {
        let service = TestService::start("harness-deadline", Behavior::Silent);
        let mut cfg = config(&service.path, 3);
        cfg.io_timeout = None;
        cfg.deadline = Some(Duration::from_millis(200));

        let report = Harness::new(&cfg).run().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.outcomes.len(), 3);
        for outcome in &report.outcomes {
            assert_eq!(outcome.status, WorkerStatus::Cancelled { iteration: 0 });
        }
        assert_eq!(report.metrics.total_messages, 297);
        assert!(report.metrics.elapsed >= Duration::from_millis(200));
    }

    #[test]
    fn test_external_cancel() {
        let service = TestService::start("harness-cancel", Behavior::Silent);
        let mut cfg = config(&service.path, 2);
        cfg.io_timeout = None;

        let harness = Harness::new(&cfg);
        let token = harness.cancel_token();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            token.cancel();
        });

        let report = harness.run().unwrap();
        canceller.join().unwrap();
        assert!(report.cancelled);
        assert!(report.outcomes.iter().all(|o| o.completed == 0));
    }

    #[test]
    fn test_spawn_failure_aborts_run() {
        let service = TestService::start("harness-spawn", Behavior::Silent);
        // Far more workers than could ever be preallocated
        let harness = Harness::new(&config(&service.path, usize::MAX));
        let started = AtomicUsize::new(0);
        let finished = Arc::new(AtomicUsize::new(0));

        let result = harness.run_with(|worker| {
            if worker.id == 3 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "thread limit reached"));
            }
            started.fetch_add(1, Ordering::SeqCst);
            let finished = Arc::clone(&finished);
            thread::Builder::new().spawn(move || {
                let outcome = worker.run();
                finished.fetch_add(1, Ordering::SeqCst);
                outcome
            })
        });

        match result {
            Err(HarnessError::Spawn { worker, source }) => {
                assert_eq!(worker, 3);
                assert_eq!(source.kind(), io::ErrorKind::WouldBlock);
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.outcomes)),
        }

        // Started workers were cancelled and joined before returning
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        let token = harness.cancel_token();
        assert!(token.is_cancelled());
        assert_eq!(token.registered(), 0);
    }

    #[test]
    fn test_deadline_bounds_connect() {
        let mut cfg = config(Path::new("/tmp/unused.sock"), 1);
        cfg.io_timeout = None;
        cfg.deadline = Some(Duration::from_secs(3));
        let harness = Harness::new(&cfg);
        assert_eq!(harness.settings.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(harness.settings.io_timeout, None);

        cfg.io_timeout = Some(Duration::from_millis(500));
        let harness = Harness::new(&cfg);
        assert_eq!(harness.settings.connect_timeout, Some(Duration::from_millis(500)));

        cfg.io_timeout = None;
        cfg.deadline = None;
        let harness = Harness::new(&cfg);
        assert_eq!(harness.settings.connect_timeout, None);
    }

    #[test]
    fn test_error_display() {
        let err = HarnessError::Spawn {
            worker: 12,
            source: io::Error::new(io::ErrorKind::OutOfMemory, "no threads left"),
        };
        assert_eq!(err.to_string(), "Failed to spawn worker 12: no threads left");
        assert!(std::error::Error::source(&err).is_some());
    }
}
