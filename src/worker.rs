//! Connection worker: one simulated client driven end-to-end.
//!
//! A worker connects, performs a fixed number of write-then-read round
//! trips and releases its connection. Every failure is local to the worker:
//! it is logged, recorded in the returned [`WorkerOutcome`] and never
//! propagated to the coordinator or to sibling workers.

use crate::cancel::CancelToken;
use crate::endpoint::Endpoint;
use bytes::BytesMut;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Request sent on every round trip.
pub const REQUEST: &[u8] = b"ping\n";

/// Per-worker settings, identical for every worker in a run.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Round trips to attempt before closing the connection.
    pub round_trips: usize,
    /// Bound on the connect. `None` blocks indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Bound on send and receive. `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    /// Maximum bytes read per response.
    pub response_buffer: usize,
}

/// How a worker terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    /// All round trips succeeded.
    Completed,
    /// The connection could not be opened; no round trips were attempted.
    ConnectFailed(String),
    /// Writing the request of round trip `iteration` failed.
    SendFailed { iteration: usize, reason: String },
    /// Reading the response of round trip `iteration` failed or hit EOF.
    ReceiveFailed { iteration: usize, reason: String },
    /// The run was cancelled before round trip `iteration` finished.
    Cancelled { iteration: usize },
    /// The worker thread panicked; its progress is unknown.
    Panicked,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Completed => write!(f, "completed"),
            WorkerStatus::ConnectFailed(reason) => write!(f, "connect failed: {reason}"),
            WorkerStatus::SendFailed { iteration, reason } => {
                write!(f, "send failed at iteration {iteration}: {reason}")
            }
            WorkerStatus::ReceiveFailed { iteration, reason } => {
                write!(f, "receive failed at iteration {iteration}: {reason}")
            }
            WorkerStatus::Cancelled { iteration } => write!(f, "cancelled at iteration {iteration}"),
            WorkerStatus::Panicked => write!(f, "panicked"),
        }
    }
}

/// Result reported back to the coordinator through the join handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub worker: usize,
    /// Round trips that received a response.
    pub completed: usize,
    pub status: WorkerStatus,
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Completed
    }
}

/// Failure of a single round trip.
#[derive(Debug)]
pub enum RoundTripError {
    Send(io::Error),
    Receive(io::Error),
    /// The peer closed the connection instead of responding.
    Closed,
}

impl fmt::Display for RoundTripError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundTripError::Send(e) => write!(f, "send: {e}"),
            RoundTripError::Receive(e) => write!(f, "receive: {e}"),
            RoundTripError::Closed => write!(f, "connection closed by peer"),
        }
    }
}

impl std::error::Error for RoundTripError {}

/// Send one request and wait for its response.
///
/// Returns the number of response bytes read into `response`.
pub fn round_trip<S: Read + Write>(
    stream: &mut S,
    response: &mut [u8],
) -> Result<usize, RoundTripError> {
    stream.write_all(REQUEST).map_err(RoundTripError::Send)?;
    stream.flush().map_err(RoundTripError::Send)?;

    match stream.read(response) {
        Ok(0) => Err(RoundTripError::Closed),
        Ok(n) => Ok(n),
        Err(e) => Err(RoundTripError::Receive(e)),
    }
}

/// Describes one worker before it is spawned.
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: usize,
    endpoint: Arc<Endpoint>,
    settings: Arc<WorkerSettings>,
    cancel: CancelToken,
}

impl Worker {
    pub fn new(
        id: usize,
        endpoint: Arc<Endpoint>,
        settings: Arc<WorkerSettings>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            id,
            endpoint,
            settings,
            cancel,
        }
    }

    /// Run the full connection lifecycle. Never fails; see [`WorkerStatus`].
    pub fn run(self) -> WorkerOutcome {
        let id = self.id;

        if self.cancel.is_cancelled() {
            return self.outcome(0, WorkerStatus::Cancelled { iteration: 0 });
        }

        let connected = self
            .endpoint
            .connect(self.settings.connect_timeout, self.settings.io_timeout);
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                error!(worker = id, endpoint = %self.endpoint, error = %e, "Connect failed");
                return self.outcome(0, WorkerStatus::ConnectFailed(e.to_string()));
            }
        };
        info!(worker = id, "Connected");

        match self.cancel.register(id, &stream) {
            Ok(true) => {}
            Ok(false) => {
                warn!(worker = id, iteration = 0, "Cancelled");
                return self.outcome(0, WorkerStatus::Cancelled { iteration: 0 });
            }
            // Still usable, only not interruptible by cancel().
            Err(e) => debug!(worker = id, error = %e, "Could not register for cancellation"),
        }

        let (completed, status) = drive(&mut stream, id, &self.settings, &self.cancel);

        self.cancel.deregister(id);
        drop(stream);

        match &status {
            WorkerStatus::Completed => info!(worker = id, round_trips = completed, "Finished"),
            WorkerStatus::Cancelled { iteration } => {
                warn!(worker = id, iteration = *iteration, "Cancelled")
            }
            WorkerStatus::SendFailed { iteration, reason } => {
                error!(worker = id, iteration = *iteration, error = %reason, "Send failed")
            }
            WorkerStatus::ReceiveFailed { iteration, reason } => {
                error!(worker = id, iteration = *iteration, error = %reason, "Receive failed")
            }
            WorkerStatus::ConnectFailed(_) | WorkerStatus::Panicked => {}
        }

        self.outcome(completed, status)
    }

    fn outcome(&self, completed: usize, status: WorkerStatus) -> WorkerOutcome {
        WorkerOutcome {
            worker: self.id,
            completed,
            status,
        }
    }
}

/// Perform up to `settings.round_trips` exchanges over an open stream.
///
/// Stops at the first failed exchange. Returns the number of successful
/// round trips and the terminal status.
pub fn drive<S: Read + Write>(
    stream: &mut S,
    worker: usize,
    settings: &WorkerSettings,
    cancel: &CancelToken,
) -> (usize, WorkerStatus) {
    let mut response = BytesMut::zeroed(settings.response_buffer);

    for iteration in 0..settings.round_trips {
        if cancel.is_cancelled() {
            return (iteration, WorkerStatus::Cancelled { iteration });
        }

        match round_trip(stream, &mut response) {
            Ok(n) => {
                trace!(
                    worker,
                    iteration,
                    response = %String::from_utf8_lossy(&response[..n]).trim_end(),
                    "Round trip"
                );
            }
            // Errors caused by our own shutdown are cancellations, not failures.
            Err(_) if cancel.is_cancelled() => {
                return (iteration, WorkerStatus::Cancelled { iteration });
            }
            Err(RoundTripError::Send(e)) => {
                return (
                    iteration,
                    WorkerStatus::SendFailed {
                        iteration,
                        reason: e.to_string(),
                    },
                );
            }
            Err(RoundTripError::Receive(e)) => {
                return (
                    iteration,
                    WorkerStatus::ReceiveFailed {
                        iteration,
                        reason: e.to_string(),
                    },
                );
            }
            Err(RoundTripError::Closed) => {
                return (
                    iteration,
                    WorkerStatus::ReceiveFailed {
                        iteration,
                        reason: RoundTripError::Closed.to_string(),
                    },
                );
            }
        }
    }

    (settings.round_trips, WorkerStatus::Completed)
}
