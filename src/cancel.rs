//! Run-wide cancellation shared by every worker.
//!
//! Workers poll the flag between round trips. A worker blocked inside a
//! read or write cannot poll, so each worker also registers a duplicate of
//! its stream; `cancel()` shuts those down, which makes the blocked call
//! return immediately with an error or EOF.

use std::collections::HashMap;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    streams: Mutex<HashMap<usize, UnixStream>>,
}

/// Cloneable handle to the shared cancellation state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `cancel()` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancel the run and interrupt every registered connection.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let streams = self.streams();
        debug!(connections = streams.len(), "Cancelling in-flight workers");
        for stream in streams.values() {
            // The owning worker may already be tearing the connection down.
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Register a worker's connection so `cancel()` can interrupt it.
    ///
    /// Returns `false` when the run is already cancelled; the stream is then
    /// shut down right away and the caller should stop.
    pub fn register(&self, worker: usize, stream: &UnixStream) -> std::io::Result<bool> {
        let handle = stream.try_clone()?;
        let mut streams = self.streams();
        // Checked under the lock so a concurrent cancel() cannot miss this stream.
        if self.is_cancelled() {
            let _ = handle.shutdown(Shutdown::Both);
            return Ok(false);
        }
        streams.insert(worker, handle);
        Ok(true)
    }

    /// Drop the registration of a worker's connection.
    pub fn deregister(&self, worker: usize) {
        self.streams().remove(&worker);
    }

    /// Number of currently registered connections.
    pub fn registered(&self) -> usize {
        self.streams().len()
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<usize, UnixStream>> {
        // A panicking worker cannot leave the map inconsistent.
        self.inner
            .streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cancel `token` when the process receives Ctrl-C.
///
/// Runs a single-threaded async runtime on its own thread; the thread lives
/// until the signal arrives or the process exits.
pub fn cancel_on_ctrl_c(token: CancelToken) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        warn!("Interrupted, cancelling workers");
                        token.cancel();
                    }
                    Err(e) => debug!(error = %e, "Ctrl-C handler unavailable"),
                }
            });
        })?;

    Ok(())
}
