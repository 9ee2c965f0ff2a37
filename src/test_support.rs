//! Local services used by the unit tests.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

static NEXT_SOCKET: AtomicUsize = AtomicUsize::new(0);

/// Unique socket path under the system temp directory.
pub fn socket_path(name: &str) -> PathBuf {
    let n = NEXT_SOCKET.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("udslg-{}-{n}-{name}.sock", std::process::id()))
}

/// How the test service treats each accepted connection.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Echo every chunk back until the client hangs up.
    Echo,
    /// Echo this many chunks, then close the connection.
    CloseAfter(usize),
    /// Read requests but never answer.
    Silent,
}

/// Counters observed by the test service.
#[derive(Debug, Default)]
pub struct ServiceStats {
    pub accepted: AtomicUsize,
    /// Connections whose client side reached EOF.
    pub client_closed: AtomicUsize,
    pub chunks: AtomicUsize,
}

/// Thread-per-connection echo service bound to a fresh socket path.
pub struct TestService {
    pub path: PathBuf,
    pub stats: Arc<ServiceStats>,
}

impl TestService {
    pub fn start(name: &str, behavior: Behavior) -> Self {
        let path = socket_path(name);
        let listener = UnixListener::bind(&path).unwrap();
        let stats = Arc::new(ServiceStats::default());

        let accept_stats = Arc::clone(&stats);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                accept_stats.accepted.fetch_add(1, Ordering::SeqCst);
                let stats = Arc::clone(&accept_stats);
                thread::spawn(move || serve(stream, behavior, &stats));
            }
        });

        Self { path, stats }
    }

    pub fn accepted(&self) -> usize {
        self.stats.accepted.load(Ordering::SeqCst)
    }

    pub fn client_closed(&self) -> usize {
        self.stats.client_closed.load(Ordering::SeqCst)
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn serve(mut stream: UnixStream, behavior: Behavior, stats: &ServiceStats) {
    let mut buf = [0u8; 1024];
    let mut served = 0;

    loop {
        if let Behavior::CloseAfter(limit) = behavior {
            if served == limit {
                return;
            }
        }

        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => {
                stats.client_closed.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Ok(n) => n,
        };
        stats.chunks.fetch_add(1, Ordering::SeqCst);
        if let Behavior::Silent = behavior {
            continue;
        }

        if stream.write_all(&buf[..n]).is_err() {
            return;
        }
        served += 1;
    }
}
