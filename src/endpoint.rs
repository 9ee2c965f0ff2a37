//! Unix domain socket endpoint shared read-only by all workers.

use socket2::{Domain, SockAddr, Socket, Type};
use std::fmt;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filesystem path of the socket under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new blocking stream connection.
    ///
    /// `connect_timeout` bounds the connect itself; `io_timeout` is applied
    /// to every subsequent read and write on the stream.
    pub fn connect(
        &self,
        connect_timeout: Option<Duration>,
        io_timeout: Option<Duration>,
    ) -> io::Result<UnixStream> {
        let stream = match connect_timeout {
            None => UnixStream::connect(&self.path)?,
            Some(timeout) => {
                let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
                let addr = SockAddr::unix(&self.path)?;
                socket.connect_timeout(&addr, timeout)?;
                socket.into()
            }
        };

        if io_timeout.is_some() {
            stream.set_read_timeout(io_timeout)?;
            stream.set_write_timeout(io_timeout)?;
        }
        Ok(stream)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
