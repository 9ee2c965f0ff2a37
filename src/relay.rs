//! Interactive relay: one connection, one request per input line.
//!
//! Each line read from the input is written to the socket with a trailing
//! newline, then a single response chunk is read back and copied to the
//! output. The session ends when the input reaches EOF or the peer closes
//! the connection.

use crate::endpoint::Endpoint;
use bytes::BytesMut;
use std::fmt;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, trace};

/// Why a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The input reached EOF; the connection was shut down by us.
    InputClosed,
    /// The service closed the connection.
    PeerClosed,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub exchanges: usize,
    pub end: RelayEnd,
}

#[derive(Debug)]
pub enum RelayError {
    Connect(PathBuf, io::Error),
    Input(io::Error),
    Send(io::Error),
    Receive(io::Error),
    Output(io::Error),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Connect(path, e) => {
                write!(f, "Failed to connect to '{}': {}", path.display(), e)
            }
            RelayError::Input(e) => write!(f, "Failed to read input: {e}"),
            RelayError::Send(e) => write!(f, "Failed to send request: {e}"),
            RelayError::Receive(e) => write!(f, "Failed to receive response: {e}"),
            RelayError::Output(e) => write!(f, "Failed to write output: {e}"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Connect(_, e)
            | RelayError::Input(e)
            | RelayError::Send(e)
            | RelayError::Receive(e)
            | RelayError::Output(e) => Some(e),
        }
    }
}

/// Connect to the endpoint with the async runtime's stream type.
pub async fn connect(endpoint: &Endpoint) -> Result<UnixStream, RelayError> {
    UnixStream::connect(endpoint.path())
        .await
        .map_err(|e| RelayError::Connect(endpoint.path().to_path_buf(), e))
}

/// Pipe `input` lines to `stream` and responses to `output` until either side closes.
///
/// Lines are forwarded as raw bytes; a final line without a newline gets one.
pub async fn relay<I, S, O>(
    mut input: I,
    mut stream: S,
    mut output: O,
    response_buffer: usize,
) -> Result<RelayStats, RelayError>
where
    I: AsyncBufRead + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut request = Vec::new();
    let mut response = BytesMut::zeroed(response_buffer.max(1));
    let mut exchanges = 0;

    loop {
        request.clear();
        let read = input
            .read_until(b'\n', &mut request)
            .await
            .map_err(RelayError::Input)?;
        if read == 0 {
            debug!(exchanges, "Input closed");
            // Best effort; the peer may already be gone.
            let _ = stream.shutdown().await;
            return Ok(RelayStats {
                exchanges,
                end: RelayEnd::InputClosed,
            });
        }

        if request.last() != Some(&b'\n') {
            request.push(b'\n');
        }
        stream.write_all(&request).await.map_err(RelayError::Send)?;
        stream.flush().await.map_err(RelayError::Send)?;

        let n = stream
            .read(&mut response)
            .await
            .map_err(RelayError::Receive)?;
        if n == 0 {
            debug!(exchanges, "Connection closed by peer");
            return Ok(RelayStats {
                exchanges,
                end: RelayEnd::PeerClosed,
            });
        }
        trace!(bytes = n, "Response");

        output
            .write_all(&response[..n])
            .await
            .map_err(RelayError::Output)?;
        output.flush().await.map_err(RelayError::Output)?;
        exchanges += 1;
    }
}
