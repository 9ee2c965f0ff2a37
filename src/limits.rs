//! File descriptor limit handling.

use std::io;

/// Descriptors held per worker: the connection and its cancellation handle.
pub const FDS_PER_WORKER: u64 = 2;

/// Descriptors kept free for stdio, the runtime and the logger.
const RESERVED_FDS: u64 = 64;

/// Descriptors needed to run `workers` connections at once.
pub fn required_fds(workers: usize) -> u64 {
    (workers as u64)
        .saturating_mul(FDS_PER_WORKER)
        .saturating_add(RESERVED_FDS)
}

/// Raise the soft `RLIMIT_NOFILE` to at least `wanted`, capped at the hard limit.
///
/// Returns the soft limit in effect afterwards.
pub fn raise_fd_limit(wanted: u64) -> io::Result<u64> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    // SAFETY: `limit` is a valid, writable rlimit struct.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let current = limit.rlim_cur as u64;
    if current >= wanted {
        return Ok(current);
    }

    let hard = limit.rlim_max as u64;
    let target = wanted.min(hard);
    if target <= current {
        return Ok(current);
    }

    limit.rlim_cur = target as libc::rlim_t;
    // SAFETY: `limit` is a valid rlimit struct with cur <= max.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(target)
}
