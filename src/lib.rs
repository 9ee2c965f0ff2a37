//! uds-loadgen: load generation for Unix domain socket services
//!
//! Two tools share this library:
//! - `uds-loadgen`: opens many concurrent connections, drives each through
//!   a fixed number of request/response round trips and reports aggregate
//!   throughput
//! - `uds-relay`: pipes standard input to a single connection and prints
//!   the responses
//!
//! Features:
//! - Thread-per-connection workers with isolated failures
//! - Structured per-worker outcomes (attempted vs confirmed round trips)
//! - Optional per-operation timeout and whole-run deadline
//! - Configuration via CLI arguments or TOML file

pub mod cancel;
pub mod config;
pub mod endpoint;
pub mod harness;
pub mod limits;
pub mod logging;
pub mod relay;
pub mod report;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;
