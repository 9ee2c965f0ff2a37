//! Configuration module for uds-loadgen.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of request/response exchanges per connection.
pub const DEFAULT_ROUND_TRIPS: usize = 99;

/// Default size of the per-connection response buffer.
pub const DEFAULT_RESPONSE_BUFFER: usize = 1024;

/// Command-line arguments for the load generator
#[derive(Parser, Debug)]
#[command(name = "uds-loadgen")]
#[command(author = "uds-loadgen authors")]
#[command(version = "0.1.0")]
#[command(
    about = "Open many concurrent connections to a Unix domain socket and measure throughput",
    long_about = None
)]
pub struct CliArgs {
    /// Path of the Unix domain socket to connect to
    pub endpoint: PathBuf,

    /// Number of concurrent connections (one worker each)
    pub workers: NonZeroUsize,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Request/response exchanges per connection
    #[arg(short = 'n', long)]
    pub round_trips: Option<usize>,

    /// Timeout for connect, send and receive in milliseconds (default: wait forever)
    #[arg(short = 't', long)]
    pub io_timeout_ms: Option<u64>,

    /// Cancel all in-flight workers after this many seconds
    #[arg(short = 'd', long)]
    pub deadline_secs: Option<u64>,

    /// Maximum bytes read per response
    #[arg(long)]
    pub response_buffer: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the interactive relay
#[derive(Parser, Debug)]
#[command(name = "uds-relay")]
#[command(author = "uds-loadgen authors")]
#[command(version = "0.1.0")]
#[command(
    about = "Pipe standard input to a Unix domain socket and print the responses",
    long_about = None
)]
pub struct RelayArgs {
    /// Path of the Unix domain socket to connect to
    pub endpoint: PathBuf,

    /// Maximum bytes read per response
    #[arg(long, default_value_t = DEFAULT_RESPONSE_BUFFER)]
    pub response_buffer: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub harness: HarnessConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Load-generation settings
#[derive(Debug, Deserialize)]
pub struct HarnessConfig {
    /// Request/response exchanges per connection
    #[serde(default = "default_round_trips")]
    pub round_trips: usize,
    /// Per-operation timeout in milliseconds
    pub io_timeout_ms: Option<u64>,
    /// Whole-run deadline in seconds
    pub deadline_secs: Option<u64>,
    /// Maximum bytes read per response
    #[serde(default = "default_response_buffer")]
    pub response_buffer: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            round_trips: default_round_trips(),
            io_timeout_ms: None,
            deadline_secs: None,
            response_buffer: default_response_buffer(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_round_trips() -> usize {
    DEFAULT_ROUND_TRIPS
}

fn default_response_buffer() -> usize {
    DEFAULT_RESPONSE_BUFFER
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: PathBuf,
    pub workers: usize,
    pub round_trips: usize,
    pub io_timeout: Option<Duration>,
    pub deadline: Option<Duration>,
    pub response_buffer: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve already-parsed CLI arguments against the optional TOML file.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        if cli.endpoint.as_os_str().is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let round_trips = cli.round_trips.unwrap_or(toml_config.harness.round_trips);
        if round_trips == 0 {
            return Err(ConfigError::Invalid("round_trips must be at least 1"));
        }

        let response_buffer = cli
            .response_buffer
            .unwrap_or(toml_config.harness.response_buffer);
        if response_buffer == 0 {
            return Err(ConfigError::Invalid("response_buffer must be at least 1 byte"));
        }

        // A zero timeout would be rejected by the socket layer; treat it as unset.
        let io_timeout = cli
            .io_timeout_ms
            .or(toml_config.harness.io_timeout_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Config {
            endpoint: cli.endpoint,
            workers: cli.workers.get(),
            round_trips,
            io_timeout,
            deadline: cli
                .deadline_secs
                .or(toml_config.harness.deadline_secs)
                .map(Duration::from_secs),
            response_buffer,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    EmptyEndpoint,
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::EmptyEndpoint => write!(f, "Endpoint path must not be empty"),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
