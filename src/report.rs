//! Run timing and derived throughput metrics.
//!
//! Throughput is computed from *attempted* round trips: every worker
//! contributes the configured round-trip count whether it completed or
//! not. Confirmed round trips are reported next to it, never instead of it.

use crate::worker::WorkerOutcome;
use chrono::{DateTime, Local};
use std::fmt;
use std::time::{Duration, Instant};

/// Start and end of the spawn-to-join window.
#[derive(Debug, Clone)]
pub struct TimingRecord {
    started_at: DateTime<Local>,
    start: Instant,
    end: Option<Instant>,
}

impl TimingRecord {
    /// Capture the start of the run.
    pub fn start() -> Self {
        Self {
            started_at: Local::now(),
            start: Instant::now(),
            end: None,
        }
    }

    /// Capture the end of the run. Only the first call has an effect.
    pub fn finish(&mut self) {
        if self.end.is_none() {
            self.end = Some(Instant::now());
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Time between start and finish, or until now if not yet finished.
    pub fn elapsed(&self) -> Duration {
        self.end
            .unwrap_or_else(Instant::now)
            .duration_since(self.start)
    }
}

/// Aggregate figures printed at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub workers: usize,
    pub elapsed: Duration,
    /// Attempted messages per connection (the configured round-trip count).
    pub messages_per_connection: usize,
    pub per_connection_rate: f64,
    /// Attempted messages across all connections.
    pub total_messages: usize,
    pub total_rate: f64,
    /// Round trips that actually received a response.
    pub confirmed_messages: usize,
    pub completed_workers: usize,
}

impl Metrics {
    pub fn compute(round_trips: usize, outcomes: &[WorkerOutcome], elapsed: Duration) -> Self {
        let workers = outcomes.len();
        let total_messages = round_trips * workers;
        let secs = elapsed.as_secs_f64();

        Metrics {
            workers,
            elapsed,
            messages_per_connection: round_trips,
            per_connection_rate: rate(round_trips, secs),
            total_messages,
            total_rate: rate(total_messages, secs),
            confirmed_messages: outcomes.iter().map(|o| o.completed).sum(),
            completed_workers: outcomes.iter().filter(|o| o.is_success()).count(),
        }
    }

    pub fn failed_workers(&self) -> usize {
        self.workers - self.completed_workers
    }
}

fn rate(messages: usize, secs: f64) -> f64 {
    if secs > 0.0 {
        messages as f64 / secs
    } else {
        0.0
    }
}

/// Everything the coordinator learned from one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub cancelled: bool,
    pub metrics: Metrics,
    pub outcomes: Vec<WorkerOutcome>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metrics;
        writeln!(f, "--- Aggregate ---")?;
        writeln!(f, "Run started:                      {}", self.started_at.to_rfc3339())?;
        writeln!(f, "Connections:                      {}", m.workers)?;
        writeln!(f, "Elapsed:                          {:.6} s", m.elapsed.as_secs_f64())?;
        writeln!(f, "Messages per connection:          {}", m.messages_per_connection)?;
        writeln!(f, "Avg messages/sec per connection:  {:.2}", m.per_connection_rate)?;
        writeln!(f, "Total messages:                   {}", m.total_messages)?;
        writeln!(f, "Total avg messages/sec:           {:.2}", m.total_rate)?;
        write!(
            f,
            "Confirmed round trips:            {} ({} of {} connections completed)",
            m.confirmed_messages, m.completed_workers, m.workers
        )?;
        if self.cancelled {
            write!(f, "\nRun was cancelled before all round trips finished")?;
        }
        Ok(())
    }
}
