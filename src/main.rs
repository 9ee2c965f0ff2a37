//! uds-loadgen: concurrent load generator for a Unix domain socket service.

use tracing::{info, warn};
use uds_loadgen::cancel;
use uds_loadgen::config::Config;
use uds_loadgen::harness::Harness;
use uds_loadgen::logging;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    logging::init(&config.log_level);

    info!(
        endpoint = %config.endpoint.display(),
        workers = config.workers,
        round_trips = config.round_trips,
        "Starting uds-loadgen"
    );

    let harness = Harness::new(&config);
    if let Err(e) = cancel::cancel_on_ctrl_c(harness.cancel_token()) {
        warn!(error = %e, "Ctrl-C will not cancel the run");
    }

    let report = harness.run()?;
    println!("{report}");

    Ok(())
}
