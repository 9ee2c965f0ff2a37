//! uds-relay: interactive line relay to a Unix domain socket service.

use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};
use uds_loadgen::config::RelayArgs;
use uds_loadgen::endpoint::Endpoint;
use uds_loadgen::logging;
use uds_loadgen::relay::{self, RelayEnd};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = RelayArgs::parse();
    logging::init_stderr(&args.log_level);

    let endpoint = Endpoint::new(&args.endpoint);
    let stream = relay::connect(&endpoint).await?;
    info!(endpoint = %endpoint, "Connected");

    let stdin = BufReader::new(tokio::io::stdin());
    let stats = relay::relay(stdin, stream, tokio::io::stdout(), args.response_buffer).await?;

    match stats.end {
        RelayEnd::InputClosed => info!(exchanges = stats.exchanges, "Input closed"),
        RelayEnd::PeerClosed => {
            warn!(exchanges = stats.exchanges, "Connection closed by peer")
        }
    }

    Ok(())
}
