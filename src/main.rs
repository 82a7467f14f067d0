//! caret-echo: a marker-framed TCP echo server
//!
//! Every client receives a `*` on connect. Bytes sent between `^` and `$`
//! come back incremented by one; everything else is ignored.
//!
//! Features:
//! - One task per connection, echoing byte by byte
//! - Graceful shutdown on SIGINT/SIGTERM that waits for open connections
//! - Optional drain timeout
//! - Configuration via CLI arguments or TOML file

use caret_echo::config::Config;
use caret_echo::lifecycle::Phase;
use caret_echo::server::{self, DrainOutcome, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let workers = config.worker_threads();
    info!(
        listen = %config.listen,
        workers,
        drain_timeout = ?config.drain_timeout,
        phase = %Phase::Starting,
        "Starting caret-echo server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let server = Server::bind(&config)?;
        match server.run_until(server::termination_request()).await {
            DrainOutcome::Drained => {}
            DrainOutcome::TimedOut { remaining } => {
                info!(remaining, "Exiting with connections still open");
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
