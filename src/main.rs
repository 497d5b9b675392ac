//! quipd server binary: accepts clients and answers them with the
//! keyword responder; typing `stop` on the console shuts everything
//! down gracefully.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use quipd::config::Config;
use quipd::responder::KeywordResponder;
use quipd::server::Server;

/// Console command that terminates the server.
const STOP_COMMAND: &str = "stop";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        "Starting quipd server"
    );

    let server = Server::bind(&config.host, config.port, Arc::new(KeywordResponder::new())).await?;
    let handle = server.start();

    info!("Type \"{STOP_COMMAND}\" for server work termination");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case(STOP_COMMAND) {
            break;
        }
    }

    handle.stop_and_join().await;
    Ok(())
}
