//! Console client for the quipd chat server.

use clap::Parser;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use quipd::client;

/// Command-line arguments for the console client
#[derive(Parser, Debug)]
#[command(name = "quipd-client")]
#[command(version = "0.1.0")]
#[command(about = "Console client for the quipd chat server", long_about = None)]
struct CliArgs {
    /// Server host name or address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    client::run_session(
        stream,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    Ok(())
}
