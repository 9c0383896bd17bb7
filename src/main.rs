//! echo-server: A line-oriented TCP echo server
//!
//! Accepts connections on an IPv4 port and writes every line a client
//! sends back to it, one task per connection.
//!
//! Features:
//! - Lines echoed in chunks of up to 1023 bytes, in order, per connection
//! - Optional verbose logging of received data to stdout
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocols;
mod server;

use config::Config;
use server::Server;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration; bad arguments exit inside clap
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; stdout is reserved for the console output
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        port = config.port,
        verbose = config.verbose,
        "Starting echo server"
    );

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Build the Tokio runtime and serve until the process is killed.
fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::bind(config.listen_addr(), config.verbose)?;
        server.run().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
