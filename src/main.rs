mod cli;
mod client;
mod ipc;
mod server;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            socket,
            callback_timeout_ms,
            history,
        } => {
            let default_history = usize::try_from(history).unwrap_or_else(|_| {
                eprintln!("pasteboardd serve: --history value too large for this platform");
                std::process::exit(1);
            });
            let config = server::registry::ServerConfig {
                callback_timeout: Duration::from_millis(callback_timeout_ms),
                default_history,
            };
            if let Err(e) = server::run(socket, config).await {
                tracing::error!(error = %e, "server failed");
                eprintln!("pasteboardd serve: {e}");
                std::process::exit(1);
            }
        }
        Command::Client { socket, action } => {
            if let Err(e) = client::run(socket, action).await {
                tracing::error!(error = %e, "client failed");
                eprintln!("pasteboardd client: {e}");
                std::process::exit(1);
            }
        }
    }
}
