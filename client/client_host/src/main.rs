use std::process;

use ember_client_runtime::{ClientConfig, LoggingBindings};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        eprintln!("ember_client fatal error: {err}");
        process::exit(1);
    }
}

// stdout carries protocol frames, so logs go to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run() -> Result<(), ember_client_runtime::Error> {
    let config = ClientConfig::from_env();
    info!(sid = %config.sid, environment = %config.environment, "starting ember client");

    let session = ember_client_runtime::run(
        config,
        tokio::io::stdin(),
        tokio::io::stdout(),
        LoggingBindings,
    );

    tokio::select! {
        result = session => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; shutting down");
            Ok(())
        }
    }
}
