//! Crossweb Host - Entry Point
//!
//! Reads invoke frames from stdin and writes resolve/event frames to stdout,
//! one JSON object per line.

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crossweb_bridge::{create_shared_state, stdio};
use crossweb_core::storage::default_data_dir;

/// Initialize logging
fn init_logging() {
    // Log to stderr (stdout carries protocol frames)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Crossweb host starting...");

    let data_dir = default_data_dir();
    info!("Using data directory: {}", data_dir.display());

    // Development only: skip the user-presence prompt
    let insecure_no_auth = std::env::var("CROSSWEB_INSECURE_NO_AUTH")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if insecure_no_auth {
        warn!("User-presence checks disabled via CROSSWEB_INSECURE_NO_AUTH");
    }

    let (state, outbound) = match create_shared_state(data_dir, insecure_no_auth).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to initialize host state: {}", e);
            return Err(e.into());
        }
    };

    let writer = stdio::spawn_writer(outbound, tokio::io::stdout());

    if let Err(e) = state.start().await {
        error!("Failed to start plugins: {}", e);
        return Err(e.into());
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    stdio::serve(&state, stdin).await?;

    state.shutdown().await;

    // Let in-flight handlers finish delivering before exiting
    let grace = state.config().bridge.invoke_timeout();
    drop(state);
    match tokio::time::timeout(grace, writer).await {
        Ok(Ok(Err(e))) => warn!("writer stopped with error: {}", e),
        Err(_) => warn!("in-flight invocations abandoned at shutdown"),
        _ => {}
    }

    info!("Crossweb host shutting down");
    Ok(())
}
