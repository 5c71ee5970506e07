//! CLI entry point - the composition root.
//!
//! Loads configuration, wires up tracing, and runs the server until
//! ctrl-c or a fatal startup error.

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use voicebridge_server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    let shutdown = CancellationToken::new();

    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    voicebridge_server::start_server(config, shutdown).await
}
