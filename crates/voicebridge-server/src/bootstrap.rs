//! Server bootstrap — the composition root.
//!
//! This module is the only place infrastructure is wired together: the
//! session store, its inactivity sweeper, and the Axum router.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use voicebridge_core::SessionStore;

use crate::config::ServerConfig;
use crate::state::ServerContext;

/// Bootstrap the server context: session store plus a background sweeper
/// tied to `shutdown`.
pub fn bootstrap(config: ServerConfig, shutdown: CancellationToken) -> Arc<ServerContext> {
    let sessions = SessionStore::new();

    tokio::spawn(
        sessions
            .clone()
            .run_sweeper(config.sweep_interval, config.session_timeout, shutdown),
    );

    Arc::new(ServerContext { sessions, config })
}

/// Start the Axum server on `config.port`.
pub async fn start_server(config: ServerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!(config = %config.debug_summary(), "starting voicebridge server");

    let addr = format!("{}:{}", config.host, config.port);
    let serve_shutdown = shutdown.clone();
    let state = bootstrap(config, shutdown);
    let app = crate::routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("voicebridge server listening on ws://{addr}/ws");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await?;
    Ok(())
}
