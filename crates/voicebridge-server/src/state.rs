//! Shared application state for the Axum adapter.

use std::sync::Arc;

use voicebridge_core::SessionStore;

use crate::config::ServerConfig;

pub struct ServerContext {
    pub sessions: SessionStore,
    pub config: ServerConfig,
}

pub type AppState = Arc<ServerContext>;
