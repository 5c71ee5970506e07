//! Axum WebSocket adapter for the realtime voice-to-voice assistant server.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use bootstrap::{bootstrap, start_server};
pub use config::ServerConfig;
pub use state::{AppState, ServerContext};
