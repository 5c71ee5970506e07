//! Router construction.

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws::audio_ws;

#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(audio_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
