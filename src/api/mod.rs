//! Axum HTTP handlers.

pub mod ask;
pub mod config;
pub mod search;
pub mod sources;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// All API routes bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sources", get(sources::list_sources).post(sources::add_source))
        .route("/api/sources/{id}", delete(sources::delete_source))
        .route("/api/sources/{id}/reindex", post(sources::reindex_source))
        .route("/api/search", post(search::search))
        .route("/api/ask", post(ask::ask))
        .route("/api/config", get(config::get_config))
        .route("/api/health", get(config::health))
        .with_state(state)
}
