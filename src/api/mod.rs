use std::sync::Arc;

use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod connections;

/// Build the admin API router. All routes are relative; the caller
/// mounts this under `/api/v1`. Transport-level authentication is
/// handled by the surrounding backend, not here.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/connections/:provider",
            get(connections::list_connections)
                .put(connections::upsert_connections)
                .post(connections::add_connection),
        )
        .route(
            "/connections/:provider/:index",
            delete(connections::delete_connection),
        )
        .layer(TraceLayer::new_for_http())
}
