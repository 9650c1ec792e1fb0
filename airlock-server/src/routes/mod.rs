pub mod v1;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::infra::app_state::AppState;

/// Build the full API router with tracing and CORS applied.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", v1::create_v1_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
