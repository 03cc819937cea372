//! API route definitions.

use axum::{
    Router, middleware,
    routing::{any, get},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;

use super::handlers;
use super::state::AppState;

/// Build the application router.
///
/// `/health` is public; the viewer status endpoint and every `/proxy-*` path
/// require a session.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let auth_state = state.auth.clone();

    let public_routes = Router::new().route("/health", get(handlers::health));

    let protected_routes = Router::new()
        .route(
            "/viewer_instances/{viewer_instance_uuid}",
            get(handlers::get_viewer_instance),
        )
        .route("/{proxy_id}", any(handlers::proxy_request))
        .route("/{proxy_id}/{*path}", any(handlers::proxy_request))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(trace_layer)
}
