use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::route_not_found;
use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, channels, messages, servers, ws};

/// Builds the full HTTP surface. Auth runs as a route layer so unmatched
/// paths still reach the 404 fallback instead of answering 401.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/healthz", get(healthz));

    let protected_routes = Router::new()
        .route("/api/me", get(auth::me))
        .route("/api/servers", post(servers::create_server).get(servers::list_servers))
        .route("/api/servers/{server_id}/join", post(servers::join_server))
        .route("/api/channels", post(channels::create_channel).get(channels::list_channels))
        .route("/api/channels/{channel_id}/messages", get(messages::get_messages))
        .route("/api/ws", get(ws::ws_upgrade))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(route_not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
