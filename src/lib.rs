// Public API for integration tests and potential library usage

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod passages;
pub mod protocol;
pub mod state;
pub mod types;
pub mod typing;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Build the full HTTP/WebSocket router
pub fn app(state: state::AppState) -> Router {
    let mut api_routes = Router::new()
        .route("/api/health", get(api::health))
        .route("/api/races/waiting", get(api::list_waiting_races))
        .route("/api/races/{id}", get(api::get_race));

    if state.config.dev_tokens {
        tracing::info!("Serving POST /api/dev/token");
        api_routes = api_routes.route("/api/dev/token", post(api::issue_dev_token));
    }

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(api_routes)
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
