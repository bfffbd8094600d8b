pub mod config;
pub mod connections;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod matchmaking;
pub mod persistence;
pub mod rate_limit;
pub mod room_manager;
pub mod state;
pub mod sweeps;
pub mod ws;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;

use config::ServerConfig;
use state::AppState;

pub use sweeps::spawn_sweepers;

/// Build the Axum router and application state from a config, backed by the
/// in-memory game store.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    build_app_with_state(AppState::new(config))
}

/// Build the router around an existing state (e.g. one with a custom store).
pub fn build_app_with_state(state: AppState) -> (Router<()>, AppState) {
    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}
