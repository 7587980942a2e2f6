pub mod error;
mod handlers;
mod ws;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::manager::SessionManager;
use crate::shutdown::ShutdownCoordinator;

use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    pub fn new(manager: SessionManager) -> Self {
        Self {
            manager,
            shutdown: ShutdownCoordinator::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/sessions", get(session_list).post(session_spawn))
        .route("/sessions/shell", post(session_spawn_shell))
        .route(
            "/sessions/{id}",
            get(session_get).patch(session_rename).delete(session_kill),
        )
        .route("/sessions/{id}/scrollback", get(session_scrollback))
        .route("/sessions/{id}/input", post(session_input))
        .route("/sessions/{id}/resize", post(session_resize));

    Router::new()
        .route("/health", get(health))
        .merge(session_routes)
        .route("/ws", get(ws::ws_bridge))
        .route("/ws/events", get(ws::ws_events))
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
