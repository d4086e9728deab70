//! HTTP server: routes and listener

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{self, chat, models, sessions};
use crate::state::AppState;

/// Build the application router.
///
/// With `cors` set, preflights are answered and any origin is allowed.
pub fn create_router(state: AppState, cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health).fallback(handlers::method_not_allowed))
        .route(
            "/api/v1/sessions/:session_id",
            get(sessions::get_session).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/v1/sessions/:session_id/chat",
            post(chat::chat).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/v1/sessions/:session_id/cancel",
            post(sessions::cancel_turn).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/v1/models",
            post(models::create_model).fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Bind `host:port` and serve until the process is stopped
pub async fn run_server(state: AppState, host: &str, port: u16, cors: bool) -> std::io::Result<()> {
    let app = create_router(state, cors);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{}:{}: {}", host, port, e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await
}
