//! cadchat-server - HTTP surface of the conversational CAD assistant
//!
//! - `POST /api/v1/sessions/:session_id/chat` streams a turn as SSE frames
//! - `POST /api/v1/sessions/:session_id/cancel` cancels the running turn
//! - `GET /api/v1/sessions/:session_id` returns the persisted session
//! - `POST /api/v1/models` exposes the local conversion pipeline
//! - `GET /health`

pub mod error;
pub mod handlers;
pub mod logging;
pub mod server;
pub mod state;

pub use error::{ApiError, ErrorResponse, StartupError};
pub use logging::init_logging;
pub use server::{create_router, run_server};
pub use state::AppState;
