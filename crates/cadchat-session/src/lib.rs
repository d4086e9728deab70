//! # cadchat Session Registry
//!
//! Keeps one conversation per session id and guarantees that at most one
//! turn runs against it at a time.
//!
//! - `SessionRegistry` hands out a `TurnGuard` per id; concurrent requests
//!   for the same id queue on it
//! - `SessionStore` persists session records; `JsonFileStore` survives
//!   restarts, `MemoryStore` does not
//! - A record found mid-turn after a restart is brought back to
//!   `AwaitingUserInput` with its pending calls marked unresolved

pub mod error;
pub mod file_store;
pub mod memory_store;
pub mod registry;
pub mod store;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use file_store::JsonFileStore;
pub use memory_store::MemoryStore;
pub use registry::{SessionRegistry, TurnGuard};
pub use store::SessionStore;
pub use types::{validate_session_id, Session};
