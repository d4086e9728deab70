//! # Storage Traits

use async_trait::async_trait;

use crate::error::SessionResult;
use crate::types::Session;

/// Durable home of session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, `None` if it was never saved
    async fn load(&self, session_id: &str) -> SessionResult<Option<Session>>;

    /// Save a session (full replace)
    async fn save(&self, session: &Session) -> SessionResult<()>;

    async fn delete(&self, session_id: &str) -> SessionResult<()>;

    async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        Ok(self.load(session_id).await?.is_some())
    }
}
