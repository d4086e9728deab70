//! # JSON File Store
//!
//! One pretty-printed JSON document per session:
//!
//! ```text
//! <base_path>/
//! ├── <session_id>.json
//! └── ...
//! ```
//!
//! Writes go to `<session_id>.json.tmp` first and are renamed into place, so a
//! crash mid-write leaves the previous record intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::store::SessionStore;
use crate::types::{validate_session_id, Session};

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    base_path: PathBuf,
}

impl JsonFileStore {
    /// Open the store, creating the directory if needed
    pub async fn new(base_path: impl Into<PathBuf>) -> SessionResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        debug!("Session store at {}", base_path.display());
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn session_file_path(&self, session_id: &str) -> SessionResult<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.base_path.join(format!("{}.json", session_id)))
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn load(&self, session_id: &str) -> SessionResult<Option<Session>> {
        let path = self.session_file_path(session_id)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let session: Session =
            serde_json::from_str(&content).map_err(|e| SessionError::Corrupt {
                id: session_id.to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> SessionResult<()> {
        let path = self.session_file_path(&session.id)?;
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(session)?;

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &path).await?;
        debug!(session_id = %session.id, messages = session.messages.len(), "saved session");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> SessionResult<()> {
        let path = self.session_file_path(session_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, session_id: &str) -> SessionResult<bool> {
        let path = self.session_file_path(session_id)?;
        Ok(fs::try_exists(&path).await?)
    }
}
