//! # Session Registry
//!
//! Maps a session id to exactly one in-memory slot. Holding a slot's lock is
//! what it means to run a turn: a second request for the same id waits until
//! the first turn releases its `TurnGuard`. Different ids never contend.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::SessionResult;
use crate::store::SessionStore;
use crate::types::{validate_session_id, Session};

struct Slot {
    session: Session,
    /// Record has been read from the store (or confirmed absent)
    loaded: bool,
    /// Record exists in the store
    persisted: bool,
}

pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            slots: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn slot(&self, session_id: &str) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    session: Session::new(session_id),
                    loaded: false,
                    persisted: false,
                }))
            })
            .value()
            .clone()
    }

    /// Take the session's single turn slot, waiting for any turn in progress.
    ///
    /// The first acquire after a restart loads the stored record; a record
    /// left mid-turn is normalized and saved back before it is handed out.
    pub async fn acquire(&self, session_id: &str) -> SessionResult<TurnGuard> {
        validate_session_id(session_id)?;

        let slot = self.slot(session_id);
        let mut guard = slot.lock_owned().await;

        if !guard.loaded {
            match self.store.load(session_id).await? {
                Some(mut session) => {
                    if session.normalize() {
                        warn!(
                            session_id,
                            unresolved = ?session.unresolved,
                            "session was interrupted mid-turn; normalized"
                        );
                        self.store.save(&session).await?;
                    }
                    debug!(session_id, messages = session.messages.len(), "loaded session");
                    guard.session = session;
                    guard.persisted = true;
                }
                None => {
                    info!(session_id, "new session");
                }
            }
            guard.loaded = true;
        }

        Ok(TurnGuard {
            slot: guard,
            store: Arc::clone(&self.store),
        })
    }

    /// Last persisted state of a session, without waiting for a running turn.
    pub async fn snapshot(&self, session_id: &str) -> SessionResult<Option<Session>> {
        validate_session_id(session_id)?;

        let slot = self.slots.get(session_id).map(|entry| entry.value().clone());
        if let Some(slot) = &slot {
            if let Ok(guard) = slot.try_lock() {
                if guard.loaded {
                    return Ok(guard.persisted.then(|| guard.session.clone()));
                }
            }
        }

        let mut stored = self.store.load(session_id).await?;
        if slot.is_none() {
            if let Some(session) = stored.as_mut() {
                session.normalize();
            }
        }
        Ok(stored)
    }

    /// True while a turn holds the session
    pub fn is_busy(&self, session_id: &str) -> bool {
        self.slots
            .get(session_id)
            .map(|entry| entry.value().try_lock().is_err())
            .unwrap_or(false)
    }

    /// Sessions resident in memory
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Exclusive access to one session for the duration of a turn
pub struct TurnGuard {
    slot: OwnedMutexGuard<Slot>,
    store: Arc<dyn SessionStore>,
}

impl TurnGuard {
    pub fn session(&self) -> &Session {
        &self.slot.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.slot.session
    }

    pub fn session_id(&self) -> &str {
        &self.slot.session.id
    }

    /// Write the session to the store
    pub async fn persist(&mut self) -> SessionResult<()> {
        self.store.save(&self.slot.session).await?;
        self.slot.persisted = true;
        Ok(())
    }
}

impl Deref for TurnGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.slot.session
    }
}

impl DerefMut for TurnGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.slot.session
    }
}

impl std::fmt::Debug for TurnGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnGuard")
            .field("session_id", &self.slot.session.id)
            .field("state", &self.slot.session.state)
            .finish()
    }
}
