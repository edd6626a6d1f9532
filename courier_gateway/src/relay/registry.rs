use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use log::*;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub mode: String,
    pub cancel: CancellationToken,
}

/// Tracks live relay sessions. Owned by the gateway process and shared by reference; the lock
/// lives inside, so callers never coordinate access themselves.
#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and returns its id. The id is handed back to [`Self::deregister`] when
    /// the session ends.
    pub fn register(&self, mode: &str, cancel: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = SessionInfo { mode: mode.to_string(), cancel };
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id, info);
            debug!("🔌️ Session {id} ({mode}) registered. {} live sessions.", sessions.len());
        }
        id
    }

    pub fn deregister(&self, id: u64) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if sessions.remove(&id).is_some() {
                debug!("🔌️ Session {id} deregistered. {} live sessions.", sessions.len());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every live session. Used on shutdown.
    pub fn cancel_all(&self) {
        if let Ok(sessions) = self.sessions.lock() {
            info!("🔌️ Cancelling {} live sessions", sessions.len());
            for info in sessions.values() {
                info.cancel.cancel();
            }
        }
    }
}
