//! Registry of live PTY sessions.
//!
//! Two maps under one mutex: `session id -> session` and
//! `client id -> session id`. The lock is held only to read or mutate map
//! entries and to snapshot reap candidates; `attach`/`reattach`/`terminate`
//! run outside it so the read pump can never deadlock against us.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::config::home_dir;
use crate::error::SpawnError;
use crate::pty::{ClientId, PtySession, SpawnTarget};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Maps {
    sessions: HashMap<String, Arc<PtySession>>,
    clients: HashMap<ClientId, String>,
}

pub struct PtyManager {
    maps: Mutex<Maps>,
    grace: Duration,
}

impl PtyManager {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            maps: Mutex::new(Maps::default()),
            grace,
        }
    }

    /// Spawn a session for `client` and attach it. A working directory that
    /// does not exist (or is not a directory) is replaced with HOME.
    pub fn create_for(
        &self,
        client: ClientId,
        dir: &Path,
        cols: u16,
        rows: u16,
        target: SpawnTarget,
    ) -> Result<Arc<PtySession>, SpawnError> {
        let dir = if dir.is_dir() {
            dir.to_path_buf()
        } else {
            home_dir()
        };
        let session = PtySession::spawn(&dir, cols, rows, target)?;
        {
            let mut maps = self.maps.lock();
            maps.clients.insert(client, session.id.clone());
            maps.sessions.insert(session.id.clone(), session.clone());
        }
        session.attach(client);
        Ok(session)
    }

    pub fn session_for(&self, client: ClientId) -> Option<Arc<PtySession>> {
        let maps = self.maps.lock();
        let id = maps.clients.get(&client)?;
        maps.sessions.get(id).cloned()
    }

    /// Drop the client binding but keep the session alive as an orphan,
    /// eligible for reattach until the grace period runs out.
    pub fn detach(&self, client: ClientId) {
        let session = {
            let mut maps = self.maps.lock();
            maps.clients
                .remove(&client)
                .and_then(|id| maps.sessions.get(&id).cloned())
        };
        if let Some(session) = session {
            session.detach();
            info!("[manager] client {} detached from {}", client, session.id);
        }
    }

    /// Detach and terminate in one step; the session is gone afterwards.
    pub fn remove(&self, client: ClientId) {
        let session = {
            let mut maps = self.maps.lock();
            let id = maps.clients.remove(&client);
            id.and_then(|id| maps.sessions.remove(&id))
        };
        if let Some(session) = session {
            session.detach();
            session.terminate();
        }
    }

    pub fn find_orphan_by_id(&self, id: &str) -> Option<Arc<PtySession>> {
        self.maps
            .lock()
            .sessions
            .get(id)
            .filter(|s| s.is_orphaned())
            .cloned()
    }

    pub fn find_orphans_by_dir(&self, dir: &Path) -> Vec<Arc<PtySession>> {
        self.maps
            .lock()
            .sessions
            .values()
            .filter(|s| s.is_orphaned() && s.working_dir == dir)
            .cloned()
            .collect()
    }

    pub fn find_orphan_by_tmux(&self, name: &str) -> Option<Arc<PtySession>> {
        self.maps
            .lock()
            .sessions
            .values()
            .find(|s| s.is_orphaned() && s.tmux_name.as_deref() == Some(name))
            .cloned()
    }

    /// Claim an orphaned session for a new client. Returns false when the
    /// session is unknown, terminated, or already claimed.
    pub fn reattach(&self, id: &str, client: ClientId) -> bool {
        let session = {
            let mut maps = self.maps.lock();
            let Some(session) = maps.sessions.get(id).cloned() else {
                return false;
            };
            if !session.is_orphaned() || maps.clients.values().any(|v| v.as_str() == id) {
                return false;
            }
            maps.clients.insert(client, id.to_string());
            session
        };
        session.reattach(client);
        info!("[manager] client {} reattached to {}", client, id);
        true
    }

    /// Terminate orphans whose grace period expired. Candidates are
    /// snapshotted under the lock; termination happens outside it.
    pub fn reap_orphans(&self) -> usize {
        let expired: Vec<Arc<PtySession>> = {
            let mut maps = self.maps.lock();
            let ids: Vec<String> = maps
                .sessions
                .values()
                .filter(|s| {
                    s.is_orphaned()
                        && s.orphaned_since()
                            .is_some_and(|t| t.elapsed() > self.grace)
                })
                .map(|s| s.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| maps.sessions.remove(id))
                .collect()
        };
        for session in &expired {
            session.terminate();
        }
        if !expired.is_empty() {
            info!("[manager] reaped {} expired orphan(s)", expired.len());
        }
        expired.len()
    }

    pub fn remove_all(&self) {
        let sessions: Vec<Arc<PtySession>> = {
            let mut maps = self.maps.lock();
            maps.clients.clear();
            maps.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.terminate();
        }
    }

    pub fn session_count(&self) -> usize {
        self.maps.lock().sessions.len()
    }
}

impl Default for PtyManager {
    fn default() -> Self {
        Self::new()
    }
}
