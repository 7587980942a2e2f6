use parking_lot::Mutex;
use portable_pty::{Child, MasterPty};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::scrollback::Scrollback;

/// Globally unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random (v4 UUID) identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    /// Process alive with no consumer attached. Reserved for reconnects;
    /// nothing in this crate enters it yet.
    Idle,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Idle => "idle",
            SessionStatus::Stopped => "stopped",
        }
    }
}

/// A live or exited PTY session, owned by the [`SessionTable`].
///
/// The Reader Task is the only writer of `status`, `scrollback` and
/// `exit_code`. Input and resize touch only `writer`, `master` and `size`.
/// The writer and master sit behind their own locks so that terminal I/O
/// happens after the table lock is released.
pub struct Session {
    pub id: SessionId,
    /// Assigned by [`SessionTable::insert`]. Distinguishes this spawn from
    /// an earlier session that used the same identifier.
    pub generation: u64,
    pub project_id: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub scrollback: Scrollback,
    pub exit_code: Option<u32>,
    pub pid: Option<u32>,
    /// `(cols, rows)` as last applied to the PTY.
    pub size: (u16, u16),
    pub created_at: SystemTime,
    pub writer: Arc<Mutex<Box<dyn Write + Send>>>,
    pub master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    /// Taken by whoever reaps the process: the Reader Task on natural exit,
    /// or `kill` after removing the entry.
    pub child: Option<Box<dyn Child + Send + Sync>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("project_id", &self.project_id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            name: self.name.clone(),
            status: self.status,
            exit_code: self.exit_code,
            pid: self.pid,
            cols: self.size.0,
            rows: self.size.1,
            scrollback_len: self.scrollback.len(),
            created_at: self
                .created_at
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

/// Point-in-time view of a session, safe to hand out of the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub project_id: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub exit_code: Option<u32>,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    pub scrollback_len: usize,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// Registry of all sessions, keyed by identifier.
///
/// Cloning shares the same table. Every method is a short critical section
/// under one lock; callers must never do process I/O inside
/// [`with_session`](Self::with_session).
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<HashMap<SessionId, Session>>>,
    next_generation: Arc<AtomicU64>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the identifier is already taken, returning the
    /// generation assigned to the entry. On conflict the session is handed
    /// back so the caller can tear it down.
    pub fn insert(&self, mut session: Session) -> Result<u64, Session> {
        let mut inner = self.inner.lock();
        if inner.contains_key(&session.id) {
            return Err(session);
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        session.generation = generation;
        inner.insert(session.id.clone(), session);
        Ok(generation)
    }

    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.inner.lock().remove(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Run `f` against the session under the lock. `None` if absent.
    pub fn with_session<R>(&self, id: &SessionId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.get_mut(id).map(f)
    }

    /// Like [`with_session`](Self::with_session), but only if the entry is
    /// still the one inserted with `generation`.
    pub fn with_generation<R>(
        &self,
        id: &SessionId,
        generation: u64,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.get_mut(id).filter(|s| s.generation == generation).map(f)
    }

    /// Info plus a copy of the scrollback, taken atomically.
    pub fn detail(&self, id: &SessionId) -> Option<(SessionInfo, Vec<u8>)> {
        let inner = self.inner.lock();
        inner.get(id).map(|s| (s.info(), s.scrollback.snapshot()))
    }

    /// Status plus a copy of the scrollback, taken atomically.
    pub fn snapshot(&self, id: &SessionId) -> Option<(SessionStatus, Vec<u8>)> {
        let inner = self.inner.lock();
        inner.get(id).map(|s| (s.status, s.scrollback.snapshot()))
    }

    /// Info for every session (optionally one project's), newest first.
    pub fn list(&self, project_id: Option<&str>) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = {
            let inner = self.inner.lock();
            inner
                .values()
                .filter(|s| project_id.map_or(true, |p| s.project_id == p))
                .map(Session::info)
                .collect()
        };
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
