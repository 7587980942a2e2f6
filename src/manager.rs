//! The session manager: spawn, input, resize, status and kill for PTY
//! sessions, plus the per-session reader thread that turns terminal output
//! into scrollback and broadcast chunks and detects natural exit.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::broker::{Broker, Subscription};
use crate::pty::{self, Pty, PtyError, SpawnCommand};
use crate::scrollback::Scrollback;
use crate::session::{Session, SessionId, SessionInfo, SessionStatus, SessionTable};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to spawn session: {0}")]
    Spawn(#[from] PtyError),

    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Source of the `BrokenPipe` error returned for input or resize against a
/// session that is `Stopped`.
#[derive(Error, Debug)]
#[error("session process has exited")]
pub struct SessionExited;

impl SessionError {
    /// True only for the error raised because the session is `Stopped`; a
    /// genuine `EPIPE` from a live session does not count.
    pub fn is_stopped(&self) -> bool {
        match self {
            SessionError::Io(e) => e.get_ref().is_some_and(|inner| inner.is::<SessionExited>()),
            _ => false,
        }
    }
}

/// Lifecycle notifications.
///
/// `Exited` fires exactly once per session whose process terminated on its
/// own; `Killed` fires once per `kill` that removed a live session. A storage
/// layer maps `Spawned` to running and `Exited`/`Killed` to stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Spawned {
        session_id: SessionId,
        project_id: String,
    },
    Exited {
        session_id: SessionId,
        exit_code: Option<u32>,
    },
    Killed {
        session_id: SessionId,
    },
    Renamed {
        session_id: SessionId,
        name: String,
    },
}

/// What an [`EventSubscription`] yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFeed {
    Event(SessionEvent),
    /// The subscriber fell behind and missed events. Carries the current
    /// state of every session so the consumer can rebuild its view.
    Resync(Vec<SessionInfo>),
}

/// Receiver for lifecycle events that never loses track of state: when the
/// channel overflows, the next item is a [`EventFeed::Resync`] snapshot.
pub struct EventSubscription {
    rx: broadcast::Receiver<SessionEvent>,
    table: SessionTable,
}

impl EventSubscription {
    /// Wait for the next event. `None` once the manager is gone.
    pub async fn recv(&mut self) -> Option<EventFeed> {
        match self.rx.recv().await {
            Ok(event) => Some(EventFeed::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(self.resync(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<EventFeed> {
        match self.rx.try_recv() {
            Ok(event) => Some(EventFeed::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(self.resync(n)),
            Err(_) => None,
        }
    }

    fn resync(&self, skipped: u64) -> EventFeed {
        tracing::debug!(skipped, "event subscriber lagged, resyncing");
        EventFeed::Resync(self.table.list(None))
    }
}

/// Tunables for spawned sessions.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub default_cols: u16,
    pub default_rows: u16,
    pub output_channel_capacity: usize,
    pub event_channel_capacity: usize,
    /// Maximum scrollback bytes kept per session. `None` keeps everything.
    pub scrollback_limit: Option<usize>,
    pub read_buffer_size: usize,
    /// Shell for `spawn_shell`. Falls back to `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    pub term: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_cols: 80,
            default_rows: 24,
            output_channel_capacity: crate::broker::DEFAULT_CAPACITY,
            event_channel_capacity: 64,
            scrollback_limit: None,
            read_buffer_size: 4096,
            shell: None,
            term: "xterm-256color".to_string(),
        }
    }
}

/// Parameters for [`SessionManager::spawn`].
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub project_id: String,
    pub cwd: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub name: Option<String>,
}

impl SpawnRequest {
    pub fn new(
        project_id: impl Into<String>,
        cwd: impl Into<PathBuf>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            cwd: cwd.into(),
            command: command.into(),
            args,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Entry point for session lifecycle and I/O routing.
///
/// Cheap to clone; clones share the same table, broker and event channel.
#[derive(Clone)]
pub struct SessionManager {
    table: SessionTable,
    broker: Broker,
    events_tx: broadcast::Sender<SessionEvent>,
    config: Arc<ManagerConfig>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl SessionManager {
    pub fn new(config: ManagerConfig) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            table: SessionTable::new(),
            broker: Broker::with_capacity(config.output_channel_capacity),
            events_tx,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Start `command` in `cwd` under a new PTY and return its identifier.
    ///
    /// Returns as soon as the process is running; output arrives through
    /// [`subscribe`](Self::subscribe) and the session's scrollback.
    pub fn spawn(&self, request: SpawnRequest) -> Result<SessionId, SessionError> {
        let command = SpawnCommand::new(request.command)
            .args(request.args)
            .cwd(request.cwd);
        let id = SessionId::generate();
        self.launch(id, request.project_id, request.name, command)
    }

    /// Start an interactive shell under a caller-chosen identifier.
    ///
    /// A no-op if a session with that identifier is already registered.
    pub fn spawn_shell(
        &self,
        id: SessionId,
        cwd: impl Into<PathBuf>,
    ) -> Result<SessionId, SessionError> {
        if self.table.contains(&id) {
            tracing::debug!(session_id = %id, "shell already registered");
            return Ok(id);
        }
        let command = match self.config.shell {
            Some(ref shell) => SpawnCommand::new(shell.clone()),
            None => SpawnCommand::login_shell(),
        }
        .cwd(cwd);
        self.launch(id, String::new(), None, command)
    }

    fn launch(
        &self,
        id: SessionId,
        project_id: String,
        name: Option<String>,
        command: SpawnCommand,
    ) -> Result<SessionId, SessionError> {
        let (cols, rows) = (self.config.default_cols, self.config.default_rows);
        let pty = Pty::spawn(rows, cols, &command, &self.config.term)?;

        let handles = pty
            .take_reader()
            .and_then(|reader| Ok((reader, pty.take_writer()?)));
        let (reader, writer) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                let (_, child) = pty.into_parts();
                reap_in_background(&id, child);
                return Err(e.into());
            }
        };

        let pid = pty.pid();
        let (master, child) = pty.into_parts();
        let session = Session {
            id: id.clone(),
            generation: 0,
            project_id: project_id.clone(),
            name,
            status: SessionStatus::Running,
            scrollback: Scrollback::new(self.config.scrollback_limit),
            exit_code: None,
            pid,
            size: (cols, rows),
            created_at: SystemTime::now(),
            writer: Arc::new(parking_lot::Mutex::new(writer)),
            master: Arc::new(parking_lot::Mutex::new(master)),
            child: Some(child),
        };

        // Registered before the reader starts, so the reader always finds its
        // entry unless a kill got there first.
        let generation = match self.table.insert(session) {
            Ok(generation) => generation,
            Err(mut rejected) => {
                tracing::debug!(session_id = %id, "identifier taken by a concurrent spawn");
                if let Some(child) = rejected.child.take() {
                    reap_in_background(&id, child);
                }
                return Ok(id);
            }
        };

        // Announced before the reader starts so `Spawned` always precedes `Exited`.
        let _ = self.events_tx.send(SessionEvent::Spawned {
            session_id: id.clone(),
            project_id: project_id.clone(),
        });

        let reader_task = ReaderTask {
            id: id.clone(),
            generation,
            table: self.table.clone(),
            broker: self.broker.clone(),
            events_tx: self.events_tx.clone(),
            buffer_size: self.config.read_buffer_size.max(1),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("pty-reader-{}", short_id(&id)))
            .spawn(move || reader_task.run(reader));
        if let Err(e) = spawned {
            tracing::error!(session_id = %id, error = %e, "failed to start reader thread");
            let child = self.table.with_generation(&id, generation, |s| s.child.take());
            if child.is_some() {
                self.table.remove(&id);
            }
            if let Some(child) = child.flatten() {
                reap_in_background(&id, child);
            }
            let _ = self.events_tx.send(SessionEvent::Killed {
                session_id: id.clone(),
            });
            return Err(SessionError::Io(e));
        }

        tracing::info!(
            session_id = %id,
            project_id = %project_id,
            program = %command.program,
            pid = ?pid,
            "spawned session"
        );
        Ok(id)
    }

    /// Forward raw bytes to the session's process.
    ///
    /// Fails with `NotFound` for unknown identifiers and with a `BrokenPipe`
    /// I/O error once the process has exited. Never changes table membership.
    pub fn write(&self, id: &SessionId, data: &[u8]) -> Result<(), SessionError> {
        let writer = self
            .table
            .with_session(id, |s| match s.status {
                SessionStatus::Stopped => Err(stopped_error()),
                _ => Ok(Arc::clone(&s.writer)),
            })
            .ok_or_else(|| SessionError::NotFound(id.clone()))??;

        let mut writer = writer.lock();
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Change the PTY geometry; the child receives SIGWINCH.
    pub fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> Result<(), SessionError> {
        let master = self
            .table
            .with_session(id, |s| match s.status {
                SessionStatus::Stopped => Err(stopped_error()),
                _ => Ok(Arc::clone(&s.master)),
            })
            .ok_or_else(|| SessionError::NotFound(id.clone()))??;

        {
            let master = master.lock();
            pty::resize(master.as_ref(), rows, cols)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }
        self.table.with_session(id, |s| s.size = (cols, rows));
        tracing::debug!(session_id = %id, cols, rows, "resized session");
        Ok(())
    }

    /// Status and scrollback, read together under the table lock.
    pub fn status(&self, id: &SessionId) -> Result<(SessionStatus, Vec<u8>), SessionError> {
        self.table
            .snapshot(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// Info and scrollback from a single lock acquisition, so the status,
    /// exit code and bytes all describe the same moment.
    pub fn detail(&self, id: &SessionId) -> Result<(SessionInfo, Vec<u8>), SessionError> {
        self.table
            .detail(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    pub fn scrollback(&self, id: &SessionId) -> Result<Vec<u8>, SessionError> {
        self.status(id).map(|(_, scrollback)| scrollback)
    }

    pub fn info(&self, id: &SessionId) -> Result<SessionInfo, SessionError> {
        self.table
            .with_session(id, |s| s.info())
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    pub fn list(&self, project_id: Option<&str>) -> Vec<SessionInfo> {
        self.table.list(project_id)
    }

    pub fn rename(&self, id: &SessionId, name: impl Into<String>) -> Result<(), SessionError> {
        let name = name.into();
        self.table
            .with_session(id, |s| s.name = Some(name.clone()))
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        let _ = self.events_tx.send(SessionEvent::Renamed {
            session_id: id.clone(),
            name,
        });
        Ok(())
    }

    /// Remove the session and terminate its process.
    ///
    /// Removal is immediate; the process is killed and reaped on a
    /// background thread, and the reader thread exits quietly once its read
    /// fails. Unknown identifiers are ignored.
    pub fn kill(&self, id: &SessionId) {
        let Some(mut session) = self.table.remove(id) else {
            return;
        };
        let was_live = session.status != SessionStatus::Stopped;
        if let Some(child) = session.child.take() {
            reap_in_background(id, child);
        }
        drop(session);

        if was_live {
            tracing::info!(session_id = %id, "killed session");
            let _ = self.events_tx.send(SessionEvent::Killed {
                session_id: id.clone(),
            });
        } else {
            tracing::debug!(session_id = %id, "purged stopped session");
        }
    }

    /// Kill every registered session. Used on shutdown.
    pub fn kill_all(&self) {
        for id in self.table.ids() {
            self.kill(&id);
        }
    }

    /// Live output from every session.
    pub fn subscribe(&self) -> Subscription {
        self.broker.subscribe()
    }

    /// Live output from one session.
    pub fn subscribe_session(&self, id: &SessionId) -> Result<Subscription, SessionError> {
        if !self.table.contains(id) {
            return Err(SessionError::NotFound(id.clone()));
        }
        Ok(self.broker.subscribe_session(id))
    }

    /// Lifecycle events. A subscriber that falls behind receives a
    /// [`EventFeed::Resync`] snapshot instead of silently missing events.
    pub fn subscribe_events(&self) -> EventSubscription {
        EventSubscription {
            rx: self.events_tx.subscribe(),
            table: self.table.clone(),
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.table.contains(id)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Owns the read half of one session's PTY for the session's lifetime.
struct ReaderTask {
    id: SessionId,
    /// Entry this reader belongs to; a later spawn reusing `id` gets another.
    generation: u64,
    table: SessionTable,
    broker: Broker,
    events_tx: broadcast::Sender<SessionEvent>,
    buffer_size: usize,
}

impl ReaderTask {
    fn run(self, reader: Box<dyn Read + Send>) {
        let id = self.id.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            if self.pump(reader) {
                self.finish();
            }
        }));
        if let Err(e) = result {
            tracing::error!(session_id = %id, "reader task panicked: {:?}", e);
        }
    }

    /// Copy output until EOF or a read error. Returns false if the session
    /// was removed while reading, in which case nothing more may be done.
    fn pump(&self, mut reader: Box<dyn Read + Send>) -> bool {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!(session_id = %self.id, "pty eof");
                    return true;
                }
                Ok(n) => {
                    let data = Bytes::copy_from_slice(&buf[..n]);
                    // Published under the table lock so nothing goes out for
                    // a session that kill has already removed.
                    let present = self
                        .table
                        .with_generation(&self.id, self.generation, |s| {
                            s.scrollback.append(&data);
                            self.broker.publish(&self.id, data);
                        })
                        .is_some();
                    if !present {
                        tracing::debug!(session_id = %self.id, "session removed, reader exiting");
                        return false;
                    }
                }
                // EIO once the slave side is gone is the usual exit signal on Linux.
                Err(e) => {
                    tracing::debug!(session_id = %self.id, error = %e, "pty read ended");
                    return true;
                }
            }
        }
    }

    /// Running -> Stopped, then reap the child and fire the exit notification.
    fn finish(self) {
        let child = self.table.with_generation(&self.id, self.generation, |s| {
            s.status = SessionStatus::Stopped;
            s.child.take()
        });
        let Some(child) = child else {
            tracing::debug!(session_id = %self.id, "session already removed, no exit notification");
            return;
        };

        let exit_code = child.and_then(|mut child| match child.wait() {
            Ok(status) => Some(status.exit_code()),
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "failed to reap session child");
                None
            }
        });
        if exit_code.is_some() {
            self.table
                .with_generation(&self.id, self.generation, |s| s.exit_code = exit_code);
        }

        tracing::info!(session_id = %self.id, exit_code = ?exit_code, "session exited");
        let _ = self.events_tx.send(SessionEvent::Exited {
            session_id: self.id,
            exit_code,
        });
    }
}

fn stopped_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, SessionExited)
}

fn reap_in_background(id: &SessionId, mut child: Box<dyn portable_pty::Child + Send + Sync>) {
    let id = id.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("pty-reap-{}", short_id(&id)))
        .spawn(move || {
            if let Err(e) = child.kill() {
                tracing::debug!(session_id = %id, error = %e, "kill failed (already exited?)");
            }
            let _ = child.wait();
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to start reaper thread");
    }
}

fn short_id(id: &SessionId) -> &str {
    let s = id.as_str();
    &s[..s.len().min(8)]
}
