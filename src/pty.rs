use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    OpenPty(#[source] anyhow::Error),

    #[error("failed to spawn {command}: {source}")]
    SpawnCommand {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("working directory does not exist: {0}")]
    MissingCwd(PathBuf),

    #[error("failed to clone reader: {0}")]
    CloneReader(#[source] anyhow::Error),

    #[error("failed to take writer: {0}")]
    TakeWriter(#[source] anyhow::Error),

    #[error("failed to resize pty: {0}")]
    Resize(#[source] anyhow::Error),
}

/// What to run inside a new pseudo-terminal.
#[derive(Debug, Clone)]
pub struct SpawnCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl SpawnCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The user's login shell: `$SHELL`, or `/bin/sh` when unset.
    pub fn login_shell() -> Self {
        Self::new(std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()))
    }

    fn build(&self, term: &str) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.cwd {
            cmd.cwd(dir);
        }
        cmd.env("TERM", term);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

/// A child process attached to the slave side of a freshly opened PTY.
///
/// The slave handle is closed as soon as the child is running, so the master
/// reader observes EOF/EIO once the child (and anything it forked that kept
/// the terminal) goes away.
pub struct Pty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl Pty {
    pub fn spawn(rows: u16, cols: u16, command: &SpawnCommand, term: &str) -> Result<Self, PtyError> {
        // portable-pty reports a missing cwd only after fork; catch it up front
        // so the error names the directory instead of the program.
        if let Some(ref dir) = command.cwd {
            if !dir.is_dir() {
                return Err(PtyError::MissingCwd(dir.clone()));
            }
        }

        let pty_system = native_pty_system();
        let pair = pty_system.openpty(size(rows, cols)).map_err(PtyError::OpenPty)?;

        let child = pair
            .slave
            .spawn_command(command.build(term))
            .map_err(|source| PtyError::SpawnCommand {
                command: command.program.clone(),
                source,
            })?;
        drop(pair.slave);

        Ok(Self {
            master: pair.master,
            child,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master.try_clone_reader().map_err(PtyError::CloneReader)
    }

    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.master.take_writer().map_err(PtyError::TakeWriter)
    }

    /// Split into the master side (kept for resizing) and the child handle.
    pub fn into_parts(self) -> (Box<dyn MasterPty + Send>, Box<dyn Child + Send + Sync>) {
        (self.master, self.child)
    }
}

pub fn resize(master: &dyn MasterPty, rows: u16, cols: u16) -> Result<(), PtyError> {
    master.resize(size(rows, cols)).map_err(PtyError::Resize)
}

fn size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}
