use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::manager::ManagerConfig;

pub const DEFAULT_PORT: u16 = 9731;

/// Daemon configuration, loaded from TOML. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address for the HTTP/WebSocket server.
    pub bind: SocketAddr,
    pub default_cols: u16,
    pub default_rows: u16,
    /// Chunks a live-output subscriber may fall behind before skipping.
    pub output_channel_capacity: usize,
    pub event_channel_capacity: usize,
    /// Per-session scrollback cap in bytes. Unset keeps everything.
    pub scrollback_limit: Option<usize>,
    pub read_buffer_size: usize,
    /// Shell for shell sessions. Unset means `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    /// `TERM` exported to spawned processes.
    pub term: String,
}

impl Default for Config {
    fn default() -> Self {
        let manager = ManagerConfig::default();
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            default_cols: manager.default_cols,
            default_rows: manager.default_rows,
            output_channel_capacity: manager.output_channel_capacity,
            event_channel_capacity: manager.event_channel_capacity,
            scrollback_limit: manager.scrollback_limit,
            read_buffer_size: manager.read_buffer_size,
            shell: manager.shell,
            term: manager.term,
        }
    }
}

impl Config {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Load from an explicit path (which must exist), or from
    /// [`default_path`] if present, or fall back to defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path)?.ok_or_else(|| {
                ConfigError::ReadFailed(
                    path.to_path_buf(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                )
            }),
            None => match default_path() {
                Some(path) => Ok(Self::load(&path)?.unwrap_or_default()),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_cols == 0 || self.default_rows == 0 {
            return Err(ConfigError::Invalid(
                "default_cols and default_rows must be non-zero".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be non-zero".into()));
        }
        if self.output_channel_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be non-zero".into()));
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            default_cols: self.default_cols,
            default_rows: self.default_rows,
            output_channel_capacity: self.output_channel_capacity,
            event_channel_capacity: self.event_channel_capacity,
            scrollback_limit: self.scrollback_limit,
            read_buffer_size: self.read_buffer_size,
            shell: self.shell.clone(),
            term: self.term.clone(),
        }
    }
}

/// `$XDG_CONFIG_HOME/spawnd/config.toml` (or the platform equivalent).
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("spawnd").join("config.toml"))
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bind.port(), 9731);
        assert!(config.bind.ip().is_loopback());
    }

    #[test]
    fn parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
            bind = "127.0.0.1:7000"
            scrollback_limit = 65536
            shell = "/bin/zsh"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind.port(), 7000);
        assert_eq!(config.scrollback_limit, Some(65536));
        assert_eq!(config.shell.as_deref(), Some("/bin/zsh"));
        assert_eq!(config.default_cols, 80);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("colour = \"blue\"").is_err());
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn resolve_explicit_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::resolve(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFailed(..)));
    }

    #[test]
    fn load_rejects_zero_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_cols = 0\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bind = 12").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn manager_config_carries_values() {
        let config = Config {
            read_buffer_size: 512,
            term: "dumb".into(),
            ..Config::default()
        };
        let manager = config.manager_config();
        assert_eq!(manager.read_buffer_size, 512);
        assert_eq!(manager.term, "dumb");
    }
}
