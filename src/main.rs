//! spawnd - PTY session daemon
//!
//! Spawns programs under pseudo-terminals on behalf of local clients, keeps
//! each session's output history, and relays live output and input over a
//! loopback HTTP/WebSocket API.

use clap::Parser as ClapParser;
use spawnd::{
    api,
    config::{Config, ConfigError},
    manager::SessionManager,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// spawnd - PTY session daemon
#[derive(ClapParser, Debug)]
#[command(name = "spawnd", version, about, long_about = None)]
struct Cli {
    /// Address to bind the API server to (loopback only)
    #[arg(long, env = "SPAWND_BIND")]
    bind: Option<SocketAddr>,

    /// Path to a TOML config file
    #[arg(long, env = "SPAWND_CONFIG")]
    config: Option<PathBuf>,

    /// Shell used for shell sessions (defaults to $SHELL)
    #[arg(long, env = "SPAWND_SHELL")]
    shell: Option<String>,

    /// Per-session scrollback cap in bytes
    #[arg(long, env = "SPAWND_SCROLLBACK_LIMIT")]
    scrollback_limit: Option<usize>,
}

#[derive(Error, Debug)]
pub enum SpawndError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("refusing to bind non-loopback address {0}")]
    NonLoopbackBind(SocketAddr),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "spawnd=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

impl Cli {
    /// Merge flags over the file config; flags win.
    fn apply(self, mut config: Config) -> Config {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(shell) = self.shell {
            config.shell = Some(shell);
        }
        if let Some(limit) = self.scrollback_limit {
            config.scrollback_limit = Some(limit);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), SpawndError> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    let config = cli.apply(config);
    config.validate()?;

    if !config.bind.ip().is_loopback() {
        return Err(SpawndError::NonLoopbackBind(config.bind));
    }

    run_server(config).await
}

async fn run_server(config: Config) -> Result<(), SpawndError> {
    let manager = SessionManager::new(config.manager_config());
    let state = api::AppState::new(manager.clone());
    let shutdown = state.shutdown.clone();
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "spawnd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!(
                connections = shutdown.active_connections(),
                "shutting down"
            );
            shutdown.shutdown();
        })
        .await?;

    manager.kill_all();
    tracing::info!("all sessions terminated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::parse_from([
            "spawnd",
            "--bind",
            "127.0.0.1:7001",
            "--scrollback-limit",
            "1024",
        ]);
        let file = Config {
            shell: Some("/bin/zsh".into()),
            scrollback_limit: Some(9),
            ..Config::default()
        };
        let merged = cli.apply(file);
        assert_eq!(merged.bind.port(), 7001);
        assert_eq!(merged.scrollback_limit, Some(1024));
        assert_eq!(merged.shell.as_deref(), Some("/bin/zsh"));
    }

    #[test]
    fn no_flags_keeps_file_values() {
        let cli = Cli::parse_from(["spawnd"]);
        let merged = cli.apply(Config::default());
        assert_eq!(merged, Config::default());
    }
}
