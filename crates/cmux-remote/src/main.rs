//! Standalone runner: serves the remote-access UI against a stub host.
//! The real deployment embeds [`cmux_remote::Server`] inside the host
//! application and wires a live `HostHandle` instead.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cmux_remote::config::DEFAULT_PORT;
use cmux_remote::host::{StubHost, WorkspaceSnapshot};
use cmux_remote::{AppState, RemoteConfig, Server};

#[derive(Parser)]
#[command(name = "cmux-remote")]
#[command(about = "Remote access server for terminal workspaces")]
#[command(version)]
struct Cli {
    /// Port to listen on (all interfaces)
    #[arg(short, long, env = "CMUX_REMOTE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Spawn panel shells under tmux
    #[arg(long, env = "CMUX_REMOTE_TMUX")]
    tmux: bool,
}

fn demo_workspaces() -> Vec<WorkspaceSnapshot> {
    let home = cmux_remote::config::home_dir();
    vec![WorkspaceSnapshot {
        id: uuid::Uuid::new_v4().to_string(),
        title: "scratch".to_string(),
        directory: home.to_string_lossy().into_owned(),
        panel_count: 1,
        unread_count: 0,
        is_pinned: false,
        is_tmux_enabled: false,
        is_selected: true,
        color: None,
        panels: None,
        layout: None,
    }]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = RemoteConfig {
        enabled: true,
        port: cli.port,
        tmux_mode: cli.tmux,
        ..RemoteConfig::default()
    };

    let host = StubHost::new(demo_workspaces()).spawn();
    let state = AppState::new(config, host);
    let server = Server::new(state);

    match server.start().await.context("failed to start server")? {
        Some(addr) => info!("open http://{addr}/ in a browser"),
        None => return Ok(()),
    }

    tokio::signal::ctrl_c().await.context("signal handler")?;
    server.stop().await;
    Ok(())
}
