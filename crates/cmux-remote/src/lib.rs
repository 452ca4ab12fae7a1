//! Embedded remote-access server for a multi-workspace terminal app.
//!
//! Exposes the host application's terminal panels to browsers on the local
//! network as interactive PTY sessions, along with a live workspace and
//! notification feed:
//!
//! - `/` serves a small single-page UI (embedded static bundle).
//! - `/ws` streams workspace state, tmux sessions, and notifications, and
//!   accepts JSON commands bridged to the host.
//! - `/ws/terminal` binds a browser to a PTY session with a reattach
//!   protocol that survives transient disconnects.
//! - `/api/*` is a thin REST surface over the same capabilities.
//!
//! The host application stays in charge of workspace state; everything the
//! server needs goes through a [`host::HostHandle`] mailbox.

pub mod bridge;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod host;
pub mod manager;
pub mod port;
pub mod pty;
pub mod routes;
pub mod server;
pub mod tmux;
pub mod ws;

use std::sync::Arc;
use std::time::Instant;

pub use broadcast::StateHub;
pub use config::RemoteConfig;
pub use host::{HostHandle, StubHost};
pub use manager::PtyManager;
pub use routes::build_router;
pub use server::Server;
pub use tmux::TmuxCoordinator;

/// Everything the handlers share.
pub struct AppState {
    pub config: RemoteConfig,
    pub host: HostHandle,
    pub manager: PtyManager,
    pub tmux: TmuxCoordinator,
    pub hub: StateHub,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: RemoteConfig, host: HostHandle) -> Arc<Self> {
        let manager = PtyManager::with_grace(config.orphan_grace);
        Self::with_parts(config, host, manager, TmuxCoordinator::new())
    }

    /// Construct with injected components, for tests and embedders that
    /// need a custom tmux binary or grace period.
    pub fn with_parts(
        config: RemoteConfig,
        host: HostHandle,
        manager: PtyManager,
        tmux: TmuxCoordinator,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            host,
            manager,
            tmux,
            hub: StateHub::new(),
            started_at: Instant::now(),
        })
    }
}
