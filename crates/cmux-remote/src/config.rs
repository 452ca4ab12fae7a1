use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 4848;

/// Runtime configuration read once at startup. The host application owns
/// persistence of these values; the server only consumes them.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// When false, `Server::start` is a no-op.
    pub enabled: bool,
    /// TCP port for the listener, bound on all interfaces.
    pub port: u16,
    /// Whether the host spawns panel shells under tmux.
    pub tmux_mode: bool,
    /// Directory scanned for agent transcripts (`GET /api/cc/sessions`).
    pub cc_state_dir: PathBuf,
    /// How long an orphaned PTY session survives before the reaper claims it.
    pub orphan_grace: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_PORT,
            tmux_mode: false,
            cc_state_dir: home_dir().join(".claude").join("projects"),
            orphan_grace: Duration::from_secs(60),
        }
    }
}

pub fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/".to_string()))
}
