//! Tmux session coordination.
//!
//! A native terminal surface and a remote browser mirror the same panel by
//! attaching to one shared tmux session. The coordinator owns session
//! naming, command construction for the host's PTY spawn, enumeration, and
//! teardown. Sessions created here carry the `at-` prefix; anything without
//! it belongs to the user and is never listed or killed.

use std::collections::HashMap;
use std::process::Stdio;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

pub const SESSION_PREFIX: &str = "at-";

const CANDIDATE_PATHS: &[&str] = &[
    "/opt/homebrew/bin/tmux",
    "/usr/local/bin/tmux",
    "/usr/bin/tmux",
];

const LIST_FORMAT: &str = "#{session_name}\t#{session_created}\t#{session_windows}\t#{session_attached}\t#{pane_current_path}";

/// One enumerated tmux session owned by this coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TmuxSession {
    pub name: String,
    /// Unix timestamp of session creation.
    pub created: i64,
    pub window_count: u32,
    pub attached_clients: u32,
    pub current_path: String,
}

pub struct TmuxCoordinator {
    bin: String,
    /// panel id -> session name, so a recreated panel reattaches to the
    /// session it used before instead of minting a fresh one.
    registry: Mutex<HashMap<String, String>>,
}

impl TmuxCoordinator {
    pub fn new() -> Self {
        Self::with_binary(resolve_binary())
    }

    pub fn with_binary(bin: String) -> Self {
        Self {
            bin,
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn binary(&self) -> &str {
        &self.bin
    }

    /// Deterministic session name for a panel. With a title the name reads
    /// `at-<slug>-<4 hex of panel id>`; without, `at-<8 hex of panel id>`.
    pub fn session_name(panel_id: &str, title: Option<&str>) -> String {
        match title {
            Some(title) if !title.trim().is_empty() => {
                let slug: String = title
                    .trim()
                    .to_lowercase()
                    .chars()
                    .map(|c| match c {
                        ' ' => '-',
                        '.' | ':' => '_',
                        c => c,
                    })
                    .take(30)
                    .collect();
                format!("{}{}-{}", SESSION_PREFIX, slug, hex_prefix(panel_id, 4))
            }
            _ => format!("{}{}", SESSION_PREFIX, hex_prefix(panel_id, 8)),
        }
    }

    /// Shell command the host's PTY spawn executes for a panel: attach to
    /// the session if it exists, create it otherwise. Reuses a registered
    /// name for the panel when one exists so mirroring survives restarts.
    pub fn build_create_or_attach_command(
        &self,
        panel_id: &str,
        dir: Option<&str>,
        title: Option<&str>,
    ) -> String {
        let name = {
            let mut registry = self.registry.lock();
            registry
                .entry(panel_id.to_string())
                .or_insert_with(|| Self::session_name(panel_id, title))
                .clone()
        };

        let mut cmd = format!("{} -u new-session -A -s '{}'", self.bin, name);
        if let Some(dir) = dir {
            cmd.push_str(&format!(" -c '{}'", shell_escape_single(dir)));
        }
        // The status bar is disabled because the host surface draws its own
        // chrome; the env vars are set both session-wide and exported in the
        // first window, then the setup line is cleared away.
        cmd.push_str(&format!(
            " \\; set-option status off \\; set-environment CMUX_SURFACE_ID '{panel}' \\; set-environment CMUX_PANEL_ID '{panel}' \\; send-keys ' export CMUX_SURFACE_ID={panel} CMUX_PANEL_ID={panel}; clear' Enter",
            panel = panel_id
        ));
        cmd
    }

    /// Pure attach, for mirroring an existing session.
    pub fn build_attach_command(&self, name: &str) -> String {
        format!(
            "TERM=xterm-256color {} -u attach-session -t '{}'",
            self.bin, name
        )
    }

    pub fn registered_name(&self, panel_id: &str) -> Option<String> {
        self.registry.lock().get(panel_id).cloned()
    }

    /// Enumerate sessions owned by this coordinator. A non-zero exit (no
    /// tmux server running, tmux missing) yields an empty list.
    pub async fn list_active_sessions(&self) -> Vec<TmuxSession> {
        let output = tokio::process::Command::new(&self.bin)
            .args(["list-sessions", "-F", LIST_FORMAT])
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                parse_sessions(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!("[tmux] list-sessions failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn session_exists(&self, name: &str) -> bool {
        tokio::process::Command::new(&self.bin)
            .args(["has-session", "-t", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Kill one owned session. Names without the ownership prefix are
    /// refused.
    pub async fn kill_session(&self, name: &str) -> bool {
        if !name.starts_with(SESSION_PREFIX) {
            return false;
        }
        let killed = tokio::process::Command::new(&self.bin)
            .args(["kill-session", "-t", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if !killed {
            warn!("[tmux] kill-session {} failed", name);
        }
        killed
    }

    /// Kill every owned session; returns how many were killed.
    pub async fn kill_all_sessions(&self) -> usize {
        let mut killed = 0;
        for session in self.list_active_sessions().await {
            if self.kill_session(&session.name).await {
                killed += 1;
            }
        }
        killed
    }
}

impl Default for TmuxCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe the fixed candidate list (homebrew first); fall back to a bare
/// `tmux` resolved through PATH at exec time.
fn resolve_binary() -> String {
    for path in CANDIDATE_PATHS {
        if std::path::Path::new(path).exists() {
            return path.to_string();
        }
    }
    "tmux".to_string()
}

fn hex_prefix(id: &str, n: usize) -> String {
    id.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(n)
        .collect::<String>()
        .to_lowercase()
}

fn shell_escape_single(s: &str) -> String {
    s.replace('\'', "'\\''")
}

fn parse_sessions(stdout: &str) -> Vec<TmuxSession> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(5, '\t');
            let name = fields.next()?.to_string();
            if !name.starts_with(SESSION_PREFIX) {
                return None;
            }
            Some(TmuxSession {
                name,
                created: fields.next()?.parse().ok()?,
                window_count: fields.next()?.parse().ok()?,
                attached_clients: fields.next()?.parse().ok()?,
                current_path: fields.next().unwrap_or_default().to_string(),
            })
        })
        .collect()
}
