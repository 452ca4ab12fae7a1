//! Interface to the host application.
//!
//! The host owns workspace, panel, and notification state and must only be
//! touched from its own single-threaded loop. Request handlers talk to it
//! through a [`HostHandle`]: a mailbox of requests, each carrying a oneshot
//! reply, bounded by a 10 second wait.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Hard ceiling on any wait for the host loop.
pub const HOST_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub id: String,
    pub title: String,
    pub directory: String,
    pub panel_count: usize,
    pub unread_count: usize,
    pub is_pinned: bool,
    pub is_tmux_enabled: bool,
    pub is_selected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panels: Option<Vec<PanelSnapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelSnapshot {
    pub id: String,
    pub directory: String,
    #[serde(rename = "tmuxSession", skip_serializing_if = "Option::is_none")]
    pub tmux_session: Option<String>,
}

/// Recursive split tree. The server treats this as an opaque payload; the
/// host governs its semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayoutNode {
    Pane { pane: PaneLeaf },
    Split { split: Box<SplitNode> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneLeaf {
    #[serde(rename = "panelIds")]
    pub panel_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitNode {
    pub orientation: String,
    pub divider_position: f64,
    pub first: LayoutNode,
    pub second: LayoutNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSnapshot {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub body: String,
    pub tab_id: String,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    pub version: String,
    pub workspace_count: usize,
    pub selected_workspace: Option<String>,
    pub unread_count: usize,
}

#[derive(Debug)]
pub enum HostRequest {
    Workspaces(oneshot::Sender<Vec<WorkspaceSnapshot>>),
    Notifications(oneshot::Sender<Vec<NotificationSnapshot>>),
    Status(oneshot::Sender<HostStatus>),
    Command {
        command: String,
        reply: oneshot::Sender<String>,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostError {
    #[error("host did not answer within {HOST_WAIT:?}")]
    Timeout,
    #[error("host loop has shut down")]
    Closed,
}

/// Cloneable sender half of the host mailbox.
#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<HostRequest>,
}

impl HostHandle {
    pub fn new(tx: mpsc::UnboundedSender<HostRequest>) -> Self {
        Self { tx }
    }

    async fn call<T>(
        &self,
        req: HostRequest,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, HostError> {
        self.tx.send(req).map_err(|_| HostError::Closed)?;
        match tokio::time::timeout(HOST_WAIT, rx).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(_)) => Err(HostError::Closed),
            Err(_) => Err(HostError::Timeout),
        }
    }

    pub async fn workspaces(&self) -> Result<Vec<WorkspaceSnapshot>, HostError> {
        let (tx, rx) = oneshot::channel();
        self.call(HostRequest::Workspaces(tx), rx).await
    }

    pub async fn notifications(&self) -> Result<Vec<NotificationSnapshot>, HostError> {
        let (tx, rx) = oneshot::channel();
        self.call(HostRequest::Notifications(tx), rx).await
    }

    pub async fn status(&self) -> Result<HostStatus, HostError> {
        let (tx, rx) = oneshot::channel();
        self.call(HostRequest::Status(tx), rx).await
    }

    /// Forward a JSON command string to the host's command dispatcher and
    /// wait for its textual reply.
    pub async fn command(&self, command: String) -> Result<String, HostError> {
        let (tx, rx) = oneshot::channel();
        self.call(HostRequest::Command { command, reply: tx }, rx).await
    }
}

/// Minimal in-process host used by the standalone binary and tests.
///
/// Workspaces live in a plain Vec owned by the loop task, mirroring the
/// single-threaded ownership the real host enforces.
pub struct StubHost {
    workspaces: Vec<WorkspaceSnapshot>,
    notifications: Vec<NotificationSnapshot>,
}

impl StubHost {
    pub fn new(workspaces: Vec<WorkspaceSnapshot>) -> Self {
        Self {
            workspaces,
            notifications: Vec::new(),
        }
    }

    /// Spawn the host loop; the returned handle is the only way in.
    pub fn spawn(mut self) -> HostHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                match req {
                    HostRequest::Workspaces(reply) => {
                        let _ = reply.send(self.workspaces.clone());
                    }
                    HostRequest::Notifications(reply) => {
                        let _ = reply.send(self.notifications.clone());
                    }
                    HostRequest::Status(reply) => {
                        let _ = reply.send(HostStatus {
                            version: env!("CARGO_PKG_VERSION").to_string(),
                            workspace_count: self.workspaces.len(),
                            selected_workspace: self
                                .workspaces
                                .iter()
                                .find(|w| w.is_selected)
                                .map(|w| w.id.clone()),
                            unread_count: self
                                .workspaces
                                .iter()
                                .map(|w| w.unread_count)
                                .sum(),
                        });
                    }
                    HostRequest::Command { command, reply } => {
                        let _ = reply.send(self.handle_command(&command));
                    }
                }
            }
        });
        HostHandle::new(tx)
    }

    fn handle_command(&mut self, command: &str) -> String {
        let parsed: serde_json::Value = match serde_json::from_str(command) {
            Ok(v) => v,
            Err(e) => {
                return serde_json::json!({"ok": false, "error": e.to_string()}).to_string()
            }
        };
        match parsed.get("method").and_then(|m| m.as_str()) {
            Some("workspace.select") => {
                let id = parsed
                    .pointer("/params/id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let mut found = false;
                for ws in &mut self.workspaces {
                    ws.is_selected = ws.id == id;
                    found |= ws.is_selected;
                }
                serde_json::json!({"ok": found}).to_string()
            }
            Some("workspace.new") => {
                let directory = parsed
                    .pointer("/params/directory")
                    .and_then(|v| v.as_str())
                    .unwrap_or("~")
                    .to_string();
                let id = uuid::Uuid::new_v4().to_string();
                self.workspaces.push(WorkspaceSnapshot {
                    id: id.clone(),
                    title: directory.clone(),
                    directory,
                    panel_count: 1,
                    unread_count: 0,
                    is_pinned: false,
                    is_tmux_enabled: parsed
                        .pointer("/params/tmux")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    is_selected: false,
                    color: None,
                    panels: None,
                    layout: None,
                });
                serde_json::json!({"ok": true, "workspaceId": id}).to_string()
            }
            Some("workspace.setTmux") => {
                let id = parsed.pointer("/params/id").and_then(|v| v.as_str());
                let enabled = parsed
                    .pointer("/params/enabled")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                for ws in &mut self.workspaces {
                    if Some(ws.id.as_str()) == id {
                        ws.is_tmux_enabled = enabled;
                    }
                }
                serde_json::json!({"ok": true, "tmuxEnabled": enabled}).to_string()
            }
            Some("workspace.split") => serde_json::json!({"ok": true}).to_string(),
            // Unknown methods acknowledge with an empty reply; the bridge
            // turns that into {ok:true}.
            _ => String::new(),
        }
    }
}
