//! The two WebSocket channels.
//!
//! `/ws` is the state channel: clients receive broadcast frames from the
//! hub and may send commands, which are bridged to the host with id
//! correlation. `/ws/terminal` binds a client to one PTY session via an
//! init/reconnect handshake, then shuttles input, resize, and output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bridge;
use crate::config::home_dir;
use crate::pty::{ClientId, PtySession, SpawnTarget};
use crate::AppState;

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

pub async fn state_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_state_socket(state, socket))
}

pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_terminal_socket(state, socket))
}

/// Per-connection outbound queue. Both the hub forwarder and the inbound
/// handler feed it; one task drains it into the socket so sends never
/// interleave.
fn spawn_drain(
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut sink: SplitSink<WebSocket, Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    })
}

async fn handle_state_socket(state: Arc<AppState>, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let drain = spawn_drain(out_rx, sink);

    let forwarder = {
        let mut rx = state.hub.subscribe();
        let out = out_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if out.send(Message::Text(frame)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("[state-ws] dropped {} frame(s) for slow client", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    info!("[state-ws] client connected ({} total)", state.hub.client_count());

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                let parsed: Option<Value> = serde_json::from_str(&text).ok();
                if parsed
                    .as_ref()
                    .and_then(|v| v.get("type"))
                    .and_then(|t| t.as_str())
                    == Some("pong")
                {
                    continue;
                }
                let id = parsed.as_ref().and_then(|v| v.get("id")).cloned();
                let reply = bridge::dispatch(&state.host, text).await;
                let reply = bridge::correlate(id, reply);
                if out_tx.send(Message::Text(reply.to_string())).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Binary frames are ignored on both channels.
            _ => {}
        }
    }

    forwarder.abort();
    drain.abort();
    info!("[state-ws] client disconnected");
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum SetupMessage {
    #[serde(rename = "init")]
    Init {
        dir: Option<String>,
        cols: Option<u16>,
        rows: Option<u16>,
        tmux: Option<String>,
    },
    #[serde(rename = "reconnect")]
    Reconnect {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

async fn handle_terminal_socket(state: Arc<AppState>, socket: WebSocket) {
    let client_id: ClientId = Uuid::new_v4();
    let (sink, mut stream) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let drain = spawn_drain(out_rx, sink);

    let mut attached: Option<Arc<PtySession>> = None;
    let mut forwarder: Option<JoinHandle<()>> = None;

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                if let Some(session) = &attached {
                    handle_attached_text(session, &text);
                } else if let Some(session) =
                    handle_setup_text(&state, client_id, &text, &out_tx)
                {
                    forwarder = Some(spawn_output_forwarder(&session, &out_tx));
                    attached = Some(session);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if attached.is_some() {
        // The session outlives us as an orphan; the reaper or a reconnect
        // decides its fate.
        state.manager.detach(client_id);
    }
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drain.abort();
}

/// Forward PTY output to this client as text frames, in read order.
fn spawn_output_forwarder(
    session: &Arc<PtySession>,
    out_tx: &mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    let mut rx = session.subscribe();
    let out = out_tx.clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(text) => {
                    if out.send(Message::Text(text)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Handshake handling while no session is bound. Returns the session to
/// attach, or None (an error frame has been sent and the state stays
/// `none`).
fn handle_setup_text(
    state: &AppState,
    client_id: ClientId,
    text: &str,
    out_tx: &mpsc::UnboundedSender<Message>,
) -> Option<Arc<PtySession>> {
    let send = |frame: Value| {
        let _ = out_tx.send(Message::Text(frame.to_string()));
    };

    let msg: SetupMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(_) => {
            send(json!({"error": "Expected init or reconnect message"}));
            return None;
        }
    };

    match msg {
        SetupMessage::Reconnect { session_id } => {
            if state.manager.find_orphan_by_id(&session_id).is_some()
                && state.manager.reattach(&session_id, client_id)
            {
                send(json!({"type": "reconnected", "sessionId": session_id}));
                state.manager.session_for(client_id)
            } else {
                send(json!({"type": "reconnect_failed"}));
                None
            }
        }
        SetupMessage::Init {
            dir,
            cols,
            rows,
            tmux,
        } => {
            let dir = resolve_dir(dir.as_deref());

            // Prefer picking an orphan back up over spawning a duplicate
            // shell: first by tmux session name, then by working directory.
            if let Some(name) = tmux.as_deref() {
                if let Some(orphan) = state.manager.find_orphan_by_tmux(name) {
                    if state.manager.reattach(&orphan.id, client_id) {
                        send(json!({"type": "reconnected", "sessionId": orphan.id}));
                        return Some(orphan);
                    }
                }
            }
            if let Some(orphan) = state.manager.find_orphans_by_dir(&dir).into_iter().next() {
                if state.manager.reattach(&orphan.id, client_id) {
                    send(json!({"type": "reconnected", "sessionId": orphan.id}));
                    return Some(orphan);
                }
            }

            let target = match tmux {
                Some(session) => SpawnTarget::TmuxAttach {
                    bin: state.tmux.binary().to_string(),
                    session,
                },
                None => SpawnTarget::LoginShell,
            };
            match state.manager.create_for(
                client_id,
                &dir,
                cols.unwrap_or(DEFAULT_COLS),
                rows.unwrap_or(DEFAULT_ROWS),
                target,
            ) {
                Ok(session) => {
                    send(json!({"type": "session_created", "sessionId": session.id}));
                    Some(session)
                }
                Err(e) => {
                    let _ = out_tx.send(Message::Text(format!(
                        "\r\n[Failed to create terminal: {}]\r\n",
                        e
                    )));
                    None
                }
            }
        }
    }
}

/// Messages while a session is bound: JSON control objects, or anything
/// else as raw shell input.
fn handle_attached_text(session: &PtySession, text: &str) {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(text) {
        if let Some(kind) = obj.get("type").and_then(|t| t.as_str()) {
            match kind {
                "input" => {
                    if let Some(data) = obj.get("data").and_then(|d| d.as_str()) {
                        session.write(data);
                    }
                }
                "resize" => {
                    let cols = obj
                        .get("cols")
                        .and_then(|c| c.as_u64())
                        .unwrap_or(DEFAULT_COLS as u64) as u16;
                    let rows = obj
                        .get("rows")
                        .and_then(|r| r.as_u64())
                        .unwrap_or(DEFAULT_ROWS as u64) as u16;
                    session.resize(cols, rows);
                }
                "pong" => {}
                other => debug!("[term-ws:{}] ignoring message type {}", session.id, other),
            }
            return;
        }
    }
    session.write(text);
}

fn resolve_dir(dir: Option<&str>) -> PathBuf {
    match dir {
        Some(d) if Path::new(d).is_dir() => PathBuf::from(d),
        _ => home_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_message_rejects_unknown_types() {
        assert!(serde_json::from_str::<SetupMessage>(r#"{"type":"bogus"}"#).is_err());
        assert!(serde_json::from_str::<SetupMessage>("not json").is_err());
        assert!(serde_json::from_str::<SetupMessage>(r#"{"dir":"/tmp"}"#).is_err());
    }

    #[test]
    fn setup_message_init_defaults_are_optional() {
        let msg: SetupMessage = serde_json::from_str(r#"{"type":"init"}"#).unwrap();
        match msg {
            SetupMessage::Init {
                dir,
                cols,
                rows,
                tmux,
            } => {
                assert!(dir.is_none() && cols.is_none() && rows.is_none() && tmux.is_none());
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn resolve_dir_falls_back_to_home() {
        std::env::set_var("HOME", "/tmp");
        assert_eq!(resolve_dir(Some("/tmp")), PathBuf::from("/tmp"));
        assert_eq!(resolve_dir(Some("/no/such/place")), PathBuf::from("/tmp"));
        assert_eq!(resolve_dir(None), PathBuf::from("/tmp"));
    }
}
