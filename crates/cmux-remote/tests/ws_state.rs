use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cmux_remote::broadcast::spawn_timers;
use cmux_remote::host::{NotificationSnapshot, StubHost, WorkspaceSnapshot};
use cmux_remote::manager::PtyManager;
use cmux_remote::tmux::TmuxCoordinator;
use cmux_remote::{build_router, AppState, RemoteConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn demo_workspace() -> WorkspaceSnapshot {
    WorkspaceSnapshot {
        id: "w1".into(),
        title: "scratch".into(),
        directory: "/tmp".into(),
        panel_count: 2,
        unread_count: 1,
        is_pinned: false,
        is_tmux_enabled: false,
        is_selected: true,
        color: Some("#5aa7ff".into()),
        panels: None,
        layout: None,
    }
}

async fn start_server() -> (SocketAddr, Arc<AppState>) {
    let host = StubHost::new(vec![demo_workspace()]).spawn();
    let state = AppState::with_parts(
        RemoteConfig {
            enabled: true,
            port: 4848,
            ..RemoteConfig::default()
        },
        host,
        PtyManager::new(),
        TmuxCoordinator::with_binary("/nonexistent/tmux".into()),
    );
    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect_state(addr: SocketAddr) -> Ws {
    let (ws, _) = tokio::time::timeout(
        Duration::from_secs(10),
        connect_async(format!("ws://{}/ws", addr)),
    )
    .await
    .expect("ws connect timed out")
    .unwrap();
    ws
}

async fn next_json(ws: &mut Ws) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                if let Ok(v) = serde_json::from_str(&text) {
                    return v;
                }
            }
        }
    })
    .await
    .expect("no frame in time")
}

#[tokio::test]
async fn commands_echo_their_request_id() {
    let (addr, _state) = start_server().await;
    let mut ws = connect_state(addr).await;

    // Pongs are swallowed, not bridged.
    ws.send(Message::Text(json!({"type": "pong"}).to_string()))
        .await
        .unwrap();

    ws.send(Message::Text(
        json!({
            "jsonrpc": "2.0",
            "method": "workspace.select",
            "params": {"id": "w1"},
            "id": 99,
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["id"], 99);
    assert_eq!(reply["ok"], true);
}

#[tokio::test]
async fn unknown_commands_acknowledge() {
    let (addr, _state) = start_server().await;
    let mut ws = connect_state(addr).await;

    ws.send(Message::Text(
        json!({"method": "no.such.method", "id": "abc"}).to_string(),
    ))
    .await
    .unwrap();

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["id"], "abc");
    assert_eq!(reply["ok"], true);
}

#[tokio::test]
async fn state_timer_broadcasts_workspace_snapshots() {
    let (addr, state) = start_server().await;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let _timers = spawn_timers(state.clone(), shutdown_rx);

    let mut ws = connect_state(addr).await;

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let v = next_json(&mut ws).await;
            if v["type"] == "state" {
                return v;
            }
        }
    })
    .await
    .expect("no state frame within the broadcast interval");

    let workspaces = frame["data"].as_array().unwrap();
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0]["id"], "w1");
    assert_eq!(workspaces[0]["panelCount"], 2);
    assert!(frame["tmuxSessions"].is_array());

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn notifications_reach_connected_clients() {
    let (addr, state) = start_server().await;
    let mut ws = connect_state(addr).await;

    // The subscription is registered during the upgrade; wait for it.
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.hub.client_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    state.hub.forward_notification(&NotificationSnapshot {
        id: "n1".into(),
        title: "tests finished".into(),
        subtitle: "panel 2".into(),
        body: "all green".into(),
        tab_id: "t1".into(),
        is_read: false,
        created_at: "2026-08-02T10:00:00Z".into(),
    });

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["title"], "tests finished");
    assert_eq!(frame["tabId"], "t1");
}
