use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cmux_remote::host::{StubHost, WorkspaceSnapshot};
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
        panel_count: 1,
        unread_count: 0,
        is_pinned: false,
        is_tmux_enabled: false,
        is_selected: true,
        color: None,
        panels: None,
        layout: None,
    }
}

async fn start_server(grace: Duration) -> (SocketAddr, Arc<AppState>) {
    std::env::set_var("SHELL", "/bin/sh");
    let host = StubHost::new(vec![demo_workspace()]).spawn();
    let state = AppState::with_parts(
        RemoteConfig {
            enabled: true,
            port: 4848,
            ..RemoteConfig::default()
        },
        host,
        PtyManager::with_grace(grace),
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

async fn connect_terminal(addr: SocketAddr) -> Ws {
    let (ws, _) = tokio::time::timeout(
        Duration::from_secs(10),
        connect_async(format!("ws://{}/ws/terminal", addr)),
    )
    .await
    .expect("ws connect timed out")
    .unwrap();
    ws
}

/// Read frames until one parses as JSON with the given type.
async fn expect_frame(ws: &mut Ws, frame_type: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws.next().await.expect("socket closed").unwrap();
            if let Message::Text(text) = msg {
                if let Ok(v) = serde_json::from_str::<Value>(&text) {
                    if v.get("type").and_then(|t| t.as_str()) == Some(frame_type) {
                        return v;
                    }
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("did not receive {frame_type} frame in time"))
}

/// Accumulate text frames until `needle` shows up in the output.
async fn expect_output(ws: &mut Ws, needle: &str) {
    let mut seen = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                seen.push_str(&text);
                if seen.contains(needle) {
                    return;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("did not see {needle:?} in output: {seen:?}"));
}

#[tokio::test]
async fn init_creates_session_and_echoes_input() {
    let (addr, _state) = start_server(Duration::from_secs(60)).await;
    let mut ws = connect_terminal(addr).await;

    ws.send(Message::Text(
        json!({"type": "init", "dir": "/tmp", "cols": 80, "rows": 24}).to_string(),
    ))
    .await
    .unwrap();

    let created = expect_frame(&mut ws, "session_created").await;
    assert!(created["sessionId"].as_str().is_some_and(|s| !s.is_empty()));

    ws.send(Message::Text(
        json!({"type": "input", "data": "echo terminal-roundtrip\n"}).to_string(),
    ))
    .await
    .unwrap();
    expect_output(&mut ws, "terminal-roundtrip").await;

    // A resize must be accepted silently.
    ws.send(Message::Text(
        json!({"type": "resize", "cols": 120, "rows": 40}).to_string(),
    ))
    .await
    .unwrap();

    let _ = ws.send(Message::Close(None)).await;
}

#[tokio::test]
async fn reconnect_resumes_the_same_shell() {
    let (addr, _state) = start_server(Duration::from_secs(60)).await;

    let mut ws1 = connect_terminal(addr).await;
    ws1.send(Message::Text(
        json!({"type": "init", "dir": "/tmp"}).to_string(),
    ))
    .await
    .unwrap();
    let created = expect_frame(&mut ws1, "session_created").await;
    let session_id = created["sessionId"].as_str().unwrap().to_string();

    // Leave a mark in shell state before dropping the connection.
    ws1.send(Message::Text(
        json!({"type": "input", "data": "MARKER=w123\n"}).to_string(),
    ))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let _ = ws1.send(Message::Close(None)).await;
    drop(ws1);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut ws2 = connect_terminal(addr).await;
    ws2.send(Message::Text(
        json!({"type": "reconnect", "sessionId": session_id}).to_string(),
    ))
    .await
    .unwrap();
    let reconnected = expect_frame(&mut ws2, "reconnected").await;
    assert_eq!(reconnected["sessionId"], json!(session_id));

    ws2.send(Message::Text(
        json!({"type": "input", "data": "echo got-$MARKER\n"}).to_string(),
    ))
    .await
    .unwrap();
    expect_output(&mut ws2, "got-w123").await;

    let _ = ws2.send(Message::Close(None)).await;
}

#[tokio::test]
async fn init_reattaches_orphan_in_same_directory() {
    let (addr, _state) = start_server(Duration::from_secs(60)).await;

    let mut ws1 = connect_terminal(addr).await;
    ws1.send(Message::Text(
        json!({"type": "init", "dir": "/tmp"}).to_string(),
    ))
    .await
    .unwrap();
    let created = expect_frame(&mut ws1, "session_created").await;
    let session_id = created["sessionId"].as_str().unwrap().to_string();
    let _ = ws1.send(Message::Close(None)).await;
    drop(ws1);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut ws2 = connect_terminal(addr).await;
    ws2.send(Message::Text(
        json!({"type": "init", "dir": "/tmp"}).to_string(),
    ))
    .await
    .unwrap();
    let reconnected = expect_frame(&mut ws2, "reconnected").await;
    assert_eq!(reconnected["sessionId"], json!(session_id));

    let _ = ws2.send(Message::Close(None)).await;
}

#[tokio::test]
async fn reconnect_fails_for_unknown_or_reaped_sessions() {
    let (addr, state) = start_server(Duration::ZERO).await;

    // Unknown id.
    let mut ws = connect_terminal(addr).await;
    ws.send(Message::Text(
        json!({"type": "reconnect", "sessionId": "nope"}).to_string(),
    ))
    .await
    .unwrap();
    expect_frame(&mut ws, "reconnect_failed").await;
    let _ = ws.send(Message::Close(None)).await;

    // Reaped orphan: grace is zero, so one reap pass claims it.
    let mut ws1 = connect_terminal(addr).await;
    ws1.send(Message::Text(
        json!({"type": "init", "dir": "/tmp"}).to_string(),
    ))
    .await
    .unwrap();
    let created = expect_frame(&mut ws1, "session_created").await;
    let session_id = created["sessionId"].as_str().unwrap().to_string();
    let _ = ws1.send(Message::Close(None)).await;
    drop(ws1);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(state.manager.reap_orphans(), 1);

    let mut ws2 = connect_terminal(addr).await;
    ws2.send(Message::Text(
        json!({"type": "reconnect", "sessionId": session_id}).to_string(),
    ))
    .await
    .unwrap();
    expect_frame(&mut ws2, "reconnect_failed").await;
    let _ = ws2.send(Message::Close(None)).await;
}

#[tokio::test]
async fn garbage_handshake_reports_error_and_recovers() {
    let (addr, _state) = start_server(Duration::from_secs(60)).await;
    let mut ws = connect_terminal(addr).await;

    ws.send(Message::Text("open sesame".into())).await.unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match err {
        Message::Text(text) => {
            let v: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(v["error"], "Expected init or reconnect message");
        }
        other => panic!("unexpected frame {other:?}"),
    }

    // The handshake state is unchanged; a proper init still works.
    ws.send(Message::Text(
        json!({"type": "init", "dir": "/tmp"}).to_string(),
    ))
    .await
    .unwrap();
    expect_frame(&mut ws, "session_created").await;
    let _ = ws.send(Message::Close(None)).await;
}
