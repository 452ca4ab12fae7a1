//! HTTP route table: embedded static bundle, the REST surface, and the two
//! WebSocket upgrade paths.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use http::header;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bridge;
use crate::error::ServerError;
use crate::{ws, AppState};

const INDEX_HTML: &str = include_str!("../static/index.html");
const STYLE_CSS: &str = include_str!("../static/style.css");
const APP_JS: &str = include_str!("../static/app.js");
const MANIFEST_JSON: &str = include_str!("../static/manifest.json");
const SW_JS: &str = include_str!("../static/sw.js");

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/style.css", get(style_css))
        .route("/app.js", get(app_js))
        .route("/manifest.json", get(manifest_json))
        .route("/sw.js", get(sw_js))
        .route("/api/status", get(api_status))
        .route("/api/workspaces", get(api_workspaces))
        .route("/api/notifications", get(api_notifications))
        .route("/api/workspaces/new", post(workspaces_new))
        .route("/api/workspaces/:id/select", post(workspace_select))
        .route("/api/workspaces/:id/tmux", post(workspace_set_tmux))
        .route("/api/workspaces/:id/split", post(workspace_split))
        .route("/api/command", post(api_command))
        .route("/api/tmux/sessions", get(tmux_sessions).delete(tmux_kill_all))
        .route("/api/tmux/sessions/:name", delete(tmux_kill_one))
        .route("/api/cc/sessions", get(cc_sessions))
        .route("/api/cc/resume", post(cc_resume))
        .route("/ws", get(ws::state_ws))
        .route("/ws/terminal", get(ws::terminal_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn style_css() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], STYLE_CSS)
}

async fn app_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        APP_JS,
    )
}

async fn manifest_json() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/manifest+json")], MANIFEST_JSON)
}

async fn sw_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        SW_JS,
    )
}

async fn api_status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ServerError> {
    let status = state
        .host
        .status()
        .await
        .map_err(|_| ServerError::HostUnavailable)?;
    Ok(Json(json!({
        "version": status.version,
        "workspaceCount": status.workspace_count,
        "selectedWorkspace": status.selected_workspace,
        "unreadCount": status.unread_count,
        "connectedClients": state.hub.client_count(),
        "port": state.config.port,
        "uptime": state.started_at.elapsed().as_secs(),
    })))
}

async fn api_workspaces(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ServerError> {
    let workspaces = state
        .host
        .workspaces()
        .await
        .map_err(|_| ServerError::HostUnavailable)?;
    Ok(Json(json!(workspaces)))
}

async fn api_notifications(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ServerError> {
    let mut notifications = state
        .host
        .notifications()
        .await
        .map_err(|_| ServerError::HostUnavailable)?;
    notifications.truncate(50);
    Ok(Json(json!(notifications)))
}

async fn workspace_select(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let cmd = json!({
        "jsonrpc": "2.0",
        "method": "workspace.select",
        "params": {"id": id},
    });
    Json(bridge::dispatch(&state.host, cmd.to_string()).await)
}

async fn api_command(State(state): State<Arc<AppState>>, body: String) -> Json<Value> {
    Json(bridge::dispatch(&state.host, body).await)
}

async fn workspaces_new(State(state): State<Arc<AppState>>, body: String) -> Json<Value> {
    let opts: Value = serde_json::from_str(&body).unwrap_or_else(|_| json!({}));
    let tmux = opts.get("tmux").and_then(|v| v.as_bool()).unwrap_or(false);
    let mut params = json!({"tmux": tmux});
    if let Some(dir) = opts.get("directory").and_then(|v| v.as_str()) {
        params["directory"] = json!(dir);
    }
    let cmd = json!({
        "jsonrpc": "2.0",
        "method": "workspace.new",
        "params": params,
    });
    let mut reply = bridge::dispatch(&state.host, cmd.to_string()).await;
    if let Some(obj) = reply.as_object_mut() {
        obj.entry("tmux").or_insert(json!(tmux));
    }
    Json(reply)
}

async fn workspace_set_tmux(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<Value>, ServerError> {
    let enabled = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("enabled").and_then(|e| e.as_bool()))
        .ok_or_else(|| ServerError::BadRequest("expected {\"enabled\": bool}".into()))?;
    let cmd = json!({
        "jsonrpc": "2.0",
        "method": "workspace.setTmux",
        "params": {"id": id, "enabled": enabled},
    });
    let mut reply = bridge::dispatch(&state.host, cmd.to_string()).await;
    if let Some(obj) = reply.as_object_mut() {
        obj.entry("tmuxEnabled").or_insert(json!(enabled));
    }
    Ok(Json(reply))
}

async fn workspace_split(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<Value>, ServerError> {
    let direction = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("direction").and_then(|d| d.as_str()).map(String::from))
        .filter(|d| d == "right" || d == "down")
        .ok_or_else(|| {
            ServerError::BadRequest("expected {\"direction\": \"right\"|\"down\"}".into())
        })?;
    let cmd = json!({
        "jsonrpc": "2.0",
        "method": "workspace.split",
        "params": {"id": id, "direction": direction},
    });
    Ok(Json(bridge::dispatch(&state.host, cmd.to_string()).await))
}

async fn tmux_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions: Vec<Value> = state
        .tmux
        .list_active_sessions()
        .await
        .into_iter()
        .map(|s| {
            let created = DateTime::<Utc>::from_timestamp(s.created, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            json!({
                "name": s.name,
                "created": created,
                "windowCount": s.window_count,
                "attached": s.attached_clients,
                "currentPath": s.current_path,
            })
        })
        .collect();
    Json(json!(sessions))
}

async fn tmux_kill_one(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<Value> {
    let killed = state.tmux.kill_session(&name).await;
    Json(json!({"ok": true, "killed": killed}))
}

async fn tmux_kill_all(State(state): State<Arc<AppState>>) -> Json<Value> {
    let killed = state.tmux.kill_all_sessions().await;
    Json(json!({"ok": true, "killed": killed}))
}

/// Recent agent transcripts under the host's state directory, newest first.
async fn cc_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let dir = state.config.cc_state_dir.clone();
    let summaries =
        tokio::task::spawn_blocking(move || scan_transcripts(&dir)).await.unwrap_or_default();
    Json(json!(summaries))
}

async fn cc_resume(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<Value>, ServerError> {
    let project_path = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("projectPath")
                .and_then(|p| p.as_str())
                .map(String::from)
        })
        .ok_or_else(|| ServerError::BadRequest("expected {\"projectPath\": string}".into()))?;
    let cmd = json!({
        "jsonrpc": "2.0",
        "method": "workspace.new",
        "params": {"directory": project_path},
    });
    Ok(Json(bridge::dispatch(&state.host, cmd.to_string()).await))
}

const CC_SESSION_LIMIT: usize = 20;

fn scan_transcripts(root: &FsPath) -> Vec<Value> {
    let Ok(projects) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for project in projects.flatten() {
        let project_path = decode_project_dir(&project.file_name().to_string_lossy());
        let Ok(files) = std::fs::read_dir(project.path()) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            if path.extension().is_none_or(|e| e != "jsonl") {
                continue;
            }
            let Ok(meta) = file.metadata() else { continue };
            let Ok(modified) = meta.modified() else { continue };
            entries.push((modified, path, project_path.clone(), meta.len()));
        }
    }

    entries.sort_by(|a, b| b.0.cmp(&a.0));
    entries
        .into_iter()
        .take(CC_SESSION_LIMIT)
        .map(|(modified, path, project_path, size)| {
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            json!({
                "id": id,
                "projectPath": project_path,
                "modifiedAt": DateTime::<Utc>::from(modified).to_rfc3339(),
                "sizeBytes": size,
            })
        })
        .collect()
}

/// Project directories encode the absolute path with dashes for separators
/// (`-root-crate` -> `/root/crate`). The mapping is lossy for paths that
/// themselves contain dashes; good enough for a jump-back-in list.
fn decode_project_dir(name: &str) -> String {
    if let Some(rest) = name.strip_prefix('-') {
        format!("/{}", rest.replace('-', "/"))
    } else {
        name.to_string()
    }
}
