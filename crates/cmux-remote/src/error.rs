use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors surfaced by HTTP handlers. WebSocket handlers report errors
/// inline as JSON frames and never construct these.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Malformed request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn PTY: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Host application unavailable")]
    HostUnavailable,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::HostUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// PTY creation failed (openpty, exec, bad directory).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SpawnError(pub String);

/// The listener could not be bound after retries. The server stays stopped.
#[derive(Debug, thiserror::Error)]
#[error("could not bind port {port} after {attempts} attempts")]
pub struct StartupError {
    pub port: u16,
    pub attempts: u32,
}
