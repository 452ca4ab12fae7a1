//! Server lifecycle: pre-bind port eviction, bind with retry, the axum
//! serve task, and the periodic timers — all torn down deterministically by
//! `stop()`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::broadcast::spawn_timers;
use crate::error::StartupError;
use crate::host::NotificationSnapshot;
use crate::port::{bind_with_retry, release_port};
use crate::routes::build_router;
use crate::AppState;

pub struct Server {
    state: Arc<AppState>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    pub fn new(state: Arc<AppState>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state,
            running: AtomicBool::new(false),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind and serve. Returns `Ok(None)` when remote access is disabled,
    /// the bound address otherwise. On bind failure the server stays
    /// stopped and the error is returned for the caller to log.
    pub async fn start(&self) -> Result<Option<SocketAddr>, StartupError> {
        if !self.state.config.enabled {
            info!("[server] remote access disabled, not starting");
            return Ok(None);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            info!("[server] already running");
            return Ok(None);
        }

        let port = self.state.config.port;
        release_port(port).await;

        let listener = match bind_with_retry(&format!("0.0.0.0:{}", port), port).await {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let addr = listener.local_addr().map_err(|_| StartupError {
            port,
            attempts: 1,
        })?;

        self.shutdown.send_replace(false);

        let app = build_router(self.state.clone());
        let mut shutdown_rx = self.shutdown.subscribe();
        let serve_task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(e) = serve.await {
                error!("[server] serve error: {}", e);
            }
        });

        let mut tasks = spawn_timers(self.state.clone(), self.shutdown.subscribe());
        tasks.push(serve_task);
        *self.tasks.lock() = tasks;

        info!("[server] listening on {}", addr);
        Ok(Some(addr))
    }

    /// Stop the listener, end every timer, and terminate all PTY sessions.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.state.manager.remove_all();
        info!("[server] stopped");
    }

    /// Push a notification from the host to every connected state client.
    pub fn forward_notification(&self, notification: &NotificationSnapshot) {
        self.state.hub.forward_notification(notification);
    }
}
