//! Fan-out to state clients and the periodic timers behind it.
//!
//! Frames are serialized once and pushed through a broadcast channel; each
//! `/ws` connection runs its own forwarder task draining a receiver, so a
//! slow socket never stalls a timer or another client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::host::NotificationSnapshot;
use crate::tmux::TmuxSession;
use crate::AppState;

pub const STATE_INTERVAL: Duration = Duration::from_secs(2);
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
pub const REAP_INTERVAL: Duration = Duration::from_secs(15);
pub const TMUX_REFRESH_THROTTLE: Duration = Duration::from_secs(10);

const FRAME_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct TmuxCache {
    sessions: Vec<TmuxSession>,
    refreshed_at: Option<Instant>,
}

/// Shared hub for the state WebSocket channel.
pub struct StateHub {
    tx: broadcast::Sender<String>,
    tmux_cache: Mutex<TmuxCache>,
}

impl StateHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            tx,
            tmux_cache: Mutex::new(TmuxCache::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Number of currently connected state clients.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn send_frame(&self, frame: String) {
        // An error only means nobody is listening.
        let _ = self.tx.send(frame);
    }

    /// Push a notification handed over by the host to every state client.
    /// Clients that connect later never see it.
    pub fn forward_notification(&self, notification: &NotificationSnapshot) {
        let mut frame = match serde_json::to_value(notification) {
            Ok(Value::Object(map)) => map,
            _ => return,
        };
        frame.insert("type".to_string(), json!("notification"));
        self.send_frame(Value::Object(frame).to_string());
    }

    pub fn cached_tmux_sessions(&self) -> Vec<TmuxSession> {
        self.tmux_cache.lock().sessions.clone()
    }

    fn tmux_cache_is_stale(&self) -> bool {
        self.tmux_cache
            .lock()
            .refreshed_at
            .is_none_or(|t| t.elapsed() >= TMUX_REFRESH_THROTTLE)
    }

    fn update_tmux_cache(&self, sessions: Vec<TmuxSession>) {
        let mut cache = self.tmux_cache.lock();
        cache.sessions = sessions;
        cache.refreshed_at = Some(Instant::now());
    }
}

impl Default for StateHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Build and send one `{"type":"state"}` frame, refreshing the tmux
/// snapshot first when the throttle allows.
pub async fn broadcast_state(state: &AppState) {
    if state.hub.tmux_cache_is_stale() {
        let sessions = state.tmux.list_active_sessions().await;
        state.hub.update_tmux_cache(sessions);
    }
    let workspaces = match state.host.workspaces().await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("[state] workspace snapshot unavailable: {}", e);
            Vec::new()
        }
    };
    let frame = json!({
        "type": "state",
        "data": workspaces,
        "tmuxSessions": state.hub.cached_tmux_sessions(),
    });
    state.hub.send_frame(frame.to_string());
}

/// Start the periodic timers. Each loop exits when `shutdown` flips.
pub fn spawn_timers(
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let state_tick = {
        let state = state.clone();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if state.hub.client_count() > 0 {
                            broadcast_state(&state).await;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    let ping_tick = {
        let state = state.clone();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if state.hub.client_count() > 0 {
                            state.hub.send_frame(json!({"type": "ping"}).to_string());
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    let reap_tick = {
        let state = state;
        let mut shutdown = shutdown;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let reaped = state.manager.reap_orphans();
                        if reaped > 0 {
                            debug!("[reaper] terminated {} orphan(s)", reaped);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    vec![state_tick, ping_tick, reap_tick]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_frame_carries_type_and_fields() {
        let hub = StateHub::new();
        let mut rx = hub.subscribe();
        hub.forward_notification(&NotificationSnapshot {
            id: "n1".into(),
            title: "build".into(),
            subtitle: "worker".into(),
            body: "done \"ok\"".into(),
            tab_id: "t1".into(),
            is_read: false,
            created_at: "2026-08-02T10:00:00Z".into(),
        });
        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "notification");
        assert_eq!(frame["id"], "n1");
        assert_eq!(frame["body"], "done \"ok\"");
        assert_eq!(frame["isRead"], false);
    }

    #[test]
    fn client_count_tracks_subscriptions() {
        let hub = StateHub::new();
        assert_eq!(hub.client_count(), 0);
        let rx1 = hub.subscribe();
        let rx2 = hub.subscribe();
        assert_eq!(hub.client_count(), 2);
        drop(rx1);
        drop(rx2);
        assert_eq!(hub.client_count(), 0);
    }

    #[test]
    fn tmux_cache_throttles_refreshes() {
        let hub = StateHub::new();
        assert!(hub.tmux_cache_is_stale());
        hub.update_tmux_cache(Vec::new());
        assert!(!hub.tmux_cache_is_stale());
    }
}
