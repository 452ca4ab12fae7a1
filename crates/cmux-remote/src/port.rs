//! Pre-bind port eviction.
//!
//! A previous instance that crashed mid-shutdown can leave a process holding
//! the configured port. Before binding we SIGKILL any foreign holder and
//! poll until the port is observed free.

use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::StartupError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const POLL_ATTEMPTS: u32 = 30;
const BIND_ATTEMPTS: u32 = 3;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Kill any process other than ourselves holding TCP `port`, then wait for
/// the port to be released. Listing failures are treated as "nothing to
/// kill". Completes within one poll when the port is already free.
pub async fn release_port(port: u16) {
    let own_pid = std::process::id();

    for attempt in 0..POLL_ATTEMPTS {
        let holders: Vec<u32> = list_port_holders(port)
            .await
            .into_iter()
            .filter(|pid| *pid != own_pid)
            .collect();

        if holders.is_empty() {
            return;
        }

        for pid in &holders {
            info!("[port] killing stale pid {} holding port {}", pid, port);
            if let Err(e) = kill(Pid::from_raw(*pid as i32), Signal::SIGKILL) {
                warn!("[port] failed to kill pid {}: {}", pid, e);
            }
        }

        if attempt + 1 < POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    warn!("[port] port {} still busy after {:?}", port, POLL_INTERVAL * POLL_ATTEMPTS);
}

/// PIDs with a TCP socket on `port`, via `lsof -ti tcp:<port>`. Errors and
/// non-zero exits (lsof exits 1 when nothing matches) yield an empty list.
async fn list_port_holders(port: u16) -> Vec<u32> {
    let output = tokio::process::Command::new("lsof")
        .arg("-ti")
        .arg(format!("tcp:{}", port))
        .output()
        .await;

    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect(),
        Err(e) => {
            warn!("[port] lsof failed: {}", e);
            Vec::new()
        }
    }
}

/// Bind `addr`, retrying a few times to ride out a just-killed holder whose
/// socket is still in teardown.
pub async fn bind_with_retry(addr: &str, port: u16) -> Result<TcpListener, StartupError> {
    for attempt in 1..=BIND_ATTEMPTS {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!("[port] bind attempt {}/{} failed: {}", attempt, BIND_ATTEMPTS, e);
                if attempt < BIND_ATTEMPTS {
                    tokio::time::sleep(BIND_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(StartupError {
        port,
        attempts: BIND_ATTEMPTS,
    })
}
