//! One forked shell behind one pseudo-terminal.
//!
//! Output flows from a blocking read pump into a broadcast channel; the
//! attached client's forwarder subscribes to it. The pump lives as long as
//! the child does, so detaching and reattaching a client never touches the
//! PTY itself — output produced while no client is subscribed is dropped,
//! which is the contract: the client-side emulator owns render state and a
//! tmux-backed session replays on attach.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SpawnError;

/// Identity of a terminal WebSocket connection.
pub type ClientId = Uuid;

pub const EXIT_MESSAGE: &str = "\r\n[Process exited]\r\n";
const READ_BUFFER_SIZE: usize = 16 * 1024;
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// How to populate the PTY: a tmux attach or a plain login shell.
#[derive(Debug, Clone)]
pub enum SpawnTarget {
    LoginShell,
    /// Attach to an existing tmux session via the resolved binary path.
    TmuxAttach { bin: String, session: String },
}

struct PtyInner {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Option<Box<dyn Child + Send>>,
}

#[derive(Default)]
struct AttachState {
    client: Option<ClientId>,
    last_disconnected_at: Option<Instant>,
}

pub struct PtySession {
    pub id: String,
    pub working_dir: PathBuf,
    pub tmux_name: Option<String>,
    pid: u32,
    inner: Mutex<PtyInner>,
    attach: Mutex<AttachState>,
    terminated: Arc<AtomicBool>,
    output_tx: broadcast::Sender<String>,
}

impl PtySession {
    pub fn spawn(
        working_dir: &Path,
        cols: u16,
        rows: u16,
        target: SpawnTarget,
    ) -> Result<Arc<Self>, SpawnError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SpawnError(e.to_string()))?;

        let mut cmd = match &target {
            SpawnTarget::TmuxAttach { bin, session } => {
                let mut cmd = CommandBuilder::new(bin);
                cmd.args(["-u", "attach-session", "-t", session.as_str()]);
                cmd
            }
            SpawnTarget::LoginShell => {
                let shell =
                    std::env::var("SHELL").unwrap_or_else(|_| "/bin/zsh".to_string());
                let mut cmd = CommandBuilder::new(&shell);
                cmd.arg("-l");
                cmd.env("SHELL", &shell);
                cmd
            }
        };
        cmd.cwd(working_dir);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("LANG", "en_US.UTF-8");
        cmd.env("LC_ALL", "en_US.UTF-8");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SpawnError(e.to_string()))?;
        let pid = child.process_id().unwrap_or(0);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError(e.to_string()))?;

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let tmux_name = match target {
            SpawnTarget::TmuxAttach { session, .. } => Some(session),
            SpawnTarget::LoginShell => None,
        };

        let session = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            working_dir: working_dir.to_path_buf(),
            tmux_name,
            pid,
            inner: Mutex::new(PtyInner {
                master: Some(pair.master),
                writer: Some(writer),
                child: Some(child),
            }),
            attach: Mutex::new(AttachState::default()),
            terminated: Arc::new(AtomicBool::new(false)),
            output_tx: output_tx.clone(),
        });

        spawn_read_pump(session.id.clone(), reader, output_tx, session.terminated.clone());
        info!("[pty:{}] spawned pid {} in {:?}", session.id, pid, working_dir);
        Ok(session)
    }

    /// Subscribe to the output stream. Frames are UTF-8 text; bytes that do
    /// not decode arrive as Latin-1 code points.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.output_tx.subscribe()
    }

    /// Best-effort write of shell input.
    pub fn write(&self, text: &str) {
        let mut inner = self.inner.lock();
        if let Some(writer) = inner.writer.as_mut() {
            if let Err(e) = writer.write_all(text.as_bytes()).and_then(|_| writer.flush()) {
                warn!("[pty:{}] write failed: {}", self.id, e);
            }
        }
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        let inner = self.inner.lock();
        if let Some(master) = inner.master.as_ref() {
            if let Err(e) = master.resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            }) {
                warn!("[pty:{}] resize failed: {}", self.id, e);
            }
        }
    }

    pub fn attach(&self, client: ClientId) {
        let mut attach = self.attach.lock();
        attach.client = Some(client);
        attach.last_disconnected_at = None;
    }

    pub fn detach(&self) {
        let mut attach = self.attach.lock();
        attach.client = None;
        attach.last_disconnected_at = Some(Instant::now());
    }

    /// Bind a new client after a disconnect. The PTY and its pump are
    /// untouched; only the attachment bookkeeping changes.
    pub fn reattach(&self, client: ClientId) {
        self.attach(client);
    }

    pub fn attached_client(&self) -> Option<ClientId> {
        self.attach.lock().client
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn is_orphaned(&self) -> bool {
        !self.is_terminated() && self.attach.lock().client.is_none()
    }

    pub fn orphaned_since(&self) -> Option<Instant> {
        self.attach.lock().last_disconnected_at
    }

    /// Idempotent teardown: SIGHUP the child, reap it off-thread, close the
    /// master exactly once.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let (master, writer, child) = {
            let mut inner = self.inner.lock();
            (inner.master.take(), inner.writer.take(), inner.child.take())
        };
        drop(writer);
        drop(master);

        if self.pid != 0 {
            if let Err(e) = kill(Pid::from_raw(self.pid as i32), Signal::SIGHUP) {
                debug!("[pty:{}] SIGHUP pid {} failed: {}", self.id, self.pid, e);
            }
        }
        if let Some(mut child) = child {
            let id = self.id.clone();
            tokio::task::spawn_blocking(move || {
                let _ = child.wait();
                debug!("[pty:{}] child reaped", id);
            });
        }
        info!("[pty:{}] terminated", self.id);
    }
}

/// Blocking read loop feeding the output channel. Exits on EOF or a hard
/// read error; never closes the master (terminate owns that).
fn spawn_read_pump(
    session_id: String,
    mut reader: Box<dyn Read + Send>,
    output_tx: broadcast::Sender<String>,
    terminated: Arc<AtomicBool>,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut carry = Utf8Carry::default();
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(text) = carry.push(&buf[..n]) {
                        let _ = output_tx.send(text);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(e) => {
                    if !terminated.load(Ordering::SeqCst) {
                        warn!("[pty:{}] read error: {}", session_id, e);
                    }
                    break;
                }
            }
        }
        if let Some(rest) = carry.flush() {
            let _ = output_tx.send(rest);
        }
        let _ = output_tx.send(EXIT_MESSAGE.to_string());
        debug!("[pty:{}] read pump finished", session_id);
    });
}

/// Incremental UTF-8 decoder. A trailing incomplete sequence is carried to
/// the next chunk; genuinely invalid bytes are mapped through Latin-1 so no
/// byte is ever dropped.
#[derive(Default)]
struct Utf8Carry {
    buf: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, data: &[u8]) -> Option<String> {
        self.buf.extend_from_slice(data);
        match std::str::from_utf8(&self.buf) {
            Ok(s) => {
                let out = s.to_string();
                self.buf.clear();
                Some(out)
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                if valid == 0 {
                    return None;
                }
                let out = String::from_utf8_lossy(&self.buf[..valid]).into_owned();
                self.buf.drain(..valid);
                Some(out)
            }
            Err(_) => {
                let out = latin1(&self.buf);
                self.buf.clear();
                Some(out)
            }
        }
    }

    fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let out = latin1(&self.buf);
        self.buf.clear();
        Some(out)
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
