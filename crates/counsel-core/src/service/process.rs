//! Transport that spawns the model service binary and speaks line-delimited
//! JSON over its stdio.
//!
//! stdout carries protocol messages only; the child logs on stderr, which is
//! inherited. Replies are correlated to requests by envelope id, so calls
//! may be issued concurrently over the single pipe.

use async_trait::async_trait;
use counsel_protocol::{
    Heartbeat, RequestId, ServiceMessage, ServiceReplyEnvelope, ServiceRequestEnvelope,
    ServiceTransport, TransportError, decode_message, encode_message, ensure_version,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServiceReplyEnvelope>>>>;

struct ProcessHandle {
    child: Child,
    reader: JoinHandle<()>,
}

/// Channel to a spawned service process.
pub struct ChildProcessTransport {
    binary: PathBuf,
    args: Vec<String>,
    memory_limit_mb: Option<u64>,
    process: Mutex<Option<ProcessHandle>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    last_heartbeat: Arc<Mutex<Option<Heartbeat>>>,
    alive: Arc<AtomicBool>,
}

impl ChildProcessTransport {
    /// Spawn the service binary and start reading its outbound channel.
    pub async fn launch(
        binary: PathBuf,
        args: Vec<String>,
        memory_limit_mb: Option<u64>,
    ) -> Result<Self, TransportError> {
        let transport = Self {
            binary,
            args,
            memory_limit_mb,
            process: Mutex::new(None),
            stdin: tokio::sync::Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            last_heartbeat: Arc::new(Mutex::new(None)),
            alive: Arc::new(AtomicBool::new(false)),
        };
        transport.spawn().await?;
        Ok(transport)
    }

    async fn spawn(&self) -> Result<(), TransportError> {
        let mut command = Command::new(&self.binary);
        command.args(&self.args);
        command.stdin(std::process::Stdio::piped());
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::inherit());
        command.kill_on_drop(true);

        if let Some(limit_mb) = self.memory_limit_mb {
            debug!("service memory limit configured (limit_mb={})", limit_mb);
        }
        #[cfg(target_os = "linux")]
        {
            let limit_mb = self.memory_limit_mb;
            unsafe {
                command.pre_exec(move || apply_address_space_limit(limit_mb));
            }
        }

        let mut child = command
            .spawn()
            .map_err(|err| TransportError::Launch(format!("{}: {err}", self.binary.display())))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Launch("service stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Launch("service stdout not piped".to_string()))?;

        *self.last_heartbeat.lock() = None;
        self.alive.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(read_outbound(
            BufReader::new(stdout),
            Arc::clone(&self.pending),
            Arc::clone(&self.last_heartbeat),
            Arc::clone(&self.alive),
        ));
        *self.stdin.lock().await = Some(stdin);
        *self.process.lock() = Some(ProcessHandle { child, reader });
        info!("launched service process (binary={})", self.binary.display());
        Ok(())
    }

    fn fail_pending(&self) {
        let stale: Vec<_> = self.pending.lock().drain().collect();
        drop(stale);
    }
}

#[async_trait]
impl ServiceTransport for ChildProcessTransport {
    async fn request(
        &self,
        envelope: ServiceRequestEnvelope,
    ) -> Result<ServiceReplyEnvelope, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        let line = encode_message(&envelope)?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(envelope.id, tx);

        {
            let mut stdin = self.stdin.lock().await;
            let Some(stdin) = stdin.as_mut() else {
                self.pending.lock().remove(&envelope.id);
                return Err(TransportError::ChannelClosed);
            };
            if let Err(err) = write_line(stdin, &line).await {
                self.pending.lock().remove(&envelope.id);
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(err));
            }
        }

        rx.await.map_err(|_| TransportError::ChannelClosed)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn last_heartbeat(&self) -> Option<Heartbeat> {
        self.last_heartbeat.lock().clone()
    }

    async fn restart(&self) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        let old = self.process.lock().take();
        if let Some(mut handle) = old {
            handle.reader.abort();
            if let Err(err) = handle.child.kill().await {
                warn!("failed to kill service process (error={})", err);
            }
        }
        self.stdin.lock().await.take();
        self.fail_pending();
        self.spawn().await
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Read loop over the child's stdout. Ends at EOF or a read failure, which
/// marks the channel dead and fails every waiting request.
async fn read_outbound(
    mut reader: BufReader<ChildStdout>,
    pending: PendingMap,
    last_heartbeat: Arc<Mutex<Option<Heartbeat>>>,
    alive: Arc<AtomicBool>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!("failed to read service channel (error={})", err);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        match decode_message::<ServiceMessage>(&line) {
            Ok(ServiceMessage::Reply(reply)) => {
                if let Err(err) = ensure_version(reply.version) {
                    warn!("dropping service reply (error={})", err);
                    continue;
                }
                match pending.lock().remove(&reply.id) {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => debug!("reply for unknown request (id={})", reply.id),
                }
            }
            Ok(ServiceMessage::Heartbeat(beat)) => {
                *last_heartbeat.lock() = Some(beat);
            }
            Err(err) => {
                warn!("corrupted service message, skipping line (error={})", err);
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
    let stale: Vec<_> = pending.lock().drain().collect();
    drop(stale);
    info!("service outbound channel closed");
}

#[cfg(target_os = "linux")]
fn apply_address_space_limit(limit_mb: Option<u64>) -> std::io::Result<()> {
    if let Some(limit_mb) = limit_mb {
        let bytes = limit_mb.saturating_mul(1024 * 1024);
        let limit = libc::rlimit {
            rlim_cur: bytes,
            rlim_max: bytes,
        };
        if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
