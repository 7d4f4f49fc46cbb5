//! Line-protocol serving loop over stdin/stdout.
//!
//! Requests arrive one JSON envelope per line on stdin; replies and
//! heartbeats leave one per line on stdout. Logs go to stderr so they never
//! corrupt the channel. Requests dispatch concurrently, so replies may
//! leave out of order; the supervisor correlates them by envelope id.

use std::sync::Arc;

use counsel_protocol::{
    ServiceMessage, ServiceReply, ServiceReplyEnvelope, ServiceRequestEnvelope, decode_message,
    encode_message, ensure_version,
};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::host::ServiceHost;

const OUTBOUND_BUFFER: usize = 64;

/// Serve requests until stdin closes or a shutdown request is accepted.
pub async fn serve(host: Arc<ServiceHost>) {
    let (outbound, outbound_rx) = mpsc::channel::<ServiceMessage>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(write_outbound(outbound_rx));
    let heartbeats = spawn_heartbeats(Arc::clone(&host), outbound.clone());
    let (stop, mut stopped) = watch::channel(false);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    dispatch_line(Arc::clone(&host), outbound.clone(), stop.clone(), line);
                }
                Ok(None) => {
                    info!("stdin closed, stopping service loop");
                    break;
                }
                Err(err) => {
                    warn!("failed to read stdin (error={err})");
                    break;
                }
            },
            _ = stopped.changed() => {
                if *stopped.borrow() {
                    break;
                }
            }
        }
    }

    heartbeats.abort();
    // Dropping the last sender lets the writer drain and exit.
    drop(outbound);
    let _ = writer.await;
}

fn dispatch_line(
    host: Arc<ServiceHost>,
    outbound: mpsc::Sender<ServiceMessage>,
    stop: watch::Sender<bool>,
    line: String,
) {
    let envelope: ServiceRequestEnvelope = match decode_message(&line) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!("corrupted request line, skipping (error={err})");
            return;
        }
    };
    let ServiceRequestEnvelope {
        id,
        version,
        payload,
        ..
    } = envelope;
    tokio::spawn(async move {
        let reply = match ensure_version(version) {
            Ok(()) => host.handle(payload).await,
            Err(err) => ServiceReply::Error {
                kind: counsel_protocol::ServiceErrorKind::UnsupportedVersion,
                message: err.to_string(),
            },
        };
        let stopping = matches!(reply, ServiceReply::ShuttingDown);
        let message = ServiceMessage::Reply(ServiceReplyEnvelope::answering(id, reply));
        if outbound.send(message).await.is_err() {
            warn!("outbound channel closed before reply could be sent");
        }
        if stopping {
            let _ = stop.send(true);
        }
    });
}

fn spawn_heartbeats(
    host: Arc<ServiceHost>,
    outbound: mpsc::Sender<ServiceMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(host.heartbeat_interval());
        let mut seq: u64 = 0;
        loop {
            ticker.tick().await;
            let beat = ServiceMessage::Heartbeat(host.heartbeat(seq));
            seq = seq.wrapping_add(1);
            if outbound.send(beat).await.is_err() {
                break;
            }
        }
    })
}

async fn write_outbound(mut outbound_rx: mpsc::Receiver<ServiceMessage>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = outbound_rx.recv().await {
        let line = match encode_message(&message) {
            Ok(line) => line,
            Err(err) => {
                warn!("failed to encode outbound message (error={err})");
                continue;
            }
        };
        if stdout.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if stdout.write_all(b"\n").await.is_err() {
            break;
        }
        let _ = stdout.flush().await;
    }
}
