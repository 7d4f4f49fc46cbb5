//! In-process transport for running the service inside the supervisor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use counsel_protocol::{
    Heartbeat, ServiceReply, ServiceReplyEnvelope, ServiceRequestEnvelope, ServiceTransport,
    TransportError, ensure_version,
};

use crate::host::ServiceHost;

/// Transport that dispatches straight into a [`ServiceHost`].
///
/// Embedded deployments skip the child process and its pipes entirely.
/// Heartbeats are synthesized on demand, so staleness detection never
/// fires on this channel. A host that accepted `Shutdown` stays stopped;
/// `restart` only revives the channel flag.
#[derive(Debug)]
pub struct InProcessTransport {
    host: Arc<ServiceHost>,
    seq: AtomicU64,
    alive: AtomicBool,
}

impl InProcessTransport {
    pub fn new(host: Arc<ServiceHost>) -> Self {
        Self {
            host,
            seq: AtomicU64::new(0),
            alive: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl ServiceTransport for InProcessTransport {
    async fn request(
        &self,
        envelope: ServiceRequestEnvelope,
    ) -> Result<ServiceReplyEnvelope, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        ensure_version(envelope.version)?;
        let reply = self.host.handle(envelope.payload).await;
        if matches!(reply, ServiceReply::ShuttingDown) {
            self.alive.store(false, Ordering::SeqCst);
        }
        Ok(ServiceReplyEnvelope::answering(envelope.id, reply))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.host.is_stopping()
    }

    fn last_heartbeat(&self) -> Option<Heartbeat> {
        Some(self.host.heartbeat(self.seq.fetch_add(1, Ordering::Relaxed)))
    }

    async fn restart(&self) -> Result<(), TransportError> {
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }
}
