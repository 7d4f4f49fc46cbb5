use async_trait::async_trait;
use chrono::Utc;
use counsel_protocol::{
    Heartbeat, MemorySnapshot, ServiceReply, ServiceReplyEnvelope, ServiceRequest,
    ServiceRequestEnvelope, ServiceTransport, TransportError,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// One step in a scripted transport exchange.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Answer the next request with this payload.
    Reply(ServiceReply),
    /// Answer after a delay, for deadline tests.
    DelayedReply(Duration, ServiceReply),
    /// Fail the next request with a closed channel and mark the process dead.
    Crash,
}

/// Transport double that replays a scripted sequence of replies and records
/// every request it sees.
///
/// When the script is exhausted, health requests are answered with a ready
/// probe and anything else gets an internal error, so a test that forgets a
/// step fails loudly.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Arc<Mutex<Vec<ServiceRequest>>>,
    heartbeat: Mutex<Option<Heartbeat>>,
    alive: AtomicBool,
    restarts: AtomicUsize,
    revive_on_restart: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
            heartbeat: Mutex::new(None),
            alive: AtomicBool::new(true),
            restarts: AtomicUsize::new(0),
            revive_on_restart: AtomicBool::new(true),
        }
    }

    /// Append a step to the script.
    pub fn push(&self, step: ScriptStep) {
        self.steps.lock().push_back(step);
    }

    /// Append a plain reply to the script.
    pub fn push_reply(&self, reply: ServiceReply) {
        self.push(ScriptStep::Reply(reply));
    }

    /// Requests observed so far, in arrival order.
    pub fn seen_requests(&self) -> Vec<ServiceRequest> {
        self.requests.lock().clone()
    }

    /// Number of restart calls issued against this transport.
    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Install the heartbeat returned by `last_heartbeat`.
    pub fn set_heartbeat(&self, heartbeat: Heartbeat) {
        *self.heartbeat.lock() = Some(heartbeat);
    }

    /// Mark the process dead without consuming a script step.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Control whether `restart` brings the process back. Defaults to true;
    /// disable to simulate a binary that can no longer start.
    pub fn set_revive_on_restart(&self, revive: bool) {
        self.revive_on_restart.store(revive, Ordering::SeqCst);
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceTransport for ScriptedTransport {
    async fn request(
        &self,
        envelope: ServiceRequestEnvelope,
    ) -> Result<ServiceReplyEnvelope, TransportError> {
        self.requests.lock().push(envelope.payload.clone());
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }

        let step = self.steps.lock().pop_front();
        let reply = match step {
            Some(ScriptStep::Reply(reply)) => reply,
            Some(ScriptStep::DelayedReply(delay, reply)) => {
                tokio::time::sleep(delay).await;
                reply
            }
            Some(ScriptStep::Crash) => {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ChannelClosed);
            }
            None => match envelope.payload {
                ServiceRequest::Health => ServiceReply::Health {
                    probe: ready_probe(),
                },
                _ => ServiceReply::Error {
                    kind: counsel_protocol::ServiceErrorKind::Internal,
                    message: "script exhausted".to_string(),
                },
            },
        };
        Ok(ServiceReplyEnvelope::answering(envelope.id, reply))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn last_heartbeat(&self) -> Option<Heartbeat> {
        self.heartbeat.lock().clone()
    }

    async fn restart(&self) -> Result<(), TransportError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        *self.heartbeat.lock() = None;
        if self.revive_on_restart.load(Ordering::SeqCst) {
            self.alive.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Transport double whose every request fails with a closed channel.
#[derive(Default)]
pub struct FailingTransport {
    restarts: AtomicUsize,
}

impl FailingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceTransport for FailingTransport {
    async fn request(
        &self,
        _envelope: ServiceRequestEnvelope,
    ) -> Result<ServiceReplyEnvelope, TransportError> {
        Err(TransportError::ChannelClosed)
    }

    fn is_alive(&self) -> bool {
        false
    }

    fn last_heartbeat(&self) -> Option<Heartbeat> {
        None
    }

    async fn restart(&self) -> Result<(), TransportError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport double that never answers, for timeout tests.
#[derive(Default)]
pub struct SilentTransport;

impl SilentTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceTransport for SilentTransport {
    async fn request(
        &self,
        _envelope: ServiceRequestEnvelope,
    ) -> Result<ServiceReplyEnvelope, TransportError> {
        std::future::pending().await
    }

    fn is_alive(&self) -> bool {
        true
    }

    fn last_heartbeat(&self) -> Option<Heartbeat> {
        None
    }

    async fn restart(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A heartbeat as a healthy service would emit it.
pub fn heartbeat(seq: u64, rss_mb: u64) -> Heartbeat {
    Heartbeat {
        seq,
        created_at: Utc::now(),
        loaded_models: vec!["embedder".to_string()],
        memory: MemorySnapshot {
            rss_mb,
            available_mb: 8192,
        },
    }
}

/// A probe reporting a ready service with nothing loaded.
pub fn ready_probe() -> counsel_protocol::HealthProbe {
    counsel_protocol::HealthProbe {
        ready: true,
        loaded_models: Vec::new(),
        memory: MemorySnapshot::default(),
        uptime_secs: 1,
    }
}
