//! Transport seam between the service client and the model service.

use crate::wire::ProtocolError;
use crate::{Heartbeat, ServiceReplyEnvelope, ServiceRequestEnvelope};
use async_trait::async_trait;

/// Errors surfaced by a service transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The channel to the service is gone (process exited or pipes closed).
    #[error("service channel closed")]
    ChannelClosed,
    /// Reading or writing the channel failed.
    #[error("io failure on service channel: {0}")]
    Io(#[from] std::io::Error),
    /// A message arrived but could not be decoded.
    #[error("corrupted service message: {0}")]
    Corrupted(String),
    /// Spawning or respawning the service process failed.
    #[error("failed to launch service process: {0}")]
    Launch(String),
    /// Protocol-level failure (encoding or version mismatch).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Bidirectional channel to one model service instance.
///
/// Implementations correlate replies to requests by envelope id. Timeouts are
/// the caller's concern; a transport only reports channel-level outcomes.
#[async_trait]
pub trait ServiceTransport: Send + Sync {
    /// Send a request and wait for its correlated reply.
    async fn request(
        &self,
        envelope: ServiceRequestEnvelope,
    ) -> Result<ServiceReplyEnvelope, TransportError>;

    /// Whether the underlying channel is currently usable.
    fn is_alive(&self) -> bool;

    /// Most recent heartbeat observed on the channel, if any.
    fn last_heartbeat(&self) -> Option<Heartbeat>;

    /// Tear down and relaunch the service. Only recovery automation calls
    /// this; the client never does.
    async fn restart(&self) -> Result<(), TransportError>;
}
