//! Wire protocol types for the counsel model service channel and the
//! consultation API surface.

mod consult;
mod health;
mod model;
mod transport;
mod wire;

pub use consult::{
    ConsultationRequest, ConsultationResponse, GenerationParams, ResponseStyle, SourceRef,
};
pub use health::{HealthProbe, MemorySnapshot, ProcessReport, ProcessStatus, SystemStatus};
pub use model::{DeviceClass, ModelDescriptor};
pub use transport::{ServiceTransport, TransportError};
pub use wire::{ProtocolError, decode_message, encode_message, ensure_version};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version of the service wire protocol. Bumped on incompatible change.
pub const PROTOCOL_VERSION: u32 = 1;

/// Unique identifier for a service request.
pub type RequestId = Uuid;
/// Unique identifier for one consultation exchange.
pub type ConsultationId = Uuid;

/// Wrapper for requests sent to the model service process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequestEnvelope {
    /// Unique id for the request; replies echo it back.
    pub id: RequestId,
    /// Protocol version the sender speaks.
    pub version: u32,
    /// Timestamp when the request was created.
    pub created_at: DateTime<Utc>,
    /// Request payload content.
    pub payload: ServiceRequest,
}

impl ServiceRequestEnvelope {
    /// Wrap a payload in a fresh envelope at the current protocol version.
    pub fn new(payload: ServiceRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: PROTOCOL_VERSION,
            created_at: Utc::now(),
            payload,
        }
    }
}

/// All operations the model service accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum ServiceRequest {
    /// Score chunk relevance against a question with the utility model.
    Score {
        question: String,
        chunks: Vec<String>,
    },
    /// Generate an answer from a prompt with the reasoning model.
    Generate {
        prompt: String,
        params: GenerationParams,
    },
    /// Embed a text span with the embedding model.
    Embed { text: String },
    /// Report service health and loaded models.
    Health,
    /// Evict a loaded model by name (memory pressure relief).
    Evict { model: String },
    /// Stop the service cleanly.
    Shutdown,
}

/// Wrapper for replies from the model service process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceReplyEnvelope {
    /// Id of the request this reply answers.
    pub id: RequestId,
    /// Protocol version the service speaks.
    pub version: u32,
    /// Timestamp when the reply was created.
    pub created_at: DateTime<Utc>,
    /// Reply payload content.
    pub payload: ServiceReply,
}

impl ServiceReplyEnvelope {
    /// Build a reply envelope answering the given request id.
    pub fn answering(request_id: RequestId, payload: ServiceReply) -> Self {
        Self {
            id: request_id,
            version: PROTOCOL_VERSION,
            created_at: Utc::now(),
            payload,
        }
    }
}

/// All replies the model service can produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum ServiceReply {
    /// One relevance score per input chunk, same order.
    Scores { scores: Vec<f32>, model: String },
    /// Generated answer text.
    Generated { text: String, model: String },
    /// Embedding vector for the input text.
    Embedding { vector: Vec<f32>, model: String },
    /// Current service health snapshot.
    Health { probe: HealthProbe },
    /// Result of an eviction request.
    Evicted { model: String, was_loaded: bool },
    /// Acknowledgement that the service is stopping.
    ShuttingDown,
    /// The request failed inside the service.
    Error {
        kind: ServiceErrorKind,
        message: String,
    },
}

/// Failure categories the service reports over the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    /// A model could not be loaded (missing file or no memory at any tier).
    ModelLoad,
    /// The request was malformed or referenced an unknown model.
    InvalidRequest,
    /// The sender spoke an incompatible protocol version.
    UnsupportedVersion,
    /// Unexpected internal failure.
    Internal,
}

/// Any line the service writes on its outbound channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum ServiceMessage {
    /// Reply to a previously received request.
    Reply(ServiceReplyEnvelope),
    /// Unsolicited liveness beacon.
    Heartbeat(Heartbeat),
}

/// Periodic liveness beacon emitted by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Monotonic sequence number, starts at zero per process launch.
    pub seq: u64,
    /// Timestamp when the beacon was emitted.
    pub created_at: DateTime<Utc>,
    /// Names of models currently resident, least recently used first.
    pub loaded_models: Vec<String>,
    /// Memory usage at emission time.
    pub memory: MemorySnapshot,
}

/// Wrapper for observability events emitted during a consultation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultEventMsg {
    /// Unique id for the event.
    pub id: Uuid,
    /// Consultation the event belongs to.
    pub consultation_id: ConsultationId,
    /// Timestamp when the event was created.
    pub created_at: DateTime<Utc>,
    /// Event payload content.
    pub payload: ConsultEventPayload,
}

impl ConsultEventMsg {
    /// Wrap a payload in a fresh event for the given consultation.
    pub fn new(consultation_id: ConsultationId, payload: ConsultEventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            consultation_id,
            created_at: Utc::now(),
            payload,
        }
    }
}

/// All events emitted while a consultation moves through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum ConsultEventPayload {
    /// A pipeline stage began executing.
    StageStarted { stage: PipelineStage },
    /// Retrieval finished with the given candidate count.
    RetrievalCompleted { candidates: usize },
    /// Relevance analysis finished.
    AnalysisCompleted {
        analyzed: usize,
        kept: usize,
        degraded: bool,
    },
    /// Answer generation finished.
    GenerationCompleted { model: String, degraded: bool },
    /// The pipeline reached a terminal failure.
    PipelineFailed { message: String },
}

/// Stages of the consultation pipeline, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Vector search over the index.
    Searching,
    /// Relevance scoring and filtering.
    Analyzing,
    /// Answer generation.
    Generating,
    /// Terminal success.
    Done,
    /// Terminal failure on unrecoverable input error.
    Failed,
}

impl PipelineStage {
    /// Stable lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Searching => "searching",
            PipelineStage::Analyzing => "analyzing",
            PipelineStage::Generating => "generating",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

/// Sink interface for consultation observability events.
pub trait EventSink: Send + Sync {
    /// Emit an event to downstream listeners.
    fn emit(&self, event: ConsultEventMsg);
}
