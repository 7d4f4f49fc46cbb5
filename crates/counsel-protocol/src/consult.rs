//! Consultation request/response surface shared with external callers.

use serde::{Deserialize, Serialize};

/// One question posed to the consultation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationRequest {
    /// The question text. Must be non-empty after trimming.
    pub question: String,
    /// Maximum chunks to retrieve; falls back to the configured default.
    #[serde(default)]
    pub max_chunks: Option<usize>,
    /// Minimum relevance for a chunk to survive filtering; configured default
    /// when absent.
    #[serde(default)]
    pub min_relevance: Option<f32>,
    /// Whether chunk provenance is included in the response.
    #[serde(default = "default_include_sources")]
    pub include_sources: bool,
    /// Requested answer style; configured default when absent.
    #[serde(default)]
    pub response_style: Option<ResponseStyle>,
}

impl ConsultationRequest {
    /// Build a request with defaults for everything but the question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            max_chunks: None,
            min_relevance: None,
            include_sources: default_include_sources(),
            response_style: None,
        }
    }
}

/// Default toggle for including sources in responses.
fn default_include_sources() -> bool {
    true
}

/// The assembled answer for one consultation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationResponse {
    /// Final answer text.
    pub answer: String,
    /// Confidence in [0.0, 1.0]; 0.0 for empty retrieval, capped when
    /// degraded.
    pub confidence: f32,
    /// Provenance of the chunks that informed the answer.
    pub sources: Vec<SourceRef>,
    /// Chunks that went through relevance analysis.
    pub chunks_analyzed: usize,
    /// Chunks that survived filtering and fed generation.
    pub chunks_used: usize,
    /// True when any stage fell back to degraded behavior.
    pub degraded: bool,
    /// Wall-clock seconds spent in the pipeline.
    pub processing_time: f64,
    /// Identifier of the model that produced the answer (or the fallback
    /// marker).
    pub model_used: String,
}

/// Provenance for one chunk used in an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    /// Document the chunk came from.
    pub document_id: String,
    /// Excerpt of the chunk text.
    pub excerpt: String,
    /// Relevance score the chunk carried into generation.
    pub relevance_score: f32,
}

/// Answer style requested by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    /// Short, direct answer.
    #[default]
    Concise,
    /// Fuller prose with context.
    Detailed,
    /// Precise wording with citations inline.
    Technical,
}

impl ResponseStyle {
    /// Stable lowercase name used in logs and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStyle::Concise => "concise",
            ResponseStyle::Detailed => "detailed",
            ResponseStyle::Technical => "technical",
        }
    }
}

/// Generation parameters forwarded to the reasoning model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationParams {
    /// Requested answer style.
    #[serde(default)]
    pub style: ResponseStyle,
    /// Hard cap on answer length in characters, when set.
    #[serde(default)]
    pub max_answer_chars: Option<usize>,
}
