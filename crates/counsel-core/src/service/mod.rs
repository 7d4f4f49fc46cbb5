//! Typed client over the model service channel.
//!
//! The client owns deadlines and fallback behavior. Scoring and generation
//! degrade instead of failing; embedding is a hard dependency of retrieval
//! and propagates its errors. Every inference call records its outcome on
//! the shared health record, which the recovery automation reads.

mod process;

pub use process::ChildProcessTransport;

use crate::error::CounselCoreError;
use crate::health::HealthRecord;
use counsel_config::CounselConfig;
use counsel_protocol::{
    GenerationParams, HealthProbe, ServiceErrorKind, ServiceReply, ServiceRequest,
    ServiceRequestEnvelope, ServiceTransport, TransportError,
};
use log::warn;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a call that may be served by a fallback path.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The model service answered.
    Full(T),
    /// The model service failed and a fallback value stands in.
    Degraded(T),
}

impl<T> Outcome<T> {
    /// Borrow the carried value regardless of provenance.
    pub fn value(&self) -> &T {
        match self {
            Outcome::Full(value) | Outcome::Degraded(value) => value,
        }
    }

    /// Take the carried value regardless of provenance.
    pub fn into_value(self) -> T {
        match self {
            Outcome::Full(value) | Outcome::Degraded(value) => value,
        }
    }

    /// Whether the value came from the fallback path.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded(_))
    }
}

/// A generated answer and the model that produced it, when one did.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Answer text.
    pub text: String,
    /// Producing model name; `None` for fallback answers.
    pub model: Option<String>,
}

/// Client for scoring, generation, embedding and control calls against the
/// model service.
pub struct ModelServiceClient {
    transport: Arc<dyn ServiceTransport>,
    config: Arc<CounselConfig>,
    health: Arc<HealthRecord>,
}

impl ModelServiceClient {
    pub fn new(
        transport: Arc<dyn ServiceTransport>,
        config: Arc<CounselConfig>,
        health: Arc<HealthRecord>,
    ) -> Self {
        Self {
            transport,
            config,
            health,
        }
    }

    /// Score chunk relevance against a question with the utility model.
    ///
    /// Falls back to uniform relevance 1.0 when the service fails, times
    /// out, or returns a malformed score vector.
    pub async fn score(&self, question: &str, chunks: &[String]) -> Outcome<Vec<f32>> {
        if chunks.is_empty() {
            return Outcome::Full(Vec::new());
        }
        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.analysis.score_timeout_ms);
        let request = ServiceRequest::Score {
            question: question.to_string(),
            chunks: chunks.to_vec(),
        };
        match self.call("score", request, deadline).await {
            Ok(ServiceReply::Scores { scores, .. }) if scores.len() == chunks.len() => {
                self.health
                    .record_success(started.elapsed().as_millis() as u64);
                Outcome::Full(scores)
            }
            Ok(reply) => {
                self.health.record_failure();
                warn!(
                    "malformed scoring reply, using uniform relevance (expected={}, reply={:?})",
                    chunks.len(),
                    reply
                );
                Outcome::Degraded(vec![1.0; chunks.len()])
            }
            Err(err) => {
                self.health.record_failure();
                warn!("scoring failed, using uniform relevance (error={})", err);
                Outcome::Degraded(vec![1.0; chunks.len()])
            }
        }
    }

    /// Generate an answer with the reasoning model.
    ///
    /// Falls back to a retrieval-only summary of `fallback_excerpts` when
    /// the service fails or times out.
    pub async fn generate(
        &self,
        prompt: &str,
        params: GenerationParams,
        fallback_excerpts: &[String],
    ) -> Outcome<Generation> {
        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.generation.generate_timeout_ms);
        let request = ServiceRequest::Generate {
            prompt: prompt.to_string(),
            params,
        };
        match self.call("generate", request, deadline).await {
            Ok(ServiceReply::Generated { text, model }) => {
                self.health
                    .record_success(started.elapsed().as_millis() as u64);
                Outcome::Full(Generation {
                    text,
                    model: Some(model),
                })
            }
            Ok(reply) => {
                self.health.record_failure();
                warn!(
                    "malformed generation reply, using retrieval-only answer (reply={:?})",
                    reply
                );
                Outcome::Degraded(Generation {
                    text: fallback_answer(fallback_excerpts),
                    model: None,
                })
            }
            Err(err) => {
                self.health.record_failure();
                warn!(
                    "generation failed, using retrieval-only answer (error={})",
                    err
                );
                Outcome::Degraded(Generation {
                    text: fallback_answer(fallback_excerpts),
                    model: None,
                })
            }
        }
    }

    /// Embed a text span with the embedding model.
    ///
    /// Retrieval cannot proceed without an embedding, so failures propagate
    /// to the caller instead of degrading.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, CounselCoreError> {
        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.service.embed_timeout_ms);
        let request = ServiceRequest::Embed {
            text: text.to_string(),
        };
        match self.call("embed", request, deadline).await {
            Ok(ServiceReply::Embedding { vector, .. }) => {
                self.health
                    .record_success(started.elapsed().as_millis() as u64);
                Ok(vector)
            }
            Ok(_) => {
                self.health.record_failure();
                Err(CounselCoreError::Service(
                    "unexpected reply to embed".to_string(),
                ))
            }
            Err(err) => {
                self.health.record_failure();
                Err(err)
            }
        }
    }

    /// Probe service health. Control call; does not touch failure counters.
    pub async fn health_probe(&self) -> Result<HealthProbe, CounselCoreError> {
        let deadline = Duration::from_millis(self.config.recovery.probe_timeout_ms);
        match self.call("health", ServiceRequest::Health, deadline).await? {
            ServiceReply::Health { probe } => Ok(probe),
            _ => Err(CounselCoreError::Service(
                "unexpected reply to health probe".to_string(),
            )),
        }
    }

    /// Evict a loaded model by name, returning whether it was resident.
    ///
    /// Eviction drains in-flight calls on the model first, so it shares the
    /// generation deadline rather than the probe deadline.
    pub async fn evict(&self, model: &str) -> Result<bool, CounselCoreError> {
        let deadline = Duration::from_millis(self.config.generation.generate_timeout_ms);
        let request = ServiceRequest::Evict {
            model: model.to_string(),
        };
        match self.call("evict", request, deadline).await? {
            ServiceReply::Evicted { was_loaded, .. } => Ok(was_loaded),
            _ => Err(CounselCoreError::Service(
                "unexpected reply to evict".to_string(),
            )),
        }
    }

    /// Ask the service to stop cleanly. A channel that closes mid-call
    /// means the process already exited, which is the goal.
    pub async fn shutdown_service(&self) -> Result<(), CounselCoreError> {
        let deadline = Duration::from_millis(self.config.recovery.probe_timeout_ms);
        match self.call("shutdown", ServiceRequest::Shutdown, deadline).await {
            Ok(ServiceReply::ShuttingDown) => Ok(()),
            Ok(_) => Err(CounselCoreError::Service(
                "unexpected reply to shutdown".to_string(),
            )),
            Err(CounselCoreError::ServiceCrashed(TransportError::ChannelClosed)) => {
                warn!("service channel closed during shutdown, treating as stopped");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn call(
        &self,
        operation: &'static str,
        request: ServiceRequest,
        deadline: Duration,
    ) -> Result<ServiceReply, CounselCoreError> {
        let envelope = ServiceRequestEnvelope::new(request);
        let reply = match tokio::time::timeout(deadline, self.transport.request(envelope)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => return Err(CounselCoreError::ServiceCrashed(err)),
            Err(_) => {
                return Err(CounselCoreError::InferenceTimeout {
                    operation,
                    elapsed_ms: deadline.as_millis() as u64,
                });
            }
        };
        match reply.payload {
            ServiceReply::Error { kind, message } => Err(map_service_error(kind, message)),
            payload => Ok(payload),
        }
    }
}

/// Retrieval-only answer used when the generation model is unavailable.
pub fn fallback_answer(excerpts: &[String]) -> String {
    if excerpts.is_empty() {
        return "Full-model analysis was unavailable and no relevant passages were retrieved."
            .to_string();
    }
    let mut answer = String::from(
        "Full-model analysis was unavailable for this question. The following is a \
         retrieval-only summary of the most relevant passages:",
    );
    for (position, excerpt) in excerpts.iter().enumerate() {
        answer.push_str(&format!("\n{}. {}", position + 1, excerpt.trim()));
    }
    answer
}

fn map_service_error(kind: ServiceErrorKind, message: String) -> CounselCoreError {
    match kind {
        ServiceErrorKind::ModelLoad => CounselCoreError::ModelLoad(message),
        ServiceErrorKind::InvalidRequest => CounselCoreError::InvalidRequest(message),
        ServiceErrorKind::UnsupportedVersion | ServiceErrorKind::Internal => {
            CounselCoreError::Service(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counsel_test_utils::{ScriptStep, ScriptedTransport, SilentTransport, test_config};
    use pretty_assertions::assert_eq;

    fn client_over(transport: Arc<dyn ServiceTransport>) -> (ModelServiceClient, Arc<HealthRecord>) {
        let health = Arc::new(HealthRecord::new("model-service"));
        let client = ModelServiceClient::new(
            transport,
            Arc::new(test_config()),
            Arc::clone(&health),
        );
        (client, health)
    }

    fn chunk_texts(count: usize) -> Vec<String> {
        (0..count).map(|n| format!("chunk {n}")).collect()
    }

    #[tokio::test]
    async fn score_passes_scores_through() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(ServiceReply::Scores {
            scores: vec![0.9, 0.4, 0.1],
            model: "utility".to_string(),
        });
        let (client, health) = client_over(transport);

        let outcome = client.score("what is the notice period?", &chunk_texts(3)).await;
        assert_eq!(outcome, Outcome::Full(vec![0.9, 0.4, 0.1]));
        assert_eq!(health.total_successes(), 1);
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn score_skips_service_for_no_chunks() {
        let transport = Arc::new(ScriptedTransport::new());
        let seen = Arc::clone(&transport);
        let (client, _) = client_over(transport);

        let outcome = client.score("anything", &[]).await;
        assert_eq!(outcome, Outcome::Full(Vec::new()));
        assert!(seen.seen_requests().is_empty());
    }

    #[tokio::test]
    async fn score_falls_back_on_crash() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(ScriptStep::Crash);
        let (client, health) = client_over(transport);

        let outcome = client.score("q", &chunk_texts(2)).await;
        assert_eq!(outcome, Outcome::Degraded(vec![1.0, 1.0]));
        assert_eq!(health.consecutive_failures(), 1);
        assert_eq!(health.total_failures(), 1);
    }

    #[tokio::test]
    async fn score_falls_back_on_length_mismatch() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(ServiceReply::Scores {
            scores: vec![0.5],
            model: "utility".to_string(),
        });
        let (client, _) = client_over(transport);

        let outcome = client.score("q", &chunk_texts(3)).await;
        assert_eq!(outcome, Outcome::Degraded(vec![1.0, 1.0, 1.0]));
    }

    #[tokio::test]
    async fn generate_times_out_to_retrieval_only_answer() {
        let (client, health) = client_over(Arc::new(SilentTransport::new()));
        let excerpts = vec!["The notice period is thirty days.".to_string()];

        let outcome = client
            .generate("prompt", GenerationParams::default(), &excerpts)
            .await;
        assert!(outcome.is_degraded());
        let generation = outcome.into_value();
        assert_eq!(generation.model, None);
        assert!(generation.text.contains("retrieval-only"));
        assert!(generation.text.contains("The notice period is thirty days."));
        assert_eq!(health.total_failures(), 1);
    }

    #[tokio::test]
    async fn embed_propagates_model_load_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(ServiceReply::Error {
            kind: ServiceErrorKind::ModelLoad,
            message: "embedder weights missing".to_string(),
        });
        let (client, health) = client_over(transport);

        let err = client.embed("some text").await.unwrap_err();
        assert!(matches!(err, CounselCoreError::ModelLoad(_)));
        assert_eq!(health.total_failures(), 1);
    }

    #[tokio::test]
    async fn shutdown_tolerates_closed_channel() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.kill();
        let (client, _) = client_over(transport);

        client.shutdown_service().await.unwrap();
    }

    #[test]
    fn fallback_answer_numbers_excerpts() {
        let answer = fallback_answer(&[
            "First passage.".to_string(),
            "  Second passage.  ".to_string(),
        ]);
        assert!(answer.starts_with("Full-model analysis was unavailable"));
        assert!(answer.contains("\n1. First passage."));
        assert!(answer.contains("\n2. Second passage."));
    }

    #[test]
    fn fallback_answer_without_excerpts_says_so() {
        let answer = fallback_answer(&[]);
        assert!(answer.contains("no relevant passages"));
    }
}
