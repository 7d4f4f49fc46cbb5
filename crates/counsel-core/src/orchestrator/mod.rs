//! The consultation pipeline: retrieve, analyze, generate.
//!
//! Stages run strictly in order within one consultation; concurrent
//! consultations are independent. Only invalid input and embedding failures
//! surface as errors. Everything downstream degrades into an answer that
//! says so.

pub mod analyzer;
pub mod prompt;

pub use analyzer::{AnalysisOutcome, RelevanceAnalyzer, filter_by_threshold};
pub use prompt::build_prompt;

use crate::error::CounselCoreError;
use crate::service::ModelServiceClient;
use crate::tuning::SharedTuning;
use counsel_config::CounselConfig;
use counsel_index::{Chunk, VectorIndex};
use counsel_protocol::{
    ConsultEventMsg, ConsultEventPayload, ConsultationId, ConsultationRequest,
    ConsultationResponse, EventSink, GenerationParams, PipelineStage, SourceRef,
};
use log::info;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Answer returned when retrieval finds nothing. Nothing is fabricated.
const NO_RESULTS_ANSWER: &str = "No relevant documents were found for this question. \
     Add documents to the index or rephrase the question.";

/// Model marker for answers produced by the retrieval-only fallback.
const FALLBACK_MODEL: &str = "retrieval-fallback";

/// Model marker when no model ran at all (empty retrieval).
const NO_MODEL: &str = "none";

/// Longest excerpt carried in a source reference.
const EXCERPT_MAX_CHARS: usize = 200;

/// Drives one consultation through searching, analyzing and generating.
pub struct ConsultOrchestrator {
    client: Arc<ModelServiceClient>,
    index: Arc<dyn VectorIndex>,
    analyzer: RelevanceAnalyzer,
    config: Arc<CounselConfig>,
    events: Arc<dyn EventSink>,
}

impl ConsultOrchestrator {
    pub fn new(
        client: Arc<ModelServiceClient>,
        index: Arc<dyn VectorIndex>,
        config: Arc<CounselConfig>,
        tuning: SharedTuning,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            client,
            index,
            analyzer: RelevanceAnalyzer::new(tuning),
            config,
            events,
        }
    }

    /// Answer one question against the indexed documents.
    pub async fn consult(
        &self,
        request: ConsultationRequest,
    ) -> Result<ConsultationResponse, CounselCoreError> {
        let started = Instant::now();
        let consultation_id = Uuid::new_v4();
        let question = request.question.trim().to_string();
        if question.is_empty() {
            let message = "question must not be empty".to_string();
            self.emit(
                consultation_id,
                ConsultEventPayload::PipelineFailed {
                    message: message.clone(),
                },
            );
            return Err(CounselCoreError::InvalidRequest(message));
        }
        info!(
            "consultation started (id={}, question_chars={})",
            consultation_id,
            question.len()
        );

        self.emit(
            consultation_id,
            ConsultEventPayload::StageStarted {
                stage: PipelineStage::Searching,
            },
        );
        let query_embedding = match self.client.embed(&question).await {
            Ok(embedding) => embedding,
            Err(err) => {
                self.fail(consultation_id, &err);
                return Err(err);
            }
        };
        let max_chunks = request
            .max_chunks
            .unwrap_or(self.config.retrieval.max_chunks)
            .max(1);
        let candidates = match self.index.search(&query_embedding, max_chunks).await {
            Ok(chunks) => chunks,
            Err(err) => {
                let err = CounselCoreError::from(err);
                self.fail(consultation_id, &err);
                return Err(err);
            }
        };
        self.emit(
            consultation_id,
            ConsultEventPayload::RetrievalCompleted {
                candidates: candidates.len(),
            },
        );

        if candidates.is_empty() {
            info!("consultation found no documents (id={})", consultation_id);
            self.emit(
                consultation_id,
                ConsultEventPayload::StageStarted {
                    stage: PipelineStage::Done,
                },
            );
            return Ok(no_results_response(started));
        }

        self.emit(
            consultation_id,
            ConsultEventPayload::StageStarted {
                stage: PipelineStage::Analyzing,
            },
        );
        let analysis = self
            .analyzer
            .analyze(&self.client, &question, candidates, request.min_relevance)
            .await;
        self.emit(
            consultation_id,
            ConsultEventPayload::AnalysisCompleted {
                analyzed: analysis.analyzed,
                kept: analysis.kept.len(),
                degraded: analysis.degraded,
            },
        );

        self.emit(
            consultation_id,
            ConsultEventPayload::StageStarted {
                stage: PipelineStage::Generating,
            },
        );
        let style = request
            .response_style
            .unwrap_or(self.config.generation.default_style);
        let prompt = build_prompt(&question, &analysis.kept, style);
        let params = GenerationParams {
            style,
            max_answer_chars: self.config.generation.max_answer_chars,
        };
        let excerpts: Vec<String> = analysis
            .kept
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect();
        let generation = self.client.generate(&prompt, params, &excerpts).await;
        let generation_degraded = generation.is_degraded();
        let generation = generation.into_value();
        let model_used = generation
            .model
            .unwrap_or_else(|| FALLBACK_MODEL.to_string());
        self.emit(
            consultation_id,
            ConsultEventPayload::GenerationCompleted {
                model: model_used.clone(),
                degraded: generation_degraded,
            },
        );

        let degraded = analysis.degraded || generation_degraded;
        let confidence = confidence_for(&analysis.kept, analysis.degraded, generation_degraded);
        let sources = if request.include_sources {
            source_refs(&analysis.kept)
        } else {
            Vec::new()
        };

        self.emit(
            consultation_id,
            ConsultEventPayload::StageStarted {
                stage: PipelineStage::Done,
            },
        );
        info!(
            "consultation complete (id={}, chunks_used={}, degraded={}, confidence={:.2})",
            consultation_id,
            analysis.kept.len(),
            degraded,
            confidence
        );
        Ok(ConsultationResponse {
            answer: generation.text,
            confidence,
            sources,
            chunks_analyzed: analysis.analyzed,
            chunks_used: analysis.kept.len(),
            degraded,
            processing_time: started.elapsed().as_secs_f64(),
            model_used,
        })
    }

    fn emit(&self, consultation_id: ConsultationId, payload: ConsultEventPayload) {
        self.events.emit(ConsultEventMsg::new(consultation_id, payload));
    }

    fn fail(&self, consultation_id: ConsultationId, err: &CounselCoreError) {
        self.emit(
            consultation_id,
            ConsultEventPayload::PipelineFailed {
                message: err.to_string(),
            },
        );
    }
}

fn no_results_response(started: Instant) -> ConsultationResponse {
    ConsultationResponse {
        answer: NO_RESULTS_ANSWER.to_string(),
        confidence: 0.0,
        sources: Vec::new(),
        chunks_analyzed: 0,
        chunks_used: 0,
        degraded: false,
        processing_time: started.elapsed().as_secs_f64(),
        model_used: NO_MODEL.to_string(),
    }
}

/// Confidence is the mean retained relevance, discounted when scoring fell
/// back to uniform values and capped at 0.3 when generation fell back.
fn confidence_for(kept: &[Chunk], scoring_degraded: bool, generation_degraded: bool) -> f32 {
    if kept.is_empty() {
        return 0.0;
    }
    let mean = kept.iter().map(|chunk| chunk.relevance).sum::<f32>() / kept.len() as f32;
    let mut confidence = mean.clamp(0.0, 1.0);
    if scoring_degraded {
        confidence *= 0.5;
    }
    if generation_degraded {
        confidence = confidence.min(0.3);
    }
    confidence
}

fn source_refs(chunks: &[Chunk]) -> Vec<SourceRef> {
    chunks
        .iter()
        .map(|chunk| SourceRef {
            document_id: chunk.document_id.clone(),
            excerpt: excerpt_of(&chunk.text),
            relevance_score: chunk.relevance,
        })
        .collect()
}

fn excerpt_of(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(EXCERPT_MAX_CHARS).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kept(relevances: &[f32]) -> Vec<Chunk> {
        relevances
            .iter()
            .enumerate()
            .map(|(n, relevance)| {
                let mut chunk = Chunk::new(format!("doc-{n}"), "text", vec![1.0]);
                chunk.relevance = *relevance;
                chunk
            })
            .collect()
    }

    #[test]
    fn confidence_is_mean_relevance_when_everything_succeeds() {
        let confidence = confidence_for(&kept(&[0.9, 0.4]), false, false);
        assert!((confidence - 0.65).abs() < 1e-6);
    }

    #[test]
    fn degraded_generation_caps_confidence() {
        let confidence = confidence_for(&kept(&[0.9, 0.8]), false, true);
        assert!(confidence <= 0.3);
    }

    #[test]
    fn degraded_scoring_discounts_confidence() {
        let confidence = confidence_for(&kept(&[1.0, 1.0]), true, false);
        assert!((confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_kept_means_zero_confidence() {
        assert_eq!(confidence_for(&[], false, false), 0.0);
    }

    #[test]
    fn long_excerpts_are_truncated() {
        let text = "x".repeat(500);
        let excerpt = excerpt_of(&text);
        assert!(excerpt.chars().count() <= EXCERPT_MAX_CHARS + 3);
        assert!(excerpt.ends_with("..."));
    }
}
