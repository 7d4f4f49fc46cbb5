//! Relevance analysis over retrieved chunks.
//!
//! Scores come from the utility model when it is enabled, from the fallback
//! uniform score of 1.0 when it is not reachable, and are pinned to 1.0 when
//! scoring is disabled outright. Filtering always retains the best chunk, so
//! an aggressive threshold cannot empty a non-empty retrieval.

use crate::service::ModelServiceClient;
use crate::tuning::SharedTuning;
use counsel_index::Chunk;
use log::debug;
use std::cmp::Ordering;

/// Result of the analysis stage.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    /// Surviving chunks, ordered by descending relevance.
    pub kept: Vec<Chunk>,
    /// Number of candidates that entered analysis.
    pub analyzed: usize,
    /// Whether scores came from the fallback path.
    pub degraded: bool,
}

/// Scores and filters retrieval candidates.
pub struct RelevanceAnalyzer {
    tuning: SharedTuning,
}

impl RelevanceAnalyzer {
    pub fn new(tuning: SharedTuning) -> Self {
        Self { tuning }
    }

    /// Score `candidates` against `question` and drop those below the
    /// threshold. `min_relevance` overrides the configured threshold for
    /// this call only.
    pub async fn analyze(
        &self,
        client: &ModelServiceClient,
        question: &str,
        mut candidates: Vec<Chunk>,
        min_relevance: Option<f32>,
    ) -> AnalysisOutcome {
        let analyzed = candidates.len();
        if candidates.is_empty() {
            return AnalysisOutcome {
                kept: Vec::new(),
                analyzed,
                degraded: false,
            };
        }

        let tuning = self.tuning.snapshot();
        let threshold = min_relevance.unwrap_or(tuning.relevance_threshold);

        let degraded = if tuning.utility_enabled {
            let texts: Vec<String> = candidates
                .iter()
                .map(|chunk| chunk.text.clone())
                .collect();
            let outcome = client.score(question, &texts).await;
            let degraded = outcome.is_degraded();
            for (chunk, score) in candidates.iter_mut().zip(outcome.into_value()) {
                chunk.relevance = score;
            }
            degraded
        } else {
            for chunk in candidates.iter_mut() {
                chunk.relevance = 1.0;
            }
            false
        };

        let kept = filter_by_threshold(candidates, threshold);
        debug!(
            "analysis complete (analyzed={}, kept={}, threshold={}, degraded={})",
            analyzed,
            kept.len(),
            threshold,
            degraded
        );
        AnalysisOutcome {
            kept,
            analyzed,
            degraded,
        }
    }
}

/// Keep chunks scoring at or above `threshold`, ordered by descending
/// relevance. The single best chunk survives even when everything scores
/// below the threshold.
pub fn filter_by_threshold(mut chunks: Vec<Chunk>, threshold: f32) -> Vec<Chunk> {
    if chunks.is_empty() {
        return chunks;
    }
    chunks.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
    });
    let cutoff = chunks
        .iter()
        .take_while(|chunk| chunk.relevance >= threshold)
        .count();
    chunks.truncate(cutoff.max(1));
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthRecord;
    use counsel_protocol::{ServiceReply, ServiceRequest};
    use counsel_test_utils::{ScriptStep, ScriptedTransport, test_config};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn scored(document_id: &str, relevance: f32) -> Chunk {
        let mut chunk = Chunk::new(document_id, format!("text of {document_id}"), vec![1.0]);
        chunk.relevance = relevance;
        chunk
    }

    fn analyzer_parts(
        transport: Arc<ScriptedTransport>,
    ) -> (RelevanceAnalyzer, ModelServiceClient, SharedTuning) {
        let config = Arc::new(test_config());
        let tuning = SharedTuning::new(&config.analysis);
        let client = ModelServiceClient::new(
            transport,
            config,
            Arc::new(HealthRecord::new("model-service")),
        );
        (RelevanceAnalyzer::new(tuning.clone()), client, tuning)
    }

    fn candidate_chunks() -> Vec<Chunk> {
        vec![
            Chunk::new("doc-a", "first candidate", vec![1.0]),
            Chunk::new("doc-b", "second candidate", vec![1.0]),
            Chunk::new("doc-c", "third candidate", vec![1.0]),
        ]
    }

    #[test]
    fn threshold_drops_low_scores_and_orders_descending() {
        let kept = filter_by_threshold(
            vec![scored("a", 0.4), scored("b", 0.9), scored("c", 0.1)],
            0.3,
        );
        let relevances: Vec<f32> = kept.iter().map(|chunk| chunk.relevance).collect();
        assert_eq!(relevances, vec![0.9, 0.4]);
    }

    #[test]
    fn best_chunk_survives_any_threshold() {
        let kept = filter_by_threshold(
            vec![scored("a", 0.2), scored("b", 0.05)],
            0.95,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].document_id, "a");
    }

    #[test]
    fn raising_the_threshold_keeps_a_subset() {
        let chunks = vec![scored("a", 0.9), scored("b", 0.5), scored("c", 0.2)];
        let loose = filter_by_threshold(chunks.clone(), 0.1);
        let strict = filter_by_threshold(chunks, 0.6);
        for chunk in &strict {
            assert!(loose.iter().any(|kept| kept.document_id == chunk.document_id));
        }
    }

    #[tokio::test]
    async fn analyze_scores_and_filters() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(ServiceReply::Scores {
            scores: vec![0.9, 0.4, 0.1],
            model: "utility".to_string(),
        });
        let (analyzer, client, _) = analyzer_parts(transport);

        let outcome = analyzer
            .analyze(&client, "question", candidate_chunks(), None)
            .await;
        assert_eq!(outcome.analyzed, 3);
        assert_eq!(outcome.kept.len(), 2);
        assert!(!outcome.degraded);
        assert_eq!(outcome.kept[0].document_id, "doc-a");
        assert_eq!(outcome.kept[1].document_id, "doc-b");
    }

    #[tokio::test]
    async fn analyze_disabled_pins_scores_without_calling_the_service() {
        let transport = Arc::new(ScriptedTransport::new());
        let seen = Arc::clone(&transport);
        let (analyzer, client, tuning) = analyzer_parts(transport);
        tuning.update(crate::tuning::Tuning {
            relevance_threshold: 0.3,
            utility_enabled: false,
        });

        let outcome = analyzer
            .analyze(&client, "question", candidate_chunks(), None)
            .await;
        assert_eq!(outcome.kept.len(), 3);
        assert!(!outcome.degraded);
        assert!(outcome.kept.iter().all(|chunk| chunk.relevance == 1.0));
        assert!(seen.seen_requests().is_empty());
    }

    #[tokio::test]
    async fn analyze_degrades_to_uniform_scores_on_crash() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(ScriptStep::Crash);
        let (analyzer, client, _) = analyzer_parts(transport);

        let outcome = analyzer
            .analyze(&client, "question", candidate_chunks(), None)
            .await;
        assert!(outcome.degraded);
        assert_eq!(outcome.kept.len(), 3);
        assert!(outcome.kept.iter().all(|chunk| chunk.relevance == 1.0));
    }

    #[tokio::test]
    async fn per_call_override_beats_configured_threshold() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(ServiceReply::Scores {
            scores: vec![0.9, 0.4, 0.1],
            model: "utility".to_string(),
        });
        let (analyzer, client, _) = analyzer_parts(transport);

        let outcome = analyzer
            .analyze(&client, "question", candidate_chunks(), Some(0.85))
            .await;
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].document_id, "doc-a");
    }

    #[tokio::test]
    async fn analyze_sends_chunk_texts_in_order() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(ServiceReply::Scores {
            scores: vec![0.5, 0.5, 0.5],
            model: "utility".to_string(),
        });
        let seen = Arc::clone(&transport);
        let (analyzer, client, _) = analyzer_parts(transport);

        analyzer
            .analyze(&client, "the question", candidate_chunks(), None)
            .await;
        let requests = seen.seen_requests();
        assert_eq!(requests.len(), 1);
        match &requests[0] {
            ServiceRequest::Score { question, chunks } => {
                assert_eq!(question, "the question");
                assert_eq!(chunks[0], "first candidate");
                assert_eq!(chunks[2], "third candidate");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }
}
