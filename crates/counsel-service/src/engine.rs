//! Inference engines behind the model service.
//!
//! Every engine is deterministic: embeddings come from hashed token counts,
//! relevance from token overlap and answers from the first context passage.
//! That keeps the serving stack testable end to end without model weights
//! while the wire contract stays identical to a weight-backed build.

use async_trait::async_trait;
use counsel_protocol::GenerationParams;
use regex::Regex;
use std::fmt::Debug;

use crate::error::ServiceError;

/// One loaded model able to answer inference requests.
///
/// Engines implement only the operations their role needs; the rest fall
/// through to an `Unsupported` error carrying the model name.
#[async_trait]
pub trait InferenceEngine: Send + Sync + Debug {
    /// Name of the model this engine serves.
    fn model_name(&self) -> &str;

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ServiceError> {
        Err(self.unsupported("embed"))
    }

    async fn score(&self, _question: &str, _chunks: &[String]) -> Result<Vec<f32>, ServiceError> {
        Err(self.unsupported("score"))
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, ServiceError> {
        Err(self.unsupported("generate"))
    }

    fn unsupported(&self, operation: &'static str) -> ServiceError {
        ServiceError::Unsupported {
            model: self.model_name().to_string(),
            operation,
        }
    }
}

/// Lowercased alphanumeric tokens of `text`.
fn word_tokens(text: &str) -> Vec<String> {
    let Ok(pattern) = Regex::new(r"[a-z0-9]+") else {
        return Vec::new();
    };
    pattern
        .find_iter(&text.to_lowercase())
        .map(|token| token.as_str().to_string())
        .collect()
}

/// FNV-1a over a token; stable across platforms and runs.
fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Embedder hashing tokens into a fixed-width bucket histogram.
///
/// The vector is L2-normalized so the index's cosine scoring sees unit
/// vectors. Identical text always embeds to the identical vector.
#[derive(Debug)]
pub struct HashEmbedder {
    model: String,
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model: model.into(),
            dimensions: dimensions.max(1),
        }
    }
}

#[async_trait]
impl InferenceEngine for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in word_tokens(text) {
            let bucket = (fnv1a(&token) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

/// Utility scorer measuring question-token coverage per chunk.
#[derive(Debug)]
pub struct OverlapScorer {
    model: String,
}

impl OverlapScorer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl InferenceEngine for OverlapScorer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, question: &str, chunks: &[String]) -> Result<Vec<f32>, ServiceError> {
        let question_tokens = word_tokens(question);
        if question_tokens.is_empty() {
            return Ok(vec![0.0; chunks.len()]);
        }
        let scores = chunks
            .iter()
            .map(|chunk| {
                let chunk_tokens = word_tokens(chunk);
                let overlap = question_tokens
                    .iter()
                    .filter(|token| chunk_tokens.contains(token))
                    .count();
                overlap as f32 / question_tokens.len() as f32
            })
            .collect();
        Ok(scores)
    }
}

/// First line of the first context passage in a consultation prompt.
fn first_passage(prompt: &str) -> Option<String> {
    let Ok(pattern) = Regex::new(r"\[1\] \(source: [^)]*\)\n([^\n]+)") else {
        return None;
    };
    pattern
        .captures(prompt)
        .and_then(|captures| captures.get(1))
        .map(|passage| passage.as_str().trim().to_string())
}

/// Generator answering from the highest-ranked context passage.
#[derive(Debug)]
pub struct TemplateGenerator {
    model: String,
}

impl TemplateGenerator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl InferenceEngine for TemplateGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ServiceError> {
        let mut answer = match first_passage(prompt) {
            Some(passage) => format!("Based on the indexed documents: {passage}"),
            None => "The indexed documents do not state an answer directly.".to_string(),
        };
        if let Some(limit) = params.max_answer_chars {
            if answer.chars().count() > limit {
                answer = answer.chars().take(limit).collect();
            }
        }
        Ok(answer)
    }
}
