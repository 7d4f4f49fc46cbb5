//! Chunk model shared by the index and the consultation pipeline.

use serde::{Deserialize, Serialize};

/// A retrievable document chunk with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Identifier of the source document.
    pub document_id: String,
    /// Chunk text content.
    pub text: String,
    /// Embedding vector for similarity search.
    pub embedding: Vec<f32>,
    /// Relevance score assigned during retrieval and analysis.
    #[serde(default = "default_relevance")]
    pub relevance: f32,
}

impl Chunk {
    /// Create a chunk with the default relevance.
    pub fn new(
        document_id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            text: text.into(),
            embedding,
            relevance: default_relevance(),
        }
    }
}

fn default_relevance() -> f32 {
    1.0
}

/// Outcome of a similarity search over the index.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// Matching chunks ordered by descending relevance.
    pub chunks: Vec<Chunk>,
    /// Embedding of the query used for the search.
    pub query_embedding: Vec<f32>,
    /// Number of chunks that were requested.
    pub requested_k: usize,
}

impl RetrievalResult {
    /// An empty result for a query with no matches.
    pub fn empty(query_embedding: Vec<f32>, requested_k: usize) -> Self {
        Self {
            chunks: Vec::new(),
            query_embedding,
            requested_k,
        }
    }

    /// Number of retrieved chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether retrieval found anything at all.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chunk_relevance_defaults_to_one() {
        let json = r#"{ "document_id": "doc-1", "text": "hello", "embedding": [0.1, 0.2] }"#;
        let chunk: Chunk = serde_json::from_str(json).expect("chunk");
        assert_eq!(chunk.relevance, 1.0);
    }

    #[test]
    fn empty_result_reports_empty() {
        let result = RetrievalResult::empty(vec![0.0; 4], 5);
        assert!(result.is_empty());
        assert_eq!(result.len(), 0);
        assert_eq!(result.requested_k, 5);
    }
}
