//! Vector index trait and the in-memory implementation.

use crate::error::IndexError;
use crate::model::Chunk;
use async_trait::async_trait;
use log::{debug, info};
use std::cmp::Ordering;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[async_trait]
/// Similarity search abstraction used by the consultation pipeline.
pub trait VectorIndex: Send + Sync {
    /// Return up to `k` chunks ordered by descending similarity to the query.
    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<Chunk>, IndexError>;

    /// Number of chunks in the index.
    async fn len(&self) -> usize;

    /// Whether the index holds no chunks.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Brute-force cosine index holding all chunks in memory.
///
/// The index is built once at startup and is read-only afterwards, so
/// search takes `&self` and needs no locking.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorIndex {
    chunks: Vec<Chunk>,
    dimensions: Option<usize>,
}

impl InMemoryVectorIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an index from a JSONL file of chunk entries.
    ///
    /// Blank lines are skipped. A line that fails to decode aborts the
    /// load with the offending line number.
    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).open(path)?;
        let reader = BufReader::new(file);
        let mut index = Self::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(&line).map_err(|err| IndexError::Corrupted {
                line: number + 1,
                message: err.to_string(),
            })?;
            index.insert(chunk)?;
        }
        info!(
            "loaded vector index (path={}, chunks={}, dimensions={})",
            path.display(),
            index.chunks.len(),
            index.dimensions.unwrap_or(0)
        );
        Ok(index)
    }

    /// Insert a chunk, learning the index dimension from the first entry.
    pub fn insert(&mut self, chunk: Chunk) -> Result<(), IndexError> {
        match self.dimensions {
            Some(expected) if chunk.embedding.len() != expected => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: chunk.embedding.len(),
                });
            }
            Some(_) => {}
            None => self.dimensions = Some(chunk.embedding.len()),
        }
        self.chunks.push(chunk);
        Ok(())
    }

    /// Embedding dimension of stored chunks, if any chunk was inserted.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    /// Score every chunk against the query and return the top `k`.
    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<Chunk>, IndexError> {
        if self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let expected = self.dimensions.unwrap_or(query_embedding.len());
        if query_embedding.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                got: query_embedding.len(),
            });
        }

        let mut scored: Vec<Chunk> = self
            .chunks
            .iter()
            .map(|chunk| {
                let mut chunk = chunk.clone();
                chunk.relevance = cosine_similarity(query_embedding, &chunk.embedding);
                chunk
            })
            .collect();
        scored.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(k);
        debug!(
            "index search complete (candidates={}, returned={})",
            self.chunks.len(),
            scored.len()
        );
        Ok(scored)
    }

    async fn len(&self) -> usize {
        self.chunks.len()
    }
}

/// Cosine similarity with a zero-magnitude guard.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::tempdir;

    fn chunk(document_id: &str, embedding: Vec<f32>) -> Chunk {
        Chunk::new(document_id, format!("text for {document_id}"), embedding)
    }

    #[tokio::test]
    async fn search_orders_by_similarity() {
        let mut index = InMemoryVectorIndex::new();
        index.insert(chunk("a", vec![1.0, 0.0, 0.0])).expect("a");
        index.insert(chunk("b", vec![0.0, 1.0, 0.0])).expect("b");
        index.insert(chunk("c", vec![0.9, 0.1, 0.0])).expect("c");

        let results = index.search(&[1.0, 0.0, 0.0], 2).await.expect("search");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document_id, "a");
        assert_eq!(results[1].document_id, "c");
        assert!(results[0].relevance > results[1].relevance);
    }

    #[tokio::test]
    async fn search_clamps_k_to_index_size() {
        let mut index = InMemoryVectorIndex::new();
        index.insert(chunk("a", vec![1.0, 0.0])).expect("a");

        let results = index.search(&[1.0, 0.0], 10).await.expect("search");
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn empty_index_returns_no_chunks() {
        let index = InMemoryVectorIndex::new();
        assert!(index.is_empty().await);
        let results = index.search(&[1.0, 0.0], 5).await.expect("search");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn mismatched_query_dimension_is_rejected() {
        let mut index = InMemoryVectorIndex::new();
        index.insert(chunk("a", vec![1.0, 0.0, 0.0])).expect("a");

        let err = index.search(&[1.0, 0.0], 1).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn insert_rejects_mismatched_dimensions() {
        let mut index = InMemoryVectorIndex::new();
        index.insert(chunk("a", vec![1.0, 0.0, 0.0])).expect("a");
        let err = index.insert(chunk("b", vec![1.0])).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
    }

    #[test]
    fn load_jsonl_skips_blank_lines() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("index.jsonl");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(
            file,
            r#"{{ "document_id": "a", "text": "alpha", "embedding": [1.0, 0.0] }}"#
        )
        .expect("line a");
        writeln!(file).expect("blank");
        writeln!(
            file,
            r#"{{ "document_id": "b", "text": "beta", "embedding": [0.0, 1.0] }}"#
        )
        .expect("line b");
        drop(file);

        let index = InMemoryVectorIndex::load_jsonl(&path).expect("load");
        assert_eq!(index.chunks.len(), 2);
        assert_eq!(index.dimensions(), Some(2));
    }

    #[test]
    fn load_jsonl_reports_corrupted_line() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("index.jsonl");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(
            file,
            r#"{{ "document_id": "a", "text": "alpha", "embedding": [1.0] }}"#
        )
        .expect("line a");
        writeln!(file, "not json").expect("bad line");
        drop(file);

        let err = InMemoryVectorIndex::load_jsonl(&path).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("line 2"));
    }

    #[test]
    fn cosine_similarity_guards_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
