//! Document chunk storage and similarity search for Counsel.

pub mod error;
pub mod index;
pub mod model;

/// Index error type.
pub use error::IndexError;
/// Vector index interface and the in-memory implementation.
pub use index::{InMemoryVectorIndex, VectorIndex, cosine_similarity};
/// Chunk and retrieval models.
pub use model::{Chunk, RetrievalResult};
