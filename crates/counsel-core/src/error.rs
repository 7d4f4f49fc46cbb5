//! Error types for the core consultation crate.

use counsel_config::ConfigError;
use counsel_index::IndexError;
use counsel_protocol::TransportError;
use thiserror::Error;

/// Errors returned by consultation and supervision operations.
#[derive(Debug, Error)]
pub enum CounselCoreError {
    /// Request failed validation before entering the pipeline.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A model is missing from the catalog or failed to load.
    #[error("model load error: {0}")]
    ModelLoad(String),
    /// An inference call exceeded its deadline.
    #[error("inference timeout ({operation} after {elapsed_ms}ms)")]
    InferenceTimeout {
        operation: &'static str,
        elapsed_ms: u64,
    },
    /// The model service crashed or its channel closed mid-call.
    #[error("service crashed: {0}")]
    ServiceCrashed(#[from] TransportError),
    /// The service replied with a structured error payload.
    #[error("service error: {0}")]
    Service(String),
    /// Index error.
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    /// Config error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Startup sequencing failed before the system became ready.
    #[error("startup error: {0}")]
    Startup(String),
}
