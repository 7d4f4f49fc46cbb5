//! Error types for the model service crate.

use counsel_protocol::{ProtocolError, ServiceErrorKind};
use thiserror::Error;

/// Errors raised inside the model service process.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A model could not be loaded; fatal for that model only.
    #[error("model load failed ({model}): {reason}")]
    ModelLoad { model: String, reason: String },
    /// A request referenced a model with no catalog entry.
    #[error("unknown model: {0}")]
    UnknownModel(String),
    /// The resolved model cannot serve the requested operation.
    #[error("model {model} does not support {operation}")]
    Unsupported {
        model: String,
        operation: &'static str,
    },
    /// The request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Encoding or decoding a wire message failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Reading or writing the service channel failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Wire-level category reported for this error.
    pub fn kind(&self) -> ServiceErrorKind {
        match self {
            ServiceError::ModelLoad { .. } => ServiceErrorKind::ModelLoad,
            ServiceError::UnknownModel(_)
            | ServiceError::Unsupported { .. }
            | ServiceError::InvalidRequest(_) => ServiceErrorKind::InvalidRequest,
            ServiceError::Protocol(ProtocolError::Version { .. }) => {
                ServiceErrorKind::UnsupportedVersion
            }
            ServiceError::Protocol(_) | ServiceError::Io(_) => ServiceErrorKind::Internal,
        }
    }
}
