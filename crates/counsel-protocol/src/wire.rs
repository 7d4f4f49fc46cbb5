//! Line-delimited JSON framing for the service channel.
//!
//! One message per line. An absent line means "no message yet"; a line that
//! fails to decode is a corrupted message. The two are never conflated.

use crate::PROTOCOL_VERSION;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a message failed.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    /// A received line was not a valid message.
    #[error("corrupted message: {0}")]
    Corrupted(#[source] serde_json::Error),
    /// The peer speaks an incompatible protocol version.
    #[error("unsupported protocol version {got} (expected {want})")]
    Version { got: u32, want: u32 },
}

/// Encode a message as a single JSON line (without the trailing newline).
pub fn encode_message<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Decode one received line into a message.
pub fn decode_message<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(line.trim()).map_err(ProtocolError::Corrupted)
}

/// Reject envelopes from peers speaking a different protocol version.
pub fn ensure_version(version: u32) -> Result<(), ProtocolError> {
    if version == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ProtocolError::Version {
            got: version,
            want: PROTOCOL_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServiceRequest, ServiceRequestEnvelope};
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_then_decode_preserves_payload() {
        let envelope = ServiceRequestEnvelope::new(ServiceRequest::Embed {
            text: "redundancy terms".to_string(),
        });
        let line = encode_message(&envelope).expect("encode");
        assert!(!line.contains('\n'));
        let decoded: ServiceRequestEnvelope = decode_message(&line).expect("decode");
        assert_eq!(decoded.id, envelope.id);
    }

    #[test]
    fn corrupted_line_is_reported_as_corrupted() {
        let result: Result<ServiceRequestEnvelope, _> = decode_message("{ not json");
        assert!(matches!(result, Err(ProtocolError::Corrupted(_))));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        assert!(ensure_version(crate::PROTOCOL_VERSION).is_ok());
        let err = ensure_version(99).expect_err("mismatch");
        assert!(matches!(err, ProtocolError::Version { got: 99, .. }));
    }
}
