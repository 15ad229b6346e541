//! Protocol error types

use contracts::DataType;
use thiserror::Error;

/// Frame-level parse failures
///
/// All variants are recoverable: the frame is NACKed and dropped, the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Envelope is structurally wrong
    #[error("malformed header: {reason}")]
    MalformedHeader { reason: String },

    /// CRC over DATA does not match the trailer
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// CRC valid but the typed payload is truncated
    #[error("malformed {data_type:?} payload: {reason}")]
    MalformedPayload { data_type: DataType, reason: String },
}

impl ProtocolError {
    pub fn malformed_header(reason: impl Into<String>) -> Self {
        Self::MalformedHeader {
            reason: reason.into(),
        }
    }

    pub fn malformed_payload(data_type: DataType, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            data_type,
            reason: reason.into(),
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedHeader { .. } => "malformed_header",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::MalformedPayload { .. } => "malformed_payload",
        }
    }
}

/// Crate result alias
pub type Result<T> = std::result::Result<T, ProtocolError>;
