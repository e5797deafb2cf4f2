//! Error types for data element decoding and graph assembly.

use onestore_format::FormatError;
use onestore_types::{ExtendedGuid, TypeError};

use crate::stream::StreamObjectType;

/// Errors that can occur while decoding data elements or assembling a
/// package.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Format(#[from] FormatError),

    /// A declaration uses a partition this decoder does not understand.
    #[error("object {object} in group {group}: unrecognized partition {partition}")]
    UnrecognizedPartition {
        group: ExtendedGuid,
        object: ExtendedGuid,
        partition: u64,
    },

    /// Sizes, counts or links between records are inconsistent.
    #[error("malformed framing at byte offset {offset}: {reason}")]
    MalformedFraming { offset: u64, reason: String },

    /// A lookup key occurs more than once where it must be unique.
    #[error("duplicate {kind} mapping for {key}")]
    DuplicateMapping { kind: &'static str, key: String },

    /// A referenced data element or mapping is not in the package.
    #[error("missing {kind} {id}")]
    MissingElement { kind: &'static str, id: String },

    #[error("expected stream object {expected} at byte offset {offset}, found {actual}")]
    UnexpectedStreamObject {
        offset: u64,
        expected: StreamObjectType,
        actual: StreamObjectType,
    },
}

impl GraphError {
    pub(crate) fn framing(offset: u64, reason: impl Into<String>) -> Self {
        Self::MalformedFraming {
            offset,
            reason: reason.into(),
        }
    }

    /// Returns `true` if decoding ran out of input at any layer.
    pub fn is_truncated(&self) -> bool {
        match self {
            Self::Type(e) => e.is_truncated(),
            Self::Format(e) => e.is_truncated(),
            _ => false,
        }
    }
}

/// Convenience alias for graph results.
pub type GraphResult<T> = Result<T, GraphError>;
