use onestore_types::{CompactId, TypeError};
use thiserror::Error;

/// Errors from decoding revision-store files.
///
/// Every variant that stems from the input bytes carries the absolute byte
/// offset at which decoding failed and, where known, the id of the file node
/// list being decoded.
#[derive(Debug, Error)]
pub enum FormatError {
    /// A field needed more bytes than the buffer holds.
    #[error("truncated at offset {offset} (list {list_id:?}): needed {needed}, had {available}")]
    TruncatedInput {
        offset: u64,
        needed: u64,
        available: u64,
        list_id: Option<u32>,
    },

    /// Declared sizes, magic values, or chain links are inconsistent.
    #[error("malformed framing at byte offset {offset} (list {list_id:?}): {reason}")]
    MalformedFraming {
        offset: u64,
        list_id: Option<u32>,
        reason: String,
    },

    /// A well-formed node of a kind this decoder does not understand, raised
    /// only when strict node-kind checking is enabled.
    #[error("unrecognized file node kind {id:#05x} at byte offset {offset}")]
    UnrecognizedFileNodeKind { offset: u64, id: u16 },

    #[error("compact id {id} does not resolve through the global id table")]
    UnresolvedCompactId { id: CompactId },

    #[error(transparent)]
    Type(TypeError),

    /// Failure reported by the chunk source, passed through unchanged.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FormatError {
    pub(crate) fn framing(offset: u64, reason: impl Into<String>) -> Self {
        Self::MalformedFraming {
            offset,
            list_id: None,
            reason: reason.into(),
        }
    }

    /// Wrap a collaborator error as a transport failure.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }

    /// Returns `true` if decoding ran out of input.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::TruncatedInput { .. })
    }

    /// Attach the id of the list being decoded, if none is recorded yet.
    pub fn in_list(self, id: u32) -> Self {
        match self {
            Self::TruncatedInput {
                offset,
                needed,
                available,
                list_id: None,
            } => Self::TruncatedInput {
                offset,
                needed,
                available,
                list_id: Some(id),
            },
            Self::MalformedFraming {
                offset,
                list_id: None,
                reason,
            } => Self::MalformedFraming {
                offset,
                list_id: Some(id),
                reason,
            },
            other => other,
        }
    }
}

impl From<TypeError> for FormatError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::TruncatedInput {
                offset,
                needed,
                available,
            } => Self::TruncatedInput {
                offset,
                needed,
                available,
                list_id: None,
            },
            other => Self::Type(other),
        }
    }
}

/// Result alias for format operations.
pub type FormatResult<T> = Result<T, FormatError>;
