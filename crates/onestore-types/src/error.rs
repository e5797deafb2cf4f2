use thiserror::Error;

/// Errors produced by cursor and identifier operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// The buffer ended before a field could be read in full.
    #[error("truncated input at byte offset {offset}: needed {needed} more, {available} available")]
    TruncatedInput {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("value {value:#x} does not fit in {width} bits")]
    ValueOutOfRange { value: u64, width: u32 },

    #[error("invalid encoding at byte offset {offset}: {reason}")]
    InvalidEncoding { offset: u64, reason: String },

    #[error("cannot parse identifier: {0}")]
    Parse(String),
}

impl TypeError {
    /// Returns `true` if the error means the input ran out.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::TruncatedInput { .. })
    }
}

/// Result alias for type operations.
pub type TypeResult<T> = Result<T, TypeError>;
