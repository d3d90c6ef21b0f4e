//! Error types for the ABI codec.

use thiserror::Error;

/// Errors raised while compiling an ABI or (de)serializing a value.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("read past end of buffer: needed {needed} bytes at offset {offset}, {available} available")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("deserialization of '{type_name}' left {remaining} unread bytes")]
    TrailingBytes { type_name: String, remaining: usize },

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("invalid value for '{type_name}': {reason}")]
    InvalidValue { type_name: String, reason: String },

    #[error("unsupported ABI version '{0}'")]
    UnsupportedAbiVersion(String),

    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("type for {kind} not found {contract}:{name}")]
    TypeNotFound {
        kind: &'static str,
        contract: String,
        name: String,
    },

    #[error("type nesting too deep while processing '{0}'")]
    RecursionLimit(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AbiError {
    pub(crate) fn invalid(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}
