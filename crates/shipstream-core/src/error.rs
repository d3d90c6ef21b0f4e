//! Error types for the ShipStream pipeline.

use shipstream_abi::AbiError;
use thiserror::Error;

/// Errors raised by the session, the decode engine, the schema cache and the
/// block processor.
#[derive(Debug, Error)]
pub enum ShipError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("No Abi found for {account}")]
    SchemaNotFound { account: String },

    #[error("failed to deserialize {context}: {reason}")]
    Decode { context: String, reason: String },

    #[error("unsupported variant received: {variant}")]
    UnsupportedVariant { variant: String },

    #[error(transparent)]
    Abi(#[from] AbiError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("deserializer unavailable: {0}")]
    DeserializerUnavailable(String),

    #[error("handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("{message} at block #{block_num}: {source}")]
    Block {
        block_num: u32,
        message: String,
        #[source]
        source: Box<ShipError>,
    },
}

impl ShipError {
    pub fn decode(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap this error with the block it aborted.
    pub fn at_block(self, block_num: u32, message: impl Into<String>) -> Self {
        Self::Block {
            block_num,
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Returns `true` if the error aborts the block being processed (and the
    /// session queue with it). Schema misses and unsupported variants are
    /// recoverable.
    pub fn is_fatal_for_block(&self) -> bool {
        !matches!(
            self,
            Self::SchemaNotFound { .. } | Self::UnsupportedVariant { .. }
        )
    }

    /// Returns `true` for transport-level failures (reconnect territory).
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Block { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}
