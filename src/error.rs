//! Error types for minirpc.

use thiserror::Error;

/// Main error type for all minirpc operations.
///
/// Variants fall into the classes callers care about: configuration and
/// factory errors surface while setting up a pool, transport and protocol
/// errors are local to one call or one connection, and [`RpcError::Business`]
/// carries a handler failure that arrived inside a valid response.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Invalid pool or client parameters.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The connection factory failed to create a connection.
    #[error("Connection factory error: {0}")]
    Factory(#[source] std::io::Error),

    /// The acquisition deadline elapsed before a connection became available.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream closed before a complete frame was read.
    #[error("Short read: stream closed mid-frame")]
    ShortRead,

    /// A frame declared a length larger than the configured maximum.
    #[error("Frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared frame length.
        len: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Envelope bytes do not match the expected layout.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Protocol error (unexpected message id, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Payload compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// No serializer is registered under this id.
    #[error("unknown serializer: {0}")]
    UnknownSerializer(u8),

    /// No compressor is registered under this id.
    #[error("unknown compressor: {0}")]
    UnknownCompressor(u8),

    /// A service description could not be turned into stubs.
    #[error("Invalid service description: {0}")]
    InvalidDescription(String),

    /// The remote handler reported an error.
    #[error("{0}")]
    Business(String),

    /// The pool was dropped while a caller was waiting on it.
    #[error("Connection pool closed")]
    PoolClosed,
}

impl RpcError {
    /// True for failures where no response envelope was obtained.
    ///
    /// The connection involved (if any) is never returned to the pool.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Factory(_)
                | RpcError::DeadlineExceeded
                | RpcError::Io(_)
                | RpcError::ShortRead
                | RpcError::FrameTooLarge { .. }
                | RpcError::MalformedEnvelope(_)
                | RpcError::Protocol(_)
                | RpcError::PoolClosed
        )
    }

    /// True when the error travelled inside a valid response envelope.
    pub fn is_business(&self) -> bool {
        matches!(self, RpcError::Business(_))
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
