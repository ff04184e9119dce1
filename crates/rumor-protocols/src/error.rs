//! Error types for rumor-protocols.

use thiserror::Error;

/// Result type for rumor-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport has not been assigned a node identity yet.
    #[error("node identity not assigned yet")]
    NotInitialized,

    /// The transport can no longer carry messages.
    #[error("transport closed")]
    Closed,

    /// Sending or receiving through the transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request was answered with an error payload.
    #[error("{dest} rejected request with code {code}: {text}")]
    Rejected {
        dest: String,
        code: u32,
        text: String,
    },

    /// A request was answered with a payload of the wrong kind.
    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: String,
    },

    /// Encoding or decoding a message failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
