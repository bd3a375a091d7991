//! Error types for vimwire.

use std::fmt;

use rmpv::Value;
use thiserror::Error;

/// Why a pending request was resolved locally instead of by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The session is closing (shutdown, I/O error, handshake failure).
    SessionClosed,
    /// The editor process exited before replying.
    ProcessExited,
    /// A caller-supplied timeout expired.
    Timeout,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::SessionClosed => f.write_str("session closed"),
            CancelReason::ProcessExited => f.write_str("editor process exited"),
            CancelReason::Timeout => f.write_str("timed out"),
        }
    }
}

/// Per-message protocol failures. These are always recovered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// The message is valid msgpack but not a valid RPC envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A response arrived for an id that is not pending.
    #[error("response for unknown request id {0}")]
    UnknownResponse(u32),

    /// Bytes that could not be decoded as msgpack.
    #[error("decode error after dropping {dropped} bytes: {reason}")]
    Decode { dropped: usize, reason: String },

    /// A notification whose arguments do not have the expected shape.
    #[error("malformed arguments for '{method}': {reason}")]
    MalformedArgs { method: String, reason: String },
}

/// Main error type for all vimwire operations.
#[derive(Debug, Error)]
pub enum VimwireError {
    /// I/O error while spawning or talking to the editor process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// A dynamic value does not have the shape of the requested type.
    #[error("MsgPack value error: {0}")]
    MsgPackValue(#[from] rmpv::ext::Error),

    /// Recovered protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The editor answered a request with an error object.
    #[error("Editor returned an error: {0}")]
    Remote(Value),

    /// The request was resolved locally without a reply.
    #[error("Request cancelled: {0}")]
    RequestCancelled(CancelReason),

    /// An extension callback signalled failure.
    #[error("Extension '{name}' failed: {message}")]
    ExtensionCallback { name: String, message: String },

    /// Error raised from inside an extension callback.
    #[error("{0}")]
    Extension(String),

    /// The session no longer accepts outbound calls.
    #[error("Session closed")]
    SessionClosed,

    /// Capability/version negotiation failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Invalid session configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias using VimwireError.
pub type Result<T> = std::result::Result<T, VimwireError>;
