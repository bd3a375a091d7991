//! Frame struct with typed accessors.
//!
//! A frame is one complete, self-delimited msgpack value cut from the
//! editor's output stream, together with the number of bytes it occupied.
//!
//! # Example
//!
//! ```
//! use vimwire::protocol::Frame;
//! use rmpv::Value;
//!
//! let frame = Frame::new(Value::Array(vec![Value::from(2)]), 2);
//! assert_eq!(frame.size(), 2);
//! assert!(frame.value().is_array());
//! ```

use rmpv::Value;

use crate::codec::Envelope;
use crate::error::ProtocolError;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    value: Value,
    size: usize,
}

impl Frame {
    /// Create a new frame from a decoded value and its encoded size.
    pub fn new(value: Value, size: usize) -> Self {
        Self { value, size }
    }

    /// The decoded msgpack value.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Number of stream bytes this frame consumed.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Consume the frame, returning its value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Interpret the frame as an RPC envelope.
    pub fn into_envelope(self) -> Result<Envelope, ProtocolError> {
        Envelope::decode(self.value)
    }
}
