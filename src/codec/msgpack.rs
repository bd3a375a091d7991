//! MsgPack codec using `rmp-serde` and `rmpv`.
//!
//! Typed payloads (handshake options, mode descriptions, extension arguments)
//! go through serde. Protocol plumbing works on dynamically typed
//! [`rmpv::Value`]s, since editor notifications carry heterogeneous arrays.
//!
//! **Always use `to_vec_named`** for typed payloads: the editor expects option
//! dictionaries as maps keyed by field name, `to_vec` would emit positional
//! arrays.
//!
//! # Example
//!
//! ```
//! use vimwire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Attach {
//!     rgb: bool,
//!     ext_tabline: bool,
//! }
//!
//! let opts = Attach { rgb: true, ext_tabline: false };
//! let value = MsgPackCodec::to_value(&opts).unwrap();
//! assert!(value.is_map());
//! let back: Attach = MsgPackCodec::from_value(&value).unwrap();
//! assert_eq!(back, opts);
//! ```

use rmpv::Value;

use crate::error::{ProtocolError, Result, VimwireError};

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Serialize a dynamic value to bytes.
    pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value)
            .map_err(|e| VimwireError::Io(std::io::Error::other(e.to_string())))?;
        Ok(buf)
    }

    /// Parse exactly one dynamic value from the front of `bytes`.
    pub fn decode_value(bytes: &[u8]) -> Result<Value> {
        let mut rd = bytes;
        rmpv::decode::read_value(&mut rd).map_err(|e| {
            VimwireError::Protocol(ProtocolError::Decode {
                dropped: 0,
                reason: e.to_string(),
            })
        })
    }

    /// Convert a serializable type into a dynamic value.
    ///
    /// Goes through `to_vec_named` so structs always become maps.
    pub fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
        let bytes = Self::encode(value)?;
        Self::decode_value(&bytes)
    }

    /// Convert a dynamic value into a typed one.
    pub fn from_value<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T> {
        Ok(rmpv::ext::from_value(value.clone())?)
    }
}

/// Read a protocol string. The editor may send strings as `bin` when they
/// are not valid UTF-8, those are converted lossily.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(match s.as_str() {
            Some(s) => s.to_string(),
            None => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        }),
        Value::Binary(b) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}
