//! Codec module - msgpack values, typed payloads and the RPC envelope.
//!
//! - [`MsgPackCodec`] - typed payloads through `rmp-serde` (struct-as-map)
//! - [`Envelope`] - the msgpack-RPC message shapes (request, response, notification)
//!
//! # Example
//!
//! ```
//! use vimwire::codec::{Envelope, MsgPackCodec};
//! use rmpv::Value;
//!
//! let call = Envelope::request(1, "nvim_input", vec![Value::from("ihello<Esc>")]);
//! let bytes = call.encode().unwrap();
//! let value = MsgPackCodec::decode_value(&bytes).unwrap();
//! assert_eq!(Envelope::decode(value).unwrap(), call);
//! ```

mod envelope;
mod msgpack;

pub use envelope::{Envelope, MessageKind};
pub use msgpack::{value_to_string, MsgPackCodec};
