//! msgpack-RPC envelopes.
//!
//! ```text
//! Request:      [0, msg_id, method, params]
//! Response:     [1, msg_id, error | nil, result]
//! Notification: [2, method, params]
//! ```

use bytes::Bytes;
use rmpv::Value;

use super::msgpack::{value_to_string, MsgPackCodec};
use crate::error::{ProtocolError, Result};

/// Discriminant carried in the first slot of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Request = 0,
    Response = 1,
    Notification = 2,
}

impl MessageKind {
    fn from_value(value: &Value) -> Option<Self> {
        match value.as_u64()? {
            0 => Some(MessageKind::Request),
            1 => Some(MessageKind::Response),
            2 => Some(MessageKind::Notification),
            _ => None,
        }
    }

    /// Number of elements an envelope of this kind must have.
    pub fn arity(self) -> usize {
        match self {
            MessageKind::Request | MessageKind::Response => 4,
            MessageKind::Notification => 3,
        }
    }
}

/// A decoded RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request {
        id: u32,
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: u32,
        error: Option<Value>,
        result: Value,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(id: u32, method: impl Into<String>, params: Vec<Value>) -> Self {
        Envelope::Request {
            id,
            method: method.into(),
            params,
        }
    }

    /// Build a notification envelope.
    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Envelope::Notification {
            method: method.into(),
            params,
        }
    }

    /// Build a response envelope.
    pub fn response(id: u32, error: Option<Value>, result: Value) -> Self {
        Envelope::Response { id, error, result }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::Request { .. } => MessageKind::Request,
            Envelope::Response { .. } => MessageKind::Response,
            Envelope::Notification { .. } => MessageKind::Notification,
        }
    }

    /// Interpret a decoded frame as an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedEnvelope`] when the value is not an
    /// array, the kind is not 0/1/2, the arity does not match the kind, or a
    /// field has the wrong type.
    pub fn decode(value: Value) -> std::result::Result<Self, ProtocolError> {
        let items = match value {
            Value::Array(items) => items,
            other => return Err(malformed(format!("expected array, got {}", other))),
        };

        let kind = items
            .first()
            .and_then(MessageKind::from_value)
            .ok_or_else(|| malformed("unknown message kind".to_string()))?;

        if items.len() != kind.arity() {
            return Err(malformed(format!(
                "{:?} needs {} elements, got {}",
                kind,
                kind.arity(),
                items.len()
            )));
        }

        let mut it = items.into_iter().skip(1);
        // Arity was checked above, the remaining elements are present.
        let mut next = || it.next().unwrap_or(Value::Nil);

        match kind {
            MessageKind::Request => {
                let id = msg_id(&next())?;
                let method = method_name(&next())?;
                let params = params_array(next())?;
                Ok(Envelope::Request { id, method, params })
            }
            MessageKind::Response => {
                let id = msg_id(&next())?;
                let error = match next() {
                    Value::Nil => None,
                    err => Some(err),
                };
                let result = next();
                Ok(Envelope::Response { id, error, result })
            }
            MessageKind::Notification => {
                let method = method_name(&next())?;
                let params = params_array(next())?;
                Ok(Envelope::Notification { method, params })
            }
        }
    }

    /// Convert to the wire value.
    pub fn into_value(self) -> Value {
        match self {
            Envelope::Request { id, method, params } => Value::Array(vec![
                Value::from(MessageKind::Request as u8),
                Value::from(id),
                Value::from(method),
                Value::Array(params),
            ]),
            Envelope::Response { id, error, result } => Value::Array(vec![
                Value::from(MessageKind::Response as u8),
                Value::from(id),
                error.unwrap_or(Value::Nil),
                result,
            ]),
            Envelope::Notification { method, params } => Value::Array(vec![
                Value::from(MessageKind::Notification as u8),
                Value::from(method),
                Value::Array(params),
            ]),
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let bytes = MsgPackCodec::encode_value(&self.clone().into_value())?;
        Ok(Bytes::from(bytes))
    }
}

fn malformed(reason: String) -> ProtocolError {
    ProtocolError::MalformedEnvelope(reason)
}

fn msg_id(value: &Value) -> std::result::Result<u32, ProtocolError> {
    value
        .as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| malformed(format!("invalid message id {}", value)))
}

fn method_name(value: &Value) -> std::result::Result<String, ProtocolError> {
    value_to_string(value).ok_or_else(|| malformed(format!("invalid method name {}", value)))
}

fn params_array(value: Value) -> std::result::Result<Vec<Value>, ProtocolError> {
    match value {
        Value::Array(params) => Ok(params),
        other => Err(malformed(format!("params must be an array, got {}", other))),
    }
}
