//! Context handed to extension callbacks.
//!
//! Callbacks run on the session's owner task and must not block it, so they
//! cannot wait for replies. Instead they queue outbound messages on the
//! context:
//! - `call` - a request whose reply is only logged
//! - `notify` - a notification
//!
//! The session issues everything queued once the callback returns, in the
//! order it was queued.
//!
//! # Example
//!
//! ```
//! use rmpv::Value;
//! use vimwire::handler::ExtensionContext;
//!
//! let mut ctx = ExtensionContext::new("vimwire.open");
//! ctx.call("nvim_command", vec![Value::from("edit README.md")]);
//! assert_eq!(ctx.queued(), 1);
//! ```

use rmpv::Value;
use serde::Serialize;

use crate::codec::MsgPackCodec;
use crate::error::Result;

/// A message queued by an extension.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Call { method: String, args: Vec<Value> },
    Notify { method: String, args: Vec<Value> },
}

impl Outbound {
    pub fn method(&self) -> &str {
        match self {
            Outbound::Call { method, .. } | Outbound::Notify { method, .. } => method,
        }
    }
}

/// Context passed to extension callbacks.
#[derive(Debug, Default)]
pub struct ExtensionContext {
    /// Name of the event being handled.
    event: String,
    queue: Vec<Outbound>,
}

impl ExtensionContext {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            queue: Vec::new(),
        }
    }

    /// Name of the event that triggered the callback.
    #[inline]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Reset for the next event, keeping anything already queued.
    pub(crate) fn set_event(&mut self, event: &str) {
        self.event.clear();
        self.event.push_str(event);
    }

    /// Queue a request to the editor.
    pub fn call(&mut self, method: impl Into<String>, args: Vec<Value>) {
        self.queue.push(Outbound::Call {
            method: method.into(),
            args,
        });
    }

    /// Queue a request whose arguments are a serializable tuple or struct.
    ///
    /// The payload must serialize to an array.
    pub fn call_with<T: Serialize>(&mut self, method: impl Into<String>, args: &T) -> Result<()> {
        let args = into_args(args)?;
        self.call(method, args);
        Ok(())
    }

    /// Queue a notification to the editor.
    pub fn notify(&mut self, method: impl Into<String>, args: Vec<Value>) {
        self.queue.push(Outbound::Notify {
            method: method.into(),
            args,
        });
    }

    /// Number of messages waiting to be sent.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Take every queued message, leaving the context empty.
    pub fn drain(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.queue)
    }

    /// Drop messages queued after `mark`.
    pub(crate) fn truncate(&mut self, mark: usize) {
        self.queue.truncate(mark);
    }
}

fn into_args<T: Serialize>(args: &T) -> Result<Vec<Value>> {
    match MsgPackCodec::to_value(args)? {
        Value::Array(items) => Ok(items),
        Value::Nil => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}
