//! Extension registry for dispatching editor notifications by name.
//!
//! Notifications the session does not handle itself (anything outside the
//! `redraw` batch, plus redraw events without a typed variant) are routed to
//! the extension registered under the exact same name.
//!
//! # Example
//!
//! ```
//! use vimwire::handler::{ExtensionContext, ExtensionRegistry};
//!
//! let mut registry = ExtensionRegistry::new();
//!
//! registry.register("vimwire.open", |(path,): (String,), ctx: &mut ExtensionContext| {
//!     ctx.call("nvim_command", vec![format!("edit {}", path).into()]);
//!     Ok(())
//! });
//!
//! assert!(registry.contains("vimwire.open"));
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use rmpv::Value;
use serde::de::DeserializeOwned;

use super::ExtensionContext;
use crate::codec::MsgPackCodec;
use crate::error::Result;

/// Result type for extension callbacks.
pub type HandlerResult = Result<()>;

/// A callback bound to one notification name.
pub trait Extension: Send + Sync + 'static {
    /// Handle a notification with its raw argument list.
    fn call(&self, args: &[Value], ctx: &mut ExtensionContext) -> HandlerResult;
}

/// Plain closures over the raw arguments.
impl<F> Extension for F
where
    F: Fn(&[Value], &mut ExtensionContext) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, args: &[Value], ctx: &mut ExtensionContext) -> HandlerResult {
        self(args, ctx)
    }
}

/// Wrapper that deserializes the argument list before calling the callback.
pub struct TypedExtension<F, T>
where
    F: Fn(T, &mut ExtensionContext) -> HandlerResult + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    callback: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedExtension<F, T>
where
    F: Fn(T, &mut ExtensionContext) -> HandlerResult + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> Extension for TypedExtension<F, T>
where
    F: Fn(T, &mut ExtensionContext) -> HandlerResult + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    fn call(&self, args: &[Value], ctx: &mut ExtensionContext) -> HandlerResult {
        let parsed: T = match MsgPackCodec::from_value(&Value::Array(args.to_vec())) {
            // No arguments also stands for `()`.
            Err(_) if args.is_empty() => MsgPackCodec::from_value(&Value::Nil)?,
            result => result?,
        };
        (self.callback)(parsed, ctx)
    }
}

/// Registry mapping notification names to extensions.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: HashMap<String, Box<dyn Extension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback whose arguments are decoded into `T`.
    ///
    /// `T` is usually a tuple matching the notification's argument list.
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F, T>(&mut self, name: &str, callback: F)
    where
        F: Fn(T, &mut ExtensionContext) -> HandlerResult + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.register_raw(name, TypedExtension::new(callback));
    }

    /// Register any [`Extension`], including closures over raw values.
    pub fn register_raw(&mut self, name: &str, extension: impl Extension) {
        if self
            .extensions
            .insert(name.to_string(), Box::new(extension))
            .is_some()
        {
            tracing::debug!("Extension '{}' replaced", name);
        }
    }

    /// Get an extension by exact name.
    pub fn get(&self, name: &str) -> Option<&dyn Extension> {
        self.extensions.get(name).map(|e| e.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Registered names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}
