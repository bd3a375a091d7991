//! Handler module - event routing.
//!
//! Provides:
//! - [`EventDispatcher`] - routes decoded events to built-in handlers or extensions
//! - [`ExtensionRegistry`] - maps notification names to extension callbacks
//! - [`ExtensionContext`] - lets callbacks queue further RPC traffic
//! - [`Renderer`] - the drawing collaborator
//!
//! # Example
//!
//! ```
//! use vimwire::handler::{ExtensionContext, ExtensionRegistry};
//!
//! let mut registry = ExtensionRegistry::new();
//!
//! registry.register("vimwire.ping", |_: (), ctx: &mut ExtensionContext| {
//!     ctx.notify("nvim_command", vec!["echo 'pong'".into()]);
//!     Ok(())
//! });
//! ```

mod context;
mod dispatcher;
mod registry;
mod renderer;

pub use context::{ExtensionContext, Outbound};
pub use dispatcher::{EventDispatcher, Route, UiState};
pub use registry::{Extension, ExtensionRegistry, HandlerResult, TypedExtension};
pub use renderer::{NullRenderer, Renderer};
