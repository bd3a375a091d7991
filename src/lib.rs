//! # vimwire
//!
//! msgpack-RPC session and UI event dispatch for an embedded Neovim.
//!
//! This crate spawns `nvim --embed`, attaches to it as an external UI and
//! turns the editor's output into calls on a [`Renderer`] you provide.
//!
//! ## Architecture
//!
//! - **Inbound**: child stdout → [`protocol::FrameBuffer`] → [`codec::Envelope`]
//!   → responses to the request table, notifications to the
//!   [`handler::EventDispatcher`]
//! - **Outbound**: [`SessionHandle::call`] / [`SessionHandle::notify`] →
//!   owner task → writer task → child stdin
//!
//! All session state lives on one tokio task. The core state machine,
//! [`Session`], does no I/O and can be driven directly.
//!
//! ## Example
//!
//! ```no_run
//! use vimwire::{Client, Renderer};
//!
//! struct Printer;
//!
//! impl Renderer for Printer {
//!     fn put(&mut self, text: &str, _cells: usize) {
//!         print!("{}", text);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> vimwire::Result<()> {
//!     let client = Client::builder().start(Printer)?;
//!     client.handle().input("ihello<Esc>").await?;
//!     client.wait_for_exit().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod requests;
pub mod session;
pub mod transport;
pub mod ui;
pub mod writer;

mod client;

pub use client::{
    Client, ClientBuilder, ExitReport, PendingCall, SessionBuilder, SessionHandle, SHUTDOWN_GRACE,
};
pub use config::{Geometry, SessionConfig};
pub use error::{CancelReason, ProtocolError, Result, VimwireError};
pub use handler::{ExtensionContext, Renderer};
pub use session::{Session, SessionState};
