//! Transport module - the editor child process and its stdio pipes.

mod child;

pub use child::ChildTransport;
