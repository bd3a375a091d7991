//! Protocol module - framing of the editor's msgpack byte stream.
//!
//! msgpack values are self-delimiting, so there is no length prefix: the
//! [`FrameBuffer`] accumulates partial reads and cuts complete values off the
//! front of its buffer, resynchronizing after corrupt bytes.

mod frame;
mod frame_buffer;

pub use frame::Frame;
pub use frame_buffer::{FrameBuffer, Frames, DEFAULT_MAX_FRAME_SIZE};
