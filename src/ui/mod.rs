//! UI model: decoded redraw events and the registries they update.

mod event;
mod mode;
mod tabs;

pub use event::{
    decode_notification, decode_redraw, Cmdline, CompletionItem, HighlightAttrs, RedrawEvent, Rgb,
    REDRAW_METHOD,
};
pub use mode::{Blink, CursorShape, Mode, ModeRegistry};
pub use tabs::{Tab, TabHandle, TabRegistry, TabView};
