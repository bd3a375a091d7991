//! The drawing collaborator.
//!
//! The session never draws anything itself. Every decoded UI update ends up
//! as exactly one call on a [`Renderer`]. All methods have no-op defaults so
//! an implementation only overrides what it draws.

use std::process::ExitStatus;

use crate::ui::{Cmdline, CompletionItem, HighlightAttrs, Mode, Rgb, Tab, TabHandle};

pub trait Renderer: Send + 'static {
    fn put(&mut self, _text: &str, _cells: usize) {}

    fn cursor_goto(&mut self, _row: u64, _col: u64) {}

    fn highlight_set(&mut self, _attrs: &HighlightAttrs) {}

    fn clear(&mut self) {}

    fn eol_clear(&mut self) {}

    fn resize(&mut self, _cols: u64, _rows: u64) {}

    /// `mode` is `None` when the editor switched to a mode it never described.
    fn mode_change(&mut self, _name: &str, _mode: Option<&Mode>) {}

    fn tab_list(&mut self, _tabs: &[Tab], _active: Option<TabHandle>) {}

    fn busy(&mut self, _busy: bool) {}

    fn mouse(&mut self, _enabled: bool) {}

    fn bell(&mut self, _visual: bool) {}

    fn set_scroll_region(&mut self, _top: u64, _bot: u64, _left: u64, _right: u64) {}

    fn scroll(&mut self, _count: i64) {}

    fn update_fg(&mut self, _color: Option<Rgb>) {}

    fn update_bg(&mut self, _color: Option<Rgb>) {}

    fn update_sp(&mut self, _color: Option<Rgb>) {}

    fn set_title(&mut self, _title: &str) {}

    fn set_icon(&mut self, _icon: &str) {}

    fn popupmenu_show(
        &mut self,
        _items: &[CompletionItem],
        _selected: Option<usize>,
        _row: u64,
        _col: u64,
    ) {
    }

    fn popupmenu_select(&mut self, _selected: Option<usize>) {}

    fn popupmenu_hide(&mut self) {}

    fn cmdline_show(&mut self, _cmdline: &Cmdline) {}

    fn cmdline_pos(&mut self, _pos: u64, _level: u64) {}

    fn cmdline_hide(&mut self) {}

    fn wildmenu_show(&mut self, _items: &[String]) {}

    fn wildmenu_select(&mut self, _selected: Option<usize>) {}

    fn wildmenu_hide(&mut self) {}

    fn flush(&mut self) {}

    /// A recoverable problem the user may want to see.
    fn status(&mut self, _message: &str) {}

    /// The session cannot continue.
    fn fatal(&mut self, _message: &str) {}

    /// The editor process is gone. Called once.
    fn exited(&mut self, _status: Option<ExitStatus>) {}
}

/// A renderer that draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {}
