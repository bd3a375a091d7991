//! Decoding of UI notifications into [`RedrawEvent`]s.
//!
//! The editor batches screen updates in a single `redraw` notification:
//!
//! ```text
//! ["redraw", [
//!     ["put", ["a"], ["b"]],
//!     ["cursor_goto", [1, 0]],
//!     ["put", ["c"]],
//! ]]
//! ```
//!
//! Each sub-array names an event followed by one argument tuple per call.
//! Decoding flattens this into one event per call, in order, except that the
//! `put` calls of one sub-array are merged into a single [`RedrawEvent::Put`].

use rmpv::Value;
use serde::Deserialize;

use super::mode::Mode;
use super::tabs::TabHandle;
use crate::codec::{value_to_string, MsgPackCodec};
use crate::error::ProtocolError;

/// Name of the batched screen-update notification.
pub const REDRAW_METHOD: &str = "redraw";

/// 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u32);

impl Rgb {
    /// Negative values mean "use the default color".
    pub fn from_wire(color: i64) -> Option<Self> {
        u32::try_from(color).ok().map(|c| Rgb(c & 0x00ff_ffff))
    }

    pub fn r(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn g(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn b(self) -> u8 {
        self.0 as u8
    }
}

/// Text attributes set by `highlight_set`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightAttrs {
    pub foreground: Option<Rgb>,
    pub background: Option<Rgb>,
    pub special: Option<Rgb>,
    pub reverse: bool,
    pub italic: bool,
    pub bold: bool,
    pub underline: bool,
    pub undercurl: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireAttrs {
    foreground: Option<i64>,
    background: Option<i64>,
    special: Option<i64>,
    reverse: bool,
    italic: bool,
    bold: bool,
    underline: bool,
    undercurl: bool,
}

impl From<WireAttrs> for HighlightAttrs {
    fn from(w: WireAttrs) -> Self {
        Self {
            foreground: w.foreground.and_then(Rgb::from_wire),
            background: w.background.and_then(Rgb::from_wire),
            special: w.special.and_then(Rgb::from_wire),
            reverse: w.reverse,
            italic: w.italic,
            bold: w.bold,
            underline: w.underline,
            undercurl: w.undercurl,
        }
    }
}

/// One completion popup entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionItem {
    pub word: String,
    pub kind: String,
    pub menu: String,
    pub info: String,
}

/// Content of the external command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmdline {
    pub content: String,
    pub pos: u64,
    pub firstc: String,
    pub prompt: String,
    pub indent: u64,
    pub level: u64,
}

/// A single decoded UI update.
#[derive(Debug, Clone, PartialEq)]
pub enum RedrawEvent {
    Resize { cols: u64, rows: u64 },
    Clear,
    EolClear,
    CursorGoto { row: u64, col: u64 },
    ModeInfoSet { cursor_style_enabled: bool, modes: Vec<Mode> },
    ModeChange { name: String, index: u64 },
    BusyStart,
    BusyStop,
    MouseOn,
    MouseOff,
    SetScrollRegion { top: u64, bot: u64, left: u64, right: u64 },
    Scroll(i64),
    HighlightSet(HighlightAttrs),
    /// Text written at the cursor; `cells` is the number of `put` calls merged.
    Put { text: String, cells: usize },
    Bell,
    VisualBell,
    Flush,
    /// Default colors; `None` means the terminal default.
    UpdateFg(Option<Rgb>),
    UpdateBg(Option<Rgb>),
    UpdateSp(Option<Rgb>),
    SetTitle(String),
    SetIcon(String),
    PopupmenuShow { items: Vec<CompletionItem>, selected: Option<usize>, row: u64, col: u64 },
    PopupmenuSelect { selected: Option<usize> },
    PopupmenuHide,
    TablineUpdate { current: TabHandle, tabs: Vec<(TabHandle, String)> },
    CmdlineShow(Cmdline),
    CmdlinePos { pos: u64, level: u64 },
    CmdlineHide,
    WildmenuShow { items: Vec<String> },
    WildmenuSelect { selected: Option<usize> },
    WildmenuHide,
    /// A method without a typed variant, kept with its raw arguments.
    Unknown { name: String, args: Vec<Value> },
}

impl RedrawEvent {
    /// Protocol name of the event.
    pub fn name(&self) -> &str {
        match self {
            RedrawEvent::Resize { .. } => "resize",
            RedrawEvent::Clear => "clear",
            RedrawEvent::EolClear => "eol_clear",
            RedrawEvent::CursorGoto { .. } => "cursor_goto",
            RedrawEvent::ModeInfoSet { .. } => "mode_info_set",
            RedrawEvent::ModeChange { .. } => "mode_change",
            RedrawEvent::BusyStart => "busy_start",
            RedrawEvent::BusyStop => "busy_stop",
            RedrawEvent::MouseOn => "mouse_on",
            RedrawEvent::MouseOff => "mouse_off",
            RedrawEvent::SetScrollRegion { .. } => "set_scroll_region",
            RedrawEvent::Scroll(_) => "scroll",
            RedrawEvent::HighlightSet(_) => "highlight_set",
            RedrawEvent::Put { .. } => "put",
            RedrawEvent::Bell => "bell",
            RedrawEvent::VisualBell => "visual_bell",
            RedrawEvent::Flush => "flush",
            RedrawEvent::UpdateFg(_) => "update_fg",
            RedrawEvent::UpdateBg(_) => "update_bg",
            RedrawEvent::UpdateSp(_) => "update_sp",
            RedrawEvent::SetTitle(_) => "set_title",
            RedrawEvent::SetIcon(_) => "set_icon",
            RedrawEvent::PopupmenuShow { .. } => "popupmenu_show",
            RedrawEvent::PopupmenuSelect { .. } => "popupmenu_select",
            RedrawEvent::PopupmenuHide => "popupmenu_hide",
            RedrawEvent::TablineUpdate { .. } => "tabline_update",
            RedrawEvent::CmdlineShow(_) => "cmdline_show",
            RedrawEvent::CmdlinePos { .. } => "cmdline_pos",
            RedrawEvent::CmdlineHide => "cmdline_hide",
            RedrawEvent::WildmenuShow { .. } => "wildmenu_show",
            RedrawEvent::WildmenuSelect { .. } => "wildmenu_select",
            RedrawEvent::WildmenuHide => "wildmenu_hide",
            RedrawEvent::Unknown { name, .. } => name,
        }
    }

    /// Decode a single call of event `name`.
    pub fn decode(name: &str, args: Vec<Value>) -> Result<Self, ProtocolError> {
        let a = Args::new(name, &args);
        let event = match name {
            "resize" => RedrawEvent::Resize {
                cols: a.u64(0)?,
                rows: a.u64(1)?,
            },
            "clear" => RedrawEvent::Clear,
            "eol_clear" => RedrawEvent::EolClear,
            "cursor_goto" => RedrawEvent::CursorGoto {
                row: a.u64(0)?,
                col: a.u64(1)?,
            },
            "mode_info_set" => {
                let modes = a
                    .array(1)?
                    .iter()
                    .map(|m| Mode::from_value(m).map_err(|e| a.malformed(e.to_string())))
                    .collect::<Result<Vec<_>, _>>()?;
                RedrawEvent::ModeInfoSet {
                    cursor_style_enabled: a.bool(0)?,
                    modes,
                }
            }
            "mode_change" => RedrawEvent::ModeChange {
                name: a.string(0)?,
                index: a.opt_u64(1).unwrap_or(0),
            },
            "busy_start" => RedrawEvent::BusyStart,
            "busy_stop" => RedrawEvent::BusyStop,
            "mouse_on" => RedrawEvent::MouseOn,
            "mouse_off" => RedrawEvent::MouseOff,
            "set_scroll_region" => RedrawEvent::SetScrollRegion {
                top: a.u64(0)?,
                bot: a.u64(1)?,
                left: a.u64(2)?,
                right: a.u64(3)?,
            },
            "scroll" => RedrawEvent::Scroll(a.i64(0)?),
            "highlight_set" => {
                let wire: WireAttrs = MsgPackCodec::from_value(a.value(0)?)
                    .map_err(|e| a.malformed(e.to_string()))?;
                RedrawEvent::HighlightSet(wire.into())
            }
            "put" => {
                let text = a.string(0)?;
                RedrawEvent::Put { text, cells: 1 }
            }
            "bell" => RedrawEvent::Bell,
            "visual_bell" => RedrawEvent::VisualBell,
            "flush" => RedrawEvent::Flush,
            "update_fg" => RedrawEvent::UpdateFg(Rgb::from_wire(a.i64(0)?)),
            "update_bg" => RedrawEvent::UpdateBg(Rgb::from_wire(a.i64(0)?)),
            "update_sp" => RedrawEvent::UpdateSp(Rgb::from_wire(a.i64(0)?)),
            "set_title" => RedrawEvent::SetTitle(a.string(0)?),
            "set_icon" => RedrawEvent::SetIcon(a.string(0)?),
            "popupmenu_show" => {
                let items = a
                    .array(0)?
                    .iter()
                    .map(|item| completion_item(item).ok_or_else(|| a.malformed("bad item")))
                    .collect::<Result<Vec<_>, _>>()?;
                RedrawEvent::PopupmenuShow {
                    items,
                    selected: selection(a.i64(1)?),
                    row: a.u64(2)?,
                    col: a.u64(3)?,
                }
            }
            "popupmenu_select" => RedrawEvent::PopupmenuSelect {
                selected: selection(a.i64(0)?),
            },
            "popupmenu_hide" => RedrawEvent::PopupmenuHide,
            "tabline_update" => {
                let current =
                    TabHandle::from_value(a.value(0)?).ok_or_else(|| a.malformed("bad tab"))?;
                let tabs = a
                    .array(1)?
                    .iter()
                    .map(|entry| tab_entry(entry).ok_or_else(|| a.malformed("bad tab entry")))
                    .collect::<Result<Vec<_>, _>>()?;
                RedrawEvent::TablineUpdate { current, tabs }
            }
            "cmdline_show" => {
                let content = a
                    .array(0)?
                    .iter()
                    .filter_map(|chunk| chunk.as_array().and_then(|c| c.get(1)))
                    .filter_map(value_to_string)
                    .collect::<String>();
                RedrawEvent::CmdlineShow(Cmdline {
                    content,
                    pos: a.u64(1)?,
                    firstc: a.string(2)?,
                    prompt: a.string(3)?,
                    indent: a.opt_u64(4).unwrap_or(0),
                    level: a.opt_u64(5).unwrap_or(1),
                })
            }
            "cmdline_pos" => RedrawEvent::CmdlinePos {
                pos: a.u64(0)?,
                level: a.opt_u64(1).unwrap_or(1),
            },
            "cmdline_hide" => RedrawEvent::CmdlineHide,
            "wildmenu_show" => {
                let items = a
                    .array(0)?
                    .iter()
                    .map(|item| value_to_string(item).ok_or_else(|| a.malformed("bad item")))
                    .collect::<Result<Vec<_>, _>>()?;
                RedrawEvent::WildmenuShow { items }
            }
            "wildmenu_select" => RedrawEvent::WildmenuSelect {
                selected: selection(a.i64(0)?),
            },
            "wildmenu_hide" => RedrawEvent::WildmenuHide,
            _ => RedrawEvent::Unknown {
                name: name.to_string(),
                args,
            },
        };
        Ok(event)
    }
}

/// Decode a notification into the ordered list of events it carries.
///
/// `redraw` batches are flattened; any other method becomes a single
/// [`RedrawEvent::Unknown`] so that extensions can pick it up. A malformed
/// call only produces an error in its own slot.
pub fn decode_notification(
    method: &str,
    params: Vec<Value>,
) -> Vec<Result<RedrawEvent, ProtocolError>> {
    if method == REDRAW_METHOD {
        decode_redraw(params)
    } else {
        vec![Ok(RedrawEvent::Unknown {
            name: method.to_string(),
            args: params,
        })]
    }
}

/// Flatten the parameters of a `redraw` notification.
pub fn decode_redraw(params: Vec<Value>) -> Vec<Result<RedrawEvent, ProtocolError>> {
    let mut events = Vec::with_capacity(params.len());

    for batch in params {
        let mut items = match batch {
            Value::Array(items) if !items.is_empty() => items.into_iter(),
            other => {
                events.push(Err(ProtocolError::MalformedArgs {
                    method: REDRAW_METHOD.to_string(),
                    reason: format!("batch must be a non-empty array, got {}", other),
                }));
                continue;
            }
        };

        let Some(name) = items.next().as_ref().and_then(value_to_string) else {
            events.push(Err(ProtocolError::MalformedArgs {
                method: REDRAW_METHOD.to_string(),
                reason: "batch without an event name".to_string(),
            }));
            continue;
        };

        if name == "put" {
            coalesce_put(items, &mut events);
            continue;
        }

        for call in items {
            let event = match call {
                Value::Array(args) => RedrawEvent::decode(&name, args),
                other => Err(ProtocolError::MalformedArgs {
                    method: name.clone(),
                    reason: format!("arguments must be an array, got {}", other),
                }),
            };
            events.push(event);
        }
    }

    events
}

/// Merge the `put` calls of one batch. A malformed call splits the text
/// around it so the valid pieces still reach the renderer in order.
fn coalesce_put(
    calls: impl Iterator<Item = Value>,
    events: &mut Vec<Result<RedrawEvent, ProtocolError>>,
) {
    let mut text = String::new();
    let mut cells = 0;

    for call in calls {
        let piece = call
            .as_array()
            .and_then(|args| args.first())
            .and_then(value_to_string);
        match piece {
            Some(piece) => {
                text.push_str(&piece);
                cells += 1;
            }
            None => {
                if cells > 0 {
                    events.push(Ok(RedrawEvent::Put {
                        text: std::mem::take(&mut text),
                        cells,
                    }));
                    cells = 0;
                }
                events.push(Err(ProtocolError::MalformedArgs {
                    method: "put".to_string(),
                    reason: format!("expected [text], got {}", call),
                }));
            }
        }
    }

    if cells > 0 {
        events.push(Ok(RedrawEvent::Put { text, cells }));
    }
}

fn selection(index: i64) -> Option<usize> {
    usize::try_from(index).ok()
}

fn completion_item(value: &Value) -> Option<CompletionItem> {
    let fields = value.as_array()?;
    let field = |i: usize| fields.get(i).and_then(value_to_string).unwrap_or_default();
    Some(CompletionItem {
        word: value_to_string(fields.first()?)?,
        kind: field(1),
        menu: field(2),
        info: field(3),
    })
}

fn tab_entry(value: &Value) -> Option<(TabHandle, String)> {
    let map = value.as_map()?;
    let mut handle = None;
    let mut name = None;
    for (k, v) in map {
        match k.as_str() {
            Some("tab") => handle = TabHandle::from_value(v),
            Some("name") => name = value_to_string(v),
            _ => {}
        }
    }
    Some((handle?, name.unwrap_or_default()))
}

/// Positional access to one call's arguments.
struct Args<'a> {
    name: &'a str,
    items: &'a [Value],
}

impl<'a> Args<'a> {
    fn new(name: &'a str, items: &'a [Value]) -> Self {
        Self { name, items }
    }

    fn malformed(&self, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::MalformedArgs {
            method: self.name.to_string(),
            reason: reason.into(),
        }
    }

    fn value(&self, i: usize) -> Result<&'a Value, ProtocolError> {
        self.items
            .get(i)
            .ok_or_else(|| self.malformed(format!("missing argument {}", i)))
    }

    fn u64(&self, i: usize) -> Result<u64, ProtocolError> {
        self.value(i)?
            .as_u64()
            .ok_or_else(|| self.malformed(format!("argument {} is not an unsigned integer", i)))
    }

    fn opt_u64(&self, i: usize) -> Option<u64> {
        self.items.get(i).and_then(Value::as_u64)
    }

    fn i64(&self, i: usize) -> Result<i64, ProtocolError> {
        self.value(i)?
            .as_i64()
            .ok_or_else(|| self.malformed(format!("argument {} is not an integer", i)))
    }

    fn bool(&self, i: usize) -> Result<bool, ProtocolError> {
        self.value(i)?
            .as_bool()
            .ok_or_else(|| self.malformed(format!("argument {} is not a boolean", i)))
    }

    fn string(&self, i: usize) -> Result<String, ProtocolError> {
        value_to_string(self.value(i)?)
            .ok_or_else(|| self.malformed(format!("argument {} is not a string", i)))
    }

    fn array(&self, i: usize) -> Result<&'a [Value], ProtocolError> {
        self.value(i)?
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| self.malformed(format!("argument {} is not an array", i)))
    }
}
