//! Editor modes and the registry filled by `mode_info_set`.

use std::collections::HashMap;

use rmpv::Value;
use serde::Deserialize;

use crate::codec::MsgPackCodec;
use crate::error::{ProtocolError, Result, VimwireError};

/// How the cursor is drawn in a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorShape {
    #[default]
    Block,
    Horizontal,
    Vertical,
}

impl CursorShape {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "block" => Some(CursorShape::Block),
            "horizontal" => Some(CursorShape::Horizontal),
            "vertical" => Some(CursorShape::Vertical),
            _ => None,
        }
    }
}

/// Cursor blink timings, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blink {
    pub wait: u64,
    pub on: u64,
    pub off: u64,
}

/// Attributes of one editor mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Mode {
    pub name: String,
    pub short_name: Option<String>,
    pub cursor_shape: CursorShape,
    /// Share of the cell covered by a partial-block cursor (1..=100).
    pub cell_percentage: u8,
    /// Highlight group attached to the cursor.
    pub hl_id: Option<u64>,
    /// `None` when the cursor does not blink.
    pub blink: Option<Blink>,
}

impl Mode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_name: None,
            cursor_shape: CursorShape::Block,
            cell_percentage: 100,
            hl_id: None,
            blink: None,
        }
    }

    pub fn with_shape(mut self, shape: CursorShape, cell_percentage: u8) -> Self {
        self.cursor_shape = shape;
        self.cell_percentage = cell_percentage;
        self
    }

    /// Build a mode from one entry of a `mode_info_set` list.
    pub fn from_value(value: &Value) -> Result<Self> {
        let info: ModeInfo = MsgPackCodec::from_value(value)?;
        if info.name.is_empty() {
            return Err(VimwireError::Protocol(ProtocolError::MalformedArgs {
                method: "mode_info_set".to_string(),
                reason: "mode without a name".to_string(),
            }));
        }

        let cursor_shape = match info.cursor_shape.as_deref() {
            None => CursorShape::Block,
            Some(name) => CursorShape::from_name(name).unwrap_or_else(|| {
                tracing::debug!("Unknown cursor shape '{}' for mode {}", name, info.name);
                CursorShape::Block
            }),
        };

        // Blinking is disabled as soon as one of the timings is zero.
        let blink = match (info.blinkwait, info.blinkon, info.blinkoff) {
            (Some(wait), Some(on), Some(off)) if on > 0 && off > 0 => {
                Some(Blink { wait, on, off })
            }
            _ => None,
        };

        Ok(Self {
            name: info.name,
            short_name: info.short_name,
            cursor_shape,
            cell_percentage: info.cell_percentage.unwrap_or(100).clamp(1, 100) as u8,
            hl_id: info.hl_id,
            blink,
        })
    }
}

/// Wire layout of a mode description.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModeInfo {
    name: String,
    short_name: Option<String>,
    cursor_shape: Option<String>,
    cell_percentage: Option<u64>,
    blinkwait: Option<u64>,
    blinkon: Option<u64>,
    blinkoff: Option<u64>,
    hl_id: Option<u64>,
}

/// Mapping from mode name to mode attributes.
///
/// The editor always sends the complete set, so the registry is only ever
/// replaced as a whole.
#[derive(Debug, Default)]
pub struct ModeRegistry {
    modes: HashMap<String, Mode>,
    cursor_style_enabled: bool,
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the whole mapping for `modes`.
    pub fn replace_all(&mut self, modes: impl IntoIterator<Item = Mode>) {
        self.modes = modes
            .into_iter()
            .map(|mode| (mode.name.clone(), mode))
            .collect();
    }

    pub fn lookup(&self, name: &str) -> Option<&Mode> {
        self.modes.get(name)
    }

    /// Whether the editor asked the UI to style the cursor per mode.
    pub fn cursor_style_enabled(&self) -> bool {
        self.cursor_style_enabled
    }

    pub fn set_cursor_style_enabled(&mut self, enabled: bool) {
        self.cursor_style_enabled = enabled;
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modes.keys().map(String::as_str)
    }
}
