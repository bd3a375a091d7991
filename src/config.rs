//! Session configuration.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::control::UiOptions;
use crate::error::{Result, VimwireError};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::writer::WriterConfig;

/// Default editor executable.
pub const DEFAULT_PROGRAM: &str = "nvim";

/// Default time allowed for the attach handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Arguments the session passes itself or that break an embedded editor.
pub const FORBIDDEN_ARGS: &[&str] = &["--embed", "--headless", "--api-info"];

/// Grid size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cols: u32,
    pub rows: u32,
}

impl Geometry {
    pub const fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Parses `COLSxROWS`, e.g. `120x40`.
impl FromStr for Geometry {
    type Err = VimwireError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || VimwireError::InvalidConfig(format!("invalid geometry '{}'", s));

        let (cols, rows) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let cols: u32 = cols.trim().parse().map_err(|_| invalid())?;
        let rows: u32 = rows.trim().parse().map_err(|_| invalid())?;
        if cols == 0 || rows == 0 {
            return Err(invalid());
        }
        Ok(Self::new(cols, rows))
    }
}

/// Everything needed to start a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Editor executable.
    pub program: OsString,
    /// Extra arguments forwarded after `--embed`.
    pub args: Vec<OsString>,
    pub geometry: Geometry,
    pub ui: UiOptions,
    pub handshake_timeout: Duration,
    /// See [`FrameBuffer::with_max_frame_size`](crate::protocol::FrameBuffer::with_max_frame_size).
    pub max_frame_size: usize,
    pub writer: WriterConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: OsString::from(DEFAULT_PROGRAM),
            args: Vec::new(),
            geometry: Geometry::default(),
            ui: UiOptions::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Check the configuration before anything is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.program.is_empty() {
            return Err(VimwireError::InvalidConfig(
                "editor program is empty".to_string(),
            ));
        }
        if self.geometry.cols == 0 || self.geometry.rows == 0 {
            return Err(VimwireError::InvalidConfig(format!(
                "geometry must be non-zero, got {}",
                self.geometry
            )));
        }
        if self.handshake_timeout.is_zero() {
            return Err(VimwireError::InvalidConfig(
                "handshake timeout must be non-zero".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(VimwireError::InvalidConfig(
                "max frame size must be non-zero".to_string(),
            ));
        }
        if let Some(arg) = self
            .args
            .iter()
            .find(|arg| FORBIDDEN_ARGS.iter().any(|f| arg.as_os_str() == *f))
        {
            return Err(VimwireError::InvalidConfig(format!(
                "argument {:?} conflicts with the embedded editor",
                arg
            )));
        }
        Ok(())
    }

    /// Full argument list for the editor process.
    pub fn command_args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(OsString::from("--embed"));
        args.extend(self.args.iter().cloned());
        args
    }
}
