//! Handshake payloads.
//!
//! Attaching to the editor takes two requests:
//!
//! 1. `nvim_get_api_info` - the reply is `[channel_id, metadata]`, where
//!    `metadata.version` carries `major`, `minor` and `patch`
//! 2. `nvim_ui_attach(cols, rows, options)` - options the running editor
//!    does not know about are left out
//!
//! # Example
//!
//! ```
//! use vimwire::control::{ui_attach_params, UiOptions, Version};
//!
//! let params = ui_attach_params(80, 24, &UiOptions::default(), Version::new(0, 2, 0)).unwrap();
//! assert_eq!(params.len(), 3);
//! ```

use std::fmt;

use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::codec::MsgPackCodec;
use crate::error::{Result, VimwireError};

pub const GET_API_INFO: &str = "nvim_get_api_info";
pub const UI_ATTACH: &str = "nvim_ui_attach";
pub const UI_TRY_RESIZE: &str = "nvim_ui_try_resize";
pub const INPUT: &str = "nvim_input";

/// Editor version reported by `nvim_get_api_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn at_least(self, major: u32, minor: u32, patch: u32) -> bool {
        self >= Version::new(major, minor, patch)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Relevant part of the `nvim_get_api_info` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiInfo {
    pub channel_id: u64,
    pub version: Version,
}

#[derive(Deserialize)]
struct Metadata {
    version: Version,
}

impl ApiInfo {
    pub fn from_value(value: &Value) -> Result<Self> {
        let bad = |reason: &str| VimwireError::Handshake(format!("api info: {}", reason));

        let items = value.as_array().ok_or_else(|| bad("not an array"))?;
        let [channel, metadata] = items.as_slice() else {
            return Err(bad("expected [channel_id, metadata]"));
        };
        let channel_id = channel.as_u64().ok_or_else(|| bad("bad channel id"))?;
        let metadata: Metadata = MsgPackCodec::from_value(metadata)
            .map_err(|e| bad(&format!("bad metadata: {}", e)))?;

        Ok(Self {
            channel_id,
            version: metadata.version,
        })
    }
}

/// Options sent with `nvim_ui_attach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UiOptions {
    pub rgb: bool,
    pub ext_popupmenu: bool,
    pub ext_tabline: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ext_cmdline: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ext_wildmenu: bool,
}

impl Default for UiOptions {
    fn default() -> Self {
        Self {
            rgb: true,
            ext_popupmenu: true,
            ext_tabline: true,
            ext_cmdline: true,
            ext_wildmenu: true,
        }
    }
}

impl UiOptions {
    /// Drop the options `version` would reject.
    ///
    /// The external command line and wildmenu appeared in 0.2.1; an editor
    /// refuses to attach when it sees an option it does not know.
    pub fn supported_by(mut self, version: Version) -> Self {
        if !version.at_least(0, 2, 1) {
            if self.ext_cmdline || self.ext_wildmenu {
                tracing::info!(
                    "Editor {} has no external cmdline/wildmenu, disabling them",
                    version
                );
            }
            self.ext_cmdline = false;
            self.ext_wildmenu = false;
        }
        self
    }
}

/// Arguments of `nvim_ui_attach`.
pub fn ui_attach_params(
    cols: u32,
    rows: u32,
    options: &UiOptions,
    version: Version,
) -> Result<Vec<Value>> {
    let options = MsgPackCodec::to_value(&options.supported_by(version))?;
    Ok(vec![Value::from(cols), Value::from(rows), options])
}
