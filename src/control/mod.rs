//! Control plane - the attach handshake.
//!
//! # Workflow
//!
//! 1. Spawn the editor with `--embed`
//! 2. Request `nvim_get_api_info` and read the editor version
//! 3. Request `nvim_ui_attach` with the options that version supports
//! 4. Redraw notifications start flowing
//!
//! The session drives these steps; this module only builds and parses the
//! payloads.

mod handshake;

pub use handshake::{
    ui_attach_params, ApiInfo, UiOptions, Version, GET_API_INFO, INPUT, UI_ATTACH, UI_TRY_RESIZE,
};
