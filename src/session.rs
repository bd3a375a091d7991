//! Session state machine.
//!
//! [`Session`] holds everything one editor connection needs: the decoder,
//! the request table, the registries, the renderer and the extension
//! dispatcher. It does no I/O. Bytes read from the editor go in through
//! [`Session::feed`]; encoded messages for the editor come out of
//! [`Session::take_outbound`]. The async driver in [`crate::client`] owns a
//! session on a single task and shuttles bytes between it and the process.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start_handshake──► Handshaking ──ui_attach ok──► Ready
//!                                   │                          │
//!                         error / timeout               shutdown / exit
//!                                   ▼                          ▼
//!                                Closing ◄─────────────────────┘
//!                                   │
//!                             process exit
//!                                   ▼
//!                                Closed
//! ```

use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rmpv::Value;

use crate::codec::Envelope;
use crate::config::{Geometry, SessionConfig};
use crate::control::{self, ApiInfo, UiOptions, Version};
use crate::error::{CancelReason, ProtocolError, Result, VimwireError};
use crate::handler::{EventDispatcher, ExtensionContext, Outbound, Renderer, UiState};
use crate::protocol::{Frame, FrameBuffer};
use crate::requests::{CallResult, Completion, Fulfilled, RequestTable};
use crate::ui::{decode_notification, ModeRegistry, RedrawEvent, TabRegistry};

/// Error message returned for requests the editor sends us.
pub const METHOD_NOT_SUPPORTED: &str = "method not supported";

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether outbound calls are still accepted.
    pub fn is_open(self) -> bool {
        !matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

/// Counter for client-side unique ids (highlight groups, extension state).
///
/// Independent from request ids. Shared between the session and its handles.
#[derive(Debug, Clone, Default)]
pub struct UidCounter(Arc<AtomicU32>);

impl UidCounter {
    /// Next id, starting at 1.
    pub fn next_id(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

/// One editor connection.
pub struct Session<R: Renderer> {
    state: SessionState,
    decoder: FrameBuffer,
    requests: RequestTable,
    outbound: Vec<Bytes>,
    dispatcher: EventDispatcher,
    ui: UiState,
    ctx: ExtensionContext,
    renderer: R,
    geometry: Geometry,
    ui_options: UiOptions,
    api_info: Option<ApiInfo>,
    uids: UidCounter,
}

impl<R: Renderer> Session<R> {
    pub fn new(config: &SessionConfig, dispatcher: EventDispatcher, renderer: R) -> Self {
        Self {
            state: SessionState::Created,
            decoder: FrameBuffer::with_max_frame_size(config.max_frame_size),
            requests: RequestTable::new(),
            outbound: Vec::new(),
            dispatcher,
            ui: UiState::default(),
            ctx: ExtensionContext::default(),
            renderer,
            geometry: config.geometry,
            ui_options: config.ui,
            api_info: None,
            uids: UidCounter::default(),
        }
    }

    /// Send `nvim_get_api_info`, the first handshake step.
    pub fn start_handshake(&mut self) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(VimwireError::Handshake(format!(
                "cannot start handshake in state {:?}",
                self.state
            )));
        }
        self.state = SessionState::Handshaking;
        self.request(control::GET_API_INFO, Vec::new(), Completion::Internal)?;
        Ok(())
    }

    /// Issue a request. The reply goes to `completion`.
    pub fn call(
        &mut self,
        method: impl Into<String>,
        args: Vec<Value>,
        completion: Completion,
    ) -> Result<u32> {
        if !self.state.is_open() {
            return Err(VimwireError::SessionClosed);
        }
        self.request(method, args, completion)
    }

    fn request(
        &mut self,
        method: impl Into<String>,
        args: Vec<Value>,
        completion: Completion,
    ) -> Result<u32> {
        let method = method.into();
        // The id must be known before encoding; undo the entry if that fails.
        let id = self.requests.allocate(method.clone(), completion);
        match Envelope::request(id, method, args).encode() {
            Ok(bytes) => {
                self.outbound.push(bytes);
                Ok(id)
            }
            Err(e) => {
                self.requests.remove(id);
                Err(e)
            }
        }
    }

    /// Send a notification.
    pub fn notify(&mut self, method: impl Into<String>, args: Vec<Value>) -> Result<()> {
        if !self.state.is_open() {
            return Err(VimwireError::SessionClosed);
        }
        let bytes = Envelope::notification(method, args).encode()?;
        self.outbound.push(bytes);
        Ok(())
    }

    /// Answer a request from the editor.
    pub fn respond(&mut self, id: u32, error: Option<Value>, result: Value) -> Result<()> {
        let bytes = Envelope::response(id, error, result).encode()?;
        self.outbound.push(bytes);
        Ok(())
    }

    /// Send keys to the editor with `nvim_input`.
    pub fn input(&mut self, keys: &str, completion: Completion) -> Result<u32> {
        self.call(control::INPUT, vec![Value::from(keys)], completion)
    }

    /// Ask the editor to resize its grid.
    pub fn try_resize(&mut self, cols: u32, rows: u32, completion: Completion) -> Result<u32> {
        self.geometry = Geometry::new(cols, rows);
        self.call(
            control::UI_TRY_RESIZE,
            vec![Value::from(cols), Value::from(rows)],
            completion,
        )
    }

    /// Encoded messages waiting to be written, in order.
    pub fn take_outbound(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbound)
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Process bytes read from the editor.
    ///
    /// Every complete message in `bytes` (plus whatever was buffered) is
    /// handled before this returns, in stream order. Bad messages are
    /// reported and skipped.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.state == SessionState::Closed {
            tracing::debug!("Ignoring {} bytes after close", bytes.len());
            return;
        }

        self.decoder.extend(bytes);
        while let Some(frame) = self.decoder.frames().next() {
            self.handle_frame(frame);
        }
    }

    fn handle_frame(&mut self, frame: std::result::Result<Frame, ProtocolError>) {
        match frame.and_then(Frame::into_envelope) {
            Ok(envelope) => self.handle_envelope(envelope),
            Err(e) => self.report_protocol(e),
        }
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Response { id, error, result } => {
                let result = match error {
                    Some(err) => Err(VimwireError::Remote(err)),
                    None => Ok(result),
                };
                self.handle_response(id, result);
            }
            Envelope::Notification { method, params } => {
                for event in decode_notification(&method, params) {
                    match event {
                        Ok(event) => self.dispatch(event),
                        Err(e) => self.report_protocol(e),
                    }
                }
                self.flush_extension_queue();
            }
            Envelope::Request { id, method, .. } => {
                tracing::warn!("Editor called unsupported method '{}' (id {})", method, id);
                if let Err(e) = self.respond(id, Some(Value::from(METHOD_NOT_SUPPORTED)), Value::Nil) {
                    tracing::error!("Failed to answer request {}: {}", id, e);
                }
            }
        }
    }

    fn handle_response(&mut self, id: u32, result: CallResult) {
        match self.requests.fulfill(id, result) {
            Fulfilled::Delivered => {}
            Fulfilled::Internal { method, result } => self.handle_internal_response(&method, result),
            Fulfilled::Detached { method, result } => match result {
                Ok(_) => tracing::debug!("Request {} ({}) succeeded", id, method),
                Err(e) => tracing::warn!("Request {} ({}) failed: {}", id, method, e),
            },
            Fulfilled::Unknown => self.report_protocol(ProtocolError::UnknownResponse(id)),
        }
    }

    fn handle_internal_response(&mut self, method: &str, result: CallResult) {
        if self.state != SessionState::Handshaking {
            tracing::debug!("Late handshake reply to {} in state {:?}", method, self.state);
            return;
        }

        match method {
            control::GET_API_INFO => {
                let info = match result.and_then(|value| ApiInfo::from_value(&value)) {
                    Ok(info) => info,
                    Err(e) => {
                        return self.fail_handshake(&e.to_string(), CancelReason::SessionClosed)
                    }
                };
                tracing::info!(
                    "Editor version {} on channel {}",
                    info.version,
                    info.channel_id
                );
                let version = info.version;
                self.api_info = Some(info);

                let attach = control::ui_attach_params(
                    self.geometry.cols,
                    self.geometry.rows,
                    &self.ui_options,
                    version,
                )
                .and_then(|params| self.request(control::UI_ATTACH, params, Completion::Internal));
                if let Err(e) = attach {
                    self.fail_handshake(&e.to_string(), CancelReason::SessionClosed);
                }
            }
            control::UI_ATTACH => match result {
                Ok(_) => {
                    tracing::info!("Attached as a {} UI", self.geometry);
                    self.state = SessionState::Ready;
                }
                Err(e) => {
                    self.fail_handshake(&e.to_string(), CancelReason::SessionClosed);
                }
            },
            other => tracing::debug!("Unexpected internal reply to {}", other),
        }
    }

    fn dispatch(&mut self, event: RedrawEvent) {
        let result = self
            .dispatcher
            .dispatch(event, &mut self.ui, &mut self.renderer, &mut self.ctx);
        if let Err(e) = result {
            tracing::error!("{}", e);
            self.renderer.status(&e.to_string());
        }
    }

    /// Issue what extensions queued while handling the last notification.
    fn flush_extension_queue(&mut self) {
        for message in self.ctx.drain() {
            let result = match message {
                Outbound::Call { method, args } => {
                    self.call(method, args, Completion::Detached).map(|_| ())
                }
                Outbound::Notify { method, args } => self.notify(method, args),
            };
            if let Err(e) = result {
                tracing::warn!("Dropping message queued by extension: {}", e);
            }
        }
    }

    fn report_protocol(&mut self, error: ProtocolError) {
        tracing::warn!("{}", error);
        // Stray replies are the editor's business, not the user's.
        if !matches!(error, ProtocolError::UnknownResponse(_)) {
            self.renderer.status(&error.to_string());
        }
    }

    fn fail_handshake(&mut self, reason: &str, cancel: CancelReason) {
        tracing::error!("Handshake failed: {}", reason);
        self.renderer
            .fatal(&format!("Failed to attach to the editor: {}", reason));
        self.begin_close(cancel);
    }

    /// The handshake deadline passed.
    pub fn handshake_timed_out(&mut self) {
        if self.state == SessionState::Handshaking {
            self.fail_handshake(
                "the editor did not answer in time",
                CancelReason::SessionClosed,
            );
        }
    }

    /// The editor's output ended, at end of file or with a read error.
    ///
    /// Nothing more can arrive, so pending requests are cancelled. End of
    /// file means the editor went away; a read error is reported as fatal.
    pub fn input_closed(&mut self, error: Option<io::Error>) {
        let cancel = match error {
            None => CancelReason::ProcessExited,
            Some(_) => CancelReason::SessionClosed,
        };

        if self.state == SessionState::Handshaking {
            let reason = match &error {
                None => "the editor exited before the UI could attach".to_string(),
                Some(e) => format!("reading from the editor failed: {}", e),
            };
            return self.fail_handshake(&reason, cancel);
        }

        if let Some(e) = error.filter(|_| self.state.is_open()) {
            tracing::error!("Reading from the editor failed: {}", e);
            self.renderer
                .fatal(&format!("Lost the connection to the editor: {}", e));
        }
        self.begin_close(cancel);
    }

    /// Stop accepting calls and cancel everything in flight.
    pub fn shutdown(&mut self) {
        self.begin_close(CancelReason::SessionClosed);
    }

    fn begin_close(&mut self, reason: CancelReason) {
        if !self.state.is_open() {
            return;
        }
        self.state = SessionState::Closing;
        let cancelled = self.requests.cancel_all(reason);
        tracing::debug!("Session closing ({}), {} requests cancelled", reason, cancelled);
    }

    /// The editor process is gone.
    pub fn closed(&mut self, status: Option<ExitStatus>) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state == SessionState::Handshaking {
            self.renderer
                .fatal("The editor exited before the UI could attach");
        }
        self.begin_close(CancelReason::ProcessExited);
        self.state = SessionState::Closed;
        self.decoder.clear();
        tracing::info!("Editor exited with {:?}", status);
        self.renderer.exited(status);
    }

    /// Resolve one pending request locally.
    pub fn cancel_request(&mut self, id: u32, reason: CancelReason) {
        if let Fulfilled::Unknown = self.requests.cancel(id, reason) {
            tracing::trace!("Request {} already resolved", id);
        }
    }

    pub fn next_uid(&self) -> u32 {
        self.uids.next_id()
    }

    pub fn uid_counter(&self) -> UidCounter {
        self.uids.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Editor version, known once `nvim_get_api_info` answered.
    pub fn version(&self) -> Option<Version> {
        self.api_info.as_ref().map(|info| info.version)
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.api_info.as_ref().map(|info| info.channel_id)
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn mouse_enabled(&self) -> bool {
        self.ui.mouse_enabled
    }

    /// Whether the UI attached with 24-bit colors.
    pub fn true_colors(&self) -> bool {
        self.ui_options.rgb
    }

    pub fn modes(&self) -> &ModeRegistry {
        &self.ui.modes
    }

    pub fn tabs(&self) -> &TabRegistry {
        &self.ui.tabs
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }
}

impl<R: Renderer> std::fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("version", &self.version())
            .field("pending_requests", &self.requests.len())
            .field("buffered_bytes", &self.decoder.len())
            .finish()
    }
}
