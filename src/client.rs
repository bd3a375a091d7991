//! Session builder and async driver.
//!
//! The [`SessionBuilder`] provides a fluent API for configuring the editor
//! process and registering extensions. [`SessionBuilder::start`] then:
//! 1. Spawns `nvim --embed`
//! 2. Starts the writer task on the editor's stdin
//! 3. Starts the owner task, which runs the handshake and then feeds
//!    everything read from stdout through the [`Session`]
//!
//! The owner task is the only place session state is touched. Everything
//! else talks to it through a cloneable [`SessionHandle`].
//!
//! # Example
//!
//! ```no_run
//! use vimwire::handler::NullRenderer;
//! use vimwire::{Client, Geometry};
//!
//! #[tokio::main]
//! async fn main() -> vimwire::Result<()> {
//!     let client = Client::builder()
//!         .geometry(Geometry::new(120, 40))
//!         .arg("-u")
//!         .arg("NONE")
//!         .extension("vimwire.open", |(path,): (String,), ctx: &mut vimwire::ExtensionContext| {
//!             ctx.call("nvim_command", vec![format!("edit {}", path).into()]);
//!             Ok(())
//!         })
//!         .start(NullRenderer)?;
//!
//!     let version = client.handle().call("nvim_eval", vec!["v:version".into()]).await?;
//!     println!("{:?}", version.wait().await?);
//!
//!     client.shutdown()?;
//!     let report = client.wait_for_exit().await?;
//!     println!("editor exited with {:?}", report.status);
//!     Ok(())
//! }
//! ```

use std::ffi::OsString;
use std::process::ExitStatus;
use std::time::Duration;

use rmpv::Value;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::codec::MsgPackCodec;
use crate::config::{Geometry, SessionConfig};
use crate::control::{self, UiOptions, Version};
use crate::error::{CancelReason, Result, VimwireError};
use crate::handler::{EventDispatcher, ExtensionContext, ExtensionRegistry, HandlerResult, Renderer};
use crate::requests::{CallResult, Completion};
use crate::session::{Session, SessionState, UidCounter};
use crate::transport::ChildTransport;
use crate::writer::{spawn_writer_task, WriterHandle};

/// How long a closing editor gets to exit on its own before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Read buffer size for the editor's stdout.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builder for configuring and starting a session.
pub struct SessionBuilder {
    config: SessionConfig,
    extensions: ExtensionRegistry,
}

/// Alias kept for symmetry with [`Client::builder`].
pub type ClientBuilder = SessionBuilder;

impl SessionBuilder {
    pub fn new() -> Self {
        Self::from_config(SessionConfig::default())
    }

    pub fn from_config(config: SessionConfig) -> Self {
        Self {
            config,
            extensions: ExtensionRegistry::new(),
        }
    }

    /// Editor executable. Default: `nvim`.
    pub fn program(mut self, program: impl Into<OsString>) -> Self {
        self.config.program = program.into();
        self
    }

    /// Forward one argument to the editor.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.config.args.push(arg.into());
        self
    }

    /// Forward several arguments to the editor.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.config.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Initial grid size. Default: 80x24.
    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.config.geometry = geometry;
        self
    }

    /// Options sent with `nvim_ui_attach`.
    pub fn ui_options(mut self, options: UiOptions) -> Self {
        self.config.ui = options;
        self
    }

    /// Default: 10 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Largest message accepted from the editor. Default: 64MB.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Queue length above which slow writes are logged. Default: 1024.
    pub fn max_pending_messages(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_messages = limit;
        self
    }

    /// Register an extension whose arguments are decoded into `T`.
    pub fn extension<F, T>(mut self, name: &str, callback: F) -> Self
    where
        F: Fn(T, &mut ExtensionContext) -> HandlerResult + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.extensions.register(name, callback);
        self
    }

    /// Register an extension over the raw argument list.
    pub fn extension_raw<F>(mut self, name: &str, callback: F) -> Self
    where
        F: Fn(&[Value], &mut ExtensionContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.extensions.register_raw(name, callback);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Spawn the editor and start the session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R: Renderer>(self, renderer: R) -> Result<Client> {
        self.config.validate()?;
        let transport = ChildTransport::spawn(&self.config)?;
        Ok(self.launch(transport.stdout, transport.stdin, Some(transport.child), renderer))
    }

    /// Run a session over an already connected stream instead of a child
    /// process, e.g. a socket to `nvim --listen`.
    ///
    /// The session ends when `reader` reaches end of file.
    pub fn connect<R, Rd, W>(self, reader: Rd, writer: W, renderer: R) -> Result<Client>
    where
        R: Renderer,
        Rd: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.config.validate()?;
        Ok(self.launch(reader, writer, None, renderer))
    }

    fn launch<R, Rd, W>(self, reader: Rd, writer: W, child: Option<Child>, renderer: R) -> Client
    where
        R: Renderer,
        Rd: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer, _writer_task) = spawn_writer_task(writer, self.config.writer.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let session = Session::new(&self.config, EventDispatcher::new(self.extensions), renderer);
        let handle = SessionHandle {
            commands: commands_tx,
            uids: session.uid_counter(),
        };

        let driver = Driver {
            session,
            reader,
            writer: Some(writer),
            commands: commands_rx,
            child,
            handshake_timeout: self.config.handshake_timeout,
        };
        let task = tokio::spawn(driver.run());

        Client { handle, task }
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests from handles to the owner task.
enum Command {
    Call {
        method: String,
        args: Vec<Value>,
        completion: Completion,
        ack: oneshot::Sender<Result<u32>>,
    },
    Notify {
        method: String,
        args: Vec<Value>,
        ack: oneshot::Sender<Result<()>>,
    },
    Cancel {
        id: u32,
        reason: CancelReason,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    uids: UidCounter,
}

impl SessionHandle {
    /// Send a request. The returned [`PendingCall`] resolves with the reply.
    ///
    /// Waits only until the request is queued, not for the reply.
    pub async fn call(&self, method: impl Into<String>, args: Vec<Value>) -> Result<PendingCall> {
        let (completion, rx) = Completion::channel();
        let (ack, ack_rx) = oneshot::channel();
        self.send(Command::Call {
            method: method.into(),
            args,
            completion,
            ack,
        })?;
        let id = ack_rx.await.map_err(|_| VimwireError::SessionClosed)??;

        Ok(PendingCall {
            id,
            rx,
            commands: self.commands.clone(),
        })
    }

    /// Send a notification.
    pub async fn notify(&self, method: impl Into<String>, args: Vec<Value>) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();
        self.send(Command::Notify {
            method: method.into(),
            args,
            ack,
        })?;
        ack_rx.await.map_err(|_| VimwireError::SessionClosed)?
    }

    /// Send keys with `nvim_input`.
    pub async fn input(&self, keys: &str) -> Result<PendingCall> {
        self.call(control::INPUT, vec![Value::from(keys)]).await
    }

    /// Ask the editor to resize its grid with `nvim_ui_try_resize`.
    pub async fn try_resize(&self, cols: u32, rows: u32) -> Result<PendingCall> {
        self.call(
            control::UI_TRY_RESIZE,
            vec![Value::from(cols), Value::from(rows)],
        )
        .await
    }

    /// Start closing the session. Pending calls are cancelled.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Next client-side unique id. Independent from request ids.
    pub fn next_uid(&self) -> u32 {
        self.uids.next_id()
    }

    /// Whether the owner task is gone.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| VimwireError::SessionClosed)
    }
}

/// A request waiting for its reply.
pub struct PendingCall {
    id: u32,
    rx: oneshot::Receiver<CallResult>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PendingCall {
    /// Message id of the request.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait for the reply.
    pub async fn wait(self) -> Result<Value> {
        self.rx
            .await
            .map_err(|_| VimwireError::RequestCancelled(CancelReason::SessionClosed))?
    }

    /// Wait for the reply and decode it into `T`.
    pub async fn wait_as<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.wait().await?;
        MsgPackCodec::from_value(&value)
    }

    /// Wait for the reply for at most `timeout`.
    ///
    /// On expiry the request is cancelled in the session, so a late reply is
    /// treated as an unknown response.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<Value> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(reply) => {
                reply.map_err(|_| VimwireError::RequestCancelled(CancelReason::SessionClosed))?
            }
            Err(_) => {
                let _ = self.commands.send(Command::Cancel {
                    id: self.id,
                    reason: CancelReason::Timeout,
                });
                Err(VimwireError::RequestCancelled(CancelReason::Timeout))
            }
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall").field("id", &self.id).finish()
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub struct ExitReport {
    /// Exit status of the editor, when it was a child process that could be waited on.
    pub status: Option<ExitStatus>,
    /// Editor version, if the handshake got that far.
    pub version: Option<Version>,
    /// Whether the UI ever attached.
    pub attached: bool,
}

/// A running session.
pub struct Client {
    handle: SessionHandle,
    task: JoinHandle<ExitReport>,
}

impl Client {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// A handle that can be moved to other tasks.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub async fn call(&self, method: impl Into<String>, args: Vec<Value>) -> Result<PendingCall> {
        self.handle.call(method, args).await
    }

    pub async fn notify(&self, method: impl Into<String>, args: Vec<Value>) -> Result<()> {
        self.handle.notify(method, args).await
    }

    pub fn shutdown(&self) -> Result<()> {
        self.handle.shutdown()
    }

    pub fn next_uid(&self) -> u32 {
        self.handle.next_uid()
    }

    /// Wait until the editor is gone.
    ///
    /// This consumes the client and resolves once the owner task finished.
    pub async fn wait_for_exit(self) -> Result<ExitReport> {
        self.task
            .await
            .map_err(|e| VimwireError::Io(std::io::Error::other(e.to_string())))
    }
}

/// The owner task.
struct Driver<R: Renderer, Rd> {
    session: Session<R>,
    reader: Rd,
    writer: Option<WriterHandle>,
    commands: mpsc::UnboundedReceiver<Command>,
    child: Option<Child>,
    handshake_timeout: Duration,
}

impl<R, Rd> Driver<R, Rd>
where
    R: Renderer,
    Rd: AsyncRead + Unpin + Send + 'static,
{
    async fn run(mut self) -> ExitReport {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut stdout_open = true;
        let mut commands_open = true;
        let mut exited = self.child.is_none();
        let mut status = None;
        let mut attached = false;
        let mut kill_at: Option<Instant> = None;

        let deadline = tokio::time::sleep(self.handshake_timeout);
        tokio::pin!(deadline);

        if let Err(e) = self.session.start_handshake() {
            tracing::error!("Could not start the handshake: {}", e);
            self.session.shutdown();
        }
        self.flush();

        while stdout_open || !exited {
            tokio::select! {
                read = self.reader.read(&mut buf), if stdout_open => match read {
                    Ok(0) => {
                        tracing::debug!("Editor closed its output");
                        stdout_open = false;
                        self.session.input_closed(None);
                    }
                    Ok(n) => self.session.feed(&buf[..n]),
                    Err(e) => {
                        stdout_open = false;
                        self.session.input_closed(Some(e));
                    }
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        // The editor keeps running until it quits on its own.
                        tracing::debug!("Every session handle was dropped");
                        commands_open = false;
                    }
                },
                () = &mut deadline, if self.session.state() == SessionState::Handshaking => {
                    self.session.handshake_timed_out();
                }
                result = wait_child(&mut self.child), if !exited => {
                    exited = true;
                    status = result;
                }
                () = sleep_until(kill_at), if kill_at.is_some() && !exited => {
                    kill_at = None;
                    self.kill_child();
                }
            }

            attached |= self.session.is_ready();
            self.flush();

            if !self.session.state().is_open() && self.writer.is_some() {
                // Closing stdin asks the editor to quit.
                self.writer = None;
                if !exited {
                    kill_at = Some(Instant::now() + SHUTDOWN_GRACE);
                }
            }
        }

        let version = self.session.version();
        self.session.closed(status);
        ExitReport {
            status,
            version,
            attached,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Call {
                method,
                args,
                completion,
                ack,
            } => {
                let _ = ack.send(self.session.call(method, args, completion));
            }
            Command::Notify { method, args, ack } => {
                let _ = ack.send(self.session.notify(method, args));
            }
            Command::Cancel { id, reason } => self.session.cancel_request(id, reason),
            Command::Shutdown => self.session.shutdown(),
        }
    }

    /// Hand queued messages to the writer task.
    fn flush(&mut self) {
        for message in self.session.take_outbound() {
            let Some(writer) = &self.writer else {
                tracing::debug!("Dropping {} byte message, stdin is closed", message.len());
                continue;
            };
            if let Err(e) = writer.send(message) {
                tracing::error!("Writer task is gone: {}", e);
                self.writer = None;
                self.session.shutdown();
            }
        }
    }

    fn kill_child(&mut self) {
        if let Some(child) = self.child.as_mut() {
            tracing::warn!("Editor did not exit after {:?}, killing it", SHUTDOWN_GRACE);
            if let Err(e) = child.start_kill() {
                tracing::error!("Failed to kill the editor: {}", e);
            }
        }
    }
}

async fn wait_child(child: &mut Option<Child>) -> Option<ExitStatus> {
    match child {
        Some(child) => match child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::error!("Failed to wait for the editor: {}", e);
                None
            }
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
