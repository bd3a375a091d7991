//! End-to-end tests: a scripted editor on one side of an in-memory stream,
//! the real session driver on the other.

use std::collections::VecDeque;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rmpv::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use vimwire::codec::Envelope;
use vimwire::handler::EventDispatcher;
use vimwire::protocol::FrameBuffer;
use vimwire::requests::Completion;
use vimwire::ui::{Mode, Tab, TabHandle};
use vimwire::{
    CancelReason, Client, ExtensionContext, Renderer, Session, SessionConfig, SessionState,
    VimwireError,
};

/// Renderer that writes one line per call into a shared log.
#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn record(&self, line: String) {
        self.0.lock().unwrap().push(line);
    }
}

impl Renderer for Log {
    fn put(&mut self, text: &str, cells: usize) {
        self.record(format!("put {} {}", text, cells));
    }

    fn cursor_goto(&mut self, row: u64, col: u64) {
        self.record(format!("goto {} {}", row, col));
    }

    fn mode_change(&mut self, name: &str, mode: Option<&Mode>) {
        self.record(format!("mode {} {}", name, mode.is_some()));
    }

    fn tab_list(&mut self, tabs: &[Tab], active: Option<TabHandle>) {
        let names: Vec<&str> = tabs.iter().map(|t| t.name.as_str()).collect();
        self.record(format!("tabs {:?} {:?}", names, active.map(|h| h.0)));
    }

    fn status(&mut self, message: &str) {
        self.record(format!("status {}", message));
    }

    fn fatal(&mut self, message: &str) {
        self.record(format!("fatal {}", message));
    }

    fn exited(&mut self, _status: Option<ExitStatus>) {
        self.record("exited".to_string());
    }
}

fn redraw(batches: Vec<Value>) -> Envelope {
    Envelope::notification("redraw", batches)
}

/// `[name, [args]...]`
fn batch(name: &str, calls: Vec<Vec<Value>>) -> Value {
    let mut items = vec![Value::from(name)];
    items.extend(calls.into_iter().map(Value::Array));
    Value::Array(items)
}

fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

fn api_info(minor: u64) -> Value {
    let version = map(vec![
        ("major", Value::from(0)),
        ("minor", Value::from(minor)),
        ("patch", Value::from(0)),
    ]);
    Value::Array(vec![Value::from(1), map(vec![("version", version)])])
}

fn encode(envelopes: &[Envelope]) -> Vec<u8> {
    envelopes
        .iter()
        .flat_map(|e| e.encode().unwrap().to_vec())
        .collect()
}

fn session(log: &Log) -> Session<Log> {
    Session::new(
        &SessionConfig::default(),
        EventDispatcher::default(),
        log.clone(),
    )
}

// ============================================================================
// Session core
// ============================================================================

#[test]
fn test_chunking_does_not_change_what_is_drawn() {
    let stream = encode(&[
        redraw(vec![
            batch("put", vec![vec![Value::from("h")], vec![Value::from("i")]]),
            batch("cursor_goto", vec![vec![Value::from(2), Value::from(5)]]),
        ]),
        Envelope::response(77, None, Value::Nil),
        redraw(vec![batch(
            "put",
            vec![vec![Value::from("é")], vec![Value::from("!")]],
        )]),
    ]);

    let whole = Log::default();
    session(&whole).feed(&stream);
    assert_eq!(whole.lines(), vec!["put hi 2", "goto 2 5", "put é! 2"]);

    for chunk_size in 1..stream.len() {
        let log = Log::default();
        let mut session = session(&log);
        for chunk in stream.chunks(chunk_size) {
            session.feed(chunk);
        }
        assert_eq!(log.lines(), whole.lines(), "chunk size {}", chunk_size);
    }

    for split in 0..=stream.len() {
        let log = Log::default();
        let mut session = session(&log);
        session.feed(&stream[..split]);
        session.feed(&stream[split..]);
        assert_eq!(log.lines(), whole.lines(), "split at {}", split);
    }
}

#[test]
fn test_batch_dispatches_in_order() {
    let log = Log::default();
    let mut session = session(&log);

    session.feed(&encode(&[redraw(vec![
        batch("put", vec![vec![Value::from("a")]]),
        batch("cursor_goto", vec![vec![Value::from(1), Value::from(0)]]),
        batch("put", vec![vec![Value::from("b")]]),
    ])]));

    assert_eq!(log.lines(), vec!["put a 1", "goto 1 0", "put b 1"]);
}

#[test]
fn test_unknown_response_does_not_disturb_next_message() {
    let log = Log::default();
    let mut session = session(&log);

    session.feed(&encode(&[
        Envelope::response(99, None, Value::from("stray")),
        redraw(vec![batch("put", vec![vec![Value::from("x")]])]),
    ]));

    assert_eq!(log.lines(), vec!["put x 1"]);
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn test_close_cancels_all_pending_requests() {
    let log = Log::default();
    let mut session = session(&log);
    let mut receivers = Vec::new();
    for method in ["nvim_eval", "nvim_command", "nvim_input"] {
        let (completion, rx) = Completion::channel();
        session.call(method, vec![], completion).unwrap();
        receivers.push(rx);
    }
    assert_eq!(session.pending_requests(), 3);

    session.closed(None);

    assert_eq!(session.pending_requests(), 0);
    for rx in receivers {
        assert!(matches!(
            rx.await.unwrap(),
            Err(VimwireError::RequestCancelled(CancelReason::ProcessExited))
        ));
    }
    assert_eq!(log.lines(), vec!["exited"]);
}

#[test]
fn test_mode_info_set_replaces_previous_modes() {
    let log = Log::default();
    let mut session = session(&log);
    let mode_info = |names: &[&str]| {
        let modes = names
            .iter()
            .map(|name| {
                map(vec![
                    ("name", Value::from(*name)),
                    ("cursor_shape", Value::from("block")),
                ])
            })
            .collect();
        batch(
            "mode_info_set",
            vec![vec![Value::from(true), Value::Array(modes)]],
        )
    };

    session.feed(&encode(&[redraw(vec![mode_info(&["visual"])])]));
    assert!(session.modes().lookup("visual").is_some());

    session.feed(&encode(&[redraw(vec![
        mode_info(&["normal", "insert"]),
        batch("mode_change", vec![vec![Value::from("insert"), Value::from(1)]]),
        batch("mode_change", vec![vec![Value::from("visual"), Value::from(2)]]),
    ])]));

    assert_eq!(session.modes().len(), 2);
    assert!(session.modes().lookup("normal").is_some());
    assert!(session.modes().lookup("visual").is_none());
    assert_eq!(log.lines(), vec!["mode insert true", "mode visual false"]);
}

#[test]
fn test_tabline_update_rebuilds_tabs() {
    let log = Log::default();
    let mut session = session(&log);
    let tab = |id: u64, name: &str| map(vec![("tab", Value::from(id)), ("name", Value::from(name))]);

    session.feed(&encode(&[redraw(vec![batch(
        "tabline_update",
        vec![vec![
            Value::from(1),
            Value::Array(vec![tab(1, "main"), tab(2, "help")]),
        ]],
    )])]));

    assert_eq!(session.tabs().len(), 2);
    assert_eq!(session.tabs().active(), Some(TabHandle(1)));
    assert_eq!(log.lines(), vec![r#"tabs ["main", "help"] Some(1)"#]);
}

// ============================================================================
// Driver over a stream
// ============================================================================

/// The editor end of the stream.
struct FakeEditor {
    io: DuplexStream,
    decoder: FrameBuffer,
    received: VecDeque<Envelope>,
}

impl FakeEditor {
    fn new(io: DuplexStream) -> Self {
        Self {
            io,
            decoder: FrameBuffer::new(),
            received: VecDeque::new(),
        }
    }

    /// Next message from the session, or `None` once it closed its side.
    async fn recv(&mut self) -> Option<Envelope> {
        let mut buf = [0u8; 4096];
        while self.received.is_empty() {
            let n = self.io.read(&mut buf).await.unwrap();
            if n == 0 {
                return None;
            }
            for frame in self.decoder.push(&buf[..n]) {
                self.received
                    .push_back(frame.unwrap().into_envelope().unwrap());
            }
        }
        self.received.pop_front()
    }

    async fn expect_request(&mut self, expected: &str) -> (u32, Vec<Value>) {
        match self.recv().await {
            Some(Envelope::Request { id, method, params }) => {
                assert_eq!(method, expected);
                (id, params)
            }
            other => panic!("expected {} request, got {:?}", expected, other),
        }
    }

    async fn send(&mut self, envelopes: &[Envelope]) {
        self.io.write_all(&encode(envelopes)).await.unwrap();
    }

    async fn handshake(&mut self) {
        let (id, _) = self.expect_request("nvim_get_api_info").await;
        self.send(&[Envelope::response(id, None, api_info(4))]).await;
        let (id, params) = self.expect_request("nvim_ui_attach").await;
        assert_eq!(params[0].as_u64(), Some(80));
        assert_eq!(params[1].as_u64(), Some(24));
        self.send(&[Envelope::response(id, None, Value::Nil)]).await;
    }

    /// Wait for the session to close its side, then close ours.
    async fn hang_up(mut self) {
        while self.recv().await.is_some() {}
        drop(self.io);
    }
}

fn connect(builder: vimwire::SessionBuilder, log: &Log) -> (Client, FakeEditor) {
    let (session_io, editor_io) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(session_io);
    let client = builder.connect(reader, writer, log.clone()).unwrap();
    (client, FakeEditor::new(editor_io))
}

#[tokio::test]
async fn test_attach_call_and_redraw() {
    let log = Log::default();
    let (client, mut editor) = connect(Client::builder(), &log);
    editor.handshake().await;

    let call = client
        .call("nvim_eval", vec![Value::from("1+1")])
        .await
        .unwrap();
    let (id, params) = editor.expect_request("nvim_eval").await;
    assert_eq!(id, call.id());
    assert_eq!(params, vec![Value::from("1+1")]);

    // The redraw precedes the reply on the wire, so it is drawn by the time
    // the reply arrives.
    editor
        .send(&[
            redraw(vec![batch("put", vec![vec![Value::from("ok")]])]),
            Envelope::response(id, None, Value::from(2)),
        ])
        .await;
    assert_eq!(call.wait_as::<u64>().await.unwrap(), 2);
    assert_eq!(log.lines(), vec!["put ok 1"]);

    client.shutdown().unwrap();
    editor.hang_up().await;
    let report = client.wait_for_exit().await.unwrap();

    assert!(report.attached);
    assert_eq!(report.version.map(|v| v.to_string()), Some("0.4.0".to_string()));
    assert!(report.status.is_none());
    assert_eq!(log.lines().last().map(String::as_str), Some("exited"));
}

#[tokio::test]
async fn test_shutdown_cancels_unanswered_call() {
    let log = Log::default();
    let (client, mut editor) = connect(Client::builder(), &log);
    editor.handshake().await;

    let call = client.call("nvim_eval", vec![]).await.unwrap();
    editor.expect_request("nvim_eval").await;

    client.shutdown().unwrap();
    assert!(matches!(
        call.wait().await,
        Err(VimwireError::RequestCancelled(CancelReason::SessionClosed))
    ));

    // Nothing is accepted once closing.
    let handle = client.handle();
    assert!(matches!(
        handle.notify("nvim_command", vec![]).await,
        Err(VimwireError::SessionClosed)
    ));

    editor.hang_up().await;
    client.wait_for_exit().await.unwrap();
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_wait_timeout_then_late_reply() {
    let log = Log::default();
    let (client, mut editor) = connect(Client::builder(), &log);
    editor.handshake().await;

    let call = client.call("nvim_eval", vec![]).await.unwrap();
    let (late_id, _) = editor.expect_request("nvim_eval").await;
    assert!(matches!(
        call.wait_timeout(Duration::from_millis(20)).await,
        Err(VimwireError::RequestCancelled(CancelReason::Timeout))
    ));

    let next = client.call("nvim_eval", vec![]).await.unwrap();
    let (id, _) = editor.expect_request("nvim_eval").await;
    editor
        .send(&[
            Envelope::response(late_id, None, Value::from("late")),
            Envelope::response(id, None, Value::from("fresh")),
        ])
        .await;
    assert_eq!(next.wait().await.unwrap(), Value::from("fresh"));
    // A stray reply is logged, not shown.
    assert!(log.lines().is_empty());

    client.shutdown().unwrap();
    editor.hang_up().await;
    client.wait_for_exit().await.unwrap();
}

#[tokio::test]
async fn test_extension_call_reaches_editor() {
    let log = Log::default();
    let builder = Client::builder().extension(
        "vimwire.open",
        |(path,): (String,), ctx: &mut ExtensionContext| {
            ctx.notify("nvim_command", vec![Value::from(format!("edit {}", path))]);
            Ok(())
        },
    );
    let (client, mut editor) = connect(builder, &log);
    editor.handshake().await;

    editor
        .send(&[Envelope::notification(
            "vimwire.open",
            vec![Value::from("notes.txt")],
        )])
        .await;

    match editor.recv().await {
        Some(Envelope::Notification { method, params }) => {
            assert_eq!(method, "nvim_command");
            assert_eq!(params, vec![Value::from("edit notes.txt")]);
        }
        other => panic!("unexpected {:?}", other),
    }

    client.shutdown().unwrap();
    editor.hang_up().await;
    client.wait_for_exit().await.unwrap();
}

#[tokio::test]
async fn test_silent_editor_fails_handshake() {
    let log = Log::default();
    let builder = Client::builder().handshake_timeout(Duration::from_millis(50));
    let (client, mut editor) = connect(builder, &log);

    editor.expect_request("nvim_get_api_info").await;
    editor.hang_up().await;
    let report = client.wait_for_exit().await.unwrap();

    assert!(!report.attached);
    assert!(report.version.is_none());
    let lines = log.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("fatal "));
    assert_eq!(lines[1], "exited");
}

#[tokio::test]
async fn test_editor_hangup_closes_session() {
    let log = Log::default();
    let (client, mut editor) = connect(Client::builder(), &log);
    editor.handshake().await;

    let call = client.call("nvim_eval", vec![]).await.unwrap();
    editor.expect_request("nvim_eval").await;
    drop(editor);

    assert!(matches!(
        call.wait().await,
        Err(VimwireError::RequestCancelled(CancelReason::ProcessExited))
    ));
    let report = client.wait_for_exit().await.unwrap();
    assert!(report.attached);
    assert_eq!(log.lines(), vec!["exited"]);
}

#[tokio::test]
async fn test_editor_hangup_during_handshake_is_fatal() {
    let log = Log::default();
    let (client, mut editor) = connect(Client::builder(), &log);

    editor.expect_request("nvim_get_api_info").await;
    drop(editor);
    let report = client.wait_for_exit().await.unwrap();

    assert!(!report.attached);
    assert!(report.version.is_none());
    let lines = log.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("fatal "));
    assert!(lines[0].contains("exited before the UI could attach"));
    assert_eq!(lines[1], "exited");
}

#[test]
fn test_session_state_after_handshake_failure() {
    let log = Log::default();
    let mut session = session(&log);
    session.start_handshake().unwrap();
    session.handshake_timed_out();
    assert_eq!(session.state(), SessionState::Closing);
    session.closed(None);
    assert_eq!(session.state(), SessionState::Closed);
    // fatal once for the timeout, not again on exit
    assert_eq!(log.lines().len(), 2);
}
