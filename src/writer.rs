//! Dedicated writer task for the editor's stdin.
//!
//! The session owner never awaits a write. Encoded messages are pushed onto
//! an unbounded channel and a dedicated task drains it, batching whatever is
//! ready into a single vectored write.
//!
//! # Architecture
//!
//! ```text
//! Session owner ─► mpsc::UnboundedSender<Bytes> ─► Writer Task ─► child stdin
//! ```
//!
//! The queue is unbounded so that enqueueing never blocks the owner task.
//! The pending count is tracked so that a stalled editor shows up in the logs
//! instead of silently growing memory.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, VimwireError};

/// Default pending count above which a warning is logged.
pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 1024;

/// Maximum messages to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Soft limit on queued messages. Exceeding it only logs a warning.
    pub max_pending_messages: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: DEFAULT_MAX_PENDING_MESSAGES,
        }
    }
}

/// Handle for queueing encoded messages.
///
/// Cheap to clone. Dropping every handle closes the editor's stdin once the
/// queue is flushed.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Bytes>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

impl WriterHandle {
    fn new(tx: mpsc::UnboundedSender<Bytes>, pending: Arc<AtomicUsize>, max_pending: usize) -> Self {
        Self {
            tx,
            pending,
            max_pending,
        }
    }

    /// Queue a message. Never blocks.
    ///
    /// Fails with [`VimwireError::SessionClosed`] once the writer task is gone.
    pub fn send(&self, message: Bytes) -> Result<()> {
        let before = self.pending.fetch_add(1, Ordering::AcqRel);
        if before == self.max_pending {
            tracing::warn!(
                "{} messages waiting for the editor to read its input",
                before + 1
            );
        }

        self.tx.send(message).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            VimwireError::SessionClosed
        })
    }

    /// Whether the soft pending limit is exceeded.
    #[inline]
    pub fn is_congested(&self) -> bool {
        self.pending.load(Ordering::Acquire) > self.max_pending
    }

    /// Get current pending message count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for queueing messages.
///
/// The task finishes when every handle is dropped (after flushing and
/// shutting down `writer`) or on the first write error.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(tx, pending.clone(), config.max_pending_messages);
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.clear();
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("Writing to the editor failed: {}", e);
            return Err(e);
        }
        pending.fetch_sub(batch_size, Ordering::Release);
    }

    // All handles dropped: close stdin so the editor sees EOF.
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of messages using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(VimwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for message in batch {
        let end = offset + message.len();
        if skip_bytes < end && !message.is_empty() {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&message[start..]));
        }
        offset = end;
    }

    slices
}
