//! Table of in-flight requests issued by this client.
//!
//! Every outbound call gets a `u32` message id. The entry lives until the
//! matching response arrives, a caller timeout cancels it, or the session
//! tears down and cancels everything at once.

use std::collections::HashMap;

use rmpv::Value;
use tokio::sync::oneshot;

use crate::error::{CancelReason, Result, VimwireError};

/// Outcome delivered to a completion slot.
pub type CallResult = Result<Value>;

/// Where a response goes once it arrives.
#[derive(Debug)]
pub enum Completion {
    /// A caller is waiting on a [`PendingCall`](crate::client::PendingCall) future.
    Channel(oneshot::Sender<CallResult>),
    /// The session handles the reply itself (handshake steps).
    Internal,
    /// Fire-and-forget call from an extension: failures are only logged.
    Detached,
}

impl Completion {
    /// Create a channel completion and the receiver that observes it.
    pub fn channel() -> (Self, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        (Completion::Channel(tx), rx)
    }
}

/// A pending request.
#[derive(Debug)]
pub struct PendingRequest {
    /// Method name, used for diagnostics and internal routing.
    pub method: String,
    completion: Completion,
}

/// What happened to a response handed to [`RequestTable::fulfill`].
#[derive(Debug)]
pub enum Fulfilled {
    /// Delivered to a caller (or discarded because the caller went away).
    Delivered,
    /// An internal request: the session must act on the result.
    Internal { method: String, result: CallResult },
    /// Detached request resolved; nothing else to do.
    Detached { method: String, result: CallResult },
    /// No pending request had this id.
    Unknown,
}

/// In-flight request bookkeeping.
#[derive(Debug, Default)]
pub struct RequestTable {
    pending: HashMap<u32, PendingRequest>,
    next_id: u32,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering at `first`. Used to exercise wrap-around.
    pub fn starting_at(first: u32) -> Self {
        Self {
            pending: HashMap::new(),
            next_id: first,
        }
    }

    /// Record a pending request and return its id.
    ///
    /// Ids increase monotonically and wrap at `2^32`; an id that is still
    /// pending is skipped.
    pub fn allocate(&mut self, method: impl Into<String>, completion: Completion) -> u32 {
        let mut id = self.next_id;
        while self.pending.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next_id = id.wrapping_add(1);

        self.pending.insert(
            id,
            PendingRequest {
                method: method.into(),
                completion,
            },
        );
        id
    }

    /// Resolve the request `id` with `result`, removing it from the table.
    ///
    /// Calling this for an id that is not pending (already fulfilled,
    /// cancelled, or never allocated) does nothing and reports `Unknown`.
    pub fn fulfill(&mut self, id: u32, result: CallResult) -> Fulfilled {
        let Some(request) = self.pending.remove(&id) else {
            return Fulfilled::Unknown;
        };

        match request.completion {
            Completion::Channel(tx) => {
                if tx.send(result).is_err() {
                    tracing::debug!(
                        "Caller for request {} ({}) is gone, dropping reply",
                        id,
                        request.method
                    );
                }
                Fulfilled::Delivered
            }
            Completion::Internal => Fulfilled::Internal {
                method: request.method,
                result,
            },
            Completion::Detached => Fulfilled::Detached {
                method: request.method,
                result,
            },
        }
    }

    /// Resolve a single request locally with a cancellation error.
    pub fn cancel(&mut self, id: u32, reason: CancelReason) -> Fulfilled {
        self.fulfill(id, Err(VimwireError::RequestCancelled(reason)))
    }

    /// Resolve every pending request with a cancellation error.
    ///
    /// Returns the number of requests cancelled. The table is empty afterwards.
    pub fn cancel_all(&mut self, reason: CancelReason) -> usize {
        let drained: Vec<(u32, PendingRequest)> = self.pending.drain().collect();
        let count = drained.len();

        for (id, request) in drained {
            tracing::debug!("Cancelling request {} ({}): {}", id, request.method, reason);
            if let Completion::Channel(tx) = request.completion {
                let _ = tx.send(Err(VimwireError::RequestCancelled(reason)));
            }
        }

        count
    }

    /// Forget a pending request without resolving it.
    ///
    /// Used when the request could not be sent at all.
    pub fn remove(&mut self, id: u32) -> Option<PendingRequest> {
        self.pending.remove(&id)
    }

    /// Method name of a pending request.
    pub fn method_of(&self, id: u32) -> Option<&str> {
        self.pending.get(&id).map(|r| r.method.as_str())
    }

    pub fn contains(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
