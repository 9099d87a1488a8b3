//! # Attempt Context
//!
//! Per-attempt resolution object shared by every task working on one
//! `connect()` call.
//!
//! ```text
//!            ┌────────────────────────────────────┐
//!  listener ─┤                                    │
//!  deadline ─┼──► resolve(outcome) ──► oneshot ───┼──► connect() returns
//!  cancel()  ┤      first caller wins             │
//!            │      token.cancel() ──► all tasks  │
//!            └────────────────────────────────────┘
//! ```
//!
//! Exactly one outcome is ever delivered. Once resolved, the token is
//! cancelled and every task selecting on it exits, dropping its
//! subscription.

use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{ConnectError, ConnectResult};

#[derive(Debug)]
pub struct AttemptContext {
    id: u64,
    token: CancellationToken,
    sink: Mutex<Option<oneshot::Sender<ConnectResult<()>>>>,
}

impl AttemptContext {
    /// Creates a context and the receiver its single outcome lands on.
    pub fn new(id: u64) -> (Self, oneshot::Receiver<ConnectResult<()>>) {
        let (tx, rx) = oneshot::channel();
        let ctx = AttemptContext {
            id,
            token: CancellationToken::new(),
            sink: Mutex::new(Some(tx)),
        };
        (ctx, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Delivers the outcome if none has been delivered yet.
    ///
    /// Returns true if this call won.
    pub fn resolve(&self, outcome: ConnectResult<()>) -> bool {
        let sender = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                self.token.cancel();
                // Receiver may already be gone if the caller was dropped.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Resolves with [`ConnectError::Cancelled`].
    pub fn cancel(&self) -> bool {
        self.resolve(Err(ConnectError::Cancelled))
    }

    pub fn is_resolved(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the attempt is resolved.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
