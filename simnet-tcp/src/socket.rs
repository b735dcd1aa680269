//! Shared socket plumbing: error type, capability traits, lock + wait.
//!
//! Both socket variants are built from the same parts:
//! - one [`tokio::sync::Mutex`] guarding the socket's FSM state,
//! - one [`Notify`] that application calls wait on (`accept`, the completion
//!   wait inside `connect`),
//! - a log label (`host:port`) injected at construction.
//!
//! Those parts live in [`SocketCore`].  What a socket *can do* is expressed
//! by two capability traits instead of a shared base class:
//! - [`Listen`] — passive open and accept (implemented by
//!   [`crate::listener::ListenerSocket`]),
//! - [`Transfer`] — byte transfer (implemented by
//!   [`crate::connection::ConnectionSocket`]).

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::connection::ConnectionSocket;
use crate::demux::DemuxError;
use crate::state::ConnectionState;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by socket operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SocketError {
    /// The socket variant has no implementation for this operation yet.
    #[error("{0} is not implemented by this socket")]
    CapabilityNotImplemented(&'static str),
    /// The operation is not allowed in the socket's current state.
    #[error("cannot {op} in state {state}")]
    InvalidState {
        op: &'static str,
        state: ConnectionState,
    },
    /// A deadline-bounded wait expired.
    #[error("operation timed out")]
    TimedOut,
    /// Registering with or removing from the host's socket tables failed.
    #[error(transparent)]
    Demux(#[from] DemuxError),
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Passive-open capability: listen for and accept incoming connections.
pub trait Listen {
    /// Start accepting Start segments on the socket's local port.
    fn listen(&self) -> impl Future<Output = Result<(), SocketError>> + Send;

    /// Wait for the next handshaked connection and take it off the backlog.
    fn accept(&self) -> impl Future<Output = Result<Arc<ConnectionSocket>, SocketError>> + Send;
}

/// Data-transfer capability.
///
/// A reliable-transfer implementation segments to the link MTU, numbers the
/// bytes and retransmits on timeout.  Sockets without one answer with
/// [`SocketError::CapabilityNotImplemented`].
pub trait Transfer {
    /// Queue all of `data` for delivery to the peer.
    fn send_data(&self, data: &[u8]) -> impl Future<Output = Result<(), SocketError>> + Send;

    /// Copy received bytes into `buf`, returning how many were written.
    fn receive_data(&self, buf: &mut [u8])
        -> impl Future<Output = Result<usize, SocketError>> + Send;
}

// ---------------------------------------------------------------------------
// SocketCore
// ---------------------------------------------------------------------------

/// The lock and wait condition every socket owns.
pub(crate) struct SocketCore<S> {
    label: String,
    state: Mutex<S>,
    wakeup: Notify,
}

impl<S: Send> SocketCore<S> {
    pub(crate) fn new(label: String, state: S) -> Self {
        Self {
            label,
            state: Mutex::new(state),
            wakeup: Notify::new(),
        }
    }

    /// `host:port`, used as the prefix of every log record.
    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().await
    }

    /// Wait until `poll` returns `Some`, re-checking after every wakeup.
    ///
    /// `poll` runs with the lock held, so it can both test a condition and
    /// act on it (e.g. dequeue) atomically.
    pub(crate) async fn wait_for<T, F>(&self, mut poll: F) -> T
    where
        F: FnMut(&mut S) -> Option<T>,
    {
        let mut guard = self.state.lock().await;
        loop {
            if let Some(out) = poll(&mut *guard) {
                return out;
            }
            // Created while the lock is held: a notification sent after the
            // lock is released reaches this future.
            let notified = self.wakeup.notified();
            drop(guard);
            notified.await;
            guard = self.state.lock().await;
        }
    }

    /// Wake every waiter (state changes).
    pub(crate) fn notify_all(&self) {
        self.wakeup.notify_waiters();
    }

    /// Wake one waiter, or let the next one through (new backlog entry).
    pub(crate) fn notify_one(&self) {
        self.wakeup.notify_one();
    }
}
