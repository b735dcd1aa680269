//! One-shot retransmit timer.
//!
//! Every socket owns at most one [`RetransmitTimer`].  Arming it spawns a
//! tokio task that sleeps for the retransmit timeout (RTO) and then runs the
//! supplied expiry future.  Arming again cancels the pending task first, so
//! a socket never has two timeouts outstanding; dropping the timer cancels
//! it as well.
//!
//! The expiry future runs on its own task.  It is the caller's job to make
//! that future take the socket lock before touching socket state (see
//! [`crate::connection::ConnectionSocket::start_retransmit_timer`]).

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A cancellable, replaceable one-shot timer.
#[derive(Debug)]
pub struct RetransmitTimer {
    rto: Duration,
    pending: Option<JoinHandle<()>>,
}

impl RetransmitTimer {
    pub fn new(rto: Duration) -> Self {
        Self { rto, pending: None }
    }

    /// The delay between arming and expiry.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Schedule `on_expiry` to run one RTO from now, replacing any pending
    /// timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&mut self, on_expiry: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let rto = self.rto;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(rto).await;
            on_expiry.await;
        }));
    }

    /// Cancel the pending timer.  Returns `true` if one was still running.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    /// Forget the pending task without aborting it.
    ///
    /// Called from the expiry path itself, which must not abort the task it
    /// is running on.
    pub fn expired(&mut self) {
        self.pending = None;
    }

    /// `true` while an armed timer has neither fired nor been cancelled.
    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
