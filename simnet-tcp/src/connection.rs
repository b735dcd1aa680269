//! Active (client / data) socket.
//!
//! A [`ConnectionSocket`] is identified by its `(local_port, remote_port)`
//! pair and lives in its host's active table from creation until it reaches
//! `Closed` after a completed close.  Connections come from two places:
//!
//! - an active open: [`ConnectionSocket::open`] + [`ConnectionSocket::connect`]
//!   (or [`crate::demux::Demultiplexer::connect`]);
//! - a passive open: a [`crate::listener::ListenerSocket`] spawns one, already
//!   `Established`, for every Start it admits.
//!
//! # Transitions
//!
//! | State       | Trigger          | Action                | Next        |
//! |-------------|------------------|-----------------------|-------------|
//! | Closed      | `connect()`      | →START                | SynSent     |
//! | SynSent     | ←START           | wake `connect()`      | Established |
//! | Established | ←TEARDOWN        | wake waiters          | CloseWait   |
//! | Established | `close()`        | →TEARDOWN             | FinWait     |
//! | CloseWait   | `close()`        | →TEARDOWN             | CloseWait   |
//! | FinWait     | ←TEARDOWN        | leave active table    | Closed      |
//!
//! Every transition happens under the socket's own lock, whether it is
//! driven by the application or by the host's receiver task.  Outbound
//! segments are queued on the host's transmitter after the lock is released;
//! queuing never waits on the link.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::demux::Demultiplexer;
use crate::segment::{Segment, SegmentKind};
use crate::socket::{SocketCore, SocketError, Transfer};
use crate::state::ConnectionState;
use crate::timer::RetransmitTimer;

/// FSM state guarded by the socket lock.
#[derive(Debug)]
struct ConnInner {
    state: ConnectionState,
    timer: RetransmitTimer,
}

/// One end of a connection.
pub struct ConnectionSocket {
    local_port: u16,
    remote_port: u16,
    demux: Demultiplexer,
    this: Weak<ConnectionSocket>,
    core: SocketCore<ConnInner>,
    timeouts: AtomicU64,
}

impl ConnectionSocket {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Create a `Closed` socket for `(local_port, remote_port)` and register
    /// it in `demux`'s active table.
    pub async fn open(
        demux: &Demultiplexer,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Arc<Self>, SocketError> {
        let socket = Self::with_state(demux, local_port, remote_port, ConnectionState::Closed);
        demux.add_active(&socket).await?;
        Ok(socket)
    }

    /// Build an unregistered socket already in `state`.
    pub(crate) fn with_state(
        demux: &Demultiplexer,
        local_port: u16,
        remote_port: u16,
        state: ConnectionState,
    ) -> Arc<Self> {
        let label = format!("{}:{}", demux.host(), local_port);
        let timer = RetransmitTimer::new(demux.config().retransmit_timeout);
        Arc::new_cyclic(|this| Self {
            local_port,
            remote_port,
            demux: demux.clone(),
            this: this.clone(),
            core: SocketCore::new(label, ConnInner { state, timer }),
            timeouts: AtomicU64::new(0),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub async fn state(&self) -> ConnectionState {
        self.core.lock().await.state
    }

    /// How many times the retransmit timer has expired on this socket.
    pub fn retransmit_timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub(crate) fn demux(&self) -> &Demultiplexer {
        &self.demux
    }

    /// The owning `Arc`; sockets are only ever reachable through one.
    fn shared(&self) -> Arc<Self> {
        self.this
            .upgrade()
            .expect("socket used after its last Arc was dropped")
    }

    // -----------------------------------------------------------------------
    // Application calls
    // -----------------------------------------------------------------------

    /// Active open: send Start and wait until the peer's Start arrives.
    ///
    /// Waits indefinitely; use [`connect_timeout`](Self::connect_timeout) on
    /// a lossy link.
    pub async fn connect(&self) -> Result<(), SocketError> {
        self.send_start().await?;
        self.wait_connected().await
    }

    /// [`connect`](Self::connect) bounded by `deadline`.
    ///
    /// On [`SocketError::TimedOut`] the socket stays in `SynSent`; a late
    /// Start from the peer still completes the handshake.
    pub async fn connect_timeout(&self, deadline: Duration) -> Result<(), SocketError> {
        self.send_start().await?;
        tokio::time::timeout(deadline, self.wait_connected())
            .await
            .map_err(|_| SocketError::TimedOut)?
    }

    async fn send_start(&self) -> Result<(), SocketError> {
        {
            let mut inner = self.core.lock().await;
            if inner.state != ConnectionState::Closed {
                return Err(SocketError::InvalidState {
                    op: "connect",
                    state: inner.state,
                });
            }
            // No-op if still registered; needed after a previous close removed us.
            self.demux.add_active(&self.shared()).await?;
            self.transition(&mut inner, ConnectionState::SynSent);
        }
        self.emit(Segment::start(self.local_port, self.remote_port));
        Ok(())
    }

    async fn wait_connected(&self) -> Result<(), SocketError> {
        self.core
            .wait_for(|inner| match inner.state {
                ConnectionState::SynSent => None,
                ConnectionState::Established
                | ConnectionState::FinWait
                | ConnectionState::CloseWait => Some(Ok(())),
                state => Some(Err(SocketError::InvalidState {
                    op: "connect",
                    state,
                })),
            })
            .await
    }

    /// Close this side of the connection.
    ///
    /// From `Established` a Teardown is sent and the socket waits in
    /// `FinWait` for the peer's.  From `CloseWait` the Teardown answers the
    /// peer's and the socket stays in `CloseWait`.  Any pending retransmit
    /// timer is cancelled.
    ///
    /// Closing a `Closed` or `SynSent` socket sends nothing and changes no
    /// state.  A `SynSent` socket keeps its port pair registered, so a late
    /// Start from the peer still completes the handshake.
    pub async fn close(&self) -> Result<(), SocketError> {
        {
            let mut inner = self.core.lock().await;
            inner.timer.cancel();
            match inner.state {
                ConnectionState::Established => {
                    self.transition(&mut inner, ConnectionState::FinWait);
                }
                ConnectionState::CloseWait => {}
                ConnectionState::Closed | ConnectionState::SynSent => return Ok(()),
                state => return Err(SocketError::InvalidState { op: "close", state }),
            }
        }
        self.emit(Segment::teardown(self.local_port, self.remote_port));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Retransmit timer
    // -----------------------------------------------------------------------

    /// Arm (or re-arm) the retransmit timer for one RTO.
    ///
    /// On expiry the timer task takes the socket lock and runs the timeout
    /// handler.
    pub async fn start_retransmit_timer(&self) {
        let mut inner = self.core.lock().await;
        let this = self.this.clone();
        inner.timer.arm(async move {
            if let Some(socket) = this.upgrade() {
                socket.on_timer_expired().await;
            }
        });
    }

    /// Cancel the retransmit timer.  Returns `true` if one was pending.
    pub async fn stop_retransmit_timer(&self) -> bool {
        self.core.lock().await.timer.cancel()
    }

    pub async fn retransmit_timer_armed(&self) -> bool {
        self.core.lock().await.timer.is_armed()
    }

    async fn on_timer_expired(&self) {
        let mut inner = self.core.lock().await;
        inner.timer.expired();
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.on_timeout(&mut inner) {
            log::warn!("[{}] retransmit timeout: {e}", self.core.label());
        }
    }

    /// Timeout handler, run with the socket lock held.
    ///
    /// Would resend the oldest unacknowledged segment; no retransmission
    /// queue exists yet.
    fn on_timeout(&self, _inner: &mut ConnInner) -> Result<(), SocketError> {
        Err(SocketError::CapabilityNotImplemented("retransmit on timeout"))
    }

    // -----------------------------------------------------------------------
    // Inbound path (called by the host's receiver task)
    // -----------------------------------------------------------------------

    pub(crate) async fn process_segment(&self, segment: Segment) {
        let mut inner = self.core.lock().await;
        log::debug!("[{}] ← {segment} in {}", self.core.label(), inner.state);

        match (inner.state, &segment.kind) {
            (ConnectionState::SynSent, SegmentKind::Start) => {
                self.transition(&mut inner, ConnectionState::Established);
                self.core.notify_all();
            }
            (ConnectionState::Established, SegmentKind::Teardown) => {
                self.transition(&mut inner, ConnectionState::CloseWait);
                self.core.notify_all();
            }
            (ConnectionState::FinWait, SegmentKind::Teardown) => {
                self.transition(&mut inner, ConnectionState::Closed);
                inner.timer.cancel();
                if let Err(e) = self.demux.remove_active(self).await {
                    log::warn!("[{}] leaving active table: {e}", self.core.label());
                }
                self.core.notify_all();
            }
            (ConnectionState::CloseWait, SegmentKind::Data { payload }) => {
                // Delivery hook: no receive buffer exists to hold the bytes.
                log::debug!(
                    "[{}] {} payload byte(s) not delivered",
                    self.core.label(),
                    payload.len()
                );
            }
            (state, _) => {
                log::trace!("[{}] {} ignored in {state}", self.core.label(), segment.tag());
            }
        }
    }

    /// Queue the Start reply of a passive open.
    ///
    /// Called by the listener before the socket becomes acceptable, so the
    /// reply always leaves ahead of anything the accepting side sends.
    pub(crate) fn reply_start(&self) {
        self.emit(Segment::start(self.local_port, self.remote_port));
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn transition(&self, inner: &mut ConnInner, next: ConnectionState) {
        log::debug!("[{}] {} → {next}", self.core.label(), inner.state);
        inner.state = next;
    }

    fn emit(&self, segment: Segment) {
        log::debug!("[{}] → {segment}", self.core.label());
        self.demux.transmit(segment);
    }
}

impl Transfer for ConnectionSocket {
    async fn send_data(&self, _data: &[u8]) -> Result<(), SocketError> {
        let state = self.state().await;
        if !state.can_send() {
            return Err(SocketError::InvalidState {
                op: "send_data",
                state,
            });
        }
        Err(SocketError::CapabilityNotImplemented("send_data"))
    }

    async fn receive_data(&self, _buf: &mut [u8]) -> Result<usize, SocketError> {
        let state = self.state().await;
        if !state.can_receive() {
            return Err(SocketError::InvalidState {
                op: "receive_data",
                state,
            });
        }
        Err(SocketError::CapabilityNotImplemented("receive_data"))
    }
}

impl fmt::Debug for ConnectionSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSocket")
            .field("label", &self.core.label())
            .field("local_port", &self.local_port)
            .field("remote_port", &self.remote_port)
            .finish_non_exhaustive()
    }
}
