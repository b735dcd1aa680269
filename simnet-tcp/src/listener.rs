//! Passive (server) socket.
//!
//! A [`ListenerSocket`] owns one local port.  While in `Listen` it answers
//! every Start addressed to that port with a fresh
//! [`ConnectionSocket`] that is already `Established`: the new socket is
//! registered in the host's active table, parked in the backlog for
//! [`Listen::accept`], and replies with its own Start so the caller's
//! `connect()` completes.  Starts that arrive while the backlog is full are
//! dropped; the peer is expected to retry.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::connection::ConnectionSocket;
use crate::demux::Demultiplexer;
use crate::ring_buffer::RingBuffer;
use crate::segment::Segment;
use crate::socket::{Listen, SocketCore, SocketError};
use crate::state::ConnectionState;

struct ListenInner {
    state: ConnectionState,
    /// Allocated by `listen()`.
    backlog: Option<RingBuffer<Arc<ConnectionSocket>>>,
}

/// A socket accepting connections on one local port.
pub struct ListenerSocket {
    local_port: u16,
    backlog_capacity: usize,
    demux: Demultiplexer,
    this: Weak<ListenerSocket>,
    core: SocketCore<ListenInner>,
}

impl ListenerSocket {
    /// Create a `Closed` listener on `port` and register it with `demux`.
    ///
    /// Nothing is accepted until [`Listen::listen`] is called.
    pub async fn bind(demux: &Demultiplexer, port: u16) -> Result<Arc<Self>, SocketError> {
        let label = format!("{}:{}", demux.host(), port);
        let listener = Arc::new_cyclic(|this| Self {
            local_port: port,
            backlog_capacity: demux.config().listen_backlog,
            demux: demux.clone(),
            this: this.clone(),
            core: SocketCore::new(
                label,
                ListenInner {
                    state: ConnectionState::Closed,
                    backlog: None,
                },
            ),
        });
        demux.add_listening(&listener).await?;
        Ok(listener)
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub(crate) fn demux(&self) -> &Demultiplexer {
        &self.demux
    }

    pub async fn state(&self) -> ConnectionState {
        self.core.lock().await.state
    }

    /// Connections handshaked but not yet accepted.
    pub async fn backlog_len(&self) -> usize {
        self.core
            .lock()
            .await
            .backlog
            .as_ref()
            .map_or(0, RingBuffer::len)
    }

    pub fn backlog_capacity(&self) -> usize {
        self.backlog_capacity
    }

    /// [`Listen::accept`] bounded by `deadline`.
    pub async fn accept_timeout(
        &self,
        deadline: Duration,
    ) -> Result<Arc<ConnectionSocket>, SocketError> {
        tokio::time::timeout(deadline, self.accept())
            .await
            .map_err(|_| SocketError::TimedOut)?
    }

    /// Stop listening and leave the listening table.
    ///
    /// Connections still waiting in the backlog are closed, each sending its
    /// Teardown.  Pending `accept()` calls fail with `InvalidState`.
    pub async fn close(&self) -> Result<(), SocketError> {
        let pending = {
            let mut inner = self.core.lock().await;
            if inner.state != ConnectionState::Listen {
                return Ok(());
            }
            log::debug!("[{}] {} → {}", self.core.label(), inner.state, ConnectionState::Closed);
            inner.state = ConnectionState::Closed;
            let pending = inner
                .backlog
                .take()
                .map(|mut backlog| backlog.drain())
                .unwrap_or_default();
            self.demux.remove_listening(self).await?;
            self.core.notify_all();
            pending
        };

        // Each connection takes its own lock; ours is released by now.
        for conn in pending {
            log::debug!("[{}] closing unaccepted {conn:?}", self.core.label());
            conn.close().await?;
        }
        Ok(())
    }

    /// Handle a segment routed here by the host's receiver task.
    pub(crate) async fn process_segment(&self, segment: Segment) {
        let mut inner = self.core.lock().await;
        log::debug!("[{}] ← {segment} in {}", self.core.label(), inner.state);

        if inner.state != ConnectionState::Listen || !segment.is_start() {
            log::trace!("[{}] {} ignored in {}", self.core.label(), segment.tag(), inner.state);
            return;
        }
        let Some(backlog) = inner.backlog.as_mut() else {
            return;
        };
        if backlog.is_full() {
            log::warn!(
                "[{}] backlog full ({}), dropping {segment}",
                self.core.label(),
                backlog.capacity()
            );
            return;
        }

        let conn = ConnectionSocket::with_state(
            &self.demux,
            self.local_port,
            segment.src_port,
            ConnectionState::Established,
        );
        if let Err(e) = self.demux.add_active(&conn).await {
            log::warn!("[{}] rejecting {segment}: {e}", self.core.label());
            return;
        }
        // Queued before the socket is acceptable: a worker's Teardown can
        // never overtake the reply.
        conn.reply_start();
        backlog
            .put(Arc::clone(&conn))
            .expect("backlog checked not full under the same lock");
        log::debug!(
            "[{}] spawned {conn:?}, backlog {}/{}",
            self.core.label(),
            backlog.len(),
            backlog.capacity()
        );
        self.core.notify_one();
    }
}

impl Listen for ListenerSocket {
    async fn listen(&self) -> Result<(), SocketError> {
        let mut inner = self.core.lock().await;
        match inner.state {
            ConnectionState::Listen => Ok(()),
            ConnectionState::Closed => {
                let this = self
                    .this
                    .upgrade()
                    .expect("socket used after its last Arc was dropped");
                self.demux.add_listening(&this).await?;
                inner.backlog = Some(RingBuffer::with_capacity(self.backlog_capacity));
                log::debug!("[{}] {} → {}", self.core.label(), inner.state, ConnectionState::Listen);
                inner.state = ConnectionState::Listen;
                Ok(())
            }
            state => Err(SocketError::InvalidState { op: "listen", state }),
        }
    }

    async fn accept(&self) -> Result<Arc<ConnectionSocket>, SocketError> {
        let conn = self
            .core
            .wait_for(|inner| {
                if inner.state != ConnectionState::Listen {
                    return Some(Err(SocketError::InvalidState {
                        op: "accept",
                        state: inner.state,
                    }));
                }
                inner.backlog.as_mut()?.get().ok().map(Ok)
            })
            .await?;
        log::debug!("[{}] accepted {conn:?}", self.core.label());
        Ok(conn)
    }
}

impl fmt::Debug for ListenerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSocket")
            .field("label", &self.core.label())
            .field("local_port", &self.local_port)
            .field("backlog_capacity", &self.backlog_capacity)
            .finish_non_exhaustive()
    }
}
