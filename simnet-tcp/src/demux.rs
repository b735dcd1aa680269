//! Per-host segment demultiplexer.
//!
//! A [`Demultiplexer`] is one simulated host: it owns one [`Endpoint`] of a
//! [`crate::simulator::DuplexLink`], two socket tables, one receiver task and
//! one transmitter task.
//!
//! ```text
//!             Endpoint::receive
//!                    │
//!             ┌──────▼───────┐
//!             │ receive_loop │  (one tokio task per host)
//!             └──────┬───────┘
//!                    │ lookup under the table lock
//!       ┌────────────┼─────────────────┐
//!       ▼            ▼                 ▼
//!  active[(dst,src)]  listening[dst]   no match → log, drop
//!       │            │
//!       ▼            ▼
//!  ConnectionSocket  ListenerSocket    process_segment (table lock released)
//! ```
//!
//! An exact `(local, remote)` match in the active table wins over a
//! listener on the same local port, so once a connection is spawned its
//! traffic never reaches the listener again.
//!
//! Outbound segments take the opposite path through a second task:
//!
//! ```text
//!  sockets ──transmit()──▶ unbounded queue ──▶ transmit_loop ──▶ Endpoint::send
//! ```
//!
//! `transmit` never waits, so neither the receiver task nor a caller holding
//! a socket lock can be held up by a full link.  Only `transmit_loop` waits
//! for channel space, and it holds no lock while doing so.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;

use crate::config::{ConfigError, SimConfig};
use crate::connection::ConnectionSocket;
use crate::listener::ListenerSocket;
use crate::segment::Segment;
use crate::simulator::Endpoint;
use crate::socket::{Listen, SocketError};

/// Errors from the socket tables.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DemuxError {
    #[error("port {0} already has a listener")]
    ListenerInUse(u16),
    #[error("connection {local}→{remote} already exists")]
    ConnectionInUse { local: u16, remote: u16 },
    #[error("socket belongs to another host")]
    ForeignSocket,
    #[error("port 0 is not a valid socket port")]
    InvalidPort,
}

#[derive(Default)]
struct Tables {
    listening: HashMap<u16, Arc<ListenerSocket>>,
    /// Keyed by `(local_port, remote_port)`.
    active: HashMap<(u16, u16), Arc<ConnectionSocket>>,
}

struct Shared {
    host: String,
    endpoint: Endpoint,
    config: SimConfig,
    tables: Arc<Mutex<Tables>>,
    outbound: mpsc::UnboundedSender<Segment>,
    receiver: AbortHandle,
    transmitter: AbortHandle,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // The transmitter drains what is queued and stops on its own once
        // `outbound` is gone.
        self.receiver.abort();
    }
}

/// Handle to one simulated host.  Clones share the same host.
#[derive(Clone)]
pub struct Demultiplexer {
    shared: Arc<Shared>,
}

enum Route {
    Connection(Arc<ConnectionSocket>),
    Listener(Arc<ListenerSocket>),
}

impl Demultiplexer {
    /// Bind `endpoint` as host `host` and start its receiver and
    /// transmitter tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        endpoint: Endpoint,
        host: impl Into<String>,
        config: &SimConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let host = host.into();
        let tables = Arc::new(Mutex::new(Tables::default()));
        let (outbound, queue) = mpsc::unbounded_channel();

        let receiver = tokio::spawn(receive_loop(
            endpoint.clone(),
            host.clone(),
            Arc::downgrade(&tables),
        ))
        .abort_handle();
        let transmitter = tokio::spawn(transmit_loop(endpoint.clone(), queue)).abort_handle();

        log::info!("[{host}] host up on {} endpoint", endpoint.side());
        Ok(Self {
            shared: Arc::new(Shared {
                host,
                endpoint,
                config: config.clone(),
                tables,
                outbound,
                receiver,
                transmitter,
            }),
        })
    }

    pub fn host(&self) -> &str {
        &self.shared.host
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    /// Queue `segment` for the link without waiting for channel space.
    ///
    /// Segments leave in the order they were queued.
    pub(crate) fn transmit(&self, segment: Segment) {
        if let Err(rejected) = self.shared.outbound.send(segment) {
            log::warn!("[{}] transmitter stopped, {} not sent", self.shared.host, rejected.0);
        }
    }

    fn same_host(&self, other: &Demultiplexer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // -----------------------------------------------------------------------
    // Convenience constructors
    // -----------------------------------------------------------------------

    /// Bind a listener on `port` and put it in `Listen`.
    pub async fn listen(&self, port: u16) -> Result<Arc<ListenerSocket>, SocketError> {
        let listener = ListenerSocket::bind(self, port).await?;
        listener.listen().await?;
        Ok(listener)
    }

    /// Create a `Closed` connection socket for `(local, remote)`.
    pub async fn open(&self, local: u16, remote: u16) -> Result<Arc<ConnectionSocket>, SocketError> {
        ConnectionSocket::open(self, local, remote).await
    }

    /// Open `(local, remote)` and run the handshake to completion.
    pub async fn connect(
        &self,
        local: u16,
        remote: u16,
    ) -> Result<Arc<ConnectionSocket>, SocketError> {
        let socket = self.open(local, remote).await?;
        socket.connect().await?;
        Ok(socket)
    }

    // -----------------------------------------------------------------------
    // Tables
    // -----------------------------------------------------------------------

    /// Register `listener` under its local port.
    ///
    /// Registering the same listener twice is a no-op.
    pub async fn add_listening(&self, listener: &Arc<ListenerSocket>) -> Result<(), DemuxError> {
        if !self.same_host(listener.demux()) {
            return Err(DemuxError::ForeignSocket);
        }
        let port = listener.local_port();
        if port == 0 {
            return Err(DemuxError::InvalidPort);
        }

        let mut tables = self.shared.tables.lock().await;
        match tables.listening.entry(port) {
            Entry::Occupied(e) if Arc::ptr_eq(e.get(), listener) => Ok(()),
            Entry::Occupied(_) => Err(DemuxError::ListenerInUse(port)),
            Entry::Vacant(e) => {
                e.insert(Arc::clone(listener));
                log::debug!("[{}] listening on {port}", self.shared.host);
                Ok(())
            }
        }
    }

    /// Register `socket` under `(local_port, remote_port)`.
    ///
    /// Registering the same socket twice is a no-op.
    pub async fn add_active(&self, socket: &Arc<ConnectionSocket>) -> Result<(), DemuxError> {
        if !self.same_host(socket.demux()) {
            return Err(DemuxError::ForeignSocket);
        }
        let (local, remote) = (socket.local_port(), socket.remote_port());
        if local == 0 || remote == 0 {
            return Err(DemuxError::InvalidPort);
        }

        let mut tables = self.shared.tables.lock().await;
        match tables.active.entry((local, remote)) {
            Entry::Occupied(e) if Arc::ptr_eq(e.get(), socket) => Ok(()),
            Entry::Occupied(_) => Err(DemuxError::ConnectionInUse { local, remote }),
            Entry::Vacant(e) => {
                e.insert(Arc::clone(socket));
                log::debug!("[{}] active {local}→{remote}", self.shared.host);
                Ok(())
            }
        }
    }

    /// Remove `listener` from the listening table.
    ///
    /// Another listener registered under the same port is left in place.
    pub async fn remove_listening(&self, listener: &ListenerSocket) -> Result<(), DemuxError> {
        if !self.same_host(listener.demux()) {
            return Err(DemuxError::ForeignSocket);
        }
        let port = listener.local_port();
        let mut tables = self.shared.tables.lock().await;
        if tables
            .listening
            .get(&port)
            .is_some_and(|l| std::ptr::eq(Arc::as_ptr(l), listener))
        {
            tables.listening.remove(&port);
            log::debug!("[{}] stopped listening on {port}", self.shared.host);
        }
        Ok(())
    }

    /// Remove `socket` from the active table.
    ///
    /// Another socket registered under the same port pair is left in place.
    pub async fn remove_active(&self, socket: &ConnectionSocket) -> Result<(), DemuxError> {
        if !self.same_host(socket.demux()) {
            return Err(DemuxError::ForeignSocket);
        }
        let key = (socket.local_port(), socket.remote_port());
        let mut tables = self.shared.tables.lock().await;
        if tables
            .active
            .get(&key)
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), socket))
        {
            tables.active.remove(&key);
            log::debug!("[{}] released {}→{}", self.shared.host, key.0, key.1);
        }
        Ok(())
    }

    pub async fn listening_count(&self) -> usize {
        self.shared.tables.lock().await.listening.len()
    }

    pub async fn active_count(&self) -> usize {
        self.shared.tables.lock().await.active.len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// `false` once the receiver task has been stopped.
    pub fn is_running(&self) -> bool {
        !self.shared.receiver.is_finished()
    }

    /// Stop both link tasks and forget every registered socket.
    ///
    /// Sockets keep working as values but no longer exchange segments.
    pub async fn shutdown(&self) {
        self.shared.receiver.abort();
        self.shared.transmitter.abort();
        let dropped = {
            let mut tables = self.shared.tables.lock().await;
            std::mem::take(&mut *tables)
        };
        log::info!(
            "[{}] shutdown ({} listener(s), {} connection(s) released)",
            self.shared.host,
            dropped.listening.len(),
            dropped.active.len()
        );
    }
}

// ---------------------------------------------------------------------------
// Link tasks
// ---------------------------------------------------------------------------

/// Body of the receiver task.
///
/// Holds only a weak reference to the tables so that dropping the host
/// ends the loop.
async fn receive_loop(endpoint: Endpoint, host: String, tables: Weak<Mutex<Tables>>) {
    loop {
        let segment = endpoint.receive().await;
        let Some(tables) = tables.upgrade() else {
            break;
        };
        route(&host, &tables, segment).await;
    }
}

/// Look up the socket for `segment` and hand it over.
///
/// The table lock is released before the socket runs.
async fn route(host: &str, tables: &Mutex<Tables>, segment: Segment) {
    let route = {
        let tables = tables.lock().await;
        if let Some(conn) = tables.active.get(&(segment.dst_port, segment.src_port)) {
            Some(Route::Connection(Arc::clone(conn)))
        } else {
            tables
                .listening
                .get(&segment.dst_port)
                .map(|l| Route::Listener(Arc::clone(l)))
        }
    };

    match route {
        Some(Route::Connection(conn)) => conn.process_segment(segment).await,
        Some(Route::Listener(listener)) => listener.process_segment(segment).await,
        None => log::warn!("[{host}] no socket for {segment}, dropped"),
    }
}

/// Body of the transmitter task: the only place a host waits on the link.
async fn transmit_loop(endpoint: Endpoint, mut queue: mpsc::UnboundedReceiver<Segment>) {
    while let Some(segment) = queue.recv().await {
        endpoint.send(segment).await;
    }
}

impl fmt::Debug for Demultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demultiplexer")
            .field("host", &self.shared.host)
            .field("endpoint", &self.shared.endpoint)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
