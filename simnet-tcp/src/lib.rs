//! `simnet-tcp` — TCP-like socket state machines over a simulated link.
//!
//! # Architecture
//!
//! ```text
//!   application                              application
//!   connect/close                            listen/accept/close
//!        │                                          │
//!  ┌─────▼────────────┐                   ┌─────────▼────────┐
//!  │ ConnectionSocket │                   │  ListenerSocket  │──spawns──▶ ConnectionSocket
//!  └─────┬────────▲───┘                   └─────────▲────────┘
//!        │        │ process_segment                 │ process_segment
//!        │  ┌─────┴──────────┐              ┌───────┴────────┐
//!        │  │ Demultiplexer  │              │ Demultiplexer  │
//!        │  │   "client"     │              │   "server"     │
//!        │  └─────▲──────────┘              └───────▲────────┘
//!        │        │ receive                         │ receive
//!  ┌─────▼────────┴─────────────────────────────────┴────────┐
//!  │ DuplexLink:  left ──LossyChannel──▶ right               │
//!  │              left ◀──LossyChannel── right               │
//!  └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`ring_buffer`] — fixed-capacity FIFO
//! - [`segment`]     — tagged segment value
//! - [`simulator`]   — lossy bounded channels and the full-duplex link
//! - [`demux`]       — per-host socket tables and receiver task
//! - [`connection`]  — active socket FSM
//! - [`listener`]    — passive socket FSM and backlog
//! - [`socket`]      — error type, capability traits, lock/wait plumbing
//! - [`state`]       — connection-state enum
//! - [`timer`]       — one-shot retransmit timer
//! - [`config`]      — simulation tunables
//! - [`driver`]      — fixed-count sender / verifying receiver

pub mod config;
pub mod connection;
pub mod demux;
pub mod driver;
pub mod listener;
pub mod ring_buffer;
pub mod segment;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::{ConfigError, SimConfig};
pub use connection::ConnectionSocket;
pub use demux::{DemuxError, Demultiplexer};
pub use listener::ListenerSocket;
pub use segment::{Segment, SegmentKind};
pub use simulator::{DuplexLink, Endpoint};
pub use socket::{Listen, SocketError, Transfer};
pub use state::ConnectionState;
