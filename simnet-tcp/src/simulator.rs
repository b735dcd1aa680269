//! Simulated lossy, bounded, full-duplex network link.
//!
//! Real networks drop packets and have finite buffers.  To exercise the
//! socket state machines without real I/O, this module provides:
//!
//! - [`LossyChannel`] — one direction of the link: a bounded FIFO
//!   ([`RingBuffer`]) with blocking `send` / `receive` and an independent,
//!   seeded per-segment drop probability.
//! - [`DuplexLink`] — two channels composed into two [`Endpoint`]s
//!   (left / right, aliased client / server).  Whatever one endpoint sends,
//!   the other endpoint receives.
//!
//! ```text
//!                 loss_rate_data
//!   left ─── send ──────────────────▶ receive ─── right
//!  (client)                                      (server)
//!   left ◀── receive ───────────────── send ───── right
//!                 loss_rate_ack
//! ```
//!
//! Segments that survive the drop decision are delivered in the order they
//! were sent.  The two directions are independent: nothing orders a segment
//! travelling left→right against one travelling right→left.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Mutex, Notify};

use crate::config::{ConfigError, SimConfig};
use crate::ring_buffer::RingBuffer;
use crate::segment::Segment;

// ---------------------------------------------------------------------------
// LossyChannel
// ---------------------------------------------------------------------------

/// Counters describing what a channel did with the segments handed to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Segments that passed the drop decision and entered the queue.
    pub enqueued: u64,
    /// Segments handed to a receiver.
    pub delivered: u64,
    /// Segments discarded by the loss model.
    pub dropped: u64,
}

struct ChannelInner {
    queue: RingBuffer<Segment>,
    rng: StdRng,
}

/// One direction of a simulated link.
///
/// `send` waits while the queue is full and `receive` waits while it is
/// empty (the classic bounded-buffer discipline, with two [`Notify`]s in
/// place of the not-full / not-empty conditions).
pub struct LossyChannel {
    name: String,
    loss_rate: f64,
    inner: Mutex<ChannelInner>,
    not_empty: Notify,
    not_full: Notify,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LossyChannel {
    /// Create a channel buffering up to `capacity` segments that drops each
    /// sent segment with probability `loss_rate`.
    ///
    /// `seed` fixes the drop decisions so a run can be replayed exactly.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        loss_rate: f64,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&loss_rate) {
            return Err(ConfigError::InvalidProbability {
                field: "loss_rate",
                value: loss_rate,
            });
        }
        if capacity == 0 {
            return Err(ConfigError::Zero("channel_capacity"));
        }
        Ok(Self {
            name: name.into(),
            loss_rate,
            inner: Mutex::new(ChannelInner {
                queue: RingBuffer::with_capacity(capacity),
                rng: StdRng::seed_from_u64(seed),
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn loss_rate(&self) -> f64 {
        self.loss_rate
    }

    /// Offer `segment` to the channel.
    ///
    /// The segment is either dropped right away (logged, counted) or queued,
    /// waiting for a free slot first if the queue is full.
    pub async fn send(&self, segment: Segment) {
        let mut inner = self.inner.lock().await;

        if inner.rng.random::<f64>() < self.loss_rate {
            drop(inner);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("[{}] ✗ LOST {segment}", self.name);
            return;
        }

        while inner.queue.is_full() {
            // Registered before the lock is released so a receiver's wakeup
            // between `drop` and `await` is not missed.
            let notified = self.not_full.notified();
            drop(inner);
            notified.await;
            inner = self.inner.lock().await;
        }

        log::trace!("[{}] queued {segment}", self.name);
        inner
            .queue
            .put(segment)
            .expect("queue checked not full under the same lock");
        drop(inner);

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_waiters();
    }

    /// Take the oldest queued segment, waiting for one if the queue is empty.
    pub async fn receive(&self) -> Segment {
        let mut inner = self.inner.lock().await;
        loop {
            let next = inner.queue.get();
            if let Ok(segment) = next {
                drop(inner);
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.not_full.notify_waiters();
                return segment;
            }

            let notified = self.not_empty.notified();
            drop(inner);
            notified.await;
            inner = self.inner.lock().await;
        }
    }

    /// Number of segments currently waiting in the queue.
    pub async fn queued(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for LossyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LossyChannel")
            .field("name", &self.name)
            .field("loss_rate", &self.loss_rate)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// DuplexLink / Endpoint
// ---------------------------------------------------------------------------

/// Which end of a [`DuplexLink`] an [`Endpoint`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The client end.
    Left,
    /// The server end.
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// One end of a [`DuplexLink`].
///
/// Cloning is cheap; all clones share the same underlying channels.
#[derive(Clone)]
pub struct Endpoint {
    side: Side,
    outbound: Arc<LossyChannel>,
    inbound: Arc<LossyChannel>,
    mtu: usize,
}

impl Endpoint {
    /// Send `segment` towards the other endpoint (it may be lost).
    pub async fn send(&self, segment: Segment) {
        self.outbound.send(segment).await;
    }

    /// Wait for the next segment sent by the other endpoint.
    pub async fn receive(&self) -> Segment {
        self.inbound.receive().await
    }

    /// Maximum transmission unit of the link in bytes.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Counters for the direction this endpoint sends on.
    pub fn outbound_stats(&self) -> ChannelStats {
        self.outbound.stats()
    }

    /// Counters for the direction this endpoint receives on.
    pub fn inbound_stats(&self) -> ChannelStats {
        self.inbound.stats()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("side", &self.side)
            .field("mtu", &self.mtu)
            .finish_non_exhaustive()
    }
}

/// A full-duplex link made of two independently configured channels.
#[derive(Debug)]
pub struct DuplexLink {
    left: Endpoint,
    right: Endpoint,
}

impl DuplexLink {
    /// Build a link from `config`.
    ///
    /// Left→right uses `loss_rate_data`, right→left uses `loss_rate_ack`;
    /// both directions buffer `channel_capacity` segments and are seeded
    /// with `random_seed`.
    pub fn new(config: &SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let to_right = Arc::new(LossyChannel::new(
            "left→right",
            config.channel_capacity,
            config.loss_rate_data,
            config.random_seed,
        )?);
        let to_left = Arc::new(LossyChannel::new(
            "right→left",
            config.channel_capacity,
            config.loss_rate_ack,
            config.random_seed,
        )?);

        let left = Endpoint {
            side: Side::Left,
            outbound: Arc::clone(&to_right),
            inbound: Arc::clone(&to_left),
            mtu: config.mtu,
        };
        let right = Endpoint {
            side: Side::Right,
            outbound: to_left,
            inbound: to_right,
            mtu: config.mtu,
        };
        Ok(Self { left, right })
    }

    pub fn left(&self) -> Endpoint {
        self.left.clone()
    }

    pub fn right(&self) -> Endpoint {
        self.right.clone()
    }

    /// Alias for [`left`](Self::left).
    pub fn client(&self) -> Endpoint {
        self.left()
    }

    /// Alias for [`right`](Self::right).
    pub fn server(&self) -> Endpoint {
        self.right()
    }

    /// Split the link into `(left, right)`.
    pub fn into_endpoints(self) -> (Endpoint, Endpoint) {
        (self.left, self.right)
    }
}
