//! Fixed-capacity FIFO ring buffer.
//!
//! [`RingBuffer`] is the storage underneath every simulated channel and every
//! listener backlog.  It has **no** blocking semantics of its own: a `put`
//! against a full buffer or a `get` against an empty one is a caller bug and
//! comes back as a [`RingBufferError`].  Waiting for space or for data is the
//! job of the layer above (see [`crate::simulator::LossyChannel`]).
//!
//! ```text
//!        head                 tail
//!         │                    │
//!  ┌───┬──▼┬───┬───┬───┬───┬──▼┬───┐
//!  │   │ a │ b │ c │ d │ e │   │   │   len = 5, capacity = 8
//!  └───┴───┴───┴───┴───┴───┴───┴───┘
//! ```

use std::fmt;

use thiserror::Error;

/// Violated precondition on a [`RingBuffer`] operation.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RingBufferError {
    /// `get` or `peek_first` on a buffer with no elements.
    #[error("ring buffer is empty")]
    Empty,
    /// `put` on a buffer with no free slot.
    #[error("ring buffer is full")]
    Full,
}

/// A bounded first-in first-out queue backed by a fixed slot array.
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    /// Index of the oldest element.
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer with room for exactly `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of elements that can still be `put` before the buffer is full.
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Borrow the oldest element without removing it.
    pub fn peek_first(&self) -> Result<&T, RingBufferError> {
        if self.is_empty() {
            return Err(RingBufferError::Empty);
        }
        self.slots[self.head].as_ref().ok_or(RingBufferError::Empty)
    }

    /// Remove and return the oldest element.
    pub fn get(&mut self) -> Result<T, RingBufferError> {
        if self.is_empty() {
            return Err(RingBufferError::Empty);
        }
        let item = self.slots[self.head].take().ok_or(RingBufferError::Empty)?;
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        Ok(item)
    }

    /// Append `item` at the tail.
    ///
    /// On [`RingBufferError::Full`] the item is dropped; callers are expected
    /// to have checked [`is_full`](Self::is_full) first.
    pub fn put(&mut self, item: T) -> Result<(), RingBufferError> {
        if self.is_full() {
            return Err(RingBufferError::Full);
        }
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Iterate from the oldest to the newest element.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % self.capacity()].as_ref())
    }

    /// Remove every element, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        while let Ok(item) = self.get() {
            out.push(item);
        }
        out
    }
}

impl<T: fmt::Debug> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("items", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: fmt::Display> fmt::Display for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, item) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}")?;
        }
        write!(f, "]")
    }
}
