//! Bounded record queue with drop-oldest overflow.
//!
//! Single producer (the I/O loop), many consumers (user threads draining a
//! context). A full queue never blocks the producer: the oldest reference is
//! released and the new record takes its place. Stalling the I/O thread on a
//! slow consumer would back-pressure into the kernel buffer and lose
//! timestamps, so the queue sheds oldest-first instead.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::record::Record;

/// Result of a blocking pop.
#[derive(Debug)]
pub enum Pop {
    /// A record was dequeued.
    Record(Arc<Record>),
    /// The wait was interrupted by [`RecordQueue::interrupt`].
    Interrupted,
}

struct Inner {
    records: VecDeque<Arc<Record>>,
    capacity: usize,
    interrupt: bool,
}

/// A fixed-capacity FIFO of shared record references.
pub struct RecordQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl RecordQueue {
    /// Creates a queue bounded at `capacity` records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueTooSmall`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::QueueTooSmall);
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity),
                capacity,
                interrupt: false,
            }),
            ready: Condvar::new(),
        })
    }

    /// Appends a record, dropping the oldest entry first if the queue is
    /// full. Never blocks.
    pub fn push(&self, record: Arc<Record>) {
        let dropped = {
            let mut inner = self.inner.lock();
            let dropped = if inner.records.len() == inner.capacity {
                inner.records.pop_front()
            } else {
                None
            };
            inner.records.push_back(record);
            self.ready.notify_one();
            dropped
        };
        // The overwritten reference is released outside the lock.
        drop(dropped);
    }

    /// Blocks until a record is available or the queue is interrupted.
    pub fn pop_blocking(&self) -> Pop {
        let mut inner = self.inner.lock();
        loop {
            if inner.interrupt {
                inner.interrupt = false;
                return Pop::Interrupted;
            }
            if let Some(record) = inner.records.pop_front() {
                return Pop::Record(record);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Dequeues the front record, or returns `None` immediately if empty.
    #[must_use]
    pub fn pop_nowait(&self) -> Option<Arc<Record>> {
        self.inner.lock().records.pop_front()
    }

    /// Dequeues up to `n` records under a single lock acquisition.
    #[must_use]
    pub fn drain_up_to(&self, n: usize) -> Vec<Arc<Record>> {
        let mut inner = self.inner.lock();
        let count = n.min(inner.records.len());
        inner.records.drain(..count).collect()
    }

    /// Dequeues records while their cumulative payload size stays within
    /// `bytes`. Returns the records and the byte total.
    #[must_use]
    pub fn drain_bytes_up_to(&self, bytes: usize) -> (Vec<Arc<Record>>, usize) {
        let mut inner = self.inner.lock();
        let mut taken = 0usize;
        let mut count = 0usize;
        for record in &inner.records {
            let size = record.size();
            if taken + size > bytes {
                break;
            }
            taken += size;
            count += 1;
        }
        (inner.records.drain(..count).collect(), taken)
    }

    /// Releases every queued record.
    pub fn drain_all(&self) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.records.drain(..).collect()
        };
        drop(drained);
    }

    /// Wakes all blocked readers; the next blocking pop observes the
    /// interrupt and returns [`Pop::Interrupted`], clearing the flag.
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.interrupt = true;
        self.ready.notify_all();
    }

    /// Clears a pending interrupt that no reader observed.
    pub fn clear_interrupt(&self) {
        self.inner.lock().interrupt = false;
    }

    /// Number of records currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Returns true if no records are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Maximum number of records the queue holds.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Changes the queue bound. With `flush`, all queued records are
    /// released; otherwise the oldest entries beyond the new bound are.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueTooSmall`] if `capacity` is zero.
    pub fn resize(&self, capacity: usize, flush: bool) -> Result<()> {
        if capacity == 0 {
            return Err(Error::QueueTooSmall);
        }
        let released: Vec<_> = {
            let mut inner = self.inner.lock();
            let released = if flush {
                inner.records.drain(..).collect()
            } else if inner.records.len() > capacity {
                let excess = inner.records.len() - capacity;
                inner.records.drain(..excess).collect()
            } else {
                Vec::new()
            };
            inner.capacity = capacity;
            released
        };
        drop(released);
        Ok(())
    }
}

impl std::fmt::Debug for RecordQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RecordQueue")
            .field("len", &inner.records.len())
            .field("capacity", &inner.capacity)
            .field("interrupt", &inner.interrupt)
            .finish()
    }
}
