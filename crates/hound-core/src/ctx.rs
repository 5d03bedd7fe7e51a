//! Contexts: user subscriptions binding data requests to a queue and a
//! callback.
//!
//! A context is allocated against the currently initialized drivers,
//! started to begin recording, drained with the `read` family, stopped to
//! cease recording, and dropped to release it. Each drained record is
//! presented to the callback by reference; the reference is released when
//! the callback returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::hound::HoundInner;
use crate::queue::{Pop, RecordQueue};
use crate::record::Record;
use crate::types::{DataRequest, MAX_DATA_REQ};

/// Receives drained records.
///
/// Invoked on the thread performing the read, one record at a time, in
/// queue order. The record reference may not be retained past the call.
pub trait RecordCallback: Send {
    /// Called once per drained record.
    fn on_record(&mut self, record: &Record);
}

/// Adapter that wraps a closure into a [`RecordCallback`].
struct FnCallback<F>(F);

impl<F: FnMut(&Record) + Send> RecordCallback for FnCallback<F> {
    fn on_record(&mut self, record: &Record) {
        (self.0)(record);
    }
}

/// Boxes a closure as a [`RecordCallback`].
pub fn callback_fn<F>(f: F) -> Box<dyn RecordCallback>
where
    F: FnMut(&Record) + Send + 'static,
{
    Box::new(FnCallback(f))
}

/// Everything needed to allocate a context.
pub struct ContextRequest {
    /// Bounded capacity of the context's record queue, in records.
    pub queue_capacity: usize,
    /// The data streams and periods to subscribe to.
    pub requests: Vec<DataRequest>,
    /// Callback invoked for each drained record.
    pub callback: Box<dyn RecordCallback>,
}

impl std::fmt::Debug for ContextRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRequest")
            .field("queue_capacity", &self.queue_capacity)
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

/// The request subset routed to one driver instance.
struct Partition {
    instance: Arc<crate::driver::DriverInstance>,
    requests: Vec<DataRequest>,
}

/// A live subscription.
///
/// A context is not itself thread-safe across simultaneous readers; a
/// context-scoped lock serializes them. Dropping an active context stops it
/// first.
pub struct Context {
    hound: Arc<HoundInner>,
    queue: Arc<RecordQueue>,
    partitions: Vec<Partition>,
    active: AtomicBool,
    /// Serializes readers and owns the callback between reads.
    reader: Mutex<Box<dyn RecordCallback>>,
}

impl Context {
    /// Validates a request, resolves every data ID to its driver, and
    /// allocates the queue. The subscription does not bind to drivers until
    /// [`start`](Context::start).
    pub(crate) fn alloc(hound: Arc<HoundInner>, request: ContextRequest) -> Result<Self> {
        let ContextRequest {
            queue_capacity,
            requests,
            callback,
        } = request;

        if queue_capacity == 0 {
            return Err(Error::QueueTooSmall);
        }
        if requests.is_empty() {
            return Err(Error::NoDataRequested);
        }
        if requests.len() > MAX_DATA_REQ {
            return Err(Error::TooMuchDataRequested);
        }
        for (i, rq) in requests.iter().enumerate() {
            if requests[..i].iter().any(|prev| prev.id == rq.id) {
                return Err(Error::DuplicateDataRequested);
            }
        }

        let mut partitions: Vec<Partition> = Vec::new();
        for rq in &requests {
            let instance = hound.claimant(rq.id).ok_or(Error::DataIdDoesNotExist)?;
            if !instance.period_supported(rq.id, rq.period_ns) {
                return Err(Error::PeriodUnsupported);
            }
            match partitions
                .iter_mut()
                .find(|p| Arc::ptr_eq(&p.instance, &instance))
            {
                Some(partition) => partition.requests.push(*rq),
                None => partitions.push(Partition {
                    instance,
                    requests: vec![*rq],
                }),
            }
        }

        let queue = Arc::new(RecordQueue::new(queue_capacity)?);

        Ok(Self {
            hound,
            queue,
            partitions,
            active: AtomicBool::new(false),
            reader: Mutex::new(callback),
        })
    }

    /// Begins recording: takes one subscription reference per driver
    /// partition. Records produced before this call do not appear in the
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CtxActive`] if already started. Driver errors roll
    /// back references taken so far, in reverse order.
    pub fn start(&self) -> Result<()> {
        let _reader = self.reader.lock();
        if self.active.load(Ordering::Acquire) {
            return Err(Error::CtxActive);
        }

        for (i, partition) in self.partitions.iter().enumerate() {
            if let Err(err) =
                partition
                    .instance
                    .ref_requests(self.hound.io(), &self.queue, &partition.requests)
            {
                for prev in self.partitions[..i].iter().rev() {
                    if let Err(unref_err) =
                        prev.instance
                            .unref_requests(self.hound.io(), &self.queue, &prev.requests)
                    {
                        tracing::warn!(
                            driver = %prev.instance.driver_name(),
                            error = %unref_err,
                            "failed to release subscription during start rollback"
                        );
                    }
                }
                return Err(err);
            }
        }

        self.queue.clear_interrupt();
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Ceases recording: releases every driver reference, wakes blocked
    /// readers, and drains residual records. No callbacks fire after this
    /// call returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CtxNotActive`] if the context is not started.
    pub fn stop(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Err(Error::CtxNotActive);
        }

        // Kick any blocked reader out, then wait for it to leave before
        // detaching the queue.
        self.queue.interrupt();
        let _reader = self.reader.lock();
        self.queue.clear_interrupt();

        for partition in self.partitions.iter().rev() {
            if let Err(err) =
                partition
                    .instance
                    .unref_requests(self.hound.io(), &self.queue, &partition.requests)
            {
                tracing::warn!(
                    driver = %partition.instance.driver_name(),
                    error = %err,
                    "failed to release subscription on stop"
                );
            }
        }

        self.queue.drain_all();
        Ok(())
    }

    /// Drains exactly `records` records, blocking while the queue is empty.
    /// Pull-mode streams are asked to produce one sample per expected
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CtxNotActive`] if not started, and
    /// [`Error::Interrupted`] if [`stop`](Context::stop) cancels the wait
    /// (callbacks already fired in this call stand).
    pub fn read(&self, records: usize) -> Result<()> {
        let mut callback = self.reader.lock();
        if !self.active.load(Ordering::Acquire) {
            return Err(Error::CtxNotActive);
        }
        for _ in 0..records {
            self.trigger_pull(1)?;
            match self.queue.pop_blocking() {
                Pop::Record(record) => callback.on_record(&record),
                Pop::Interrupted => return Err(Error::Interrupted),
            }
        }
        Ok(())
    }

    /// Drains up to `records` currently queued records without blocking.
    /// Pull-mode streams are not triggered. Returns the number drained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CtxNotActive`] if not started.
    pub fn read_nowait(&self, records: usize) -> Result<usize> {
        let mut callback = self.reader.lock();
        if !self.active.load(Ordering::Acquire) {
            return Err(Error::CtxNotActive);
        }
        let drained = self.queue.drain_up_to(records);
        for record in &drained {
            callback.on_record(record);
        }
        Ok(drained.len())
    }

    /// Drains queued records while their cumulative payload size stays
    /// within `bytes`, without blocking. Returns `(records, bytes)` drained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CtxNotActive`] if not started.
    pub fn read_bytes_nowait(&self, bytes: usize) -> Result<(usize, usize)> {
        let mut callback = self.reader.lock();
        if !self.active.load(Ordering::Acquire) {
            return Err(Error::CtxNotActive);
        }
        let (drained, taken) = self.queue.drain_bytes_up_to(bytes);
        for record in &drained {
            callback.on_record(record);
        }
        Ok((drained.len(), taken))
    }

    /// Drains everything currently queued without blocking. Returns the
    /// number drained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CtxNotActive`] if not started.
    pub fn read_all_nowait(&self) -> Result<usize> {
        self.read_nowait(usize::MAX)
    }

    /// Asks every pull-mode stream of this context to produce `n` samples.
    /// Does nothing for periodic streams.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CtxNotActive`] if not started.
    pub fn next(&self, n: usize) -> Result<()> {
        if !self.active.load(Ordering::Acquire) {
            return Err(Error::CtxNotActive);
        }
        self.trigger_pull(n)
    }

    /// Asks every pull-mode stream of this context to produce up to `bytes`
    /// of data. Does nothing for periodic streams.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CtxNotActive`] if not started.
    pub fn next_bytes(&self, bytes: usize) -> Result<()> {
        if !self.active.load(Ordering::Acquire) {
            return Err(Error::CtxNotActive);
        }
        for partition in &self.partitions {
            for rq in &partition.requests {
                if rq.period_ns == 0 {
                    partition.instance.next_bytes(rq.id, bytes)?;
                }
            }
        }
        Ok(())
    }

    /// Number of records currently queued.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of records the queue holds.
    #[must_use]
    pub fn max_queue_length(&self) -> usize {
        self.queue.capacity()
    }

    fn trigger_pull(&self, n: usize) -> Result<()> {
        for partition in &self.partitions {
            for rq in &partition.requests {
                if rq.period_ns == 0 {
                    partition.instance.next_records(rq.id, n)?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.active.load(Ordering::Acquire) {
            tracing::debug!("context dropped while active; stopping");
            if let Err(err) = self.stop() {
                tracing::warn!(error = %err, "failed to stop context on drop");
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("partitions", &self.partitions.len())
            .field("queue_length", &self.queue.len())
            .field("max_queue_length", &self.queue.capacity())
            .finish_non_exhaustive()
    }
}
