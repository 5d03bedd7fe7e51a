//! Records and the per-call record sink.
//!
//! A [`Record`] is one timestamped sample. The I/O loop wraps each record in
//! an [`Arc`](std::sync::Arc) and hands one clone to every queue attached to
//! the producing driver, so the strong count at publication equals the
//! number of subscriber queues and the payload is freed exactly once, when
//! the last queue releases its reference.

use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::types::{DataId, DeviceId, SeqNo, MAX_RECORDS_PER_CALL};

/// One timestamped sample with its core-assigned identity.
#[derive(Debug, Clone)]
pub struct Record {
    /// Per-instance sequence number, assigned by the I/O loop.
    pub seqno: SeqNo,
    /// The stream this sample belongs to.
    pub data_id: DataId,
    /// The producing device, assigned by the I/O loop.
    pub dev_id: DeviceId,
    /// Driver-supplied sample timestamp.
    pub timestamp: SystemTime,
    /// Sample payload, laid out per the stream's schema formats.
    pub payload: Vec<u8>,
}

impl Record {
    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// A sample as emitted by a driver, before the core assigns sequence number
/// and device ID.
#[derive(Debug, Clone)]
pub struct DriverRecord {
    /// The stream this sample belongs to.
    pub data_id: DataId,
    /// Sample timestamp.
    pub timestamp: SystemTime,
    /// Sample payload.
    pub payload: Vec<u8>,
}

/// Core-provided scratch holder a driver fills during one `parse` or `poll`
/// call.
///
/// Enforces the [`MAX_RECORDS_PER_CALL`] ceiling. The I/O loop reuses one
/// sink across calls, clearing it between invocations.
#[derive(Debug, Default)]
pub struct RecordSink {
    records: Vec<DriverRecord>,
}

impl RecordSink {
    /// Creates an empty sink.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if the call would exceed
    /// [`MAX_RECORDS_PER_CALL`].
    pub fn push(&mut self, record: DriverRecord) -> Result<()> {
        if self.records.len() >= MAX_RECORDS_PER_CALL {
            return Err(Error::InvalidValue);
        }
        self.records.push(record);
        Ok(())
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes and returns all held records, leaving the sink empty.
    pub(crate) fn take(&mut self) -> Vec<DriverRecord> {
        std::mem::take(&mut self.records)
    }

    /// Drops all held records.
    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }
}
