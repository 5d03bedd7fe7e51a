//! Driver abstraction: the contract between the core and data producers.
//!
//! A driver turns one device (a path) into records. The host registers a
//! [`DriverFactory`] under a name, then instantiates it per device path via
//! [`Hound::init_driver`](crate::hound::Hound::init_driver). Exactly one of
//! the two I/O modalities is implemented per driver, selected by
//! [`Driver::io_kind`]:
//!
//! - **Parse** drivers receive bytes the core has already read from their
//!   file descriptor and turn them into records.
//! - **Poll** drivers own their descriptor end to end; the core only tells
//!   them when it is ready.

mod instance;
mod registry;

pub(crate) use instance::DriverInstance;
pub(crate) use registry::DriverRegistry;

use std::os::fd::OwnedFd;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::record::RecordSink;
use crate::schema::DriverDataDesc;
use crate::types::{DataId, DataRequest, InitArg};

/// Which I/O modality a driver implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    /// The core reads the descriptor and hands bytes to [`Driver::parse`].
    Parse,
    /// The driver services the descriptor itself in [`Driver::poll`].
    Poll,
}

/// Production mode of a driver instance, derived from its active
/// subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    /// The driver produces asynchronously at the subscribed periods.
    Push,
    /// At least one subscription is on-demand; production is triggered by
    /// `next`.
    Pull,
}

/// Readiness events for poll-style drivers.
///
/// A thin wrapper over the platform `poll(2)` event bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvents(i16);

impl PollEvents {
    /// Data is available to read.
    pub const IN: Self = Self(libc::POLLIN);
    /// Priority data is available to read.
    pub const PRI: Self = Self(libc::POLLPRI);
    /// The descriptor is writable.
    pub const OUT: Self = Self(libc::POLLOUT);

    /// No events.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if any of `other`'s bits are set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if readable data (normal or priority) is signaled.
    #[must_use]
    pub const fn readable(self) -> bool {
        self.0 & (libc::POLLIN | libc::POLLPRI) != 0
    }

    /// Raw platform event bits.
    #[must_use]
    pub(crate) const fn bits(self) -> i16 {
        self.0
    }

    /// Wraps raw platform event bits.
    #[must_use]
    pub(crate) const fn from_bits(bits: i16) -> Self {
        Self(bits)
    }
}

impl std::ops::BitOr for PollEvents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Outcome of one [`Driver::poll`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollOutcome {
    /// If set, the event mask the core should monitor from now on.
    pub next_events: Option<PollEvents>,
    /// If set, the driver wants to be polled again after this long even if
    /// no events occur. Cleared when absent.
    pub timeout: Option<Duration>,
}

/// A live data producer for one device path.
///
/// All hooks are called with the instance lock held; a driver never sees
/// concurrent calls. Cleanup of device-side state happens in `Drop`.
pub trait Driver: Send {
    /// Returns the backing device's name, or an empty string if the device
    /// has none. Must be shorter than
    /// [`DEVICE_NAME_MAX`](crate::types::DEVICE_NAME_MAX) bytes.
    fn device_name(&self) -> Result<String>;

    /// Marks which schema descriptors the backing device actually provides
    /// and fills in their advertised periods.
    fn datadesc(&mut self, descs: &mut [DriverDataDesc<'_>]) -> Result<()>;

    /// Commits the driver to producing exactly this set of streams at these
    /// periods. Called with the aggregate active set whenever it changes,
    /// including with an empty slice when the last subscription ends.
    fn setdata(&mut self, requests: &[DataRequest]) -> Result<()>;

    /// Selects the I/O modality. Must be constant for the driver's lifetime.
    fn io_kind(&self) -> IoKind;

    /// Parses raw bytes into records, returning how many bytes were
    /// consumed.
    ///
    /// Returning `0` tells the core the driver cannot make further records
    /// from this buffer; the unconsumed remainder is discarded, so a driver
    /// that needs it across cycles must buffer it itself.
    ///
    /// # Errors
    ///
    /// The default implementation returns [`Error::DriverUnsupported`];
    /// parse-style drivers must override it.
    fn parse(&mut self, _buf: &[u8], _sink: &mut RecordSink) -> Result<usize> {
        Err(Error::DriverUnsupported)
    }

    /// Services the driver's descriptor after a readiness event (or after an
    /// armed timeout, with empty events).
    ///
    /// # Errors
    ///
    /// The default implementation returns [`Error::DriverUnsupported`];
    /// poll-style drivers must override it.
    fn poll(&mut self, _events: PollEvents, _sink: &mut RecordSink) -> Result<PollOutcome> {
        Err(Error::DriverUnsupported)
    }

    /// Begins production and returns the descriptor the core will watch.
    /// The descriptor is switched to non-blocking mode by the core and
    /// closed by the core after [`stop`](Driver::stop).
    fn start(&mut self) -> Result<OwnedFd>;

    /// Requests one on-demand sample for `id`. Only meaningful in pull mode.
    fn next(&mut self, _id: DataId) -> Result<()> {
        Ok(())
    }

    /// Requests up to `bytes` of on-demand data for `id`. Only meaningful in
    /// pull mode.
    fn next_bytes(&mut self, _id: DataId, _bytes: usize) -> Result<()> {
        Ok(())
    }

    /// Ceases production. The descriptor returned by [`start`](Driver::start)
    /// is closed by the core afterwards.
    fn stop(&mut self) -> Result<()>;
}

/// Creates driver state for one device path.
///
/// Closures of the matching signature implement this trait, so simple
/// drivers can be registered as `|path, args| Ok(Box::new(...))`.
pub trait DriverFactory: Send + Sync {
    /// Allocates device-side state for the given path and init arguments.
    fn create(&self, path: &Path, args: &[InitArg]) -> Result<Box<dyn Driver>>;
}

impl<F> DriverFactory for F
where
    F: Fn(&Path, &[InitArg]) -> Result<Box<dyn Driver>> + Send + Sync,
{
    fn create(&self, path: &Path, args: &[InitArg]) -> Result<Box<dyn Driver>> {
        self(path, args)
    }
}
