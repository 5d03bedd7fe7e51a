//! # Hound Core
//!
//! The ingestion and fan-out engine for sensor/telemetry streams: drivers
//! turn heterogeneous producers (device files, sockets, buses) into
//! uniformly-typed records, and contexts deliver them to subscribers through
//! bounded per-consumer queues.
//!
//! This crate provides:
//! - **Drivers**: the [`driver::Driver`] contract and per-path instances
//! - **I/O loop**: a single background thread polling every driver
//!   descriptor
//! - **Queues**: bounded, drop-oldest record queues with blocking drains
//! - **Contexts**: subscriptions binding data requests to a queue and a
//!   callback
//!
//! ## Design principles
//!
//! 1. **One I/O thread** - all descriptor servicing happens on one
//!    background thread that mutators pause, never lock against
//! 2. **Never stall the producer** - full queues shed oldest-first instead
//!    of back-pressuring into the kernel
//! 3. **Shared records, single free** - one record fans out as one
//!    reference per subscriber queue
//!
//! ## Example
//!
//! ```rust,ignore
//! use hound_core::{callback_fn, ContextRequest, DataRequest, Hound};
//!
//! let hound = Hound::builder().schema_parser(parser).build()?;
//! hound.register_driver("counter", counter_factory)?;
//! hound.init_driver("counter", "/dev/counter0", "/etc/hound", "counter.yaml", &[])?;
//!
//! let ctx = hound.alloc_ctx(ContextRequest {
//!     queue_capacity: 1024,
//!     requests: vec![DataRequest { id: COUNTER, period_ns: 1_000_000 }],
//!     callback: callback_fn(|record| println!("{} bytes", record.size())),
//! })?;
//! ctx.start()?;
//! ctx.read(10)?;
//! ctx.stop()?;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Allow unsafe for the poll(2)/pipe plumbing in the I/O loop
#![allow(unsafe_code)]

pub mod ctx;
pub mod driver;
pub mod error;
pub mod hound;
mod io;
pub mod queue;
pub mod record;
pub mod schema;
pub mod types;
mod util;

// Re-export key types
pub use ctx::{callback_fn, Context, ContextRequest, RecordCallback};
pub use driver::{Driver, DriverFactory, DriverMode, IoKind, PollEvents, PollOutcome};
pub use error::{strerror, Error, Result};
pub use hound::{ConfigEntry, ConfigParser, Hound, HoundBuilder, SchemaParser};
pub use record::{DriverRecord, Record, RecordSink};
pub use schema::{DataDescriptor, DataFormat, DriverDataDesc, ScalarType, SchemaDescriptor, Unit};
pub use types::{
    DataId, DataRequest, DeviceId, InitArg, Period, SeqNo, DEVICE_NAME_MAX, MAX_DATA_REQ,
    MAX_RECORDS_PER_CALL,
};
