//! Core identifier types, ABI constants, and driver init arguments.

use std::fmt;

/// Maximum number of records a driver may emit from a single parse or poll
/// call.
pub const MAX_RECORDS_PER_CALL: usize = 1000;

/// Maximum number of data requests per context.
pub const MAX_DATA_REQ: usize = 1000;

/// Maximum length of a device name in bytes, including the terminator slot
/// reserved for C interoperability. Names must be strictly shorter than this.
pub const DEVICE_NAME_MAX: usize = 32;

/// Identifier of a semantic data stream (e.g. "accelerometer X").
///
/// Unique within a driver's schema, and claimed by at most one live driver
/// instance at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(pub u32);

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data-{:#x}", self.0)
    }
}

/// Device identifier assigned by the core when a driver instance registers.
///
/// Stable for the lifetime of the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u8);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev-{}", self.0)
    }
}

/// Per-instance record sequence number, starting at 0 on driver start.
pub type SeqNo = u64;

/// Nanoseconds between successive samples. `0` means on-demand (pull mode).
pub type Period = u64;

/// A single data request: one stream at one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRequest {
    /// The requested data stream.
    pub id: DataId,
    /// Sample period in nanoseconds; `0` requests on-demand production.
    pub period_ns: Period,
}

/// A typed driver initialization argument.
///
/// Drivers declare what they expect; the host passes a matching sequence at
/// [`init_driver`](crate::hound::Hound::init_driver) time.
#[derive(Debug, Clone, PartialEq)]
pub enum InitArg {
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Signed 8-bit integer.
    I8(i8),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// An opaque string argument.
    Bytes(String),
}
