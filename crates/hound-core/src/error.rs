//! Error taxonomy for the hound core.
//!
//! Every failure the library can report maps to one variant with a stable
//! negative integer code; `0` is success. The codes are part of the ABI and
//! never change meaning between releases. Driver-specific failures that have
//! no dedicated variant surface as [`Error::DriverFail`].

/// Result type for hound-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable, closed error taxonomy.
///
/// Variants are grouped by concern: resources, input validation,
/// registry/driver state, request resolution, and context lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A required value was absent.
    #[error("required value was not provided")]
    NullValue,

    /// Allocation failure.
    #[error("out of memory")]
    Oom,

    /// A driver with this name is already registered.
    #[error("driver is already registered")]
    DriverAlreadyRegistered,

    /// No driver with this name is registered.
    #[error("driver is not registered")]
    DriverNotRegistered,

    /// The driver still has active subscriptions.
    #[error("driver is in use")]
    DriverInUse,

    /// No device ID could be assigned to the driver instance.
    #[error("no device IDs are available")]
    MissingDeviceIds,

    /// Another driver instance already claims one of the data IDs.
    #[error("conflicting drivers claim the same data ID")]
    ConflictingDrivers,

    /// The request list is empty.
    #[error("no data was requested")]
    NoDataRequested,

    /// No driver claims the requested data ID.
    #[error("data ID does not exist")]
    DataIdDoesNotExist,

    /// The context is active.
    #[error("context is active")]
    CtxActive,

    /// The context is not active.
    #[error("context is not active")]
    CtxNotActive,

    /// The queue is empty.
    #[error("queue is empty")]
    EmptyQueue,

    /// No callback was provided.
    #[error("callback is missing")]
    MissingCallback,

    /// The requested period is not advertised by the driver.
    #[error("period is not supported")]
    PeriodUnsupported,

    /// An I/O operation failed.
    #[error("I/O error")]
    IoError,

    /// The requested queue capacity is too small.
    #[error("queue is too small")]
    QueueTooSmall,

    /// A string argument was malformed or too long.
    #[error("invalid string")]
    InvalidString,

    /// The driver does not support the requested operation.
    #[error("operation is not supported by the driver")]
    DriverUnsupported,

    /// The driver reported a driver-specific failure.
    #[error("driver operation failed")]
    DriverFail,

    /// A value argument was out of range.
    #[error("invalid value")]
    InvalidValue,

    /// The operation was interrupted.
    #[error("operation was interrupted")]
    Interrupted,

    /// No device exists at the given path or ID.
    #[error("device does not exist")]
    DevDoesNotExist,

    /// The request list exceeds the per-context maximum.
    #[error("too much data requested")]
    TooMuchDataRequested,

    /// The request list contains a duplicate data ID.
    #[error("duplicate data requested")]
    DuplicateDataRequested,

    /// A data ID is not present in the driver's schema.
    #[error("data ID is not in the schema")]
    IdNotInSchema,

    /// A schema contains two descriptors with the same data ID.
    #[error("duplicate descriptor in schema")]
    DescDuplicate,

    /// A driver instance already occupies this device path.
    #[error("a driver is already present at this path")]
    DriverAlreadyPresent,
}

impl Error {
    /// Returns the stable negative integer code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::NullValue => -1,
            Self::Oom => -2,
            Self::DriverAlreadyRegistered => -3,
            Self::DriverNotRegistered => -4,
            Self::DriverInUse => -5,
            Self::MissingDeviceIds => -6,
            Self::ConflictingDrivers => -7,
            Self::NoDataRequested => -8,
            Self::DataIdDoesNotExist => -9,
            Self::CtxActive => -10,
            Self::CtxNotActive => -11,
            Self::EmptyQueue => -12,
            Self::MissingCallback => -13,
            Self::PeriodUnsupported => -14,
            Self::IoError => -15,
            Self::QueueTooSmall => -16,
            Self::InvalidString => -17,
            Self::DriverUnsupported => -18,
            Self::DriverFail => -19,
            Self::InvalidValue => -20,
            Self::Interrupted => -21,
            Self::DevDoesNotExist => -22,
            Self::TooMuchDataRequested => -23,
            Self::DuplicateDataRequested => -24,
            Self::IdNotInSchema => -25,
            Self::DescDuplicate => -26,
            Self::DriverAlreadyPresent => -27,
        }
    }

    /// Returns the error for a stable code, or `None` for unknown codes.
    ///
    /// `0` is success and therefore also returns `None`.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::NullValue,
            -2 => Self::Oom,
            -3 => Self::DriverAlreadyRegistered,
            -4 => Self::DriverNotRegistered,
            -5 => Self::DriverInUse,
            -6 => Self::MissingDeviceIds,
            -7 => Self::ConflictingDrivers,
            -8 => Self::NoDataRequested,
            -9 => Self::DataIdDoesNotExist,
            -10 => Self::CtxActive,
            -11 => Self::CtxNotActive,
            -12 => Self::EmptyQueue,
            -13 => Self::MissingCallback,
            -14 => Self::PeriodUnsupported,
            -15 => Self::IoError,
            -16 => Self::QueueTooSmall,
            -17 => Self::InvalidString,
            -18 => Self::DriverUnsupported,
            -19 => Self::DriverFail,
            -20 => Self::InvalidValue,
            -21 => Self::Interrupted,
            -22 => Self::DevDoesNotExist,
            -23 => Self::TooMuchDataRequested,
            -24 => Self::DuplicateDataRequested,
            -25 => Self::IdNotInSchema,
            -26 => Self::DescDuplicate,
            -27 => Self::DriverAlreadyPresent,
            _ => return None,
        })
    }
}

/// Returns a human-readable string for a stable error code.
///
/// `0` maps to `"success"`; unknown codes map to `"unknown error"`. The
/// returned string is static and never freed.
#[must_use]
pub fn strerror(code: i32) -> &'static str {
    if code == 0 {
        return "success";
    }
    match Error::from_code(code) {
        Some(Error::NullValue) => "required value was not provided",
        Some(Error::Oom) => "out of memory",
        Some(Error::DriverAlreadyRegistered) => "driver is already registered",
        Some(Error::DriverNotRegistered) => "driver is not registered",
        Some(Error::DriverInUse) => "driver is in use",
        Some(Error::MissingDeviceIds) => "no device IDs are available",
        Some(Error::ConflictingDrivers) => "conflicting drivers claim the same data ID",
        Some(Error::NoDataRequested) => "no data was requested",
        Some(Error::DataIdDoesNotExist) => "data ID does not exist",
        Some(Error::CtxActive) => "context is active",
        Some(Error::CtxNotActive) => "context is not active",
        Some(Error::EmptyQueue) => "queue is empty",
        Some(Error::MissingCallback) => "callback is missing",
        Some(Error::PeriodUnsupported) => "period is not supported",
        Some(Error::IoError) => "I/O error",
        Some(Error::QueueTooSmall) => "queue is too small",
        Some(Error::InvalidString) => "invalid string",
        Some(Error::DriverUnsupported) => "operation is not supported by the driver",
        Some(Error::DriverFail) => "driver operation failed",
        Some(Error::InvalidValue) => "invalid value",
        Some(Error::Interrupted) => "operation was interrupted",
        Some(Error::DevDoesNotExist) => "device does not exist",
        Some(Error::TooMuchDataRequested) => "too much data requested",
        Some(Error::DuplicateDataRequested) => "duplicate data requested",
        Some(Error::IdNotInSchema) => "data ID is not in the schema",
        Some(Error::DescDuplicate) => "duplicate descriptor in schema",
        Some(Error::DriverAlreadyPresent) => "a driver is already present at this path",
        None => "unknown error",
    }
}
