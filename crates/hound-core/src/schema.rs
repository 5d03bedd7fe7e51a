//! Schema model: units, scalar types, payload formats, and descriptors.
//!
//! Schemas are produced by an external parser (see
//! [`SchemaParser`](crate::hound::SchemaParser)) and deep-copied into driver
//! storage at init. They are immutable from then until the driver is
//! destroyed.

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::types::{DataId, DeviceId, Period};

/// Measurement unit of one format entry.
///
/// SI units wherever possible; time is nanoseconds to avoid floating-point
/// precision loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Unit {
    /// Angular degree.
    Degree,
    /// Kelvin.
    Kelvin,
    /// Kilograms per second.
    KgPerS,
    /// Meter.
    Meter,
    /// Meters per second.
    MetersPerS,
    /// Meters per second squared.
    MetersPerSSquared,
    /// Dimensionless.
    None,
    /// Pascal.
    Pascal,
    /// Percent.
    Percent,
    /// Radian.
    Rad,
    /// Radians per second.
    RadPerS,
    /// Nanosecond.
    Nanosecond,
}

/// Scalar type of one format entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ScalarType {
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 64-bit integer.
    U64,
    /// Raw bytes of schema-declared length.
    Bytes,
}

impl ScalarType {
    /// Returns the size of this scalar in bytes, or `None` for [`Bytes`],
    /// whose length comes from the format entry.
    ///
    /// [`Bytes`]: ScalarType::Bytes
    #[must_use]
    pub const fn size(self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::Float | Self::I32 | Self::U32 => Some(4),
            Self::Double | Self::I64 | Self::U64 => Some(8),
            Self::Bytes => None,
        }
    }
}

/// One entry within a record payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFormat {
    /// Human-readable name of the field.
    pub name: String,
    /// Measurement unit.
    pub unit: Unit,
    /// Byte offset of the field within the payload.
    pub offset: usize,
    /// Byte length of the field; `0` means "remainder of the payload".
    pub len: usize,
    /// Scalar type of the field.
    pub scalar: ScalarType,
}

/// Immutable description of one data stream as declared by a schema file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    /// The stream this descriptor describes.
    pub data_id: DataId,
    /// Human-readable stream name.
    pub name: String,
    /// Payload layout, in declaration order.
    pub formats: Vec<DataFormat>,
}

/// Validates a parsed schema: descriptors must have pairwise-distinct data
/// IDs.
///
/// # Errors
///
/// Returns [`Error::DescDuplicate`] if two descriptors share a data ID.
pub fn validate_schema(descs: &[SchemaDescriptor]) -> Result<()> {
    for (i, desc) in descs.iter().enumerate() {
        if descs[..i].iter().any(|d| d.data_id == desc.data_id) {
            return Err(Error::DescDuplicate);
        }
    }
    Ok(())
}

/// In/out structure passed to a driver's `datadesc` hook.
///
/// The core builds one per schema descriptor with `enabled = false` and no
/// periods; the driver flips `enabled` for streams the backing device
/// actually provides and fills in the periods it can honor.
#[derive(Debug)]
pub struct DriverDataDesc<'a> {
    /// Whether the backing device provides this stream.
    pub enabled: bool,
    /// Advertised sample periods for this stream; `0` advertises on-demand
    /// production.
    pub periods: SmallVec<[Period; 8]>,
    schema: &'a SchemaDescriptor,
}

impl<'a> DriverDataDesc<'a> {
    /// Creates a disabled descriptor for the given schema entry.
    #[must_use]
    pub(crate) fn new(schema: &'a SchemaDescriptor) -> Self {
        Self {
            enabled: false,
            periods: SmallVec::new(),
            schema,
        }
    }

    /// The schema entry this descriptor corresponds to.
    #[must_use]
    pub fn schema(&self) -> &SchemaDescriptor {
        self.schema
    }

    /// The data ID of the underlying schema entry.
    #[must_use]
    pub fn data_id(&self) -> DataId {
        self.schema.data_id
    }
}

/// Public description of one available data stream, as returned by
/// [`Hound::datadescs`](crate::hound::Hound::datadescs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDescriptor {
    /// The stream identifier.
    pub data_id: DataId,
    /// The device the stream belongs to.
    pub dev_id: DeviceId,
    /// Human-readable stream name from the schema.
    pub name: String,
    /// Periods the driver advertises for this stream.
    pub periods: Vec<Period>,
    /// Payload layout from the schema.
    pub formats: Vec<DataFormat>,
}
