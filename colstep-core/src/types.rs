//! Core types for ColStep

use crate::{ColStepError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimension extents, slowest-varying first
pub type Dims = Vec<u64>;

/// Number of elements covered by a set of extents
pub fn num_elements(dims: &[u64]) -> u64 {
    dims.iter().product()
}

/// Element count, or `None` when it does not fit in a u64
pub fn checked_num_elements(dims: &[u64]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
}

/// Host framework data type tags
pub mod tags {
    pub const BOOL: i32 = 0;
    pub const CHAR: i32 = 1;
    pub const UCHAR: i32 = 2;
    pub const SHORT: i32 = 3;
    pub const USHORT: i32 = 4;
    pub const INT: i32 = 5;
    pub const UINT: i32 = 6;
    pub const FLOAT: i32 = 7;
    pub const DOUBLE: i32 = 8;
    pub const COMPLEX: i32 = 9;
    pub const DCOMPLEX: i32 = 10;
    pub const STRING: i32 = 11;
    pub const TABLE: i32 = 12;
    pub const ARRAY_BOOL: i32 = 13;
    pub const ARRAY_CHAR: i32 = 14;
    pub const ARRAY_UCHAR: i32 = 15;
    pub const ARRAY_SHORT: i32 = 16;
    pub const ARRAY_USHORT: i32 = 17;
    pub const ARRAY_INT: i32 = 18;
    pub const ARRAY_UINT: i32 = 19;
    pub const ARRAY_FLOAT: i32 = 20;
    pub const ARRAY_DOUBLE: i32 = 21;
    pub const ARRAY_COMPLEX: i32 = 22;
    pub const ARRAY_DCOMPLEX: i32 = 23;
    pub const ARRAY_STRING: i32 = 24;
    pub const RECORD: i32 = 25;
    pub const OTHER: i32 = 26;
    pub const INT64: i32 = 29;
    pub const ARRAY_INT64: i32 = 30;
}

/// The eleven element kinds a column can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementKind {
    Bool = 0,
    UInt8 = 1,
    Int16 = 2,
    UInt16 = 3,
    Int32 = 4,
    UInt32 = 5,
    Float32 = 6,
    Float64 = 7,
    Complex32 = 8,
    Complex64 = 9,
    String = 10,
}

impl ElementKind {
    /// All kinds in declaration order
    pub const ALL: [ElementKind; 11] = [
        ElementKind::Bool,
        ElementKind::UInt8,
        ElementKind::Int16,
        ElementKind::UInt16,
        ElementKind::Int32,
        ElementKind::UInt32,
        ElementKind::Float32,
        ElementKind::Float64,
        ElementKind::Complex32,
        ElementKind::Complex64,
        ElementKind::String,
    ];

    /// Resolve a host data type tag into a kind and whether it is the array-of form.
    ///
    /// Every tag outside the supported set yields `None`; callers turn that into
    /// `UnsupportedDataType`.
    pub fn from_tag(tag: i32) -> Option<(ElementKind, bool)> {
        use tags::*;
        let resolved = match tag {
            BOOL => (ElementKind::Bool, false),
            UCHAR => (ElementKind::UInt8, false),
            SHORT => (ElementKind::Int16, false),
            USHORT => (ElementKind::UInt16, false),
            INT => (ElementKind::Int32, false),
            UINT => (ElementKind::UInt32, false),
            FLOAT => (ElementKind::Float32, false),
            DOUBLE => (ElementKind::Float64, false),
            COMPLEX => (ElementKind::Complex32, false),
            DCOMPLEX => (ElementKind::Complex64, false),
            STRING => (ElementKind::String, false),
            ARRAY_BOOL => (ElementKind::Bool, true),
            ARRAY_UCHAR => (ElementKind::UInt8, true),
            ARRAY_SHORT => (ElementKind::Int16, true),
            ARRAY_USHORT => (ElementKind::UInt16, true),
            ARRAY_INT => (ElementKind::Int32, true),
            ARRAY_UINT => (ElementKind::UInt32, true),
            ARRAY_FLOAT => (ElementKind::Float32, true),
            ARRAY_DOUBLE => (ElementKind::Float64, true),
            ARRAY_COMPLEX => (ElementKind::Complex32, true),
            ARRAY_DCOMPLEX => (ElementKind::Complex64, true),
            ARRAY_STRING => (ElementKind::String, true),
            _ => return None,
        };
        Some(resolved)
    }

    /// Host tag of the scalar form
    pub fn scalar_tag(self) -> i32 {
        match self {
            ElementKind::Bool => tags::BOOL,
            ElementKind::UInt8 => tags::UCHAR,
            ElementKind::Int16 => tags::SHORT,
            ElementKind::UInt16 => tags::USHORT,
            ElementKind::Int32 => tags::INT,
            ElementKind::UInt32 => tags::UINT,
            ElementKind::Float32 => tags::FLOAT,
            ElementKind::Float64 => tags::DOUBLE,
            ElementKind::Complex32 => tags::COMPLEX,
            ElementKind::Complex64 => tags::DCOMPLEX,
            ElementKind::String => tags::STRING,
        }
    }

    /// Host tag of the array-of form
    pub fn array_tag(self) -> i32 {
        match self {
            ElementKind::Bool => tags::ARRAY_BOOL,
            ElementKind::UInt8 => tags::ARRAY_UCHAR,
            ElementKind::Int16 => tags::ARRAY_SHORT,
            ElementKind::UInt16 => tags::ARRAY_USHORT,
            ElementKind::Int32 => tags::ARRAY_INT,
            ElementKind::UInt32 => tags::ARRAY_UINT,
            ElementKind::Float32 => tags::ARRAY_FLOAT,
            ElementKind::Float64 => tags::ARRAY_DOUBLE,
            ElementKind::Complex32 => tags::ARRAY_COMPLEX,
            ElementKind::Complex64 => tags::ARRAY_DCOMPLEX,
            ElementKind::String => tags::ARRAY_STRING,
        }
    }

    /// Engine-side type name
    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Bool => "bool",
            ElementKind::UInt8 => "uint8",
            ElementKind::Int16 => "int16",
            ElementKind::UInt16 => "uint16",
            ElementKind::Int32 => "int32",
            ElementKind::UInt32 => "uint32",
            ElementKind::Float32 => "float",
            ElementKind::Float64 => "double",
            ElementKind::Complex32 => "float complex",
            ElementKind::Complex64 => "double complex",
            ElementKind::String => "string",
        }
    }

    /// Fixed element size in bytes; strings report the size of a handle
    pub fn size_bytes(self) -> usize {
        match self {
            ElementKind::Bool | ElementKind::UInt8 => 1,
            ElementKind::Int16 | ElementKind::UInt16 => 2,
            ElementKind::Int32 | ElementKind::UInt32 | ElementKind::Float32 => 4,
            ElementKind::Float64 | ElementKind::Complex32 => 8,
            ElementKind::Complex64 => 16,
            ElementKind::String => std::mem::size_of::<String>(),
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a column's cells are shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeCategory {
    /// One value per row
    Scalar,
    /// Array cells with a shape fixed by the column description
    DirectArray,
    /// Array cells whose shape is supplied by the table before rows exist
    IndirectArray,
}

impl ShapeCategory {
    /// Single character code used in logs
    pub fn code(self) -> char {
        match self {
            ShapeCategory::Scalar => 's',
            ShapeCategory::DirectArray => 'd',
            ShapeCategory::IndirectArray => 'i',
        }
    }

    pub fn is_array(self) -> bool {
        !matches!(self, ShapeCategory::Scalar)
    }
}

/// Single precision complex value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Complex32 {
    pub re: f32,
    pub im: f32,
}

impl Complex32 {
    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }
}

/// Double precision complex value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Complex64 {
    pub re: f64,
    pub im: f64,
}

impl Complex64 {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// Typed buffer exchanged with the engine, one variant per element kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Bool(Vec<bool>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Complex32(Vec<Complex32>),
    Complex64(Vec<Complex64>),
    String(Vec<String>),
}

/// Apply `$body` to the inner vector of any `ArrayData` variant
macro_rules! with_array_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::UInt16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::UInt32($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
            ArrayData::Complex32($v) => $body,
            ArrayData::Complex64($v) => $body,
            ArrayData::String($v) => $body,
        }
    };
}

/// Apply `$body` to the inner vectors of two `ArrayData` values of the same kind
macro_rules! with_array_data_pair {
    ($dst:expr, $src:expr, $d:ident, $s:ident => $body:expr, else => $mismatch:expr) => {
        match ($dst, $src) {
            (ArrayData::Bool($d), ArrayData::Bool($s)) => $body,
            (ArrayData::UInt8($d), ArrayData::UInt8($s)) => $body,
            (ArrayData::Int16($d), ArrayData::Int16($s)) => $body,
            (ArrayData::UInt16($d), ArrayData::UInt16($s)) => $body,
            (ArrayData::Int32($d), ArrayData::Int32($s)) => $body,
            (ArrayData::UInt32($d), ArrayData::UInt32($s)) => $body,
            (ArrayData::Float32($d), ArrayData::Float32($s)) => $body,
            (ArrayData::Float64($d), ArrayData::Float64($s)) => $body,
            (ArrayData::Complex32($d), ArrayData::Complex32($s)) => $body,
            (ArrayData::Complex64($d), ArrayData::Complex64($s)) => $body,
            (ArrayData::String($d), ArrayData::String($s)) => $body,
            _ => $mismatch,
        }
    };
}

impl ArrayData {
    /// Buffer of `len` default values of `kind`
    pub fn with_default(kind: ElementKind, len: usize) -> Self {
        match kind {
            ElementKind::Bool => ArrayData::Bool(vec![false; len]),
            ElementKind::UInt8 => ArrayData::UInt8(vec![0; len]),
            ElementKind::Int16 => ArrayData::Int16(vec![0; len]),
            ElementKind::UInt16 => ArrayData::UInt16(vec![0; len]),
            ElementKind::Int32 => ArrayData::Int32(vec![0; len]),
            ElementKind::UInt32 => ArrayData::UInt32(vec![0; len]),
            ElementKind::Float32 => ArrayData::Float32(vec![0.0; len]),
            ElementKind::Float64 => ArrayData::Float64(vec![0.0; len]),
            ElementKind::Complex32 => ArrayData::Complex32(vec![Complex32::default(); len]),
            ElementKind::Complex64 => ArrayData::Complex64(vec![Complex64::default(); len]),
            ElementKind::String => ArrayData::String(vec![String::new(); len]),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            ArrayData::Bool(_) => ElementKind::Bool,
            ArrayData::UInt8(_) => ElementKind::UInt8,
            ArrayData::Int16(_) => ElementKind::Int16,
            ArrayData::UInt16(_) => ElementKind::UInt16,
            ArrayData::Int32(_) => ElementKind::Int32,
            ArrayData::UInt32(_) => ElementKind::UInt32,
            ArrayData::Float32(_) => ElementKind::Float32,
            ArrayData::Float64(_) => ElementKind::Float64,
            ArrayData::Complex32(_) => ElementKind::Complex32,
            ArrayData::Complex64(_) => ElementKind::Complex64,
            ArrayData::String(_) => ElementKind::String,
        }
    }

    pub fn len(&self) -> usize {
        with_array_data!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate payload size in bytes
    pub fn size(&self) -> usize {
        match self {
            ArrayData::String(v) => v.iter().map(|s| s.len() + 4).sum(),
            other => other.len() * other.kind().size_bytes(),
        }
    }

    /// Copy `src[i]` into `self[offsets[i]]` for every i
    pub fn scatter(&mut self, src: &ArrayData, offsets: &[usize]) -> Result<()> {
        if src.len() != offsets.len() {
            return Err(ColStepError::Engine(format!(
                "scatter of {} values into {} offsets",
                src.len(),
                offsets.len()
            )));
        }
        let (dst_kind, src_kind) = (self.kind(), src.kind());
        with_array_data_pair!(self, src, d, s => {
            for (value, &offset) in s.iter().zip(offsets) {
                d[offset] = value.clone();
            }
            Ok(())
        }, else => Err(ColStepError::Engine(format!(
            "scatter of {} into {} buffer",
            src_kind, dst_kind
        ))))
    }

    /// Collect `self[offsets[i]]` into a new buffer
    pub fn gather(&self, offsets: &[usize]) -> ArrayData {
        match self {
            ArrayData::Bool(v) => ArrayData::Bool(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::UInt8(v) => ArrayData::UInt8(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::Int16(v) => ArrayData::Int16(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::UInt16(v) => ArrayData::UInt16(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::Int32(v) => ArrayData::Int32(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::UInt32(v) => ArrayData::UInt32(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::Float32(v) => ArrayData::Float32(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::Float64(v) => ArrayData::Float64(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::Complex32(v) => {
                ArrayData::Complex32(offsets.iter().map(|&i| v[i]).collect())
            }
            ArrayData::Complex64(v) => {
                ArrayData::Complex64(offsets.iter().map(|&i| v[i]).collect())
            }
            ArrayData::String(v) => {
                ArrayData::String(offsets.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }
}

/// A primitive value a column can hold
pub trait Element: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Kind tag of this element type
    const KIND: ElementKind;

    /// Wrap owned values into an engine buffer
    fn into_data(values: Vec<Self>) -> ArrayData;

    /// Unwrap an engine buffer, failing if it holds another kind
    fn from_data(data: ArrayData) -> Result<Vec<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$variant;

            fn into_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn from_data(data: ArrayData) -> Result<Vec<Self>> {
                match data {
                    ArrayData::$variant(v) => Ok(v),
                    other => Err(ColStepError::Engine(format!(
                        "engine returned {} data, expected {}",
                        other.kind(),
                        ElementKind::$variant
                    ))),
                }
            }
        }
    };
}

impl_element!(bool, Bool);
impl_element!(u8, UInt8);
impl_element!(i16, Int16);
impl_element!(u16, UInt16);
impl_element!(i32, Int32);
impl_element!(u32, UInt32);
impl_element!(f32, Float32);
impl_element!(f64, Float64);
impl_element!(Complex32, Complex32);
impl_element!(Complex64, Complex64);
impl_element!(String, String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_element_count() {
        assert_eq!(checked_num_elements(&[3, 4]), Some(12));
        assert_eq!(checked_num_elements(&[]), Some(1));
        assert_eq!(checked_num_elements(&[u64::MAX, 2]), None);
    }

    #[test]
    fn test_tag_resolution() {
        for kind in ElementKind::ALL {
            assert_eq!(ElementKind::from_tag(kind.scalar_tag()), Some((kind, false)));
            assert_eq!(ElementKind::from_tag(kind.array_tag()), Some((kind, true)));
        }
        assert_eq!(ElementKind::from_tag(tags::CHAR), None);
        assert_eq!(ElementKind::from_tag(tags::ARRAY_CHAR), None);
        assert_eq!(ElementKind::from_tag(tags::TABLE), None);
        assert_eq!(ElementKind::from_tag(tags::INT64), None);
        assert_eq!(ElementKind::from_tag(-1), None);
    }

    #[test]
    fn test_scatter_gather() {
        let mut dense = ArrayData::with_default(ElementKind::Int32, 6);
        dense
            .scatter(&ArrayData::Int32(vec![7, 8]), &[1, 4])
            .unwrap();
        assert_eq!(dense, ArrayData::Int32(vec![0, 7, 0, 0, 8, 0]));
        assert_eq!(dense.gather(&[4, 1]), ArrayData::Int32(vec![8, 7]));

        let err = dense.scatter(&ArrayData::Float64(vec![1.0]), &[0]);
        assert!(err.is_err());
    }

    #[test]
    fn test_element_kind_check() {
        let data = i16::into_data(vec![1, 2]);
        assert_eq!(data.kind(), ElementKind::Int16);
        assert!(u16::from_data(data.clone()).is_err());
        assert_eq!(i16::from_data(data).unwrap(), vec![1, 2]);
    }
}
