//! Tensor type definitions
//!
//! Element dtypes match the ONNX `TensorProto_DataType` enumeration so that
//! model sources can hand over type information without translation. All
//! tensors handled by the scheduler must have concrete (shape-inferred)
//! shapes; the memory model is built entirely on `TensorType::size()`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element data type, consistent with ONNX `TensorProto_DataType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Undefined = 0,
    Float = 1,
    Uint8 = 2,
    Int8 = 3,
    Uint16 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    String = 8,
    Bool = 9,
    Float16 = 10,
    Double = 11,
    Uint32 = 12,
    Uint64 = 13,
    Complex64 = 14,
    Complex128 = 15,
    Bfloat16 = 16,
}

impl DataType {
    /// Parse a dtype from its ONNX enum value
    pub fn from_onnx(value: i32) -> Option<Self> {
        match value {
            0 => Some(DataType::Undefined),
            1 => Some(DataType::Float),
            2 => Some(DataType::Uint8),
            3 => Some(DataType::Int8),
            4 => Some(DataType::Uint16),
            5 => Some(DataType::Int16),
            6 => Some(DataType::Int32),
            7 => Some(DataType::Int64),
            8 => Some(DataType::String),
            9 => Some(DataType::Bool),
            10 => Some(DataType::Float16),
            11 => Some(DataType::Double),
            12 => Some(DataType::Uint32),
            13 => Some(DataType::Uint64),
            14 => Some(DataType::Complex64),
            15 => Some(DataType::Complex128),
            16 => Some(DataType::Bfloat16),
            _ => None,
        }
    }

    /// Size of one element in bytes
    ///
    /// `String` and `Undefined` have no fixed width and report 0; values of
    /// those dtypes contribute nothing to the memory model.
    pub fn byte_width(&self) -> u64 {
        match self {
            DataType::Undefined | DataType::String => 0,
            DataType::Uint8 | DataType::Int8 | DataType::Bool => 1,
            DataType::Uint16 | DataType::Int16 | DataType::Float16 | DataType::Bfloat16 => 2,
            DataType::Float | DataType::Int32 | DataType::Uint32 => 4,
            DataType::Double
            | DataType::Int64
            | DataType::Uint64
            | DataType::Complex64 => 8,
            DataType::Complex128 => 16,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Undefined => "undefined",
            DataType::Float => "f32",
            DataType::Uint8 => "u8",
            DataType::Int8 => "i8",
            DataType::Uint16 => "u16",
            DataType::Int16 => "i16",
            DataType::Int32 => "i32",
            DataType::Int64 => "i64",
            DataType::String => "string",
            DataType::Bool => "bool",
            DataType::Float16 => "f16",
            DataType::Double => "f64",
            DataType::Uint32 => "u32",
            DataType::Uint64 => "u64",
            DataType::Complex64 => "c64",
            DataType::Complex128 => "c128",
            DataType::Bfloat16 => "bf16",
        };
        f.write_str(name)
    }
}

/// Concrete tensor type: shape plus element dtype
///
/// Equality is structural; the scheduler's aliasing (overlap) rule relies on
/// it to decide whether an element-wise output can reuse an input buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    /// Dimension sizes, outermost first. All must be non-negative.
    pub shape: Vec<i64>,
    /// Element data type
    pub dtype: DataType,
}

impl TensorType {
    /// Create a tensor type from shape and dtype
    pub fn new(shape: Vec<i64>, dtype: DataType) -> Self {
        Self { shape, dtype }
    }

    /// Number of elements in this tensor
    pub fn count(&self) -> u64 {
        self.shape.iter().map(|&d| d.max(0) as u64).product()
    }

    /// Size of this tensor in memory, in bytes
    pub fn size(&self) -> u64 {
        self.count() * self.dtype.byte_width()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "{}[{}]", self.dtype, dims.join("x"))
    }
}
