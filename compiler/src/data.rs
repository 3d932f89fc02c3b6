// data.rs — Element types and data-container descriptors
//
// A descriptor says what a named container is: scalar, array or stream,
// its element type, its (possibly symbolic) shape, where it lives and
// whether it is transient (SDFG-internal) or part of the signature.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::symbolic::{Expr, Subset};

// ── Element types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        }
    }

    pub fn from_name(name: &str) -> Option<DType> {
        Some(match name {
            "bool" => DType::Bool,
            "int8" => DType::Int8,
            "int16" => DType::Int16,
            "int32" => DType::Int32,
            "int64" => DType::Int64,
            "uint8" => DType::UInt8,
            "uint16" => DType::UInt16,
            "uint32" => DType::UInt32,
            "uint64" => DType::UInt64,
            "float32" => DType::Float32,
            "float64" => DType::Float64,
            "complex64" => DType::Complex64,
            "complex128" => DType::Complex128,
            _ => return None,
        })
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Storage ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    #[default]
    Default,
    Register,
    CpuHeap,
    CpuThreadLocal,
}

// ── Descriptor ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataKind {
    Scalar,
    Array,
    Stream { buffer_size: Expr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDesc {
    #[serde(flatten)]
    pub kind: DataKind,
    pub dtype: DType,
    #[serde(default)]
    pub shape: Vec<Expr>,
    #[serde(default)]
    pub storage: StorageType,
    #[serde(default)]
    pub transient: bool,
}

impl DataDesc {
    pub fn scalar(dtype: DType) -> DataDesc {
        DataDesc {
            kind: DataKind::Scalar,
            dtype,
            shape: vec![Expr::Int(1)],
            storage: StorageType::Register,
            transient: false,
        }
    }

    pub fn array(dtype: DType, shape: Vec<Expr>) -> DataDesc {
        DataDesc {
            kind: DataKind::Array,
            dtype,
            shape,
            storage: StorageType::Default,
            transient: false,
        }
    }

    pub fn stream(dtype: DType, buffer_size: Expr) -> DataDesc {
        DataDesc {
            kind: DataKind::Stream { buffer_size },
            dtype,
            shape: vec![Expr::Int(1)],
            storage: StorageType::Default,
            transient: false,
        }
    }

    pub fn transient(mut self) -> DataDesc {
        self.transient = true;
        self
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, DataKind::Scalar)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.kind, DataKind::Stream { .. })
    }

    /// The subset covering the whole container.
    pub fn full_subset(&self) -> Subset {
        Subset::full(&self.shape)
    }

    /// Total element count (symbolic).
    pub fn total_size(&self) -> Expr {
        self.full_subset().num_elements()
    }
}

impl fmt::Display for DataDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DataKind::Scalar => write!(f, "{}", self.dtype)?,
            DataKind::Array => {
                write!(f, "{}[", self.dtype)?;
                for (i, d) in self.shape.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{d}")?;
                }
                write!(f, "]")?;
            }
            DataKind::Stream { buffer_size } => write!(f, "stream<{}, {}>", self.dtype, buffer_size)?,
        }
        if self.transient {
            write!(f, " (transient)")?;
        }
        Ok(())
    }
}
