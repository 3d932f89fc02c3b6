// descriptor.rs — Host value → data descriptor resolution
//
// Converts values handed in by the caller (decorator type arguments, inline
// annotations, late-bound compilation arguments, global constants) into
// canonical data descriptors.
//
// Preconditions: none.
// Postconditions: always returns a descriptor; resolution is total.
// Failure modes: none.
// Side effects: none.

use serde::{Deserialize, Serialize};

use crate::data::{DType, DataDesc};
use crate::symbolic::Expr;

/// A value from the host environment, as far as the SDFG core cares.
///
/// Variants are listed in resolution priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value", rename_all = "snake_case")]
pub enum HostValue {
    /// A value that already carries its own descriptor.
    Described { desc: DataDesc },
    /// A multi-dimensional numeric array.
    NumericArray { dtype: DType, shape: Vec<usize> },
    /// A symbolic expression (typically a size symbol such as `N`).
    Symbol { name: String, dtype: DType },
    /// A type tag used as an annotation (`float64`).
    TypeTag { dtype: DType },
    Int { v: i64 },
    Float { v: f64 },
    Bool { v: bool },
    Complex { re: f64, im: f64 },
    Str { v: String },
    /// An imported module bound under some alias.
    Module { name: String },
}

impl HostValue {
    /// The runtime element type of a plain host value.
    fn runtime_dtype(&self) -> DType {
        match self {
            HostValue::Float { .. } => DType::Float64,
            HostValue::Bool { .. } => DType::Bool,
            HostValue::Complex { .. } => DType::Complex128,
            _ => DType::Int64,
        }
    }

    /// Whether this value may be injected into the kernel as a constant.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            HostValue::Int { .. }
                | HostValue::Float { .. }
                | HostValue::Bool { .. }
                | HostValue::Complex { .. }
                | HostValue::Symbol { .. }
                | HostValue::TypeTag { .. }
        )
    }

    /// The value as a symbolic expression, for constants that have one.
    pub fn as_expr(&self) -> Option<Expr> {
        match self {
            HostValue::Int { v } => Some(Expr::Int(*v)),
            HostValue::Float { v } => Some(Expr::Float(*v)),
            HostValue::Bool { v } => Some(Expr::Bool(*v)),
            HostValue::Symbol { name, .. } => Some(Expr::sym(name.clone())),
            _ => None,
        }
    }
}

/// Produce the canonical descriptor for `value`.
pub fn resolve_descriptor(value: &HostValue) -> DataDesc {
    match value {
        HostValue::Described { desc } => desc.clone(),
        HostValue::NumericArray { dtype, shape } => DataDesc::array(
            *dtype,
            shape.iter().map(|&d| Expr::Int(d as i64)).collect(),
        ),
        HostValue::Symbol { dtype, .. } => DataDesc::scalar(*dtype),
        HostValue::TypeTag { dtype } => DataDesc::scalar(*dtype),
        other => DataDesc::scalar(other.runtime_dtype()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn described_value_is_returned_unchanged() {
        let desc = DataDesc::array(DType::Float32, vec![Expr::sym("N")]).transient();
        let got = resolve_descriptor(&HostValue::Described { desc: desc.clone() });
        assert_eq!(got, desc);
    }

    #[test]
    fn numeric_array_becomes_array() {
        let got = resolve_descriptor(&HostValue::NumericArray {
            dtype: DType::Float64,
            shape: vec![20, 30],
        });
        assert_eq!(got, DataDesc::array(DType::Float64, vec![Expr::Int(20), Expr::Int(30)]));
    }

    #[test]
    fn symbol_and_type_tag_become_scalars() {
        let sym = HostValue::Symbol {
            name: "N".into(),
            dtype: DType::Int32,
        };
        assert_eq!(resolve_descriptor(&sym), DataDesc::scalar(DType::Int32));
        let tag = HostValue::TypeTag {
            dtype: DType::Complex64,
        };
        assert_eq!(resolve_descriptor(&tag), DataDesc::scalar(DType::Complex64));
    }

    #[test]
    fn fallback_uses_runtime_type() {
        assert_eq!(
            resolve_descriptor(&HostValue::Float { v: 0.5 }),
            DataDesc::scalar(DType::Float64)
        );
        assert_eq!(
            resolve_descriptor(&HostValue::Int { v: 3 }),
            DataDesc::scalar(DType::Int64)
        );
        assert_eq!(
            resolve_descriptor(&HostValue::Bool { v: true }),
            DataDesc::scalar(DType::Bool)
        );
    }
}
