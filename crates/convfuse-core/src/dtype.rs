#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use std::any::TypeId;

/// Element types a tensor can hold. Persisted parameters are always `Float32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum DType {
    Float32,
    Float64,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            DType::Float32 => 4,
            DType::Float64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "float32" | "f32" => Some(DType::Float32),
            "float64" | "f64" => Some(DType::Float64),
            _ => None,
        }
    }
}

/// Map a Rust element type onto its `DType`.
///
/// Only `f32` and `f64` are tensor element types; anything else maps to `Float32`
/// and is rejected by the persistence layer when the names disagree.
pub fn dtype_from_type<T: 'static>() -> DType {
    if TypeId::of::<T>() == TypeId::of::<f64>() {
        DType::Float64
    } else {
        DType::Float32
    }
}
