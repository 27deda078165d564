//! Animatable value model
//!
//! Everything the animation core moves is either a single number or a
//! fixed-length ordered list of numbers. Colors, units and other presentation
//! formats are converted to one of these shapes before they reach the core.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Inline storage for array values (covers xy, xyz, rgba without allocating)
pub type Components = SmallVec<[f64; 4]>;

/// The "shape" of an animatable value
///
/// A spring keeps the shape it was created with until it is explicitly reset
/// or eagerly overwritten with a value of another shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueShape {
    Scalar,
    Array(usize),
}

impl ValueShape {
    /// Number of numeric lanes this shape carries
    pub fn lanes(&self) -> usize {
        match self {
            ValueShape::Scalar => 1,
            ValueShape::Array(len) => *len,
        }
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueShape::Scalar => write!(f, "scalar"),
            ValueShape::Array(len) => write!(f, "array[{len}]"),
        }
    }
}

/// A numeric value that can be driven by an animation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnimatableValue {
    Scalar(f64),
    Array(Components),
}

impl AnimatableValue {
    /// Build an array value from a slice
    pub fn array(values: &[f64]) -> Self {
        AnimatableValue::Array(values.iter().copied().collect())
    }

    pub fn shape(&self) -> ValueShape {
        match self {
            AnimatableValue::Scalar(_) => ValueShape::Scalar,
            AnimatableValue::Array(values) => ValueShape::Array(values.len()),
        }
    }

    /// View the value as a flat list of lanes (a scalar is one lane)
    pub fn as_slice(&self) -> &[f64] {
        match self {
            AnimatableValue::Scalar(value) => std::slice::from_ref(value),
            AnimatableValue::Array(values) => values.as_slice(),
        }
    }

    /// Scalar payload, if this is a scalar
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            AnimatableValue::Scalar(value) => Some(*value),
            AnimatableValue::Array(_) => None,
        }
    }
}

impl Default for AnimatableValue {
    fn default() -> Self {
        AnimatableValue::Scalar(0.0)
    }
}

impl fmt::Display for AnimatableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnimatableValue::Scalar(value) => write!(f, "{value}"),
            AnimatableValue::Array(values) => f.debug_list().entries(values.iter()).finish(),
        }
    }
}

impl From<f64> for AnimatableValue {
    fn from(value: f64) -> Self {
        AnimatableValue::Scalar(value)
    }
}

impl From<f32> for AnimatableValue {
    fn from(value: f32) -> Self {
        AnimatableValue::Scalar(value as f64)
    }
}

impl From<i32> for AnimatableValue {
    fn from(value: i32) -> Self {
        AnimatableValue::Scalar(value as f64)
    }
}

impl<const N: usize> From<[f64; N]> for AnimatableValue {
    fn from(values: [f64; N]) -> Self {
        AnimatableValue::array(&values)
    }
}

impl From<Vec<f64>> for AnimatableValue {
    fn from(values: Vec<f64>) -> Self {
        AnimatableValue::Array(Components::from_vec(values))
    }
}

impl From<&[f64]> for AnimatableValue {
    fn from(values: &[f64]) -> Self {
        AnimatableValue::array(values)
    }
}
