//! Numeric element bound shared by transforms and layers.

use std::fmt::{Debug, Display};

use ndarray::{LinalgScalar, ScalarOperand};
use num_traits::{Float, FromPrimitive};
use rustfft::FftNum;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Real working precision of a transform descriptor.
///
/// `f32` selects single-precision complex accumulation (`Complex<f32>`), `f64`
/// selects double precision. Weights are always stored as `Self` and promoted
/// to `Complex<Self>` inside the spectral contraction.
pub trait Real:
    FftNum
    + Float
    + FromPrimitive
    + LinalgScalar
    + ScalarOperand
    + Debug
    + Display
    + Default
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
{
    /// Lossy conversion from an `f64` literal or sample.
    fn cast(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::zero)
    }

    /// Short precision tag used in layer display names.
    fn precision_tag() -> &'static str;
}

impl Real for f32 {
    fn precision_tag() -> &'static str {
        "ComplexF32"
    }
}

impl Real for f64 {
    fn precision_tag() -> &'static str {
        "ComplexF64"
    }
}
