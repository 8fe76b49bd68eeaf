//! Spectral transform abstraction.
//!
//! A transform maps a canonical tensor `(channels, s_1, ..., s_N, batch)` to
//! its spectral representation `(channels, f_1, ..., f_N, batch)` and back.
//! Besides the two directions every variant registers its own reverse-mode
//! rules (`forward_pullback`, `inverse_pullback`), which layer `backward`
//! passes call instead of differentiating through the FFT primitive.

pub mod fourier;

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayD;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::{OperatorError, OperatorResult};
use crate::scalar::Real;

pub use fourier::FourierTransform;

/// Transform variants known to the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Real-input discrete Fourier transform
    Fourier,
    /// Reserved; no implementation registered
    Chebyshev,
    /// Reserved; no implementation registered
    Wavelet,
}

impl TransformKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransformKind::Fourier => "fourier",
            TransformKind::Chebyshev => "chebyshev",
            TransformKind::Wavelet => "wavelet",
        }
    }

    /// Whether a forward/inverse pair and its pullbacks are registered.
    pub fn is_supported(&self) -> bool {
        matches!(self, TransformKind::Fourier)
    }

    /// Fails with `UnsupportedTransform` for variants without an implementation.
    pub fn ensure_supported(&self) -> OperatorResult<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(OperatorError::unsupported_transform(
                self.name(),
                "no frequency-bin rule or pullback is registered for this transform",
            ))
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransformKind {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fourier" | "fft" => Ok(TransformKind::Fourier),
            "chebyshev" => Ok(TransformKind::Chebyshev),
            "wavelet" => Ok(TransformKind::Wavelet),
            other => Err(OperatorError::unsupported_transform(
                other,
                "unknown transform name",
            )),
        }
    }
}

/// A forward/inverse transform pair over the spatial axes of a canonical tensor.
///
/// Implementations must be exact inverses up to rounding when no truncation
/// happens in between, and their pullbacks must be the adjoints of the
/// corresponding directions.
pub trait SpectralTransform<T: Real>: Send + Sync {
    /// Variant identifier.
    fn kind(&self) -> TransformKind;

    /// Retained mode counts `(m_1, ..., m_N)`.
    fn modes(&self) -> &[usize];

    /// Spatial dimensionality `N`.
    fn ndims(&self) -> usize {
        self.modes().len()
    }

    /// Size of the flattened mode axis, `∏ m_i`.
    fn total_modes(&self) -> usize {
        self.modes().iter().product()
    }

    /// Native frequency-bin count per axis produced by `forward` for the
    /// given spatial extents.
    fn frequency_bins(&self, spatial: &[usize]) -> Vec<usize>;

    /// Check the retained modes against an input's spatial extents and
    /// return the native frequency-bin counts.
    fn check_modes(&self, spatial: &[usize]) -> OperatorResult<Vec<usize>> {
        if spatial.len() != self.ndims() {
            return Err(OperatorError::shape_mismatch(
                format!("{} transform spatial rank", self.kind()),
                self.ndims().to_string(),
                spatial.len().to_string(),
            ));
        }
        let bins = self.frequency_bins(spatial);
        for (axis, (&requested, &available)) in self.modes().iter().zip(&bins).enumerate() {
            if requested > available {
                return Err(OperatorError::mode_truncation(axis, requested, available));
            }
        }
        Ok(bins)
    }

    /// Spatial → spectral, over axes `1..=N` of a canonical tensor.
    fn forward(&self, x: &ArrayD<T>) -> OperatorResult<ArrayD<Complex<T>>>;

    /// Spectral → spatial, reconstructing the explicit extents `spatial`.
    fn inverse(&self, x_hat: &ArrayD<Complex<T>>, spatial: &[usize])
        -> OperatorResult<ArrayD<T>>;

    /// Reverse-mode rule of `forward`: maps a spectral cotangent back to the
    /// spatial input with extents `spatial`.
    fn forward_pullback(
        &self,
        cotangent: &ArrayD<Complex<T>>,
        spatial: &[usize],
    ) -> OperatorResult<ArrayD<T>>;

    /// Reverse-mode rule of `inverse`: maps a spatial cotangent back to the
    /// spectral input.
    fn inverse_pullback(&self, cotangent: &ArrayD<T>) -> OperatorResult<ArrayD<Complex<T>>>;
}

/// Spatial extents of a canonical `(channels, s..., batch)` tensor.
pub(crate) fn spatial_extents(shape: &[usize]) -> &[usize] {
    if shape.len() < 2 {
        &[]
    } else {
        &shape[1..shape.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Fourier".parse::<TransformKind>().unwrap(), TransformKind::Fourier);
        assert_eq!("fft".parse::<TransformKind>().unwrap(), TransformKind::Fourier);
        assert_eq!(
            "chebyshev".parse::<TransformKind>().unwrap(),
            TransformKind::Chebyshev
        );
        assert!(matches!(
            "laplace".parse::<TransformKind>(),
            Err(OperatorError::UnsupportedTransform { .. })
        ));
    }

    #[test]
    fn test_unsupported_kinds_are_rejected() {
        assert!(TransformKind::Fourier.ensure_supported().is_ok());
        assert!(matches!(
            TransformKind::Wavelet.ensure_supported(),
            Err(OperatorError::UnsupportedTransform { .. })
        ));
    }

    #[test]
    fn test_spatial_extents() {
        assert_eq!(spatial_extents(&[2, 32, 4]), &[32]);
        assert_eq!(spatial_extents(&[2, 8, 6, 4]), &[8, 6]);
        assert!(spatial_extents(&[3]).is_empty());
    }
}
