//! Real-input Fourier transform over the spatial axes of a canonical tensor.
//!
//! The forward direction is an unnormalized real-to-complex DFT: the last
//! spatial axis keeps only its `⌊s/2⌋ + 1` non-redundant bins, every other
//! spatial axis keeps all `s` bins. The inverse runs complex inverse DFTs on
//! the leading spatial axes, rebuilds the Hermitian half of the last axis at
//! the requested length and scales by `1 / ∏ s_i`.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use ndarray::{aview1, ArrayD, Axis, IxDyn, Slice, Zip};
use num_complex::Complex;
use rustfft::{Fft, FftDirection, FftPlanner};

use super::{spatial_extents, SpectralTransform, TransformKind};
use crate::error::{OperatorError, OperatorResult};
use crate::scalar::Real;

/// Fourier transform descriptor: precision `T` and retained modes per axis.
///
/// # Examples
///
/// ```
/// use operator_core::transform::{FourierTransform, SpectralTransform};
///
/// let transform = FourierTransform::<f32>::new(&[16]).unwrap();
/// assert_eq!(transform.total_modes(), 16);
/// assert_eq!(transform.frequency_bins(&[32]), vec![17]);
/// ```
#[derive(Clone, PartialEq)]
pub struct FourierTransform<T> {
    modes: Vec<usize>,
    _precision: PhantomData<fn() -> T>,
}

impl<T: Real> FourierTransform<T> {
    /// Creates a descriptor retaining `modes[i]` frequencies on spatial axis `i`.
    pub fn new(modes: &[usize]) -> OperatorResult<Self> {
        if modes.is_empty() {
            return Err(OperatorError::invalid_config(
                "modes",
                "()",
                "at least one spatial axis is required",
            ));
        }
        if let Some(axis) = modes.iter().position(|&m| m == 0) {
            return Err(OperatorError::invalid_config(
                format!("modes[{axis}]"),
                "0",
                "retained mode counts must be >= 1",
            ));
        }
        Ok(Self {
            modes: modes.to_vec(),
            _precision: PhantomData,
        })
    }

    fn check_rank(&self, shape: &[usize], context: &str) -> OperatorResult<()> {
        let expected = self.modes.len() + 2;
        if shape.len() != expected {
            return Err(OperatorError::shape_mismatch(
                context,
                format!("rank {expected} (channels, spatial..., batch)"),
                format!("rank {} {:?}", shape.len(), shape),
            ));
        }
        if spatial_extents(shape).contains(&0) {
            return Err(OperatorError::shape_mismatch(
                context,
                "non-empty spatial axes",
                format!("{shape:?}"),
            ));
        }
        Ok(())
    }

    /// Validates that a spectral tensor has the bin counts produced by
    /// `forward` for an input with extents `spatial`.
    fn check_spectrum(&self, shape: &[usize], spatial: &[usize], context: &str) -> OperatorResult<()> {
        let expected_rank = self.modes.len() + 2;
        if shape.len() != expected_rank || spatial.len() != self.modes.len() {
            return Err(OperatorError::shape_mismatch(
                context,
                format!("rank {expected_rank} with {} spatial extents", self.modes.len()),
                format!("rank {} with {} spatial extents", shape.len(), spatial.len()),
            ));
        }
        let bins = self.frequency_bins(spatial);
        if spatial_extents(shape) != bins.as_slice() {
            return Err(OperatorError::shape_mismatch(
                context,
                format!("frequency bins {bins:?}"),
                format!("{:?}", spatial_extents(shape)),
            ));
        }
        Ok(())
    }
}

impl<T: Real> SpectralTransform<T> for FourierTransform<T> {
    fn kind(&self) -> TransformKind {
        TransformKind::Fourier
    }

    fn modes(&self) -> &[usize] {
        &self.modes
    }

    fn frequency_bins(&self, spatial: &[usize]) -> Vec<usize> {
        let last = spatial.len().saturating_sub(1);
        spatial
            .iter()
            .enumerate()
            .map(|(axis, &s)| if axis == last { s / 2 + 1 } else { s })
            .collect()
    }

    fn forward(&self, x: &ArrayD<T>) -> OperatorResult<ArrayD<Complex<T>>> {
        self.check_rank(x.shape(), "Fourier forward input")?;
        let last = self.modes.len();
        let half = x.shape()[last] / 2 + 1;

        let mut planner = FftPlanner::new();
        let mut data = x.mapv(|v| Complex::new(v, T::zero()));
        transform_axis(&mut data, last, FftDirection::Forward, &mut planner);
        let mut spectrum = data
            .slice_axis(Axis(last), Slice::from(0..half))
            .to_owned();
        for axis in 1..last {
            transform_axis(&mut spectrum, axis, FftDirection::Forward, &mut planner);
        }
        Ok(spectrum)
    }

    fn inverse(
        &self,
        x_hat: &ArrayD<Complex<T>>,
        spatial: &[usize],
    ) -> OperatorResult<ArrayD<T>> {
        self.check_spectrum(x_hat.shape(), spatial, "Fourier inverse input")?;
        let last = self.modes.len();

        let mut planner = FftPlanner::new();
        let mut data = x_hat.to_owned();
        for axis in 1..last {
            transform_axis(&mut data, axis, FftDirection::Inverse, &mut planner);
        }
        let mut full = hermitian_extend(&data, last, spatial[last - 1]);
        transform_axis(&mut full, last, FftDirection::Inverse, &mut planner);

        let scale = T::one() / T::cast(spatial.iter().product::<usize>() as f64);
        Ok(full.mapv(|c| c.re * scale))
    }

    fn forward_pullback(
        &self,
        cotangent: &ArrayD<Complex<T>>,
        spatial: &[usize],
    ) -> OperatorResult<ArrayD<T>> {
        self.check_spectrum(cotangent.shape(), spatial, "Fourier forward pullback")?;
        let last = self.modes.len();

        // Bins dropped by the half spectrum never influenced the output.
        let mut full = zero_extend(cotangent, last, spatial[last - 1]);
        let mut planner = FftPlanner::new();
        for axis in 1..=last {
            transform_axis(&mut full, axis, FftDirection::Inverse, &mut planner);
        }
        Ok(full.mapv(|c| c.re))
    }

    fn inverse_pullback(&self, cotangent: &ArrayD<T>) -> OperatorResult<ArrayD<Complex<T>>> {
        self.check_rank(cotangent.shape(), "Fourier inverse pullback")?;
        let last = self.modes.len();
        let n = cotangent.shape()[last];
        let total: usize = spatial_extents(cotangent.shape()).iter().product();

        let mut grad = self.forward(cotangent)?;
        let base = T::one() / T::cast(total as f64);
        let doubled = base + base;
        for (k, mut slab) in grad.axis_iter_mut(Axis(last)).enumerate() {
            let self_conjugate = k == 0 || (n % 2 == 0 && k == n / 2);
            let weight = if self_conjugate { base } else { doubled };
            slab.mapv_inplace(|c| c * weight);
        }
        Ok(grad)
    }
}

impl<T: Real> fmt::Debug for FourierTransform<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FourierTransform")
            .field("precision", &T::precision_tag())
            .field("modes", &self.modes)
            .finish()
    }
}

impl<T: Real> fmt::Display for FourierTransform<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourierTransform{{{}}}{:?}", T::precision_tag(), self.modes)
    }
}

/// In-place unnormalized 1-D DFT of every lane along `axis`.
fn transform_axis<T: Real>(
    data: &mut ArrayD<Complex<T>>,
    axis: usize,
    direction: FftDirection,
    planner: &mut FftPlanner<T>,
) {
    let len = data.shape()[axis];
    if len <= 1 || data.is_empty() {
        return;
    }
    let fft: Arc<dyn Fft<T>> = planner.plan_fft(len, direction);
    Zip::from(data.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
        let mut buffer: Vec<Complex<T>> = lane.iter().copied().collect();
        fft.process(&mut buffer);
        lane.assign(&aview1(&buffer));
    });
}

/// Rebuilds a full length-`n` spectrum along `axis` from its Hermitian half.
fn hermitian_extend<T: Real>(
    half: &ArrayD<Complex<T>>,
    axis: usize,
    n: usize,
) -> ArrayD<Complex<T>> {
    let h = half.shape()[axis];
    let mut shape = half.shape().to_vec();
    shape[axis] = n;
    let mut full = ArrayD::zeros(IxDyn(&shape));
    full.slice_axis_mut(Axis(axis), Slice::from(0..h))
        .assign(half);
    for k in h..n {
        let mirrored = half.index_axis(Axis(axis), n - k).mapv(|c| c.conj());
        full.index_axis_mut(Axis(axis), k).assign(&mirrored);
    }
    full
}

/// Zero-pads `data` along `axis` up to length `n`.
fn zero_extend<T: Real>(data: &ArrayD<Complex<T>>, axis: usize, n: usize) -> ArrayD<Complex<T>> {
    let h = data.shape()[axis];
    let mut shape = data.shape().to_vec();
    shape[axis] = n;
    let mut full = ArrayD::zeros(IxDyn(&shape));
    full.slice_axis_mut(Axis(axis), Slice::from(0..h))
        .assign(data);
    full
}
