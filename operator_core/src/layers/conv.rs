//! Operator-convolution layer: learned channel mixing of the lowest
//! frequency modes.

use std::fmt;
use std::marker::PhantomData;

use ndarray::{Array3, ArrayD, Ix3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::pointwise::check_channels;
use super::{EmptyState, Layer};
use crate::error::{OperatorError, OperatorResult};
use crate::functional::{operator_conv, operator_conv_backward};
use crate::init::WeightInit;
use crate::layout::Layout;
use crate::scalar::Real;
use crate::transform::{FourierTransform, SpectralTransform};

/// `OperatorConv` with the real Fourier transform in single precision.
pub type SpectralConv = OperatorConv<f32, FourierTransform<f32>>;

/// Construction options shared by every transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConvConfig {
    pub init: WeightInit,
    pub layout: Layout,
    /// Display name; defaults to the constructor's family name.
    pub name: Option<String>,
}

impl Default for OperatorConvConfig {
    fn default() -> Self {
        Self {
            init: WeightInit::GlorotUniform,
            layout: Layout::ChannelFirst,
            name: None,
        }
    }
}

/// Trainable tensors of an [`OperatorConv`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvParams<T> {
    /// `(out, in, ∏ modes)`; modes flattened row-major.
    pub weight: Array3<T>,
}

/// Spectral convolution `y = T⁻¹( pad( W · trunc( T(x) ) ) )`.
///
/// # Examples
///
/// ```
/// use operator_core::layers::{Layer, SpectralConv};
/// use rand::SeedableRng;
///
/// let conv = SpectralConv::spectral((2, 5), &[16]).unwrap();
/// assert_eq!(conv.parameter_count(), 160);
/// let params = conv.init_params(&mut rand::rngs::StdRng::seed_from_u64(0));
/// let x = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[2, 32, 4]));
/// let y = conv.apply(&x, &params).unwrap();
/// assert_eq!(y.shape(), &[5, 32, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct OperatorConv<T, Tr = FourierTransform<T>> {
    in_channels: usize,
    out_channels: usize,
    transform: Tr,
    init: WeightInit,
    layout: Layout,
    name: String,
    _precision: PhantomData<fn() -> T>,
}

impl<T: Real, Tr: SpectralTransform<T>> OperatorConv<T, Tr> {
    /// Builds an `in => out` layer retaining `modes` of `transform`.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` for empty channels, a mode tuple that differs
    /// from the transform's or a bad initializer; `UnsupportedTransform`
    /// when the transform kind has no registered implementation.
    pub fn new(
        channels: (usize, usize),
        modes: &[usize],
        transform: Tr,
        config: OperatorConvConfig,
    ) -> OperatorResult<Self> {
        let (in_channels, out_channels) = channels;
        check_channels(in_channels, out_channels)?;
        transform.kind().ensure_supported()?;
        if transform.modes() != modes {
            return Err(OperatorError::invalid_config(
                "modes",
                format!("{modes:?}"),
                format!("transform retains {:?}", transform.modes()),
            ));
        }
        config.init.validate()?;

        Ok(Self {
            in_channels,
            out_channels,
            transform,
            init: config.init,
            layout: config.layout,
            name: config.name.unwrap_or_else(|| "OperatorConv".to_string()),
            _precision: PhantomData,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn modes(&self) -> &[usize] {
        self.transform.modes()
    }

    pub fn total_modes(&self) -> usize {
        self.transform.total_modes()
    }

    pub fn transform(&self) -> &Tr {
        &self.transform
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks that `params` belong to a layer of this size.
    pub fn check_params(&self, params: &ConvParams<T>) -> OperatorResult<()> {
        let expected = (self.out_channels, self.in_channels, self.total_modes());
        if params.weight.dim() != expected {
            return Err(OperatorError::shape_mismatch(
                format!("{} weight", self.name),
                format!("{expected:?}"),
                format!("{:?}", params.weight.dim()),
            ));
        }
        Ok(())
    }

    fn check_input(&self, x: &ArrayD<T>, channels: usize, context: &str) -> OperatorResult<()> {
        let rank = self.transform.ndims() + 2;
        if x.ndim() != rank {
            return Err(OperatorError::shape_mismatch(
                format!("{} {context} rank", self.name),
                rank.to_string(),
                x.ndim().to_string(),
            ));
        }
        let got = self.layout.channels(x);
        if got != channels {
            return Err(OperatorError::shape_mismatch(
                format!("{} {context} channels ({})", self.name, self.layout),
                channels.to_string(),
                got.to_string(),
            ));
        }
        Ok(())
    }
}

impl<T: Real> OperatorConv<T, FourierTransform<T>> {
    /// Fourier-backed layer in any precision.
    pub fn fourier(
        channels: (usize, usize),
        modes: &[usize],
        config: OperatorConvConfig,
    ) -> OperatorResult<Self> {
        let transform = FourierTransform::new(modes)?;
        Self::new(channels, modes, transform, config)
    }
}

impl SpectralConv {
    pub fn spectral(channels: (usize, usize), modes: &[usize]) -> OperatorResult<Self> {
        Self::spectral_with(channels, modes, OperatorConvConfig::default())
    }

    pub fn spectral_with(
        channels: (usize, usize),
        modes: &[usize],
        mut config: OperatorConvConfig,
    ) -> OperatorResult<Self> {
        config.name.get_or_insert_with(|| "SpectralConv".to_string());
        Self::fourier(channels, modes, config)
    }
}

impl<T: Real, Tr: SpectralTransform<T>> Layer<T> for OperatorConv<T, Tr> {
    type Params = ConvParams<T>;
    type State = EmptyState;

    /// Weights are drawn from the initializer and scaled by `1 / (in · out)`.
    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> ConvParams<T> {
        let scale = T::one() / T::cast((self.in_channels * self.out_channels) as f64);
        let dim = Ix3(self.out_channels, self.in_channels, self.total_modes());
        let weight: Array3<T> = self.init.sample(dim, rng);
        ConvParams {
            weight: weight * scale,
        }
    }

    fn init_state(&self) -> EmptyState {
        EmptyState
    }

    fn parameter_count(&self) -> usize {
        self.total_modes() * self.in_channels * self.out_channels
    }

    fn forward(
        &self,
        x: &ArrayD<T>,
        params: &ConvParams<T>,
        state: EmptyState,
    ) -> OperatorResult<(ArrayD<T>, EmptyState)> {
        self.check_params(params)?;
        self.check_input(x, self.in_channels, "input")?;

        let canonical = self.layout.to_canonical(x)?;
        let y = operator_conv(&canonical, &params.weight, &self.transform)?;
        Ok((self.layout.from_canonical(&y)?, state))
    }

    fn backward(
        &self,
        x: &ArrayD<T>,
        params: &ConvParams<T>,
        grad_output: &ArrayD<T>,
    ) -> OperatorResult<(ArrayD<T>, ConvParams<T>)> {
        self.check_params(params)?;
        self.check_input(x, self.in_channels, "input")?;
        self.check_input(grad_output, self.out_channels, "cotangent")?;

        let canonical = self.layout.to_canonical(x)?;
        let grad_canonical = self.layout.to_canonical(grad_output)?;
        let (grad_x, grad_weight) =
            operator_conv_backward(&canonical, &params.weight, &self.transform, &grad_canonical)?;
        Ok((
            self.layout.from_canonical(&grad_x)?,
            ConvParams {
                weight: grad_weight,
            },
        ))
    }
}

impl<T: Real, Tr: SpectralTransform<T> + fmt::Display> fmt::Display for OperatorConv<T, Tr> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} => {}, modes={:?}, {}, {})",
            self.name,
            self.in_channels,
            self.out_channels,
            self.transform.modes(),
            self.transform,
            self.layout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{s, IxDyn};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn wave(shape: &[usize]) -> ArrayD<f64> {
        let total: usize = shape.iter().product();
        let data = (0..total)
            .map(|i| (i as f64 * 0.37).sin() + 0.1 * (i % 5) as f64)
            .collect();
        ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
    }

    #[test]
    fn test_spectral_conv_scenario() {
        let conv = SpectralConv::spectral((2, 5), &[16]).unwrap();
        assert_eq!(conv.parameter_count(), 160);
        let params = conv.init_params(&mut StdRng::seed_from_u64(42));
        assert_eq!(params.weight.dim(), (5, 2, 16));

        let x = wave(&[2, 32, 4]).mapv(|v| v as f32);
        let (y, state) = conv.forward(&x, &params, conv.init_state()).unwrap();
        assert_eq!(y.shape(), &[5, 32, 4]);
        assert_eq!(state, EmptyState);
    }

    #[test]
    fn test_parameter_count_multi_dim() {
        for (channels, modes) in [((3, 7), vec![4, 5]), ((1, 1), vec![2, 2, 2]), ((4, 2), vec![9])] {
            let conv = OperatorConv::<f64>::fourier(channels, &modes, OperatorConvConfig::default())
                .unwrap();
            let k: usize = modes.iter().product();
            assert_eq!(conv.parameter_count(), k * channels.0 * channels.1);
        }
    }

    #[test]
    fn test_init_scale() {
        let conv = OperatorConv::<f64>::fourier((4, 8), &[6], OperatorConvConfig::default()).unwrap();
        let params = conv.init_params(&mut StdRng::seed_from_u64(7));
        // Glorot limit for (8, 4, 6) scaled by 1 / 32.
        let limit = (6.0f64 / (4.0 * 6.0 + 8.0 * 6.0)).sqrt() / 32.0;
        assert!(params.weight.iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn test_zero_weights_give_zero_output() {
        let config = OperatorConvConfig {
            init: WeightInit::Zeros,
            ..OperatorConvConfig::default()
        };
        let conv = OperatorConv::<f64>::fourier((3, 2), &[4, 3], config).unwrap();
        let params = conv.init_params(&mut StdRng::seed_from_u64(0));
        let y = conv.apply(&wave(&[3, 10, 8, 2]), &params).unwrap();
        assert_eq!(y.shape(), &[2, 10, 8, 2]);
        assert!(y.iter().all(|v| v.abs() < 1e-14));
    }

    #[test]
    fn test_layouts_agree_up_to_permutation() {
        let first = OperatorConv::<f64>::fourier((3, 4), &[5, 3], OperatorConvConfig::default()).unwrap();
        let last = OperatorConv::<f64>::fourier(
            (3, 4),
            &[5, 3],
            OperatorConvConfig {
                layout: Layout::ChannelLast,
                ..OperatorConvConfig::default()
            },
        )
        .unwrap();
        let params = first.init_params(&mut StdRng::seed_from_u64(5));
        let x = wave(&[3, 12, 6, 2]);

        let y_first = first.apply(&x, &params).unwrap();
        let x_last = Layout::ChannelLast.from_canonical(&x).unwrap();
        assert_eq!(x_last.shape(), &[12, 6, 3, 2]);
        let y_last = last.apply(&x_last, &params).unwrap();
        assert_eq!(y_last.shape(), &[12, 6, 4, 2]);

        let y_back = Layout::ChannelLast.to_canonical(&y_last).unwrap();
        for (a, b) in y_first.iter().zip(y_back.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_truncation_boundary() {
        let conv = OperatorConv::<f64>::fourier((1, 1), &[16], OperatorConvConfig::default()).unwrap();
        let params = conv.init_params(&mut StdRng::seed_from_u64(1));
        // rfft of 30 samples has exactly 16 bins, 28 samples only 15.
        assert!(conv.apply(&wave(&[1, 30, 1]), &params).is_ok());
        assert_eq!(
            conv.apply(&wave(&[1, 28, 1]), &params),
            Err(OperatorError::mode_truncation(0, 16, 15))
        );
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let conv = SpectralConv::spectral((2, 5), &[16]).unwrap();
        let params = conv.init_params(&mut StdRng::seed_from_u64(0));
        let wrong_channels = ArrayD::<f32>::zeros(IxDyn(&[3, 32, 4]));
        assert!(matches!(
            conv.apply(&wrong_channels, &params),
            Err(OperatorError::ShapeMismatch { .. })
        ));
        let wrong_rank = ArrayD::<f32>::zeros(IxDyn(&[2, 32, 4, 4]));
        assert!(matches!(
            conv.apply(&wrong_rank, &params),
            Err(OperatorError::ShapeMismatch { .. })
        ));
        let mut short = params.clone();
        short.weight = short.weight.slice(s![.., .., ..8]).to_owned();
        assert!(conv.apply(&ArrayD::zeros(IxDyn(&[2, 32, 4])), &short).is_err());
    }

    #[test]
    fn test_constructor_validation() {
        assert!(SpectralConv::spectral((0, 5), &[16]).is_err());
        assert!(SpectralConv::spectral((2, 5), &[]).is_err());
        assert!(SpectralConv::spectral((2, 5), &[0]).is_err());
        let transform = FourierTransform::<f32>::new(&[8]).unwrap();
        assert!(matches!(
            OperatorConv::new((2, 5), &[16], transform, OperatorConvConfig::default()),
            Err(OperatorError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_display() {
        let conv = SpectralConv::spectral((2, 5), &[16]).unwrap();
        assert_eq!(
            conv.to_string(),
            "SpectralConv(2 => 5, modes=[16], FourierTransform{ComplexF32}[16], channel_first)"
        );
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let conv = OperatorConv::<f64>::fourier(
            (2, 3),
            &[3, 2],
            OperatorConvConfig {
                layout: Layout::ChannelLast,
                ..OperatorConvConfig::default()
            },
        )
        .unwrap();
        let params = conv.init_params(&mut StdRng::seed_from_u64(2));
        let x = wave(&[6, 4, 2, 2]);
        let probe = wave(&[6, 4, 3, 2]).mapv(|v| v - 0.2);
        let loss = |x: &ArrayD<f64>, p: &ConvParams<f64>| (conv.apply(x, p).unwrap() * &probe).sum();

        let (grad_x, grads) = conv.backward(&x, &params, &probe).unwrap();
        assert_eq!(grad_x.shape(), x.shape());
        let eps = 1e-6;
        for idx in [[0, 0, 0, 0], [5, 3, 1, 1], [2, 1, 0, 1]] {
            let mut plus = x.clone();
            plus[idx] += eps;
            let mut minus = x.clone();
            minus[idx] -= eps;
            let numeric = (loss(&plus, &params) - loss(&minus, &params)) / (2.0 * eps);
            assert_abs_diff_eq!(grad_x[idx], numeric, epsilon = 1e-6);
        }
        for idx in [(0, 0, 0), (2, 1, 5), (1, 0, 3)] {
            let mut plus = params.clone();
            plus.weight[idx] += eps;
            let mut minus = params.clone();
            minus.weight[idx] -= eps;
            let numeric = (loss(&x, &plus) - loss(&x, &minus)) / (2.0 * eps);
            assert_abs_diff_eq!(grads.weight[idx], numeric, epsilon = 1e-6);
        }
    }
}
