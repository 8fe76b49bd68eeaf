//! Operator kernel: `activation(bypass(x) + operator_conv(x))`.

use std::fmt;

use ndarray::ArrayD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::conv::{ConvParams, OperatorConv, OperatorConvConfig};
use super::pointwise::{BypassKind, Pointwise, PointwiseParams};
use super::{EmptyState, Layer};
use crate::error::{OperatorError, OperatorResult};
use crate::init::WeightInit;
use crate::layout::Layout;
use crate::scalar::Real;
use crate::transform::{FourierTransform, SpectralTransform};

/// `OperatorKernel` over the real Fourier transform in single precision.
pub type SpectralKernel = OperatorKernel<f32, FourierTransform<f32>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorKernelConfig {
    pub layout: Layout,
    /// Swap activations for their rational approximations.
    pub allow_fast_activation: bool,
    /// Initializer of the spectral weights.
    pub init: WeightInit,
}

impl Default for OperatorKernelConfig {
    fn default() -> Self {
        Self {
            layout: Layout::ChannelFirst,
            allow_fast_activation: true,
            init: WeightInit::GlorotUniform,
        }
    }
}

/// Trainable tensors of an [`OperatorKernel`], one entry per path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelParams<T> {
    pub bypass: PointwiseParams<T>,
    pub conv: ConvParams<T>,
}

/// Spectral convolution summed with a pointwise bypass, then activated.
///
/// The two paths see the same input and are evaluated independently; for
/// `ChannelFirst` the bypass is a unit-window convolution, for `ChannelLast`
/// a dense layer over the channel axis.
#[derive(Debug, Clone)]
pub struct OperatorKernel<T, Tr = FourierTransform<T>> {
    bypass: Pointwise<T>,
    conv: OperatorConv<T, Tr>,
    activation: Activation,
}

impl<T: Real, Tr: SpectralTransform<T>> OperatorKernel<T, Tr> {
    pub fn new(
        channels: (usize, usize),
        modes: &[usize],
        transform: Tr,
        activation: Activation,
        config: OperatorKernelConfig,
    ) -> OperatorResult<Self> {
        let bypass = Pointwise::new(channels, config.layout)?;
        let conv = OperatorConv::new(
            channels,
            modes,
            transform,
            OperatorConvConfig {
                init: config.init,
                layout: config.layout,
                name: None,
            },
        )?;
        let activation = if config.allow_fast_activation {
            activation.fast()
        } else {
            activation
        };
        Ok(Self {
            bypass,
            conv,
            activation,
        })
    }

    pub fn bypass(&self) -> &Pointwise<T> {
        &self.bypass
    }

    pub fn conv(&self) -> &OperatorConv<T, Tr> {
        &self.conv
    }

    /// Activation after the fast-variant rewrite.
    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn bypass_kind(&self) -> BypassKind {
        self.bypass.kind()
    }

    pub fn layout(&self) -> Layout {
        self.conv.layout()
    }

    pub fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    /// Checks that `params` belong to a kernel of this size.
    pub fn check_params(&self, params: &KernelParams<T>) -> OperatorResult<()> {
        self.bypass.check_params(&params.bypass)?;
        self.conv.check_params(&params.conv)
    }

    /// Pre-activation sum of both paths.
    fn pre_activation(&self, x: &ArrayD<T>, params: &KernelParams<T>) -> OperatorResult<ArrayD<T>> {
        let bypass = self.bypass.apply(x, &params.bypass)?;
        let spectral = self.conv.apply(x, &params.conv)?;
        if bypass.shape() != spectral.shape() {
            return Err(OperatorError::shape_mismatch(
                "kernel path outputs",
                format!("{:?}", bypass.shape()),
                format!("{:?}", spectral.shape()),
            ));
        }
        Ok(bypass + spectral)
    }
}

impl<T: Real> OperatorKernel<T, FourierTransform<T>> {
    pub fn fourier(
        channels: (usize, usize),
        modes: &[usize],
        activation: Activation,
        config: OperatorKernelConfig,
    ) -> OperatorResult<Self> {
        let transform = FourierTransform::new(modes)?;
        Self::new(channels, modes, transform, activation, config)
    }
}

impl SpectralKernel {
    /// Channel-first kernel with fast activations allowed.
    pub fn spectral(
        channels: (usize, usize),
        modes: &[usize],
        activation: Activation,
    ) -> OperatorResult<Self> {
        Self::fourier(channels, modes, activation, OperatorKernelConfig::default())
    }
}

impl<T: Real, Tr: SpectralTransform<T>> Layer<T> for OperatorKernel<T, Tr> {
    type Params = KernelParams<T>;
    type State = EmptyState;

    /// Bypass first, then the spectral weights, from the same RNG.
    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> KernelParams<T> {
        let bypass = self.bypass.init_params(rng);
        let conv = self.conv.init_params(rng);
        KernelParams { bypass, conv }
    }

    fn init_state(&self) -> EmptyState {
        EmptyState
    }

    fn parameter_count(&self) -> usize {
        self.bypass.parameter_count() + self.conv.parameter_count()
    }

    fn forward(
        &self,
        x: &ArrayD<T>,
        params: &KernelParams<T>,
        state: EmptyState,
    ) -> OperatorResult<(ArrayD<T>, EmptyState)> {
        let pre = self.pre_activation(x, params)?;
        Ok((self.activation.apply_array(&pre), state))
    }

    fn backward(
        &self,
        x: &ArrayD<T>,
        params: &KernelParams<T>,
        grad_output: &ArrayD<T>,
    ) -> OperatorResult<(ArrayD<T>, KernelParams<T>)> {
        let pre = self.pre_activation(x, params)?;
        if grad_output.shape() != pre.shape() {
            return Err(OperatorError::shape_mismatch(
                "kernel output cotangent",
                format!("{:?}", pre.shape()),
                format!("{:?}", grad_output.shape()),
            ));
        }
        let grad_pre = self.activation.backward_array(&pre, grad_output);

        let (grad_x_bypass, bypass) = self.bypass.backward(x, &params.bypass, &grad_pre)?;
        let (grad_x_conv, conv) = self.conv.backward(x, &params.conv, &grad_pre)?;
        Ok((grad_x_bypass + grad_x_conv, KernelParams { bypass, conv }))
    }
}

impl<T: Real, Tr: SpectralTransform<T> + fmt::Display> fmt::Display for OperatorKernel<T, Tr> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OperatorKernel({} => {}, modes={:?}, {}, {:?}, {})",
            self.in_channels(),
            self.out_channels(),
            self.conv.modes(),
            self.activation,
            self.bypass_kind(),
            self.layout()
        )
    }
}
