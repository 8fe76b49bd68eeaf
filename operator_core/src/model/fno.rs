//! Fourier Neural Operator: lifting, a stack of operator kernels and a
//! two-stage projection.
//!
//! # Architecture
//!
//! ```text
//! x ─▶ Pointwise(in → hidden)
//!   ─▶ OperatorKernel(hidden → hidden) × num_layers
//!   ─▶ Pointwise(hidden → projection) ─▶ activation
//!   ─▶ Pointwise(projection → out) ─▶ y
//! ```

use std::fmt;

use ndarray::ArrayD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::FnoConfig;
use crate::error::{OperatorError, OperatorResult};
use crate::layers::{
    Activation, EmptyState, KernelParams, Layer, OperatorKernel, OperatorKernelConfig, Pointwise,
    PointwiseParams,
};
use crate::layout::Layout;
use crate::scalar::Real;
use crate::transform::FourierTransform;

/// Trainable tensors of a [`FourierNeuralOperator`], in initialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnoParams<T> {
    pub lifting: PointwiseParams<T>,
    pub kernels: Vec<KernelParams<T>>,
    pub projection: PointwiseParams<T>,
    pub output: PointwiseParams<T>,
}

/// Activations cached by a forward pass for the reverse pass.
struct Trace<T> {
    /// Input of every kernel, then the input of the projection.
    hidden: Vec<ArrayD<T>>,
    /// Projection output before the activation.
    projected: ArrayD<T>,
    activated: ArrayD<T>,
}

#[derive(Debug, Clone)]
pub struct FourierNeuralOperator<T: Real> {
    lifting: Pointwise<T>,
    kernels: Vec<OperatorKernel<T, FourierTransform<T>>>,
    projection: Pointwise<T>,
    output: Pointwise<T>,
    activation: Activation,
}

impl<T: Real> FourierNeuralOperator<T> {
    /// Assembles the network.
    ///
    /// # Arguments
    ///
    /// * `channels` - `(in, out)` channel counts of the operator
    /// * `hidden_channels` - Width of the kernel stack
    /// * `projection_channels` - Width of the projection head
    /// * `modes` - Retained Fourier modes per spatial axis
    /// * `num_layers` - Number of operator kernels
    /// * `activation` - Activation of the kernels and the projection head
    /// * `config` - Layout, initializer and fast-activation switch
    pub fn new(
        channels: (usize, usize),
        hidden_channels: usize,
        projection_channels: usize,
        modes: &[usize],
        num_layers: usize,
        activation: Activation,
        config: OperatorKernelConfig,
    ) -> OperatorResult<Self> {
        let (in_channels, out_channels) = channels;
        let layout = config.layout;
        let lifting = Pointwise::new((in_channels, hidden_channels), layout)?;
        let kernels = (0..num_layers)
            .map(|_| {
                OperatorKernel::fourier(
                    (hidden_channels, hidden_channels),
                    modes,
                    activation,
                    config.clone(),
                )
            })
            .collect::<OperatorResult<Vec<_>>>()?;
        let projection = Pointwise::new((hidden_channels, projection_channels), layout)?;
        let output = Pointwise::new((projection_channels, out_channels), layout)?;
        let activation = if config.allow_fast_activation {
            activation.fast()
        } else {
            activation
        };

        Ok(Self {
            lifting,
            kernels,
            projection,
            output,
            activation,
        })
    }

    /// Builds the network described by a validated configuration.
    pub fn from_config(config: &FnoConfig) -> OperatorResult<Self> {
        config.transform.ensure_supported()?;
        let kernel_config = OperatorKernelConfig {
            layout: config.layout,
            allow_fast_activation: config.allow_fast_activation,
            ..OperatorKernelConfig::default()
        };
        let model = Self::new(
            (config.in_channels, config.out_channels),
            config.hidden_channels,
            config.projection_channels,
            &config.modes,
            config.num_layers,
            config.activation,
            kernel_config,
        )?;
        tracing::debug!(
            parameters = model.parameter_count(),
            layers = config.num_layers,
            modes = ?config.modes,
            "built fourier neural operator"
        );
        Ok(model)
    }

    pub fn in_channels(&self) -> usize {
        self.lifting.in_channels()
    }

    pub fn out_channels(&self) -> usize {
        self.output.out_channels()
    }

    pub fn layout(&self) -> Layout {
        self.lifting.layout()
    }

    pub fn num_layers(&self) -> usize {
        self.kernels.len()
    }

    pub fn kernels(&self) -> &[OperatorKernel<T, FourierTransform<T>>] {
        &self.kernels
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Checks that every tensor in `params` has the shape this network expects.
    pub fn check_params(&self, params: &FnoParams<T>) -> OperatorResult<()> {
        if params.kernels.len() != self.kernels.len() {
            return Err(OperatorError::shape_mismatch(
                "fno kernel parameters",
                format!("{} kernels", self.kernels.len()),
                format!("{} kernels", params.kernels.len()),
            ));
        }
        self.lifting.check_params(&params.lifting)?;
        for (kernel, kernel_params) in self.kernels.iter().zip(&params.kernels) {
            kernel.check_params(kernel_params)?;
        }
        self.projection.check_params(&params.projection)?;
        self.output.check_params(&params.output)
    }

    fn trace(&self, x: &ArrayD<T>, params: &FnoParams<T>) -> OperatorResult<(ArrayD<T>, Trace<T>)> {
        self.check_params(params)?;
        let mut hidden = Vec::with_capacity(self.kernels.len() + 1);
        let mut h = self.lifting.apply(x, &params.lifting)?;
        for (kernel, kernel_params) in self.kernels.iter().zip(&params.kernels) {
            let next = kernel.apply(&h, kernel_params)?;
            hidden.push(h);
            h = next;
        }
        let projected = self.projection.apply(&h, &params.projection)?;
        hidden.push(h);
        let activated = self.activation.apply_array(&projected);
        let y = self.output.apply(&activated, &params.output)?;
        Ok((
            y,
            Trace {
                hidden,
                projected,
                activated,
            },
        ))
    }
}

impl<T: Real> Layer<T> for FourierNeuralOperator<T> {
    type Params = FnoParams<T>;
    type State = EmptyState;

    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> FnoParams<T> {
        let lifting = self.lifting.init_params(rng);
        let kernels = self.kernels.iter().map(|k| k.init_params(rng)).collect();
        let projection = self.projection.init_params(rng);
        let output = self.output.init_params(rng);
        FnoParams {
            lifting,
            kernels,
            projection,
            output,
        }
    }

    fn init_state(&self) -> EmptyState {
        EmptyState
    }

    fn parameter_count(&self) -> usize {
        self.lifting.parameter_count()
            + self.kernels.iter().map(|k| k.parameter_count()).sum::<usize>()
            + self.projection.parameter_count()
            + self.output.parameter_count()
    }

    fn forward(
        &self,
        x: &ArrayD<T>,
        params: &FnoParams<T>,
        state: EmptyState,
    ) -> OperatorResult<(ArrayD<T>, EmptyState)> {
        let (y, _) = self.trace(x, params)?;
        Ok((y, state))
    }

    fn backward(
        &self,
        x: &ArrayD<T>,
        params: &FnoParams<T>,
        grad_output: &ArrayD<T>,
    ) -> OperatorResult<(ArrayD<T>, FnoParams<T>)> {
        let (_, trace) = self.trace(x, params)?;

        let (grad_activated, output) =
            self.output.backward(&trace.activated, &params.output, grad_output)?;
        let grad_projected = self.activation.backward_array(&trace.projected, &grad_activated);

        let last = trace.hidden.len() - 1;
        let (mut grad, projection) =
            self.projection.backward(&trace.hidden[last], &params.projection, &grad_projected)?;

        let mut kernels = Vec::with_capacity(self.kernels.len());
        for (i, kernel) in self.kernels.iter().enumerate().rev() {
            let (grad_input, kernel_grads) = kernel.backward(&trace.hidden[i], &params.kernels[i], &grad)?;
            kernels.push(kernel_grads);
            grad = grad_input;
        }
        kernels.reverse();

        let (grad_x, lifting) = self.lifting.backward(x, &params.lifting, &grad)?;
        Ok((
            grad_x,
            FnoParams {
                lifting,
                kernels,
                projection,
                output,
            },
        ))
    }
}

impl<T: Real> fmt::Display for FourierNeuralOperator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FourierNeuralOperator(")?;
        writeln!(f, "  lifting: {}", self.lifting)?;
        for (i, kernel) in self.kernels.iter().enumerate() {
            writeln!(f, "  kernel[{i}]: {kernel}")?;
        }
        writeln!(f, "  projection: {} -> {}", self.projection, self.activation)?;
        writeln!(f, "  output: {}", self.output)?;
        write!(f, ")")
    }
}
