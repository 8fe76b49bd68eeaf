//! Stateless neural-operator layers.
//!
//! Layers own only their hyperparameters. Trainable tensors live in a
//! separate `Params` value created by [`Layer::init_params`], and the state
//! threaded through `forward` is the empty [`EmptyState`]. This keeps a layer
//! shareable across threads while callers own and update the parameters.
//!
//! # Architecture
//!
//! ```text
//! x ─┬─ Pointwise (W·x + b) ──────────────┐
//!    │                                    (+) ─ activation ─▶ y
//!    └─ OperatorConv (spectral mixing) ───┘
//! ```

pub mod activation;
pub mod conv;
pub mod kernel;
pub mod pointwise;

use ndarray::ArrayD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::OperatorResult;
use crate::scalar::Real;

pub use activation::Activation;
pub use conv::{ConvParams, OperatorConv, OperatorConvConfig, SpectralConv};
pub use kernel::{KernelParams, OperatorKernel, OperatorKernelConfig, SpectralKernel};
pub use pointwise::{BypassKind, Pointwise, PointwiseParams};

/// Opaque state threaded through `forward`. None of the layers here carry
/// running state, so it only passes through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyState;

/// A layer with explicit parameters, state and reverse-mode pass.
pub trait Layer<T: Real>: Send + Sync {
    /// Trainable parameters; the gradient returned by `backward` has the
    /// same type and shapes.
    type Params: Clone;
    type State: Clone;

    /// Draws fresh parameters from `rng`.
    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Params;

    fn init_state(&self) -> Self::State;

    /// Number of scalar trainable parameters.
    fn parameter_count(&self) -> usize;

    /// Applies the layer, returning the output and the (updated) state.
    fn forward(
        &self,
        x: &ArrayD<T>,
        params: &Self::Params,
        state: Self::State,
    ) -> OperatorResult<(ArrayD<T>, Self::State)>;

    /// Pulls `grad_output` back through the layer evaluated at `x`.
    ///
    /// Returns the gradient with respect to `x` and to every parameter.
    fn backward(
        &self,
        x: &ArrayD<T>,
        params: &Self::Params,
        grad_output: &ArrayD<T>,
    ) -> OperatorResult<(ArrayD<T>, Self::Params)>;

    /// `forward` with a fresh state, discarding the returned one.
    fn apply(&self, x: &ArrayD<T>, params: &Self::Params) -> OperatorResult<ArrayD<T>> {
        self.forward(x, params, self.init_state()).map(|(y, _)| y)
    }
}
