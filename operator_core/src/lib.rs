//! # Spectral Operator Core
//!
//! Building blocks for neural operators: layers that learn maps between
//! function spaces by mixing channels on a truncated set of spectral modes.
//! Tensors are `ndarray` arrays laid out as `(channels, s_1, ..., s_N, batch)`
//! (channel-first) or `(s_1, ..., s_N, channels, batch)` (channel-last).
//!
//! ## Quick Start
//!
//! ```rust
//! use ndarray::{ArrayD, IxDyn};
//! use operator_core::{Activation, Layer, SpectralKernel};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let kernel = SpectralKernel::spectral((2, 5), &[16], Activation::Gelu).unwrap();
//! let params = kernel.init_params(&mut StdRng::seed_from_u64(42));
//!
//! let x = ArrayD::<f32>::zeros(IxDyn(&[2, 32, 4]));
//! let (y, _state) = kernel.forward(&x, &params, kernel.init_state()).unwrap();
//! assert_eq!(y.shape(), &[5, 32, 4]);
//! ```
//!
//! ## Core Modules
//!
//! - [`transform`] - Spectral transforms and their pullbacks
//! - [`functional`] - Mode-truncated channel mixing
//! - [`layers`] - Operator convolution, operator kernel, pointwise bypass
//! - [`model`] - Fourier Neural Operator
//! - [`config`] - Model configuration via TOML
//! - [`checkpoint`] - Deterministic binary checkpoints

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod functional;
pub mod init;
pub mod layers;
pub mod layout;
pub mod model;
pub mod scalar;
pub mod transform;

pub use checkpoint::{CheckpointError, Checkpointable, ModelCheckpoint, MODEL_CHECKPOINT_VERSION};
pub use config::{ConfigError, FnoConfig};
pub use error::{OperatorError, OperatorResult};
pub use functional::{operator_conv, operator_conv_backward};
pub use init::WeightInit;
pub use layers::{
    Activation, BypassKind, ConvParams, EmptyState, KernelParams, Layer, OperatorConv,
    OperatorConvConfig, OperatorKernel, OperatorKernelConfig, Pointwise, PointwiseParams,
    SpectralConv, SpectralKernel,
};
pub use layout::Layout;
pub use model::{FnoParams, FourierNeuralOperator};
pub use scalar::Real;
pub use transform::{FourierTransform, SpectralTransform, TransformKind};
