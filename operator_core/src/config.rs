//! Model configuration via TOML files.
//!
//! The `[fno]` table describes one Fourier Neural Operator. Every key has a
//! default, so a missing table yields [`FnoConfig::default`].
//!
//! ```toml
//! [fno]
//! in_channels = 2
//! out_channels = 1
//! hidden_channels = 32
//! projection_channels = 128
//! modes = [16, 16]
//! num_layers = 4
//! activation = "gelu"
//! layout = "channel_first"
//! allow_fast_activation = true
//! transform = "fourier"
//! seed = 42
//! ```

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{OperatorError, OperatorResult};
use crate::layers::Activation;
use crate::layout::Layout;
use crate::model::FourierNeuralOperator;
use crate::scalar::Real;
use crate::transform::TransformKind;

/// Hyperparameters of a [`FourierNeuralOperator`].
///
/// # Examples
///
/// ```
/// use operator_core::FnoConfig;
///
/// let config = FnoConfig::from_str("[fno]\nin_channels = 3\nmodes = [8, 8]").unwrap();
/// assert_eq!(config.in_channels, 3);
/// assert_eq!(config.hidden_channels, 32);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnoConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Width of the operator-kernel stack
    pub hidden_channels: usize,
    /// Width of the projection head
    pub projection_channels: usize,
    /// Retained modes per spatial axis
    pub modes: Vec<usize>,
    pub num_layers: usize,
    pub activation: Activation,
    pub layout: Layout,
    pub allow_fast_activation: bool,
    pub transform: TransformKind,
    /// Seed for deterministic parameter initialization
    pub seed: u64,
}

impl FnoConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let Some(raw) = raw.fno else {
            tracing::warn!("no [fno] table in configuration, using defaults");
            return Ok(Self::default());
        };
        Self::try_from(raw)
    }

    fn try_from(raw: RawFno) -> Result<Self, ConfigError> {
        let config = Self {
            in_channels: raw.in_channels,
            out_channels: raw.out_channels,
            hidden_channels: raw.hidden_channels,
            projection_channels: raw.projection_channels,
            modes: raw.modes,
            num_layers: raw.num_layers,
            activation: raw.activation.parse()?,
            layout: raw.layout.parse()?,
            allow_fast_activation: raw.allow_fast_activation,
            transform: raw.transform.parse()?,
            seed: raw.seed,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every size invariant. The transform kind is only checked for
    /// support when the model is built.
    pub fn validate(&self) -> OperatorResult<()> {
        let widths = [
            ("in_channels", self.in_channels),
            ("out_channels", self.out_channels),
            ("hidden_channels", self.hidden_channels),
            ("projection_channels", self.projection_channels),
            ("num_layers", self.num_layers),
        ];
        for (parameter, value) in widths {
            if value == 0 {
                return Err(OperatorError::invalid_config(parameter, "0", "must be >= 1"));
            }
        }
        if self.modes.is_empty() {
            return Err(OperatorError::invalid_config(
                "modes",
                "[]",
                "at least one spatial axis is required",
            ));
        }
        if self.modes.contains(&0) {
            return Err(OperatorError::invalid_config(
                "modes",
                format!("{:?}", self.modes),
                "every axis must keep at least one mode",
            ));
        }
        Ok(())
    }

    /// Builds the network in precision `T`.
    pub fn build<T: Real>(&self) -> OperatorResult<FourierNeuralOperator<T>> {
        self.validate()?;
        FourierNeuralOperator::from_config(self)
    }

    /// RNG seeded from `seed`, for `init_params`.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }
}

impl Default for FnoConfig {
    fn default() -> Self {
        Self {
            in_channels: default_channels(),
            out_channels: default_channels(),
            hidden_channels: default_hidden_channels(),
            projection_channels: default_projection_channels(),
            modes: default_modes(),
            num_layers: default_num_layers(),
            activation: Activation::Gelu,
            layout: Layout::ChannelFirst,
            allow_fast_activation: true,
            transform: TransformKind::Fourier,
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    fno: Option<RawFno>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFno {
    #[serde(default = "default_channels")]
    in_channels: usize,
    #[serde(default = "default_channels")]
    out_channels: usize,
    #[serde(default = "default_hidden_channels")]
    hidden_channels: usize,
    #[serde(default = "default_projection_channels")]
    projection_channels: usize,
    #[serde(default = "default_modes")]
    modes: Vec<usize>,
    #[serde(default = "default_num_layers")]
    num_layers: usize,
    #[serde(default = "default_activation")]
    activation: String,
    #[serde(default = "default_layout")]
    layout: String,
    #[serde(default = "default_true")]
    allow_fast_activation: bool,
    #[serde(default = "default_transform")]
    transform: String,
    #[serde(default = "default_seed")]
    seed: u64,
}

fn default_channels() -> usize {
    1
}

fn default_hidden_channels() -> usize {
    32
}

fn default_projection_channels() -> usize {
    128
}

fn default_modes() -> Vec<usize> {
    vec![16]
}

fn default_num_layers() -> usize {
    4
}

fn default_activation() -> String {
    "gelu".to_string()
}

fn default_layout() -> String {
    "channel_first".to_string()
}

fn default_true() -> bool {
    true
}

fn default_transform() -> String {
    "fourier".to_string()
}

fn default_seed() -> u64 {
    42
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    /// Well-formed TOML describing an impossible model.
    Invalid(OperatorError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
            ConfigError::Invalid(err) => write!(f, "Invalid configuration: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Invalid(err) => Some(err),
            ConfigError::Parse(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<OperatorError> for ConfigError {
    fn from(value: OperatorError) -> Self {
        ConfigError::Invalid(value)
    }
}
