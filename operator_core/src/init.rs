//! Weight initializers.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array, Dimension};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{OperatorError, OperatorResult};
use crate::scalar::Real;

/// Initializer drawing a dense real tensor from an RNG.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WeightInit {
    /// Uniform on `±sqrt(6 / (fan_in + fan_out))`
    GlorotUniform,
    /// Normal with standard deviation `sqrt(2 / (fan_in + fan_out))`
    GlorotNormal,
    /// Uniform on `[low, high)`
    Uniform { low: f64, high: f64 },
    /// Normal with the given standard deviation
    Normal { std: f64 },
    /// All zeros
    Zeros,
}

impl Default for WeightInit {
    fn default() -> Self {
        WeightInit::GlorotUniform
    }
}

impl WeightInit {
    /// Draws a tensor of shape `dim`.
    ///
    /// Fan sizes follow the `(out, in, receptive...)` convention: `fan_in =
    /// in · receptive`, `fan_out = out · receptive`.
    pub fn sample<T, D, R>(&self, dim: D, rng: &mut R) -> Array<T, D>
    where
        T: Real,
        D: Dimension,
        R: Rng + ?Sized,
    {
        let (fan_in, fan_out) = fans(dim.slice());
        match *self {
            WeightInit::GlorotUniform => {
                let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
                Array::from_shape_fn(dim, |_| T::cast(rng.gen_range(-limit..limit)))
            }
            WeightInit::GlorotNormal => {
                let std = (2.0 / (fan_in + fan_out).max(1) as f64).sqrt();
                sample_normal(dim, std, rng)
            }
            WeightInit::Uniform { low, high } => {
                if high > low {
                    Array::from_shape_fn(dim, |_| T::cast(rng.gen_range(low..high)))
                } else {
                    Array::from_elem(dim, T::cast(low))
                }
            }
            WeightInit::Normal { std } => sample_normal(dim, std, rng),
            WeightInit::Zeros => Array::zeros(dim),
        }
    }

    pub fn validate(&self) -> OperatorResult<()> {
        match *self {
            WeightInit::Uniform { low, high } if !(high >= low) => Err(
                OperatorError::invalid_config("init.high", high.to_string(), "must be >= low"),
            ),
            WeightInit::Normal { std } if !(std >= 0.0 && std.is_finite()) => Err(
                OperatorError::invalid_config("init.std", std.to_string(), "must be finite and >= 0"),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for WeightInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightInit::GlorotUniform => f.write_str("glorot_uniform"),
            WeightInit::GlorotNormal => f.write_str("glorot_normal"),
            WeightInit::Uniform { low, high } => write!(f, "uniform({low}, {high})"),
            WeightInit::Normal { std } => write!(f, "normal({std})"),
            WeightInit::Zeros => f.write_str("zeros"),
        }
    }
}

impl FromStr for WeightInit {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glorot_uniform" | "xavier_uniform" => Ok(WeightInit::GlorotUniform),
            "glorot_normal" | "xavier_normal" => Ok(WeightInit::GlorotNormal),
            "zeros" => Ok(WeightInit::Zeros),
            other => Err(OperatorError::invalid_config(
                "init",
                other,
                "expected glorot_uniform, glorot_normal or zeros",
            )),
        }
    }
}

fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [out, input, receptive @ ..] => {
            let field: usize = receptive.iter().product();
            (input * field, out * field)
        }
    }
}

fn sample_normal<T, D, R>(dim: D, std: f64, rng: &mut R) -> Array<T, D>
where
    T: Real,
    D: Dimension,
    R: Rng + ?Sized,
{
    match Normal::new(0.0, std) {
        Ok(normal) => Array::from_shape_fn(dim, |_| T::cast(normal.sample(rng))),
        Err(_) => Array::zeros(dim),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, Ix1, Ix2, Ix3, IxDyn};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_glorot_uniform_respects_limit() {
        let mut rng = StdRng::seed_from_u64(42);
        let w: ArrayD<f32> = WeightInit::GlorotUniform.sample(IxDyn(&[5, 2, 16]), &mut rng);
        let limit = (6.0f32 / (2.0 * 16.0 + 5.0 * 16.0)).sqrt();
        assert_eq!(w.shape(), &[5, 2, 16]);
        assert!(w.iter().all(|v| v.abs() <= limit));
        assert!(w.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = WeightInit::GlorotNormal.sample::<f64, _, _>(Ix3(3, 3, 4), &mut StdRng::seed_from_u64(9));
        let b = WeightInit::GlorotNormal.sample::<f64, _, _>(Ix3(3, 3, 4), &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_zeros_and_degenerate_uniform() {
        let mut rng = StdRng::seed_from_u64(1);
        let zeros = WeightInit::Zeros.sample::<f32, _, _>(Ix2(2, 2), &mut rng);
        assert!(zeros.iter().all(|v| *v == 0.0));
        let constant =
            WeightInit::Uniform { low: 0.5, high: 0.5 }.sample::<f32, _, _>(Ix1(3), &mut rng);
        assert!(constant.iter().all(|v| *v == 0.5));
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        assert!(WeightInit::Uniform { low: 1.0, high: 0.0 }.validate().is_err());
        assert!(WeightInit::Normal { std: -1.0 }.validate().is_err());
        assert!(WeightInit::Normal { std: 0.1 }.validate().is_ok());
    }
}
