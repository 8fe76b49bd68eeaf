//! Elementwise activations applied after the bypass/spectral sum.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayD, Zip};
use num_traits::Float;
use serde::{Deserialize, Serialize};

use crate::error::{OperatorError, OperatorResult};
use crate::scalar::Real;

/// `sqrt(2 / π)`
const GELU_SCALE: f64 = 0.797_884_560_802_865_4;
const GELU_CUBIC: f64 = 0.044_715;

/// Beyond this `|x|` the rational approximation is within rounding of `±1`.
const TANH_FAST_CLAMP: f64 = 7.905_311_107_635_498;
/// Odd numerator, in powers of `x²`.
const TANH_NUMERATOR: [f64; 7] = [
    4.893_524_558_917_86e-3,
    6.372_619_288_754_36e-4,
    1.485_722_357_179_79e-5,
    5.122_297_090_371_14e-8,
    -8.604_671_522_137_35e-11,
    2.000_187_904_824_77e-13,
    -2.760_768_477_423_55e-16,
];
const TANH_DENOMINATOR: [f64; 4] = [
    4.893_525_185_543_85e-3,
    2.268_434_632_439_00e-3,
    1.185_347_056_866_54e-4,
    1.198_258_394_667_02e-6,
];

/// Activation function of an operator kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    Tanh,
    /// Rational approximation of `tanh`
    TanhFast,
    Sigmoid,
    /// `(1 + tanh_fast(x / 2)) / 2`
    SigmoidFast,
    /// Tanh form of the Gaussian error linear unit
    Gelu,
    /// `Gelu` with its inner `tanh` replaced by `tanh_fast`
    GeluFast,
}

impl Activation {
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Identity => "identity",
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::TanhFast => "tanh_fast",
            Activation::Sigmoid => "sigmoid",
            Activation::SigmoidFast => "sigmoid_fast",
            Activation::Gelu => "gelu",
            Activation::GeluFast => "gelu_fast",
        }
    }

    /// The approximate counterpart used when fast activations are allowed.
    pub fn fast(self) -> Self {
        match self {
            Activation::Tanh => Activation::TanhFast,
            Activation::Sigmoid => Activation::SigmoidFast,
            Activation::Gelu => Activation::GeluFast,
            other => other,
        }
    }

    pub fn apply<T: Real>(&self, x: T) -> T {
        let half = T::cast(0.5);
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(T::zero()),
            Activation::Tanh => x.tanh(),
            Activation::TanhFast => tanh_fast(x),
            Activation::Sigmoid => T::one() / (T::one() + (-x).exp()),
            Activation::SigmoidFast => half * (T::one() + tanh_fast(half * x)),
            Activation::Gelu => half * x * (T::one() + gelu_inner(x).tanh()),
            Activation::GeluFast => half * x * (T::one() + tanh_fast(gelu_inner(x))),
        }
    }

    /// Derivative with respect to the pre-activation input.
    pub fn derivative<T: Real>(&self, x: T) -> T {
        let half = T::cast(0.5);
        match self {
            Activation::Identity => T::one(),
            Activation::Relu => {
                if x > T::zero() {
                    T::one()
                } else {
                    T::zero()
                }
            }
            Activation::Tanh => {
                let t = x.tanh();
                T::one() - t * t
            }
            Activation::TanhFast => tanh_fast_derivative(x),
            Activation::Sigmoid => {
                let s = self.apply(x);
                s * (T::one() - s)
            }
            Activation::SigmoidFast => half * half * tanh_fast_derivative(half * x),
            Activation::Gelu => {
                let t = gelu_inner(x).tanh();
                half * (T::one() + t) + half * x * (T::one() - t * t) * gelu_inner_derivative(x)
            }
            Activation::GeluFast => {
                let u = gelu_inner(x);
                half * (T::one() + tanh_fast(u))
                    + half * x * tanh_fast_derivative(u) * gelu_inner_derivative(x)
            }
        }
    }

    pub fn apply_array<T: Real>(&self, x: &ArrayD<T>) -> ArrayD<T> {
        if *self == Activation::Identity {
            return x.clone();
        }
        let mut out = ArrayD::zeros(x.raw_dim());
        Zip::from(&mut out)
            .and(x)
            .par_for_each(|o, &v| *o = self.apply(v));
        out
    }

    /// `grad_output ⊙ σ'(pre)`.
    pub fn backward_array<T: Real>(&self, pre: &ArrayD<T>, grad_output: &ArrayD<T>) -> ArrayD<T> {
        if *self == Activation::Identity {
            return grad_output.clone();
        }
        let mut out = ArrayD::zeros(pre.raw_dim());
        Zip::from(&mut out)
            .and(pre)
            .and(grad_output)
            .par_for_each(|o, &p, &g| *o = g * self.derivative(p));
        out
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = OperatorError;

    fn from_str(s: &str) -> OperatorResult<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "identity" | "linear" | "none" => Ok(Activation::Identity),
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "tanh_fast" => Ok(Activation::TanhFast),
            "sigmoid" => Ok(Activation::Sigmoid),
            "sigmoid_fast" => Ok(Activation::SigmoidFast),
            "gelu" => Ok(Activation::Gelu),
            "gelu_fast" => Ok(Activation::GeluFast),
            other => Err(OperatorError::invalid_config(
                "activation",
                other,
                "unknown activation name",
            )),
        }
    }
}

fn gelu_inner<T: Real>(x: T) -> T {
    T::cast(GELU_SCALE) * (x + T::cast(GELU_CUBIC) * x * x * x)
}

fn gelu_inner_derivative<T: Real>(x: T) -> T {
    T::cast(GELU_SCALE) * (T::one() + T::cast(3.0 * GELU_CUBIC) * x * x)
}

fn evalpoly<T: Real>(x: T, coefficients: &[f64]) -> T {
    coefficients
        .iter()
        .rev()
        .fold(T::zero(), |acc, &c| acc * x + T::cast(c))
}

fn evalpoly_derivative<T: Real>(x: T, coefficients: &[f64]) -> T {
    coefficients
        .iter()
        .enumerate()
        .skip(1)
        .rev()
        .fold(T::zero(), |acc, (power, &c)| acc * x + T::cast(c * power as f64))
}

/// `x · P(x²) / Q(x²)`, saturating to `±1` for large `|x|`.
fn tanh_fast<T: Real>(x: T) -> T {
    if Float::abs(x) >= T::cast(TANH_FAST_CLAMP) {
        return Float::signum(x);
    }
    let x2 = x * x;
    x * evalpoly(x2, &TANH_NUMERATOR) / evalpoly(x2, &TANH_DENOMINATOR)
}

fn tanh_fast_derivative<T: Real>(x: T) -> T {
    if Float::abs(x) >= T::cast(TANH_FAST_CLAMP) {
        return T::zero();
    }
    let x2 = x * x;
    let n = evalpoly(x2, &TANH_NUMERATOR);
    let d = evalpoly(x2, &TANH_DENOMINATOR);
    let dn = evalpoly_derivative(x2, &TANH_NUMERATOR);
    let dd = evalpoly_derivative(x2, &TANH_DENOMINATOR);
    n / d + T::cast(2.0) * x2 * (dn * d - n * dd) / (d * d)
}
