//! Pointwise channel map `W·x + b` used for lifting, projection and the
//! kernel bypass.

use std::fmt;
use std::marker::PhantomData;

use ndarray::{Array1, Array2, ArrayD, Axis, Ix1, Ix2, IxDyn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{EmptyState, Layer};
use crate::error::{OperatorError, OperatorResult};
use crate::init::WeightInit;
use crate::layout::Layout;
use crate::scalar::Real;

/// How the bypass is realised for a layout. Both compute the same affine map
/// at every spatial point; they only differ in which axis they contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassKind {
    /// Dense layer over the channel axis of a channel-last tensor
    Dense,
    /// Convolution with a unit window over a channel-first tensor
    UnitConv,
}

impl BypassKind {
    pub fn for_layout(layout: Layout) -> Self {
        match layout {
            Layout::ChannelFirst => BypassKind::UnitConv,
            Layout::ChannelLast => BypassKind::Dense,
        }
    }
}

/// Trainable tensors of a [`Pointwise`] layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointwiseParams<T> {
    /// `(out, in)`
    pub weight: Array2<T>,
    /// `(out,)`
    pub bias: Array1<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pointwise<T> {
    in_channels: usize,
    out_channels: usize,
    layout: Layout,
    init: WeightInit,
    _precision: PhantomData<fn() -> T>,
}

impl<T: Real> Pointwise<T> {
    /// Creates an `in => out` channel map for tensors in `layout`.
    pub fn new(channels: (usize, usize), layout: Layout) -> OperatorResult<Self> {
        let (in_channels, out_channels) = channels;
        check_channels(in_channels, out_channels)?;
        Ok(Self {
            in_channels,
            out_channels,
            layout,
            init: WeightInit::GlorotUniform,
            _precision: PhantomData,
        })
    }

    /// Replaces the weight initializer (bias always starts at zero).
    pub fn with_init(mut self, init: WeightInit) -> OperatorResult<Self> {
        init.validate()?;
        self.init = init;
        Ok(self)
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn kind(&self) -> BypassKind {
        BypassKind::for_layout(self.layout)
    }

    /// Checks that `params` belong to a layer of this size.
    pub fn check_params(&self, params: &PointwiseParams<T>) -> OperatorResult<()> {
        let expected = (self.out_channels, self.in_channels);
        if params.weight.dim() != expected || params.bias.len() != self.out_channels {
            return Err(OperatorError::shape_mismatch(
                "pointwise parameters",
                format!("weight {:?}, bias ({},)", expected, self.out_channels),
                format!("weight {:?}, bias ({},)", params.weight.dim(), params.bias.len()),
            ));
        }
        Ok(())
    }

    fn check_input(&self, x: &ArrayD<T>, channels: usize, context: &str) -> OperatorResult<()> {
        if x.ndim() < 2 {
            return Err(OperatorError::shape_mismatch(
                context,
                "rank >= 2",
                format!("rank {}", x.ndim()),
            ));
        }
        let got = self.layout.channels(x);
        if got != channels {
            return Err(OperatorError::shape_mismatch(
                format!("{context} channels ({})", self.layout),
                channels.to_string(),
                got.to_string(),
            ));
        }
        Ok(())
    }
}

impl<T: Real> Layer<T> for Pointwise<T> {
    type Params = PointwiseParams<T>;
    type State = EmptyState;

    fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> PointwiseParams<T> {
        PointwiseParams {
            weight: self.init.sample(Ix2(self.out_channels, self.in_channels), rng),
            bias: WeightInit::Zeros.sample(Ix1(self.out_channels), rng),
        }
    }

    fn init_state(&self) -> EmptyState {
        EmptyState
    }

    fn parameter_count(&self) -> usize {
        self.out_channels * self.in_channels + self.out_channels
    }

    fn forward(
        &self,
        x: &ArrayD<T>,
        params: &PointwiseParams<T>,
        state: EmptyState,
    ) -> OperatorResult<(ArrayD<T>, EmptyState)> {
        self.check_params(params)?;
        self.check_input(x, self.in_channels, "pointwise input")?;

        let canonical = self.layout.to_canonical(x)?;
        let (flat, rest) = flatten_channels(canonical)?;
        let y = params.weight.dot(&flat) + &params.bias.view().insert_axis(Axis(1));

        let y = unflatten_channels(y, &rest)?;
        Ok((self.layout.from_canonical(&y)?, state))
    }

    fn backward(
        &self,
        x: &ArrayD<T>,
        params: &PointwiseParams<T>,
        grad_output: &ArrayD<T>,
    ) -> OperatorResult<(ArrayD<T>, PointwiseParams<T>)> {
        self.check_params(params)?;
        self.check_input(x, self.in_channels, "pointwise input")?;
        self.check_input(grad_output, self.out_channels, "pointwise cotangent")?;

        let (x_flat, rest) = flatten_channels(self.layout.to_canonical(x)?)?;
        let (g_flat, g_rest) = flatten_channels(self.layout.to_canonical(grad_output)?)?;
        if g_rest != rest {
            return Err(OperatorError::shape_mismatch(
                "pointwise cotangent",
                format!("{rest:?}"),
                format!("{g_rest:?}"),
            ));
        }

        let grad_weight = g_flat.dot(&x_flat.t());
        let grad_bias = g_flat.sum_axis(Axis(1));
        let grad_x = unflatten_channels(params.weight.t().dot(&g_flat), &rest)?;

        Ok((
            self.layout.from_canonical(&grad_x)?,
            PointwiseParams {
                weight: grad_weight,
                bias: grad_bias,
            },
        ))
    }
}

impl<T> fmt::Display for Pointwise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = BypassKind::for_layout(self.layout);
        write!(
            f,
            "Pointwise({} => {}, {:?}, {})",
            self.in_channels, self.out_channels, kind, self.layout
        )
    }
}

pub(crate) fn check_channels(in_channels: usize, out_channels: usize) -> OperatorResult<()> {
    if in_channels == 0 || out_channels == 0 {
        return Err(OperatorError::invalid_config(
            "channels",
            format!("{in_channels} => {out_channels}"),
            "channel counts must be positive",
        ));
    }
    Ok(())
}

/// `(C, rest...)` → `(C, ∏ rest)`, returning the trailing extents.
fn flatten_channels<T: Real>(canonical: ArrayD<T>) -> OperatorResult<(Array2<T>, Vec<usize>)> {
    let rest = canonical.shape()[1..].to_vec();
    let channels = canonical.shape()[0];
    let points: usize = rest.iter().product();
    let flat = canonical
        .into_shape((channels, points))
        .map_err(|e| OperatorError::shape_mismatch("pointwise flatten", "contiguous tensor", e.to_string()))?;
    Ok((flat, rest))
}

fn unflatten_channels<T: Real>(flat: Array2<T>, rest: &[usize]) -> OperatorResult<ArrayD<T>> {
    let mut shape = Vec::with_capacity(rest.len() + 1);
    shape.push(flat.nrows());
    shape.extend_from_slice(rest);
    flat.as_standard_layout()
        .into_owned()
        .into_shape(IxDyn(&shape))
        .map_err(|e| OperatorError::shape_mismatch("pointwise unflatten", format!("{shape:?}"), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ramp(shape: &[usize]) -> ArrayD<f64> {
        let total: usize = shape.iter().product();
        let data = (0..total).map(|i| ((i * 7) % 11) as f64 * 0.1 - 0.5).collect();
        ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
    }

    #[test]
    fn test_parameter_count_and_kind() {
        let layer = Pointwise::<f32>::new((2, 5), Layout::ChannelFirst).unwrap();
        assert_eq!(layer.parameter_count(), 15);
        assert_eq!(layer.kind(), BypassKind::UnitConv);
        let dense = Pointwise::<f32>::new((2, 5), Layout::ChannelLast).unwrap();
        assert_eq!(dense.kind(), BypassKind::Dense);
        assert!(Pointwise::<f32>::new((0, 5), Layout::ChannelFirst).is_err());
    }

    #[test]
    fn test_affine_map_per_point() {
        let layer = Pointwise::<f64>::new((2, 3), Layout::ChannelFirst).unwrap();
        let params = PointwiseParams {
            weight: array![[1.0, 0.0], [0.0, 2.0], [1.0, 1.0]],
            bias: array![0.5, 0.0, -1.0],
        };
        let x = ramp(&[2, 4, 3]);
        let y = layer.apply(&x, &params).unwrap();
        assert_eq!(y.shape(), &[3, 4, 3]);
        for s in 0..4 {
            for b in 0..3 {
                let (a, c) = (x[[0, s, b]], x[[1, s, b]]);
                assert_abs_diff_eq!(y[[0, s, b]], a + 0.5);
                assert_abs_diff_eq!(y[[1, s, b]], 2.0 * c);
                assert_abs_diff_eq!(y[[2, s, b]], a + c - 1.0);
            }
        }
    }

    #[test]
    fn test_bias_broadcasts_in_single_precision() {
        let layer = Pointwise::<f32>::new((1, 2), Layout::ChannelLast).unwrap();
        let params = PointwiseParams {
            weight: array![[0.0f32], [1.0]],
            bias: array![3.0f32, -1.0],
        };
        let x = ArrayD::from_elem(IxDyn(&[5, 1, 2]), 2.0f32);
        let y = layer.apply(&x, &params).unwrap();
        assert_eq!(y.shape(), &[5, 2, 2]);
        assert!(y.index_axis(Axis(1), 0).iter().all(|v| *v == 3.0));
        assert!(y.index_axis(Axis(1), 1).iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_layouts_agree_up_to_permutation() {
        let mut rng = StdRng::seed_from_u64(3);
        let first = Pointwise::<f64>::new((3, 4), Layout::ChannelFirst).unwrap();
        let last = Pointwise::<f64>::new((3, 4), Layout::ChannelLast).unwrap();
        let params = first.init_params(&mut rng);
        let x = ramp(&[3, 6, 5, 2]);
        let y_first = first.apply(&x, &params).unwrap();
        let x_last = Layout::ChannelLast.from_canonical(&x).unwrap();
        let y_last = last.apply(&x_last, &params).unwrap();
        let y_back = Layout::ChannelLast.to_canonical(&y_last).unwrap();
        for (a, b) in y_first.iter().zip(y_back.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_channel_mismatch_is_rejected() {
        let layer = Pointwise::<f64>::new((3, 4), Layout::ChannelLast).unwrap();
        let params = layer.init_params(&mut StdRng::seed_from_u64(0));
        let x = ramp(&[3, 6, 2]);
        assert!(matches!(
            layer.apply(&x, &params),
            Err(OperatorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let layer = Pointwise::<f64>::new((2, 3), Layout::ChannelLast).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let mut params = layer.init_params(&mut rng);
        params.bias = array![0.1, -0.2, 0.3];
        let x = ramp(&[5, 2, 2]);
        let probe = ramp(&[5, 3, 2]).mapv(|v| v + 0.25);
        let loss = |x: &ArrayD<f64>, p: &PointwiseParams<f64>| -> f64 {
            (layer.apply(x, p).unwrap() * &probe).sum()
        };

        let (grad_x, grads) = layer.backward(&x, &params, &probe).unwrap();
        let eps = 1e-6;

        for idx in [[0, 0, 0], [3, 1, 1], [4, 0, 1]] {
            let mut plus = x.clone();
            plus[idx] += eps;
            let mut minus = x.clone();
            minus[idx] -= eps;
            let numeric = (loss(&plus, &params) - loss(&minus, &params)) / (2.0 * eps);
            assert_abs_diff_eq!(grad_x[idx], numeric, epsilon = 1e-6);
        }
        for idx in [(0, 0), (2, 1)] {
            let mut plus = params.clone();
            plus.weight[idx] += eps;
            let mut minus = params.clone();
            minus.weight[idx] -= eps;
            let numeric = (loss(&x, &plus) - loss(&x, &minus)) / (2.0 * eps);
            assert_abs_diff_eq!(grads.weight[idx], numeric, epsilon = 1e-6);
        }
        let mut plus = params.clone();
        plus.bias[1] += eps;
        let mut minus = params.clone();
        minus.bias[1] -= eps;
        let numeric = (loss(&x, &plus) - loss(&x, &minus)) / (2.0 * eps);
        assert_abs_diff_eq!(grads.bias[1], numeric, epsilon = 1e-6);
    }
}
