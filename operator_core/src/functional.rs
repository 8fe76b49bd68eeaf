//! Mode-truncated channel mixing.
//!
//! Given a canonical input `x (in, s_1..s_N, batch)` and weights
//! `W (out, in, K)` with `K = ∏ m_i`:
//!
//! ```text
//! x ──forward──▶ x̂ (in, f.., B) ──prefix m_i──▶ (in, K, B)
//!   ──W[:,:,k]·x̂[:,k,:]──▶ (out, K, B) ──zero-pad──▶ (out, f.., B) ──inverse──▶ y
//! ```
//!
//! Truncation keeps the first `m_i` bins of every frequency axis. Leading
//! axes carry both positive and negative frequencies, so this keeps the low
//! positive frequencies only; the policy is part of the layer's observable
//! behavior.

use ndarray::{Array3, ArrayD, ArrayViewD, Axis, IxDyn, Slice, Zip};
use num_complex::Complex;

use crate::error::{OperatorError, OperatorResult};
use crate::scalar::Real;
use crate::transform::{spatial_extents, SpectralTransform};

/// Forward pass of the spectral convolution on a canonical tensor.
pub fn operator_conv<T, Tr>(
    x: &ArrayD<T>,
    weight: &Array3<T>,
    transform: &Tr,
) -> OperatorResult<ArrayD<T>>
where
    T: Real,
    Tr: SpectralTransform<T> + ?Sized,
{
    let bins = check_operands(x, weight, transform)?;
    let spatial = spatial_extents(x.shape()).to_vec();
    let (out_channels, in_channels, total_modes) = weight.dim();
    let batch = x.shape()[x.ndim() - 1];

    let x_hat = transform.forward(x)?;
    let x_modes = flatten_modes(&truncate_modes(&x_hat, transform.modes()), in_channels, total_modes, batch)?;
    tracing::debug!(
        in_channels,
        out_channels,
        total_modes,
        batch,
        spatial = ?spatial,
        "spectral channel mixing"
    );

    let y_modes = mix_modes(weight, &x_modes);
    let y_hat = zero_pad_modes(&unflatten_modes(y_modes, transform.modes())?, &bins);
    transform.inverse(&y_hat, &spatial)
}

/// Reverse-mode pass of [`operator_conv`].
///
/// Returns `(∂L/∂x, ∂L/∂W)` for the output cotangent `grad_output`. The
/// transform's registered pullbacks carry the gradient through the spectral
/// domain.
pub fn operator_conv_backward<T, Tr>(
    x: &ArrayD<T>,
    weight: &Array3<T>,
    transform: &Tr,
    grad_output: &ArrayD<T>,
) -> OperatorResult<(ArrayD<T>, Array3<T>)>
where
    T: Real,
    Tr: SpectralTransform<T> + ?Sized,
{
    let bins = check_operands(x, weight, transform)?;
    let spatial = spatial_extents(x.shape()).to_vec();
    let (out_channels, in_channels, total_modes) = weight.dim();
    let batch = x.shape()[x.ndim() - 1];

    let mut expected = x.shape().to_vec();
    expected[0] = out_channels;
    if grad_output.shape() != expected.as_slice() {
        return Err(OperatorError::shape_mismatch(
            "operator_conv_backward output cotangent",
            format!("{expected:?}"),
            format!("{:?}", grad_output.shape()),
        ));
    }

    let x_hat = transform.forward(x)?;
    let x_modes = flatten_modes(&truncate_modes(&x_hat, transform.modes()), in_channels, total_modes, batch)?;
    let g_hat = transform.inverse_pullback(grad_output)?;
    let g_modes = flatten_modes(&truncate_modes(&g_hat, transform.modes()), out_channels, total_modes, batch)?;

    let mut grad_weight = Array3::<T>::zeros((out_channels, in_channels, total_modes));
    let mut grad_modes = Array3::<Complex<T>>::zeros((in_channels, total_modes, batch));
    Zip::from(grad_modes.axis_iter_mut(Axis(1)))
        .and(grad_weight.axis_iter_mut(Axis(2)))
        .and(x_modes.axis_iter(Axis(1)))
        .and(g_modes.axis_iter(Axis(1)))
        .and(weight.axis_iter(Axis(2)))
        .par_for_each(|mut gx_k, mut gw_k, x_k, g_k, w_k| {
            // y_k = W_k x_k with real W_k: ∂L/∂x_k = W_kᵀ g_k, ∂L/∂W_k = Re(conj(g_k) x_kᵀ)
            let w_t = w_k.t().mapv(|v| Complex::new(v, T::zero()));
            gx_k.assign(&w_t.dot(&g_k));
            let g_conj = g_k.mapv(|c| c.conj());
            let outer = g_conj.dot(&x_k.t());
            gw_k.assign(&outer.mapv(|c| c.re));
        });

    let grad_hat = zero_pad_modes(&unflatten_modes(grad_modes, transform.modes())?, &bins);
    let grad_x = transform.forward_pullback(&grad_hat, &spatial)?;
    Ok((grad_x, grad_weight))
}

/// Keeps the first `modes[i]` bins along spatial axis `i + 1`.
pub fn truncate_modes<A: Clone>(x_hat: &ArrayD<A>, modes: &[usize]) -> ArrayD<A> {
    let mut view = x_hat.view();
    for (i, &m) in modes.iter().enumerate() {
        view.slice_axis_inplace(Axis(i + 1), Slice::from(0..m));
    }
    standard(view)
}

/// Embeds a truncated spectrum into a zero tensor with `bins` per spatial axis.
pub fn zero_pad_modes<T: Real>(y_modes: &ArrayD<Complex<T>>, bins: &[usize]) -> ArrayD<Complex<T>> {
    let mut shape = y_modes.shape().to_vec();
    shape[1..=bins.len()].copy_from_slice(bins);
    let mut padded = ArrayD::zeros(IxDyn(&shape));
    {
        let mut region = padded.view_mut();
        for (i, &m) in y_modes.shape()[1..=bins.len()].iter().enumerate() {
            region.slice_axis_inplace(Axis(i + 1), Slice::from(0..m));
        }
        region.assign(y_modes);
    }
    padded
}

/// Per-mode channel contraction `y[:, k, :] = W[:, :, k] · x[:, k, :]`.
///
/// Real weights are promoted to the complex working type of the spectrum.
fn mix_modes<T: Real>(weight: &Array3<T>, x_modes: &Array3<Complex<T>>) -> Array3<Complex<T>> {
    let (out_channels, _, total_modes) = weight.dim();
    let batch = x_modes.dim().2;
    let mut y = Array3::zeros((out_channels, total_modes, batch));
    Zip::from(y.axis_iter_mut(Axis(1)))
        .and(x_modes.axis_iter(Axis(1)))
        .and(weight.axis_iter(Axis(2)))
        .par_for_each(|mut y_k, x_k, w_k| {
            let w_k = w_k.mapv(|v| Complex::new(v, T::zero()));
            y_k.assign(&w_k.dot(&x_k));
        });
    y
}

fn check_operands<T, Tr>(x: &ArrayD<T>, weight: &Array3<T>, transform: &Tr) -> OperatorResult<Vec<usize>>
where
    T: Real,
    Tr: SpectralTransform<T> + ?Sized,
{
    let rank = transform.ndims() + 2;
    if x.ndim() != rank {
        return Err(OperatorError::shape_mismatch(
            "operator_conv input rank",
            format!("{rank} (channels, spatial..., batch)"),
            format!("{} {:?}", x.ndim(), x.shape()),
        ));
    }
    let (_, in_channels, total_modes) = weight.dim();
    if total_modes != transform.total_modes() {
        return Err(OperatorError::shape_mismatch(
            "operator_conv weight modes",
            transform.total_modes().to_string(),
            total_modes.to_string(),
        ));
    }
    if x.shape()[0] != in_channels {
        return Err(OperatorError::shape_mismatch(
            "operator_conv input channels",
            in_channels.to_string(),
            x.shape()[0].to_string(),
        ));
    }
    transform.check_modes(spatial_extents(x.shape()))
}

fn flatten_modes<A: Clone>(
    truncated: &ArrayD<A>,
    channels: usize,
    total_modes: usize,
    batch: usize,
) -> OperatorResult<Array3<A>> {
    let shape = truncated.shape().to_vec();
    standard(truncated.view())
        .into_shape((channels, total_modes, batch))
        .map_err(|err| {
            OperatorError::shape_mismatch(
                "flattening retained modes",
                format!("({channels}, {total_modes}, {batch})"),
                format!("{shape:?}: {err}"),
            )
        })
}

fn unflatten_modes<A: Clone>(flat: Array3<A>, modes: &[usize]) -> OperatorResult<ArrayD<A>> {
    let (channels, total_modes, batch) = flat.dim();
    let mut shape = Vec::with_capacity(modes.len() + 2);
    shape.push(channels);
    shape.extend_from_slice(modes);
    shape.push(batch);
    standard(flat.into_dyn().view())
        .into_shape(IxDyn(&shape))
        .map_err(|err| {
            OperatorError::shape_mismatch(
                "unflattening retained modes",
                format!("{shape:?}"),
                format!("({channels}, {total_modes}, {batch}): {err}"),
            )
        })
}

fn standard<A: Clone>(view: ArrayViewD<'_, A>) -> ArrayD<A> {
    view.as_standard_layout().into_owned()
}
