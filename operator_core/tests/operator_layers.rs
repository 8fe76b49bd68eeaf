use ndarray::{ArrayD, IxDyn};
use operator_core::{
    Activation, BypassKind, FourierTransform, Layer, Layout, OperatorConv, OperatorConvConfig,
    OperatorError, OperatorKernel, OperatorKernelConfig, SpectralConv, SpectralKernel,
    WeightInit,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn field(shape: &[usize], seed: u64) -> ArrayD<f64> {
    let total: usize = shape.iter().product();
    let data = (0..total)
        .map(|i| ((i as f64 + seed as f64) * 0.731).sin() * 0.5 + ((i % 3) as f64) * 0.1)
        .collect();
    ArrayD::from_shape_vec(IxDyn(shape), data).expect("shape matches")
}

fn max_abs_diff(a: &ArrayD<f64>, b: &ArrayD<f64>) -> f64 {
    assert_eq!(a.shape(), b.shape());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[test]
fn spectral_conv_maps_two_to_five_channels() {
    let conv = SpectralConv::spectral((2, 5), &[16]).unwrap();
    assert_eq!(conv.parameter_count(), 160);

    let params = conv.init_params(&mut StdRng::seed_from_u64(42));
    let x = field(&[2, 32, 4], 1).mapv(|v| v as f32);
    let (y, _) = conv.forward(&x, &params, conv.init_state()).unwrap();
    assert_eq!(y.shape(), &[5, 32, 4]);
    assert!(y.iter().all(|v| v.is_finite()));
}

#[test]
fn spectral_kernel_is_activation_of_summed_paths() {
    let kernel = SpectralKernel::spectral((2, 5), &[16], Activation::Gelu).unwrap();
    assert_eq!(kernel.bypass_kind(), BypassKind::UnitConv);
    let params = kernel.init_params(&mut StdRng::seed_from_u64(42));
    let x = field(&[2, 32, 4], 2).mapv(|v| v as f32);

    let y = kernel.apply(&x, &params).unwrap();
    assert_eq!(y.shape(), &[5, 32, 4]);

    let summed = kernel.bypass().apply(&x, &params.bypass).unwrap()
        + kernel.conv().apply(&x, &params.conv).unwrap();
    let expected = kernel.activation().apply_array(&summed);
    for (a, b) in y.iter().zip(expected.iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn parameter_count_is_modes_times_channels() {
    for (channels, modes) in [
        ((1, 1), vec![1]),
        ((2, 5), vec![16]),
        ((3, 4), vec![6, 5]),
        ((2, 2), vec![3, 2, 4]),
    ] {
        let conv = OperatorConv::<f64>::fourier(channels, &modes, OperatorConvConfig::default())
            .unwrap();
        let k: usize = modes.iter().product();
        assert_eq!(conv.parameter_count(), k * channels.0 * channels.1);
    }
}

#[test]
fn channel_last_layers_match_channel_first_after_permutation() {
    let first_config = OperatorKernelConfig::default();
    let last_config = OperatorKernelConfig {
        layout: Layout::ChannelLast,
        ..OperatorKernelConfig::default()
    };
    let first = OperatorKernel::<f64>::fourier((3, 2), &[4, 3], Activation::Tanh, first_config).unwrap();
    let last = OperatorKernel::<f64>::fourier((3, 2), &[4, 3], Activation::Tanh, last_config).unwrap();
    assert_eq!(last.bypass_kind(), BypassKind::Dense);

    let params = first.init_params(&mut StdRng::seed_from_u64(9));
    let x = field(&[3, 10, 7, 2], 3);
    let y_first = first.apply(&x, &params).unwrap();

    let x_last = Layout::ChannelLast.from_canonical(&x).unwrap();
    let y_last = last.apply(&x_last, &params).unwrap();
    let y_back = Layout::ChannelLast.to_canonical(&y_last).unwrap();
    assert!(max_abs_diff(&y_first, &y_back) < 1e-12);
}

#[test]
fn three_dimensional_inputs_are_supported() {
    let conv = OperatorConv::<f64>::fourier((2, 3), &[3, 2, 2], OperatorConvConfig::default()).unwrap();
    let params = conv.init_params(&mut StdRng::seed_from_u64(5));
    let y = conv.apply(&field(&[2, 6, 5, 4, 2], 4), &params).unwrap();
    assert_eq!(y.shape(), &[3, 6, 5, 4, 2]);
}

#[test]
fn mode_truncation_boundary() {
    let conv = OperatorConv::<f64>::fourier((1, 1), &[8, 5], OperatorConvConfig::default()).unwrap();
    let params = conv.init_params(&mut StdRng::seed_from_u64(0));

    // Leading axes keep all s bins; the last axis keeps s/2 + 1.
    assert!(conv.apply(&field(&[1, 8, 8, 1], 0), &params).is_ok());
    assert_eq!(
        conv.apply(&field(&[1, 7, 8, 1], 0), &params),
        Err(OperatorError::mode_truncation(0, 8, 7))
    );
    assert_eq!(
        conv.apply(&field(&[1, 8, 7, 1], 0), &params),
        Err(OperatorError::mode_truncation(1, 5, 4))
    );
}

#[test]
fn zero_weights_give_zero_output() {
    let config = OperatorConvConfig {
        init: WeightInit::Zeros,
        layout: Layout::ChannelLast,
        name: Some("Zeroed".to_string()),
    };
    let conv = OperatorConv::<f64>::fourier((2, 2), &[5], config).unwrap();
    let params = conv.init_params(&mut StdRng::seed_from_u64(0));
    let y = conv.apply(&field(&[12, 2, 3], 6), &params).unwrap();
    assert!(y.iter().all(|v| v.abs() < 1e-14));
    assert!(conv.to_string().starts_with("Zeroed(2 => 2"));
}

#[test]
fn full_modes_with_identity_weights_reproduce_input() {
    // Keeping every bin of a 1-D signal and mixing with the identity is a
    // forward/inverse round trip.
    let conv = OperatorConv::<f64>::fourier((2, 2), &[9], OperatorConvConfig::default()).unwrap();
    let mut params = conv.init_params(&mut StdRng::seed_from_u64(0));
    params.weight.fill(0.0);
    for c in 0..2 {
        for k in 0..9 {
            params.weight[[c, c, k]] = 1.0;
        }
    }
    let x = field(&[2, 16, 3], 7);
    let y = conv.apply(&x, &params).unwrap();
    assert!(max_abs_diff(&x, &y) < 1e-12);
}

#[test]
fn generic_transform_constructor_checks_modes() {
    let transform = FourierTransform::<f64>::new(&[4, 4]).unwrap();
    let result = OperatorConv::new((1, 1), &[4, 3], transform, OperatorConvConfig::default());
    assert!(matches!(result, Err(OperatorError::InvalidConfiguration { .. })));
}
