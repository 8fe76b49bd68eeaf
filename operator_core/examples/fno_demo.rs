//! Fits a small Fourier Neural Operator to the 1-D heat semigroup
//! `u(·, 0) ↦ u(·, t)` with plain gradient descent.
//!
//! Run with: cargo run --example fno_demo [config/fno.toml]

use anyhow::{Context, Result};
use ndarray::{Array3, ArrayD, Axis};
use operator_core::{
    Checkpointable, ConfigError, FnoConfig, FnoParams, FourierTransform, Layer, Layout,
    ModelCheckpoint, PointwiseParams, SpectralTransform,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

const GRID: usize = 64;
const BATCH: usize = 16;
const DIFFUSION_TIME: f32 = 0.01;
const STEPS: usize = 200;
const LEARNING_RATE: f32 = 0.05;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/fno.toml".to_string());
    let config = load_config(&path)?;
    anyhow::ensure!(
        config.layout == Layout::ChannelFirst && config.in_channels == 1 && config.out_channels == 1,
        "the demo expects a channel-first 1 => 1 operator"
    );

    let model = config.build::<f32>().context("building the operator")?;
    let mut params = model.init_params(&mut config.rng());
    tracing::info!(parameters = model.parameter_count(), "model ready");
    println!("{model}");

    let mut rng = StdRng::seed_from_u64(config.seed ^ 0xC0FF_EE00);
    let mut loss = f32::NAN;
    for step in 0..STEPS {
        let (x, target) = heat_batch(&mut rng)?;
        let y = model.apply(&x, &params)?;
        let residual = &y - &target;
        loss = residual.mapv(|r| r * r).mean().unwrap_or(0.0);

        let grad_output = residual * (2.0 / y.len() as f32);
        let (_, grads) = model.backward(&x, &params, &grad_output)?;
        sgd_step(&mut params, &grads, LEARNING_RATE);

        if step % 20 == 0 {
            tracing::info!(step, loss, "training");
        }
    }

    let checkpoint_path = "out/fno_demo.ckpt";
    ModelCheckpoint::new(config.clone(), params)
        .save_checkpoint(checkpoint_path)
        .context("saving checkpoint")?;

    let summary = json!({
        "steps": STEPS,
        "final_loss": loss,
        "modes": config.modes,
        "hidden_channels": config.hidden_channels,
        "checkpoint": checkpoint_path,
    });
    println!("{summary}");
    Ok(())
}

fn load_config(path: &str) -> Result<FnoConfig> {
    match FnoConfig::load_from_file(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::Io(err)) => {
            tracing::warn!("falling back to default config: {err}");
            Ok(FnoConfig {
                hidden_channels: 16,
                projection_channels: 32,
                modes: vec![12],
                num_layers: 2,
                ..FnoConfig::default()
            })
        }
        Err(err) => Err(err).with_context(|| format!("loading {path}")),
    }
}

/// Random band-limited initial conditions and their exact heat-equation
/// evolution, both shaped `(1, GRID, BATCH)`.
fn heat_batch(rng: &mut StdRng) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
    let mut initial = Array3::<f32>::zeros((1, GRID, BATCH));
    for mut column in initial.axis_iter_mut(Axis(2)) {
        for k in 1..=4 {
            let amplitude: f32 = rng.gen_range(-1.0..1.0) / k as f32;
            let phase: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
            for (i, value) in column.iter_mut().enumerate() {
                let theta = std::f32::consts::TAU * (k * i) as f32 / GRID as f32;
                *value += amplitude * (theta + phase).sin();
            }
        }
    }
    let initial = initial.into_dyn();

    let transform = FourierTransform::<f32>::new(&[1])?;
    let mut spectrum = transform.forward(&initial)?;
    for (k, mut bin) in spectrum.axis_iter_mut(Axis(1)).enumerate() {
        let wavenumber = std::f32::consts::TAU * k as f32;
        let decay = (-wavenumber * wavenumber * DIFFUSION_TIME).exp();
        bin.mapv_inplace(|c| c * decay);
    }
    let evolved = transform.inverse(&spectrum, &[GRID])?;
    Ok((initial, evolved))
}

fn sgd_step(params: &mut FnoParams<f32>, grads: &FnoParams<f32>, lr: f32) {
    let pointwise = |p: &mut PointwiseParams<f32>, g: &PointwiseParams<f32>| {
        p.weight.scaled_add(-lr, &g.weight);
        p.bias.scaled_add(-lr, &g.bias);
    };
    pointwise(&mut params.lifting, &grads.lifting);
    for (kernel, grad) in params.kernels.iter_mut().zip(&grads.kernels) {
        pointwise(&mut kernel.bypass, &grad.bypass);
        kernel.conv.weight.scaled_add(-lr, &grad.conv.weight);
    }
    pointwise(&mut params.projection, &grads.projection);
    pointwise(&mut params.output, &grads.output);
}
