//! Binarize a small transformer and train one replaced layer for a few steps.
//!
//! Run with: `cargo run --example surgery`

use binarize_linear::{
    binarizer, BlockStack, GradRequest, GroupKind, ModuleGroup, SubLayer, TemperatureSchedule,
    TransformerBlock, TransformerModel,
};
use candle_core::{DType, Device, Tensor};
use candle_nn::Linear;
use tracing_subscriber::EnvFilter;

fn dense(
    in_features: usize,
    out_features: usize,
    device: &Device,
) -> candle_core::Result<SubLayer> {
    let weight = Tensor::randn(0.0f32, 0.02, (out_features, in_features), device)?;
    let bias = Tensor::zeros(out_features, DType::F32, device)?;
    Ok(SubLayer::Linear(Linear::new(weight, Some(bias))))
}

fn build_model(
    hidden: usize,
    blocks: usize,
    device: &Device,
) -> candle_core::Result<TransformerModel> {
    let mut model = TransformerModel::default();
    for _ in 0..blocks {
        let attn = ModuleGroup::new()
            .with_layer("c_attn_q", dense(hidden, hidden, device)?)
            .with_layer("c_attn_k", dense(hidden, hidden, device)?)
            .with_layer("c_attn_v", dense(hidden, hidden, device)?)
            .with_layer("c_proj", dense(hidden, hidden, device)?);
        let mlp = ModuleGroup::new()
            .with_layer("c_fc", dense(hidden, 4 * hidden, device)?)
            .with_layer("c_proj", dense(4 * hidden, hidden, device)?);
        model.push_block(TransformerBlock::new(mlp, attn));
    }
    Ok(model)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    println!("=== binarize-linear Surgery Example ===\n");

    let device = Device::Cpu;
    let hidden = 64;

    println!("1. Building model");
    let mut model = build_model(hidden, 2, &device)?;
    println!("   Blocks: {}", model.num_blocks());

    println!("\n2. Binarizing with IR layers (value projection kept dense)");
    binarizer(&mut model, "ir", true, false, false)?;
    for (index, block) in model.blocks().iter().enumerate() {
        for group in GroupKind::ALL {
            for (name, layer) in block.group(group).iter() {
                println!("   h.{index}.{group}.{name}: {:?}", layer.kind());
            }
        }
    }

    println!("\n3. Training h.0.mlp.c_fc");
    let layer = model.blocks_mut()[0]
        .group_mut(GroupKind::Mlp)
        .get_mut("c_fc")
        .and_then(SubLayer::as_ir_mut)
        .ok_or("h.0.mlp.c_fc was not binarized")?;

    let schedule = TemperatureSchedule::default();
    let input = Tensor::randn(0.0f32, 1.0, (8, hidden), &device)?;
    let target = Tensor::randn(0.0f32, 1.0, (8, 4 * hidden), &device)?;
    let steps = 10;
    let lr = 0.05;

    for step in 0..=steps {
        let t = schedule.temperature(step, steps);
        layer.set_temperature(t);

        let output = layer.forward(&input)?;
        let diff = (&output - &target)?;
        let loss = diff.sqr()?.mean_all()?.to_scalar::<f32>()?;
        println!("   step {step:2}: t = {t:6.3}, mse = {loss:.4}");

        // d(mean((y - target)^2)) / dy
        let scale = 2.0 / diff.elem_count() as f64;
        let grads = layer.backward(&diff.affine(scale, 0.0)?, GradRequest::all())?;

        if let (Some(grad_w), Some(grad_b)) = (grads.weight, grads.bias) {
            let weight = (layer.weight() - grad_w.affine(lr, 0.0)?)?;
            layer.set_weight(weight)?;
            if let Some(bias) = layer.bias() {
                let bias = (bias - grad_b.affine(lr, 0.0)?)?;
                layer.set_bias(bias)?;
            }
        }
    }

    println!("\n   {layer}");
    println!("\nDone!");
    Ok(())
}
