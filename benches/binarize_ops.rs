//! Benchmarks for binarized layer operations.

use binarize_linear::{BinarizedLinear, GradRequest, IrLinear};
use candle_core::Device;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const SHAPES: [(usize, usize); 3] = [(64, 128), (256, 512), (1024, 4096)];

fn bench_sign_forward_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("sign_linear");
    let device = Device::Cpu;

    for (out_features, in_features) in SHAPES {
        let mut layer = BinarizedLinear::new(in_features, out_features, true, &device).unwrap();
        let input = candle_core::Tensor::randn(0.0f32, 1.0, (4, in_features), &device).unwrap();
        let grad = candle_core::Tensor::ones(
            (4, out_features),
            candle_core::DType::F32,
            &device,
        )
        .unwrap();

        let label = format!("{out_features}x{in_features}");
        group.bench_with_input(BenchmarkId::new("forward", &label), &(), |bench, ()| {
            bench.iter(|| black_box(layer.infer(&input).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("forward_backward", &label), &(), |bench, ()| {
            bench.iter(|| {
                layer.forward(&input).unwrap();
                black_box(layer.backward(&grad, GradRequest::all()).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_ir_forward_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("ir_linear");
    let device = Device::Cpu;

    for (out_features, in_features) in SHAPES {
        let mut layer = IrLinear::new(in_features, out_features, true, &device).unwrap();
        layer.set_temperature(1.0);
        let input = candle_core::Tensor::randn(0.0f32, 1.0, (4, in_features), &device).unwrap();
        let grad = candle_core::Tensor::ones(
            (4, out_features),
            candle_core::DType::F32,
            &device,
        )
        .unwrap();

        let label = format!("{out_features}x{in_features}");
        group.bench_with_input(BenchmarkId::new("forward", &label), &(), |bench, ()| {
            bench.iter(|| black_box(layer.infer(&input).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("forward_backward", &label), &(), |bench, ()| {
            bench.iter(|| {
                layer.forward(&input).unwrap();
                black_box(layer.backward(&grad, GradRequest::all()).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sign_forward_backward, bench_ir_forward_backward);
criterion_main!(benches);
