//! Benchmark: quantized Conv2D operator end to end, CNN-feature-layer sized.

use std::time::Instant;

use kilo_core::{DType, QuantizationParams, Tensor};
use kilo_rt::{Conv2dInputs, Conv2dOperator, Conv2dOutputs, ExecutionContext, Operator, Padding};
use rand::Rng;

fn random_i8(n: usize, rng: &mut impl Rng) -> Vec<i8> {
    (0..n).map(|_| rng.gen_range(-128i32..=127) as i8).collect()
}

fn bench_case(
    name: &str,
    in_hw: usize,
    in_c: usize,
    out_c: usize,
    filter_hw: usize,
    iters: usize,
) {
    let mut rng = rand::thread_rng();

    let input = Tensor::from_i8(&random_i8(in_hw * in_hw * in_c, &mut rng), &[1, in_hw, in_hw, in_c])
        .unwrap()
        .with_quant(QuantizationParams::per_tensor(0.05, 0).unwrap());
    let scales: Vec<f32> = (0..out_c).map(|_| rng.gen_range(0.01f32..0.5)).collect();
    let filter = Tensor::from_i8(
        &random_i8(out_c * filter_hw * filter_hw * in_c, &mut rng),
        &[out_c, filter_hw, filter_hw, in_c],
    )
    .unwrap()
    .with_quant(QuantizationParams::per_channel(&scales, &vec![0; out_c]).unwrap());
    let bias = Tensor::from_i32(&vec![0; out_c], &[out_c]).unwrap();
    let mut output = Tensor::zeros(&[1, in_hw, in_hw, out_c], DType::I8)
        .unwrap()
        .with_quant(QuantizationParams::per_tensor(0.1, 0).unwrap());

    let mut ctx = ExecutionContext::with_pool_capacity(4096);
    let op = Operator::from(Conv2dOperator::new((1, 1), Padding::Same));

    let mut inputs = Conv2dInputs::new();
    inputs.bind(Conv2dOperator::INPUT, &input).unwrap();
    inputs.bind(Conv2dOperator::FILTER, &filter).unwrap();
    inputs.bind(Conv2dOperator::BIAS, &bias).unwrap();

    let start = Instant::now();
    for _ in 0..iters {
        let mut outputs = Conv2dOutputs::new();
        outputs.bind(Conv2dOperator::OUTPUT, &mut output).unwrap();
        op.compute(&mut ctx, &inputs, &mut outputs).unwrap();
    }
    let secs = start.elapsed().as_secs_f64() / iters as f64;

    let macs = (in_hw * in_hw * out_c * filter_hw * filter_hw * in_c) as f64;
    println!(
        "{name}: {:.3} ms/iter, {:.1} MMAC/s",
        secs * 1e3,
        macs / secs / 1e6
    );
}

fn main() {
    println!("=== kilo Conv2D benchmark ===");
    bench_case("28x28x8 -> 16, 3x3", 28, 8, 16, 3, 50);
    bench_case("32x32x16 -> 32, 3x3", 32, 16, 32, 3, 20);
    bench_case("14x14x32 -> 64, 1x1", 14, 32, 64, 1, 100);
}
