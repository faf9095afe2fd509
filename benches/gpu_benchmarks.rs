// benches/gpu_benchmarks.rs - GPU vs host SFEGO.
//
//   cargo bench --bench gpu_benchmarks
//
// Each group runs the same image and radius on both kernels. Wall time
// includes uploads, both submissions, the barrier poll and the readback,
// which is what a caller of `SfegoPipeline::compute` pays.
//
// The first iterations pay shader compilation on some drivers, so warmup is
// set explicitly.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use sfego::gpu::{GpuDevice, GpuKernel};
use sfego::{BlockSize, Image, SfegoConfig, SfegoPipeline};

fn make_scene(w: usize, h: usize) -> Image<u8> {
    let mut img = Image::new(w, h);
    for y in 0..h {
        for x in 0..w {
            img.set(x, y, ((x * 200 / w) + (y * 55 / h)) as u8);
        }
    }
    img
}

fn bench_gpu_vs_cpu(c: &mut Criterion) {
    let gpu = match GpuDevice::new() {
        Ok(gpu) => gpu,
        Err(e) => {
            eprintln!("no GPU available ({e}), skipping GPU benchmarks");
            return;
        }
    };
    let kernel = GpuKernel::new(gpu, BlockSize::default()).expect("kernel init");
    let gpu_pipeline = SfegoPipeline::new(kernel, SfegoConfig::default()).expect("gpu pipeline");
    let cpu_pipeline = SfegoPipeline::cpu();

    for (w, h) in [(640usize, 480usize), (1920, 1080)] {
        let img = make_scene(w, h);
        let mut group = c.benchmark_group(format!("sfego_{w}x{h}"));
        group.warm_up_time(Duration::from_secs(2));
        group.sample_size(10);
        for r in [2u32, 8] {
            group.bench_with_input(BenchmarkId::new("gpu", r), &r, |b, &r| {
                b.iter(|| gpu_pipeline.compute(&img, r).unwrap())
            });
            group.bench_with_input(BenchmarkId::new("cpu", r), &r, |b, &r| {
                b.iter(|| cpu_pipeline.compute(&img, r).unwrap())
            });
        }
        group.finish();
    }
}

criterion_group!(benches, bench_gpu_vs_cpu);
criterion_main!(benches);
