//! Criterion benchmarks comparing the host loop with the offload pipeline.
//!
//! Run with `cargo bench`. Each device iteration is a complete trial:
//! select a device, build the context, upload, dispatch, download and
//! tear down, so the numbers include all setup and transfer overhead.
//! The emulated device gets a fresh backend per iteration so its event log
//! stays small. The wgpu group is skipped on machines without a GPU
//! adapter.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;

use vadd_offload::bench::fill_random;
use vadd_offload::kernel::host_vadd;
use vadd_offload::{
    run_vadd, select_device, DeviceClass, EmulatedBackend, WgpuBackend, VADD_SOURCE,
};

const LENGTHS: [usize; 3] = [1_000, 100_000, 1_000_000];

fn inputs(n: usize) -> (Vec<f32>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(0);
    let mut a = vec![0.0f32; n];
    let mut b = vec![0.0f32; n];
    fill_random(&mut rng, &mut a);
    fill_random(&mut rng, &mut b);
    (a, b)
}

fn vector_add_benchmark(c: &mut Criterion) {
    let wgpu = WgpuBackend::new();
    let has_gpu = select_device(&wgpu, DeviceClass::Gpu).is_ok();

    let mut group = c.benchmark_group("vector add");
    for n in LENGTHS {
        let (a, b) = inputs(n);
        let mut out = vec![0.0f32; n];
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("host", n), &n, |bencher, &n| {
            bencher.iter(|| host_vadd(&a, &b, &mut out, n, n));
        });
        group.bench_with_input(BenchmarkId::new("emulated", n), &n, |bencher, _| {
            bencher.iter_batched_ref(
                EmulatedBackend::new,
                |emulated| {
                    run_vadd(&*emulated, DeviceClass::Cpu, VADD_SOURCE, &a, &b, &mut out)
                        .expect("emulated trial failed")
                },
                BatchSize::SmallInput,
            );
        });
        if has_gpu {
            group.bench_with_input(BenchmarkId::new("wgpu", n), &n, |bencher, _| {
                bencher.iter(|| {
                    run_vadd(&wgpu, DeviceClass::Gpu, VADD_SOURCE, &a, &b, &mut out)
                        .expect("gpu trial failed")
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, vector_add_benchmark);
criterion_main!(benches);
