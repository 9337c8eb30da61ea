//! Scenario benchmarks: whole frames of game-like workloads.

use std::time::{Duration, Instant};

use bucket_bench::scenarios::{ParticleConfig, ParticleScenario, PhysicsConfig, PhysicsScenario, Scenario};
use bucket_ecs::ecs::Scope;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

// =============================================================================
// Particle Benchmarks
// =============================================================================

fn bench_particles(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenario/particles");

    for count in [10_000, 50_000, 100_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("frame", count), &count, |b, &n| {
            let mut scenario = ParticleScenario::with_config(ParticleConfig {
                particle_count: n,
                ..Default::default()
            });
            scenario.setup();

            b.iter(|| scenario.update());
        });
    }

    group.finish();
}

// =============================================================================
// Physics Benchmarks
// =============================================================================

fn bench_physics(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenario/physics");

    for count in [10_000, 50_000] {
        group.throughput(Throughput::Elements(count as u64));

        for scope in [Scope::Parallel, Scope::DependencyGraph] {
            let name = format!("step_{scope:?}").to_lowercase();
            group.bench_with_input(BenchmarkId::new(name, count), &count, |b, &n| {
                let mut scenario = PhysicsScenario::with_config(PhysicsConfig {
                    body_count: n,
                    scope,
                    ..Default::default()
                });
                scenario.setup();

                b.iter(|| scenario.update());
            });
        }
    }

    group.finish();
}

// =============================================================================
// Frame Time Benchmarks
// =============================================================================

fn run_frames(scenario: &mut impl Scenario, frames: usize) -> Duration {
    let start = Instant::now();
    for _ in 0..frames {
        scenario.update();
    }
    start.elapsed()
}

fn bench_frame_times(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_times");
    group.sample_size(20);

    group.bench_function("particles_1000_frames", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let mut scenario = ParticleScenario::with_config(ParticleConfig {
                    particle_count: 50_000,
                    ..Default::default()
                });
                scenario.setup();
                total += run_frames(&mut scenario, 1000);
            }
            total
        });
    });

    group.bench_function("physics_1000_frames", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let mut scenario = PhysicsScenario::with_config(PhysicsConfig {
                    body_count: 25_000,
                    ..Default::default()
                });
                scenario.setup();
                total += run_frames(&mut scenario, 1000);
            }
            total
        });
    });

    group.finish();
}

criterion_group!(benches, bench_particles, bench_physics, bench_frame_times);

criterion_main!(benches);
