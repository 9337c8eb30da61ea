//! ECS microbenchmarks using Criterion.
//!
//! Each group measures one operation in isolation:
//! - spawning entities
//! - iterating chunks through a system, in one or many archetypes
//! - staged add/remove migrations and the sync point applying them
//! - destroying entities
//! - building dependency plans

use std::hint::black_box;

use bucket_bench::components::*;
use bucket_ecs::{
    core::Config,
    ecs::{
        ChunkSystem, ChunkView, Commands, EntityAddress, Filter, Scope, Systems, World, filter,
        system::Plan,
    },
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

fn new_world() -> World {
    match World::new(Config::default()) {
        Ok(world) => world,
        Err(error) => panic!("invalid benchmark config: {error}"),
    }
}

fn spawn_movers(world: &mut World, count: usize) -> Vec<EntityAddress> {
    (0..count)
        .map(|i| {
            let position = Position {
                x: i as f32,
                ..Default::default()
            };
            let velocity = Velocity {
                x: 1.0,
                ..Default::default()
            };
            world.spawn((position, velocity)).unwrap().1
        })
        .collect()
}

// =============================================================================
// Spawn Benchmarks
// =============================================================================

fn bench_spawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");

    for count in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("single_component", count), &count, |b, &n| {
            b.iter(|| {
                let mut world = new_world();
                for _ in 0..n {
                    black_box(world.spawn(Position::default()).unwrap());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("four_components", count), &count, |b, &n| {
            b.iter(|| {
                let mut world = new_world();
                for _ in 0..n {
                    black_box(
                        world
                            .spawn((
                                Transform::default(),
                                Position::default(),
                                Rotation::default(),
                                Velocity::default(),
                            ))
                            .unwrap(),
                    );
                }
            });
        });
    }

    group.finish();
}

// =============================================================================
// Iteration Benchmarks
// =============================================================================

struct Movement;

impl ChunkSystem for Movement {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Velocity>().read_write::<Position>();
    }

    fn run(&self, _: f64, chunk: &mut ChunkView<'_>, _: &Commands) {
        for slot in 0..chunk.len() {
            let velocity = chunk.read::<Velocity>(slot);
            let position = chunk.get_mut::<Position>(slot);
            position.x += velocity.x;
            position.y += velocity.y;
            position.z += velocity.z;
        }
    }
}

struct Scale;

impl ChunkSystem for Scale {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_write::<Data>();
    }

    fn run(&self, _: f64, chunk: &mut ChunkView<'_>, _: &Commands) {
        for slot in 0..chunk.len() {
            chunk.get_mut::<Data>(slot).value *= 2.0;
        }
    }
}

fn bench_chunk_iter(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_iter");

    for count in [1_000, 10_000, 100_000] {
        group.throughput(Throughput::Elements(count as u64));

        for scope in [Scope::MainThread, Scope::Parallel] {
            let name = format!("pos_vel_{scope:?}").to_lowercase();
            group.bench_with_input(BenchmarkId::new(name, count), &count, |b, &n| {
                let mut world = new_world();
                spawn_movers(&mut world, n);
                let mut systems = Systems::new(world.config());
                systems.on_update().scope(scope, |group| {
                    group.add_chunk_system(Movement);
                });
                systems.init(&mut world).unwrap();

                b.iter(|| systems.update(&mut world, 1.0 / 60.0));
            });
        }
    }

    group.finish();
}

fn bench_fragmented_iter(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmented_iter");

    // 20 entities in each of 8 archetypes, like ecs_bench_suite's frag_iter.
    group.bench_function("8_archetypes", |b| {
        let mut world = new_world();
        for i in 0..20 {
            let data = Data { value: i as f64 };
            world.spawn((data, MarkerA)).unwrap();
            world.spawn((data, MarkerB)).unwrap();
            world.spawn((data, MarkerC)).unwrap();
            world.spawn((data, MarkerD)).unwrap();
            world.spawn((data, MarkerE)).unwrap();
            world.spawn((data, MarkerF)).unwrap();
            world.spawn((data, MarkerG)).unwrap();
            world.spawn((data, MarkerH)).unwrap();
        }
        let mut systems = Systems::new(world.config());
        systems.on_update().scope(Scope::Parallel, |group| {
            group.add_chunk_system(Scale);
        });
        systems.init(&mut world).unwrap();

        b.iter(|| systems.update(&mut world, 1.0 / 60.0));
    });

    group.bench_function("query_8_archetypes", |b| {
        let mut world = new_world();
        for i in 0..20 {
            let data = Data { value: i as f64 };
            world.spawn((data, MarkerA)).unwrap();
            world.spawn((data, MarkerB, MarkerC)).unwrap();
            world.spawn((data, MarkerD, MarkerE, MarkerF)).unwrap();
            world.spawn((data, MarkerG, MarkerH)).unwrap();
        }
        let filter = world.filter().read_only::<Data>().build().unwrap();

        b.iter(|| {
            let total: f64 = world
                .query(&filter)
                .filter_map(|address| world.get::<Data>(address))
                .map(|data| data.value)
                .sum();
            black_box(total)
        });
    });

    group.finish();
}

// =============================================================================
// Migration Benchmarks
// =============================================================================

fn bench_add_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("migrate");

    for count in [1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("add_then_remove", count), &count, |b, &n| {
            let mut world = new_world();
            spawn_movers(&mut world, n);
            let with_velocity = world.filter().with::<Velocity>().without::<Health>().build().unwrap();
            let with_health = world.filter().with::<Health>().build().unwrap();

            b.iter(|| {
                let addresses: Vec<_> = world.query(&with_velocity).collect();
                for address in addresses {
                    world.add_component(address, Health::default()).unwrap();
                }
                world.run_sync_point();

                let addresses: Vec<_> = world.query(&with_health).collect();
                for address in addresses {
                    world.remove_component::<Health>(address).unwrap();
                }
                world.run_sync_point();
            });
        });
    }

    group.finish();
}

fn bench_destroy(c: &mut Criterion) {
    let mut group = c.benchmark_group("destroy");

    for count in [1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("every_other", count), &count, |b, &n| {
            b.iter_batched(
                || {
                    let mut world = new_world();
                    let addresses = spawn_movers(&mut world, n);
                    (world, addresses)
                },
                |(mut world, addresses)| {
                    for address in addresses.iter().step_by(2) {
                        world.destroy(*address);
                    }
                    world.run_sync_point();
                    black_box(world.entity_count())
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

// =============================================================================
// Dependency Plan Benchmarks
// =============================================================================

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    let world = new_world();

    let mut filters: Vec<Filter> = Vec::new();
    for _ in 0..16 {
        filters.push(world.filter().read_only::<Velocity>().read_write::<Position>().build().unwrap());
        filters.push(world.filter().read_only::<Position>().read_write::<Transform>().build().unwrap());
        filters.push(world.filter().read_write::<Health>().build().unwrap());
        filters.push(world.filter().read_only::<Data>().read_only::<Color>().build().unwrap());
    }

    for count in [8, 32, 64] {
        let subset: Vec<&Filter> = filters.iter().take(count).collect();
        group.bench_with_input(BenchmarkId::new("build", count), &subset, |b, subset| {
            b.iter(|| black_box(Plan::build(subset)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_spawn,
    bench_chunk_iter,
    bench_fragmented_iter,
    bench_add_remove,
    bench_destroy,
    bench_plan,
);

criterion_main!(benches);
