use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use bucket_ecs::{
    core::Config,
    ecs::{
        ChunkSystem, ChunkView, Commands, Component, ForEachSystem, Group, Scope, System, Systems,
        World, command, filter,
        system::{Condition, Plan},
    },
};

#[derive(Component, Clone, Copy, Debug, PartialEq)]
struct Position(f32);

#[derive(Component, Clone, Copy, Debug, PartialEq)]
struct Velocity(f32);

#[derive(Component, Clone, Copy, Debug, PartialEq)]
struct Health(u32);

fn world() -> World {
    World::new(Config {
        chunk_entities_count: 2,
        worker_threads: 4,
        ..Config::default()
    })
    .unwrap()
}

/// Tracks how many chunk tasks of a set of systems run at the same time.
struct Overlap {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Overlap {
    const fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(5));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

static WRITERS: Overlap = Overlap::new();

struct WritePosition;

impl ChunkSystem for WritePosition {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_write::<Position>();
    }

    fn run(&self, _: f64, _: &mut ChunkView<'_>, _: &Commands) {
        WRITERS.enter();
    }
}

struct AlsoWritePosition;

impl ChunkSystem for AlsoWritePosition {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Velocity>().read_write::<Position>();
    }

    fn run(&self, _: f64, _: &mut ChunkView<'_>, _: &Commands) {
        WRITERS.enter();
    }
}

#[test]
fn conflicting_writers_never_overlap() {
    // Given - one entity per chunk so each system gets a single task
    let mut world = world();
    world.spawn((Position(0.0), Velocity(1.0))).unwrap();

    let mut systems = Systems::new(world.config());
    systems.on_update().scope(Scope::DependencyGraph, |group| {
        group.add_chunk_system(WritePosition).add_chunk_system(AlsoWritePosition);
    });
    systems.init(&mut world).unwrap();

    // When
    for _ in 0..5 {
        systems.update(&mut world, 0.1);
    }

    // Then
    assert_eq!(WRITERS.peak(), 1);
}

#[test]
fn conflicting_writers_get_separate_steps() {
    // Given
    let world = world();
    let writer = world.filter().read_write::<Position>().build().unwrap();
    let reader = world.filter().read_only::<Position>().read_only::<Velocity>().build().unwrap();
    let other = world.filter().read_write::<Health>().build().unwrap();

    // When
    let plan = Plan::build(&[&writer, &reader, &other, &writer]);

    // Then
    assert_eq!(plan.steps().collect::<Vec<_>>(), vec![vec![0, 2], vec![1], vec![3]]);
}

struct Damage {
    amount: u32,
}

impl ForEachSystem for Damage {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_write::<Health>();
    }

    fn run(&self, _: f64, chunk: &mut ChunkView<'_>, slot: usize, commands: &Commands) {
        let amount = chunk.context::<u32>().copied().unwrap_or(self.amount);
        let health = chunk.get_mut::<Health>(slot);
        health.0 = health.0.saturating_sub(amount);
        if health.0 == 0 {
            commands.destroy(chunk.address(slot));
        }
    }
}

#[test]
fn for_each_system_destroys_through_commands() {
    // Given
    let mut world = world();
    for health in [1, 5, 2, 9] {
        world.spawn(Health(health)).unwrap();
    }
    world.set_context::<Damage, u32>(2).unwrap();

    let mut systems = Systems::new(world.config());
    systems.on_update().scope(Scope::Parallel, |group| {
        group.add_for_each_system(Damage { amount: 100 });
    });
    systems.init(&mut world).unwrap();

    // When
    systems.update(&mut world, 0.1);

    // Then
    let filter = world.filter().read_only::<Health>().build().unwrap();
    let mut remaining: Vec<u32> = world
        .query(&filter)
        .map(|address| world.get::<Health>(address).unwrap().0)
        .collect();
    remaining.sort();
    assert_eq!(remaining, vec![3, 7]);
}

/// Drops every chunk holding a dead entity.
struct Cull;

impl ChunkSystem for Cull {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Health>();
    }

    fn run(&self, _: f64, chunk: &mut ChunkView<'_>, commands: &Commands) {
        if (0..chunk.len()).any(|slot| chunk.read::<Health>(slot).0 == 0) {
            commands.destroy_all(chunk.archetype(), chunk.chunk_index());
        }
    }
}

#[test]
fn chunk_systems_destroy_whole_chunks() {
    // Given - two entities per chunk
    let mut world = world();
    for health in [0, 1, 2, 3, 4, 0] {
        world.spawn(Health(health)).unwrap();
    }

    let mut systems = Systems::new(world.config());
    systems.on_update().scope(Scope::Parallel, |group| {
        group.add_chunk_system(Cull);
    });
    systems.init(&mut world).unwrap();

    // When
    systems.update(&mut world, 0.1);

    // Then
    let filter = world.filter().read_only::<Health>().build().unwrap();
    let mut remaining: Vec<u32> = world
        .query(&filter)
        .map(|address| world.get::<Health>(address).unwrap().0)
        .collect();
    remaining.sort();
    assert_eq!(remaining, vec![2, 3]);
}

struct Spawner;

impl ChunkSystem for Spawner {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Velocity>();
    }

    fn run(&self, _: f64, chunk: &mut ChunkView<'_>, commands: &Commands) {
        for slot in 0..chunk.len() {
            let velocity = chunk.read::<Velocity>(slot);
            commands.create(Position(velocity.0));
        }
    }
}

#[test]
fn create_command_spawns_after_the_step() {
    // Given
    let mut world = world();
    for i in 0..3 {
        world.spawn(Velocity(i as f32)).unwrap();
    }

    let mut systems = Systems::new(world.config());
    systems.on_update().scope(Scope::DependencyGraph, |group| {
        group.add_chunk_system(Spawner);
    });
    systems.init(&mut world).unwrap();

    // When
    systems.update(&mut world, 0.1);

    // Then
    assert_eq!(world.entity_count(), 6);
    assert_eq!(world.commands().pending(), 0);
}

struct Report {
    command: command::Id,
}

impl ChunkSystem for Report {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Health>();
    }

    fn run(&self, _: f64, chunk: &mut ChunkView<'_>, commands: &Commands) {
        for slot in 0..chunk.len() {
            let health = chunk.read::<Health>(slot);
            commands.schedule(self.command, Some(chunk.address(slot)), Some(Box::new(health.0)));
        }
    }
}

#[test]
fn custom_commands_run_on_the_main_thread() {
    // Given
    static SEEN: Mutex<Vec<u32>> = Mutex::new(Vec::new());
    let mut world = world();
    for health in [4, 8] {
        world.spawn(Health(health)).unwrap();
    }
    let id = world.register_command(|world, call| {
        let value = call.payload.and_then(|payload| payload.downcast::<u32>().ok());
        if let (Some(value), Some(address)) = (value, call.address) {
            world.set(address, Health(*value * 10));
            SEEN.lock().unwrap().push(*value);
        }
    });

    let mut systems = Systems::new(world.config());
    systems.on_update().scope(Scope::Parallel, |group| {
        group.add_chunk_system(Report { command: id });
    });
    systems.init(&mut world).unwrap();

    // When
    systems.update(&mut world, 0.1);

    // Then
    let mut seen = SEEN.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![4, 8]);
    let filter = world.filter().read_only::<Health>().build().unwrap();
    let mut values: Vec<u32> = world
        .query(&filter)
        .map(|address| world.get::<Health>(address).unwrap().0)
        .collect();
    values.sort();
    assert_eq!(values, vec![40, 80]);
}

struct Counter {
    runs: usize,
    condition: Condition,
}

impl System for Counter {
    fn run(&mut self, world: &mut World, _: f64) {
        self.runs += 1;
        world.spawn(Health(self.runs as u32)).unwrap();
    }

    fn condition(&self) -> Condition {
        self.condition
    }
}

#[test]
fn conditions_gate_main_thread_systems() {
    // Given
    let mut world = world();
    let mut systems = Systems::new(world.config());
    systems
        .on_update()
        .add_system(Counter {
            runs: 0,
            condition: Condition::EveryFrames(2),
        })
        .add_system(Counter {
            runs: 0,
            condition: Condition::EveryInterval(0.25),
        });
    systems.init(&mut world).unwrap();

    // When - six frames of 0.1s
    for _ in 0..6 {
        systems.update(&mut world, 0.1);
    }

    // Then - every 2 frames runs at 2, 4, 6; every 0.25s runs at 0.3 and 0.6
    assert_eq!(world.entity_count(), 5);
}

struct Priority {
    value: i32,
    log: &'static Mutex<Vec<i32>>,
}

impl System for Priority {
    fn run(&mut self, _: &mut World, _: f64) {
        self.log.lock().unwrap().push(self.value);
    }

    fn priority(&self) -> i32 {
        self.value
    }
}

#[test]
fn main_thread_systems_run_by_priority() {
    // Given
    static LOG: Mutex<Vec<i32>> = Mutex::new(Vec::new());
    let mut world = world();
    let mut systems = Systems::new(world.config());
    for value in [3, -1, 2] {
        systems.on_update().add_system(Priority { value, log: &LOG });
    }
    systems.init(&mut world).unwrap();

    // When
    systems.update(&mut world, 0.1);

    // Then
    assert_eq!(*LOG.lock().unwrap(), vec![-1, 2, 3]);
}

#[test]
fn too_many_chunk_systems_fail_init() {
    // Given
    let mut world = World::new(Config {
        max_chunk_systems: 1,
        worker_threads: 1,
        ..Config::default()
    })
    .unwrap();
    let mut systems = Systems::new(world.config());
    systems.on_update().scope(Scope::Parallel, |group| {
        group.add_chunk_system(WritePosition).add_chunk_system(Spawner);
    });

    // When
    let result = systems.init(&mut world);

    // Then
    assert!(result.is_err());
    assert!(!systems.is_initialized());
}

#[test]
fn named_groups_run_on_demand() {
    // Given
    static LOG: Mutex<Vec<i32>> = Mutex::new(Vec::new());
    let mut world = world();
    let mut systems = Systems::new(world.config());
    let mut ai = Group::new("Ai");
    ai.add_system(Priority { value: 7, log: &LOG });
    systems.add_group(ai);
    systems.init(&mut world).unwrap();

    // When
    systems.update(&mut world, 0.1);
    let ran = systems.run_group("Ai", &mut world, 0.1);

    // Then
    assert!(ran);
    assert!(!systems.run_group("Missing", &mut world, 0.1));
    assert_eq!(*LOG.lock().unwrap(), vec![7]);
}
