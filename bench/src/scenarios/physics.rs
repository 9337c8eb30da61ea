//! Rigid body scenario.
//!
//! Bodies are integrated on the fixed update group through a chain of chunk systems:
//! acceleration into velocity, velocity into position, position into the transform matrix.
//! Under the dependency graph the chain packs into two steps:
//!
//! ```text
//!  [gravity, wear, integrate_velocity] | [integrate_acceleration, update_transforms]
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use bucket_ecs::{
    core::Config,
    ecs::{ChunkSystem, ChunkView, Commands, Scope, Systems, World, filter},
};

use crate::{
    components::{Acceleration, Health, Mass, Position, Transform, Velocity},
    scenarios::Scenario,
};

pub struct PhysicsConfig {
    pub body_count: usize,
    /// Fixed timestep.
    pub delta_time: f64,
    pub seed: u64,
    pub worker_threads: usize,
    pub scope: Scope,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            body_count: 50_000,
            delta_time: 1.0 / 120.0,
            seed: 99999,
            worker_threads: 8,
            scope: Scope::DependencyGraph,
        }
    }
}

const GRAVITY: f32 = -9.81;

struct Gravity;

impl ChunkSystem for Gravity {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Mass>().read_write::<Acceleration>();
    }

    fn run(&self, _: f64, chunk: &mut ChunkView<'_>, _: &Commands) {
        for slot in 0..chunk.len() {
            let mass = chunk.read::<Mass>(slot);
            let acceleration = chunk.get_mut::<Acceleration>(slot);
            acceleration.y = if mass.0 > 0.0 { GRAVITY } else { 0.0 };
        }
    }
}

struct Wear;

impl ChunkSystem for Wear {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_write::<Health>();
    }

    fn run(&self, delta: f64, chunk: &mut ChunkView<'_>, _: &Commands) {
        for slot in 0..chunk.len() {
            let health = chunk.get_mut::<Health>(slot);
            health.current = (health.current - delta as f32).max(0.0);
        }
    }
}

struct IntegrateAcceleration;

impl ChunkSystem for IntegrateAcceleration {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Acceleration>().read_write::<Velocity>();
    }

    fn run(&self, delta: f64, chunk: &mut ChunkView<'_>, _: &Commands) {
        let dt = delta as f32;
        for slot in 0..chunk.len() {
            let acceleration = chunk.read::<Acceleration>(slot);
            let velocity = chunk.get_mut::<Velocity>(slot);
            velocity.x += acceleration.x * dt;
            velocity.y += acceleration.y * dt;
            velocity.z += acceleration.z * dt;
        }
    }
}

struct IntegrateVelocity;

impl ChunkSystem for IntegrateVelocity {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Velocity>().read_write::<Position>();
    }

    fn run(&self, delta: f64, chunk: &mut ChunkView<'_>, _: &Commands) {
        let dt = delta as f32;
        for slot in 0..chunk.len() {
            let velocity = chunk.read::<Velocity>(slot);
            let position = chunk.get_mut::<Position>(slot);
            position.x += velocity.x * dt;
            position.y += velocity.y * dt;
            position.z += velocity.z * dt;
        }
    }
}

struct UpdateTransforms;

impl ChunkSystem for UpdateTransforms {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Position>().read_write::<Transform>();
    }

    fn run(&self, _: f64, chunk: &mut ChunkView<'_>, _: &Commands) {
        for slot in 0..chunk.len() {
            let position = chunk.read::<Position>(slot);
            let transform = chunk.get_mut::<Transform>(slot);
            transform.matrix[3][0] = position.x;
            transform.matrix[3][1] = position.y;
            transform.matrix[3][2] = position.z;
        }
    }
}

pub struct PhysicsScenario {
    config: PhysicsConfig,
    world: World,
    systems: Systems,
}

impl PhysicsScenario {
    pub fn new() -> Self {
        Self::with_config(PhysicsConfig::default())
    }

    pub fn with_config(config: PhysicsConfig) -> Self {
        let world_config = Config {
            worker_threads: config.worker_threads,
            ..Config::default()
        };
        let systems = Systems::new(&world_config);
        let world = match World::new(world_config) {
            Ok(world) => world,
            Err(error) => panic!("invalid physics scenario config: {error}"),
        };

        Self { config, world, systems }
    }

    pub fn world(&self) -> &World {
        &self.world
    }
}

impl Default for PhysicsScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for PhysicsScenario {
    fn name(&self) -> &'static str {
        "physics"
    }

    fn entity_count(&self) -> usize {
        self.world.entity_count()
    }

    fn setup(&mut self) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        for i in 0..self.config.body_count {
            let position = Position {
                x: rng.gen_range(-500.0..500.0),
                y: rng.gen_range(0.0..500.0),
                z: rng.gen_range(-500.0..500.0),
            };
            let velocity = Velocity {
                x: rng.gen_range(-5.0..5.0),
                y: 0.0,
                z: rng.gen_range(-5.0..5.0),
            };
            let mass = Mass(if i % 10 == 0 { 0.0 } else { rng.gen_range(1.0..10.0) });
            let spawned = if i % 4 == 0 {
                self.world.spawn((
                    position,
                    velocity,
                    Acceleration::default(),
                    mass,
                    Transform::default(),
                    Health { current: 100.0, max: 100.0 },
                ))
            } else {
                self.world
                    .spawn((position, velocity, Acceleration::default(), mass, Transform::default()))
            };
            if let Err(error) = spawned {
                panic!("failed to spawn body: {error}");
            }
        }

        self.systems.on_fixed_update().scope(self.config.scope, |group| {
            group
                .add_chunk_system(Gravity)
                .add_chunk_system(Wear)
                .add_chunk_system(IntegrateAcceleration)
                .add_chunk_system(IntegrateVelocity)
                .add_chunk_system(UpdateTransforms);
        });

        if let Err(error) = self.systems.init(&mut self.world) {
            panic!("failed to initialise physics systems: {error}");
        }
    }

    fn update(&mut self) {
        self.systems.fixed_update(&mut self.world, self.config.delta_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bodies_fall_under_gravity() {
        // Given
        let mut scenario = PhysicsScenario::with_config(PhysicsConfig {
            body_count: 40,
            worker_threads: 2,
            ..Default::default()
        });
        scenario.setup();
        let world = scenario.world();
        let filter = world.filter().read_only::<Mass>().read_only::<Velocity>().build().unwrap();

        // When
        for _ in 0..10 {
            scenario.update();
        }

        // Then
        let world = scenario.world();
        for address in world.query(&filter) {
            let mass = world.get::<Mass>(address).unwrap();
            let velocity = world.get::<Velocity>(address).unwrap();
            assert_eq!(velocity.y < 0.0, mass.0 > 0.0);
        }
        assert_eq!(scenario.entity_count(), 40);
    }
}
