//! Particle system scenario.
//!
//! Keeps `particle_count` particles alive. Every frame particles move, age and fade; particles
//! whose lifetime ran out are destroyed through commands and a main-thread spawner tops the
//! population back up.
//!
//! ```text
//!  Update
//!   ├── Chunks  DependencyGraph   [movement, aging] | [fade]
//!   └── Systems                   [respawn]
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use bucket_ecs::{
    core::Config,
    ecs::{ChunkSystem, ChunkView, Commands, ForEachSystem, Scope, System, Systems, World, filter},
};

use crate::{
    components::{Color, Lifetime, Particle, Position, Velocity},
    scenarios::Scenario,
};

pub struct ParticleConfig {
    pub particle_count: usize,
    pub delta_time: f64,
    pub seed: u64,
    pub worker_threads: usize,
    pub chunk_entities_count: usize,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            particle_count: 100_000,
            delta_time: 1.0 / 60.0,
            seed: 12345,
            worker_threads: 4,
            chunk_entities_count: 4096,
        }
    }
}

type ParticleBundle = (Particle, Position, Velocity, Lifetime, Color);

fn random_particle(rng: &mut ChaCha8Rng) -> ParticleBundle {
    let position = Position {
        x: rng.gen_range(-100.0..100.0),
        y: rng.gen_range(-100.0..100.0),
        z: rng.gen_range(-100.0..100.0),
    };
    let velocity = Velocity {
        x: rng.gen_range(-10.0..10.0),
        y: rng.gen_range(-10.0..10.0),
        z: rng.gen_range(-10.0..10.0),
    };
    let lifetime = Lifetime {
        remaining: rng.gen_range(0.5..3.0),
        total: 3.0,
    };
    let color = Color {
        r: rng.gen_range(0.0..1.0),
        g: rng.gen_range(0.0..1.0),
        b: rng.gen_range(0.0..1.0),
        a: 1.0,
    };
    (Particle, position, velocity, lifetime, color)
}

struct Movement;

impl ChunkSystem for Movement {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.with::<Particle>().read_only::<Velocity>().read_write::<Position>();
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

struct Aging;

impl ForEachSystem for Aging {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.with::<Particle>().read_write::<Lifetime>();
    }

    fn run(&self, delta: f64, chunk: &mut ChunkView<'_>, slot: usize, commands: &Commands) {
        let lifetime = chunk.get_mut::<Lifetime>(slot);
        lifetime.remaining -= delta as f32;
        if lifetime.remaining <= 0.0 {
            commands.destroy(chunk.address(slot));
        }
    }
}

struct Fade;

impl ChunkSystem for Fade {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        filter.read_only::<Lifetime>().read_write::<Color>();
    }

    fn run(&self, _: f64, chunk: &mut ChunkView<'_>, _: &Commands) {
        for slot in 0..chunk.len() {
            let lifetime = chunk.read::<Lifetime>(slot);
            chunk.get_mut::<Color>(slot).a = (lifetime.remaining / lifetime.total).max(0.0);
        }
    }
}

struct Respawn {
    target: usize,
    rng: ChaCha8Rng,
}

impl System for Respawn {
    fn run(&mut self, world: &mut World, _: f64) {
        for _ in world.entity_count()..self.target {
            if let Err(error) = world.spawn(random_particle(&mut self.rng)) {
                log::error!("failed to respawn particle: {error}");
                return;
            }
        }
    }
}

pub struct ParticleScenario {
    config: ParticleConfig,
    world: World,
    systems: Systems,
}

impl ParticleScenario {
    pub fn new() -> Self {
        Self::with_config(ParticleConfig::default())
    }

    pub fn with_config(config: ParticleConfig) -> Self {
        let world_config = Config {
            chunk_entities_count: config.chunk_entities_count,
            worker_threads: config.worker_threads,
            ..Config::default()
        };
        let systems = Systems::new(&world_config);
        let world = match World::new(world_config) {
            Ok(world) => world,
            Err(error) => panic!("invalid particle scenario config: {error}"),
        };

        Self { config, world, systems }
    }

    pub fn world(&self) -> &World {
        &self.world
    }
}

impl Default for ParticleScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for ParticleScenario {
    fn name(&self) -> &'static str {
        "particles"
    }

    fn entity_count(&self) -> usize {
        self.world.entity_count()
    }

    fn setup(&mut self) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        for _ in 0..self.config.particle_count {
            if let Err(error) = self.world.spawn(random_particle(&mut rng)) {
                panic!("failed to spawn particle: {error}");
            }
        }

        self.systems
            .on_update()
            .scope(Scope::DependencyGraph, |group| {
                group
                    .add_chunk_system(Movement)
                    .add_for_each_system(Aging)
                    .add_chunk_system(Fade);
            })
            .add_system(Respawn {
                target: self.config.particle_count,
                rng,
            });

        if let Err(error) = self.systems.init(&mut self.world) {
            panic!("failed to initialise particle systems: {error}");
        }
    }

    fn update(&mut self) {
        self.systems.update(&mut self.world, self.config.delta_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_is_kept_constant() {
        // Given
        let mut scenario = ParticleScenario::with_config(ParticleConfig {
            particle_count: 500,
            chunk_entities_count: 64,
            worker_threads: 2,
            ..Default::default()
        });
        scenario.setup();

        // When - long enough for every initial particle to expire
        for _ in 0..240 {
            scenario.update();
        }

        // Then
        assert_eq!(scenario.entity_count(), 500);
    }
}
