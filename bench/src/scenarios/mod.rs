//! Game-like workloads driven through [`Systems`](bucket_ecs::ecs::Systems).
//!
//! - **Particles**: high entity count, short lifetimes, destroy and respawn through commands
//! - **Physics**: chained integration systems that the dependency graph must order

pub mod particles;
pub mod physics;

pub use particles::{ParticleConfig, ParticleScenario};
pub use physics::{PhysicsConfig, PhysicsScenario};

/// Common driver for benchmark scenarios.
pub trait Scenario {
    fn name(&self) -> &'static str;

    /// Live entities right now.
    fn entity_count(&self) -> usize;

    /// Spawn the initial entities and initialise systems.
    fn setup(&mut self);

    /// Run one frame.
    fn update(&mut self);
}
