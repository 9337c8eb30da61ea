//! Systems and their execution.
//!
//! # Overview
//!
//! There are two kinds of systems:
//!
//! - [`System`]: runs on the calling thread with `&mut World`. Main-thread systems may do anything,
//!   including structural changes, and are followed by a sync point.
//! - [`ChunkSystem`]: runs once per matching chunk, possibly on a worker thread, through a
//!   [`ChunkView`]. It declares the components it reads and writes in [`ChunkSystem::filter`];
//!   the declaration decides which systems may run side by side.
//!
//! [`ForEachSystem`] is a chunk system written per entity; [`PerEntity`] adapts it.
//!
//! ```rust,ignore
//! use bucket_ecs::ecs::{Component, filter, system::{ChunkSystem, ChunkView}, Commands};
//!
//! #[derive(Component, Clone, Copy)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Component, Clone, Copy)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! struct Movement;
//!
//! impl ChunkSystem for Movement {
//!     fn filter(&self, filter: &mut filter::Builder<'_>) {
//!         filter.read_only::<Velocity>().read_write::<Position>();
//!     }
//!
//!     fn run(&self, delta: f64, chunk: &mut ChunkView<'_>, _: &Commands) {
//!         for slot in 0..chunk.len() {
//!             let velocity = chunk.read::<Velocity>(slot);
//!             let position = chunk.get_mut::<Position>(slot);
//!             position.x += velocity.dx * delta as f32;
//!             position.y += velocity.dy * delta as f32;
//!         }
//!     }
//! }
//! ```
//!
//! # Organisation
//!
//! Systems are registered into [`Group`]s. A group is an ordered list of steps: main-thread
//! systems, chunk systems under a [`Scope`], nested groups and explicit sync points. The
//! [`Systems`] root owns the worker pool and the standard `Update`, `FixedUpdate` and
//! `LateUpdate` groups.

mod condition;
mod graph;
mod group;
mod scheduler;
mod view;

pub use condition::{Condition, Gate};
pub use graph::{Plan, Slot, blocking_matrix, conflicts_within_steps};
pub use group::{Feature, Group, Scope};
pub use scheduler::SystemScheduler;
pub use view::{Access, ChunkView};

use crate::{
    core::config::Config,
    ecs::{
        command::Commands,
        error::{EcsError, Result},
        filter,
        world::World,
    },
};

/// A system run on the calling thread with exclusive world access.
pub trait System: 'static {
    fn init(&mut self, _world: &mut World) -> Result<()> {
        Ok(())
    }

    fn run(&mut self, world: &mut World, delta: f64);

    /// Lower priorities run first within a run of consecutive main-thread systems.
    fn priority(&self) -> i32 {
        0
    }

    fn condition(&self) -> Condition {
        Condition::Always
    }
}

/// A system run once per matching chunk.
pub trait ChunkSystem: Send + Sync + 'static {
    /// Declare included, excluded, read and written components.
    fn filter(&self, filter: &mut filter::Builder<'_>);

    fn run(&self, delta: f64, chunk: &mut ChunkView<'_>, commands: &Commands);

    fn init(&mut self, _world: &mut World) -> Result<()> {
        Ok(())
    }

    fn condition(&self) -> Condition {
        Condition::Always
    }
}

/// A chunk system written per entity.
pub trait ForEachSystem: Send + Sync + 'static {
    fn filter(&self, filter: &mut filter::Builder<'_>);

    fn run(&self, delta: f64, chunk: &mut ChunkView<'_>, slot: usize, commands: &Commands);

    fn init(&mut self, _world: &mut World) -> Result<()> {
        Ok(())
    }

    fn condition(&self) -> Condition {
        Condition::Always
    }
}

/// Runs a [`ForEachSystem`] over every slot of a chunk.
pub struct PerEntity<S>(pub S);

impl<S: ForEachSystem> ChunkSystem for PerEntity<S> {
    fn filter(&self, filter: &mut filter::Builder<'_>) {
        self.0.filter(filter);
    }

    fn run(&self, delta: f64, chunk: &mut ChunkView<'_>, commands: &Commands) {
        for slot in 0..chunk.len() {
            self.0.run(delta, chunk, slot, commands);
        }
    }

    fn init(&mut self, world: &mut World) -> Result<()> {
        self.0.init(world)
    }

    fn condition(&self) -> Condition {
        self.0.condition()
    }
}

pub const UPDATE: &str = "Update";
pub const FIXED_UPDATE: &str = "FixedUpdate";
pub const LATE_UPDATE: &str = "LateUpdate";

/// Root of a world's systems: the scheduler plus named groups.
pub struct Systems {
    scheduler: SystemScheduler,
    groups: Vec<Group>,
    initialized: bool,
}

impl Systems {
    pub fn new(config: &Config) -> Self {
        Self::with_scheduler(SystemScheduler::new(config.worker_threads))
    }

    pub fn with_scheduler(scheduler: SystemScheduler) -> Self {
        Self {
            scheduler,
            groups: vec![Group::new(UPDATE), Group::new(FIXED_UPDATE), Group::new(LATE_UPDATE)],
            initialized: false,
        }
    }

    #[inline]
    pub fn scheduler(&self) -> &SystemScheduler {
        &self.scheduler
    }

    pub fn on_update(&mut self) -> &mut Group {
        &mut self.groups[0]
    }

    pub fn on_fixed_update(&mut self) -> &mut Group {
        &mut self.groups[1]
    }

    pub fn on_late_update(&mut self) -> &mut Group {
        &mut self.groups[2]
    }

    /// Add a user group, run with [`run_group`](Self::run_group).
    pub fn add_group(&mut self, group: Group) -> &mut Group {
        self.groups.push(group);
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.name() == name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|group| group.name() == name)
    }

    /// Initialise every group. Fails when more chunk systems are registered than the world allows.
    pub fn init(&mut self, world: &mut World) -> Result<()> {
        let limit = world.config().max_chunk_systems;
        let count: usize = self.groups.iter().map(Group::chunk_system_count).sum();
        if count > limit {
            return Err(EcsError::OutOfRange {
                kind: "chunk systems",
                limit,
            });
        }

        for group in &mut self.groups {
            group.init(world)?;
        }
        self.initialized = true;
        log::debug!("initialised {} system groups with {count} chunk systems", self.groups.len());
        Ok(())
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn update(&mut self, world: &mut World, delta: f64) {
        self.groups[0].run(world, &self.scheduler, delta);
    }

    pub fn fixed_update(&mut self, world: &mut World, delta: f64) {
        self.groups[1].run(world, &self.scheduler, delta);
    }

    pub fn late_update(&mut self, world: &mut World, delta: f64) {
        self.groups[2].run(world, &self.scheduler, delta);
    }

    /// Run a group by name. Returns `false` if there is no such group.
    pub fn run_group(&mut self, name: &str, world: &mut World, delta: f64) -> bool {
        let scheduler = &self.scheduler;
        match self.groups.iter_mut().find(|group| group.name() == name) {
            Some(group) => {
                group.run(world, scheduler, delta);
                true
            }
            None => false,
        }
    }
}
