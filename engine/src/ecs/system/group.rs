use std::any::TypeId;

use crate::ecs::{
    error::Result,
    filter::Filter,
    system::{
        ChunkSystem, ForEachSystem, PerEntity, System,
        condition::Gate,
        graph::{self, Plan},
        scheduler::{ChunkEntry, SystemScheduler},
    },
    world::World,
};

/// How chunk systems registered while the scope is active are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// On the calling thread in registration order, with a sync point after each system.
    #[default]
    MainThread,
    /// One system at a time, its chunks spread over the worker pool. Systems in this scope are
    /// not checked against each other; their declared accesses must not overlap unsafely.
    Parallel,
    /// Partitioned by declared accesses into steps whose systems all run concurrently.
    DependencyGraph,
}

/// A set of systems installed together.
pub trait Feature {
    fn install(self, group: &mut Group);
}

struct SystemEntry {
    system: Box<dyn System>,
    gate: Gate,
}

struct ChunkStep {
    scope: Scope,
    entries: Vec<ChunkEntry>,
    plan: Plan,
}

enum Step {
    Systems(Vec<SystemEntry>),
    Chunks(ChunkStep),
    Group(Group),
    SyncPoint,
}

/// An ordered list of execution steps.
///
/// ```text
///  Group "Update"
///   ├── Systems   [input, camera]           sync point after each
///   ├── Chunks    DependencyGraph           [move, age] | [collide]
///   ├── SyncPoint
///   └── Group "Ai"
/// ```
///
/// Consecutive main-thread systems share one step and are sorted by priority at init.
/// Consecutive chunk systems registered under the same scope share one step. Every chunk step
/// ends with dispatching queued commands and a sync point.
pub struct Group {
    name: String,
    steps: Vec<Step>,
    scopes: Vec<Scope>,
    frame: u64,
    time: f64,
    initialized: bool,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            scopes: Vec::new(),
            frame: 0,
            time: 0.0,
            initialized: false,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of times the group has run.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Accumulated delta time of every run.
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    #[inline]
    pub fn current_scope(&self) -> Scope {
        self.scopes.last().copied().unwrap_or_default()
    }

    pub fn push_scope(&mut self, scope: Scope) -> &mut Self {
        self.scopes.push(scope);
        self
    }

    pub fn pop_scope(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }

    /// Register everything `f` adds under `scope`.
    pub fn scope(&mut self, scope: Scope, f: impl FnOnce(&mut Self)) -> &mut Self {
        self.scopes.push(scope);
        f(self);
        self.scopes.pop();
        self
    }

    pub fn add_system<S: System>(&mut self, system: S) -> &mut Self {
        let entry = SystemEntry {
            gate: Gate::new(system.condition()),
            system: Box::new(system),
        };
        match self.steps.last_mut() {
            Some(Step::Systems(entries)) => entries.push(entry),
            _ => self.steps.push(Step::Systems(vec![entry])),
        }
        self
    }

    pub fn add_chunk_system<S: ChunkSystem>(&mut self, system: S) -> &mut Self {
        self.push_chunk_entry(ChunkEntry::new(system, TypeId::of::<S>()))
    }

    pub fn add_for_each_system<S: ForEachSystem>(&mut self, system: S) -> &mut Self {
        self.push_chunk_entry(ChunkEntry::new(PerEntity(system), TypeId::of::<S>()))
    }

    pub fn add_group(&mut self, group: Group) -> &mut Self {
        self.steps.push(Step::Group(group));
        self
    }

    pub fn add_feature(&mut self, feature: impl Feature) -> &mut Self {
        feature.install(self);
        self
    }

    /// Add a sync point unless the previous step already is one.
    pub fn add_sync_point(&mut self) -> &mut Self {
        if !matches!(self.steps.last(), Some(Step::SyncPoint)) {
            self.steps.push(Step::SyncPoint);
        }
        self
    }

    /// Number of chunk systems in this group and its sub groups.
    pub fn chunk_system_count(&self) -> usize {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Chunks(step) => step.entries.len(),
                Step::Group(group) => group.chunk_system_count(),
                Step::Systems(_) | Step::SyncPoint => 0,
            })
            .sum()
    }

    /// Initialise every system, build chunk filters and dependency graphs.
    pub fn init(&mut self, world: &mut World) -> Result<()> {
        if !self.scopes.is_empty() {
            log::warn!("group {} initialised with {} open scopes", self.name, self.scopes.len());
        }

        for step in &mut self.steps {
            match step {
                Step::Systems(entries) => {
                    entries.sort_by_key(|entry| entry.system.priority());
                    for entry in entries.iter_mut() {
                        entry.system.init(world)?;
                    }
                }
                Step::Chunks(step) => {
                    for entry in &mut step.entries {
                        entry.init(world)?;
                    }
                    if step.scope == Scope::DependencyGraph {
                        step.plan = build_plan(&step.entries, None);
                        log::debug!(
                            "group {}: {} chunk systems in {} steps",
                            self.name,
                            step.entries.len(),
                            step.plan.step_count()
                        );
                    }
                }
                Step::Group(group) => group.init(world)?,
                Step::SyncPoint => {}
            }
        }

        self.initialized = true;
        Ok(())
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn run(&mut self, world: &mut World, scheduler: &SystemScheduler, delta: f64) {
        if !self.initialized {
            log::warn!("group {} run before init, skipped", self.name);
            return;
        }

        self.frame += 1;
        self.time += delta;
        let (frame, time) = (self.frame, self.time);

        for step in &mut self.steps {
            match step {
                Step::Systems(entries) => {
                    for entry in entries.iter_mut() {
                        if entry.gate.open(frame, time) {
                            entry.system.run(world, delta);
                            world.run_sync_point();
                        }
                    }
                }
                Step::Chunks(step) => {
                    run_chunk_step(step, world, scheduler, frame, time, delta);
                    world.dispatch_scheduled_commands();
                    world.run_sync_point();
                }
                Step::Group(group) => group.run(world, scheduler, delta),
                Step::SyncPoint => world.run_sync_point(),
            }
        }
    }

    fn push_chunk_entry(&mut self, entry: ChunkEntry) -> &mut Self {
        let scope = self.current_scope();
        if scope == Scope::MainThread {
            log::warn!("chunk system {} registered in a main-thread scope", entry.name());
        }

        match self.steps.last_mut() {
            Some(Step::Chunks(step)) if step.scope == scope => step.entries.push(entry),
            _ => self.steps.push(Step::Chunks(ChunkStep {
                scope,
                entries: vec![entry],
                plan: Plan::default(),
            })),
        }
        self
    }
}

fn build_plan(entries: &[ChunkEntry], participating: Option<&[bool]>) -> Plan {
    let indexes: Vec<usize> = (0..entries.len())
        .filter(|index| participating.is_none_or(|open| open[*index]))
        .filter(|index| entries[*index].filter().is_some())
        .collect();
    let filters: Vec<&Filter> = indexes.iter().filter_map(|index| entries[*index].filter()).collect();

    let plan = Plan::build(&filters);
    let conflicts = graph::conflicts_within_steps(&plan, &filters);
    if !conflicts.is_empty() {
        log::warn!("dependency graph placed conflicting systems in one step: {conflicts:?}");
    }

    // Map plan positions back to entry indexes.
    let order: Vec<graph::Slot> = plan
        .order()
        .iter()
        .map(|slot| match slot {
            graph::Slot::Run(position) => graph::Slot::Run(indexes[*position]),
            graph::Slot::Barrier => graph::Slot::Barrier,
        })
        .collect();
    Plan::from_order(order)
}

fn run_chunk_step(
    step: &mut ChunkStep,
    world: &mut World,
    scheduler: &SystemScheduler,
    frame: u64,
    time: f64,
    delta: f64,
) {
    match step.scope {
        Scope::MainThread => {
            for entry in &mut step.entries {
                if entry.open(frame, time) {
                    scheduler.run_serial(world, entry, delta);
                    world.dispatch_scheduled_commands();
                    world.run_sync_point();
                }
            }
        }
        Scope::Parallel => {
            for entry in &mut step.entries {
                if entry.open(frame, time) {
                    scheduler.run_step(world, &[&*entry], delta);
                }
            }
        }
        Scope::DependencyGraph => {
            let rebuild = world.config().rebuild_graph_each_frame;
            let open: Vec<bool> = if rebuild {
                let open: Vec<bool> = step.entries.iter_mut().map(|entry| entry.open(frame, time)).collect();
                step.plan = build_plan(&step.entries, Some(&open));
                open
            } else {
                step.entries.iter_mut().map(|entry| entry.open(frame, time)).collect()
            };

            for systems in step.plan.steps() {
                let entries: Vec<&ChunkEntry> = systems
                    .into_iter()
                    .filter(|index| open[*index])
                    .map(|index| &step.entries[index])
                    .collect();
                if !entries.is_empty() {
                    scheduler.run_step(world, &entries, delta);
                }
            }
        }
    }
}
