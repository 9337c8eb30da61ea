use std::any::TypeId;

use crate::{
    core::tasks::Executor,
    ecs::{
        error::Result,
        filter::{self, Filter},
        system::{ChunkSystem, ChunkView, Gate},
        world::World,
    },
};

/// A chunk system registered in a group, together with its filter once initialised.
pub(crate) struct ChunkEntry {
    system: Box<dyn ChunkSystem>,
    context_key: TypeId,
    name: &'static str,
    gate: Gate,
    bound: Option<(filter::Id, Filter)>,
}

impl ChunkEntry {
    pub(crate) fn new<S: ChunkSystem>(system: S, context_key: TypeId) -> Self {
        let gate = Gate::new(system.condition());
        Self {
            system: Box::new(system),
            context_key,
            name: std::any::type_name::<S>(),
            gate,
            bound: None,
        }
    }

    #[inline]
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Build the system's filter and register it with the world.
    pub(crate) fn init(&mut self, world: &mut World) -> Result<()> {
        self.system.init(world)?;
        let mut builder = world.filter();
        self.system.filter(&mut builder);
        let filter = builder.build()?;
        let id = world.register_filter(filter.clone());
        self.bound = Some((id, filter));
        Ok(())
    }

    #[inline]
    pub(crate) fn filter(&self) -> Option<&Filter> {
        self.bound.as_ref().map(|(_, filter)| filter)
    }

    #[inline]
    pub(crate) fn open(&mut self, frame: u64, time: f64) -> bool {
        self.gate.open(frame, time)
    }
}

/// Dispatches the chunk work of systems onto the worker pool.
///
/// Every chunk matching a system's filter becomes one task. A call returns only once every task
/// it spawned has finished, which is the barrier between graph steps.
pub struct SystemScheduler {
    executor: Executor,
}

impl SystemScheduler {
    pub fn new(worker_threads: usize) -> Self {
        Self {
            executor: Executor::new(worker_threads.max(1)),
        }
    }

    #[inline]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run the chunk work of every entry concurrently and wait for all of it. Returns the number
    /// of chunks processed.
    pub(crate) fn run_step(&self, world: &World, entries: &[&ChunkEntry], delta: f64) -> usize {
        let storage = world.storage();
        let registry = world.registry();
        let commands = world.commands();
        let commands = &commands;
        let mut chunks = 0;

        self.executor.scope(|scope| {
            for entry in entries {
                let Some((filter_id, filter)) = &entry.bound else {
                    log::warn!("chunk system {} ran before init, skipped", entry.name);
                    continue;
                };
                let system = entry.system.as_ref();
                let context = world.system_context(entry.context_key);

                for &archetype_id in world.filters().archetypes(*filter_id) {
                    let Some(archetype) = storage.archetype(archetype_id) else {
                        continue;
                    };
                    for chunk in archetype.chunks().filter(|chunk| !chunk.is_empty()) {
                        chunks += 1;
                        scope.spawn(move || {
                            let mut view = ChunkView::new(archetype_id, chunk, registry, filter, context);
                            system.run(delta, &mut view, commands);
                        });
                    }
                }
            }
        });

        chunks
    }

    /// Run one entry's chunk work on the calling thread, chunk by chunk.
    pub(crate) fn run_serial(&self, world: &World, entry: &ChunkEntry, delta: f64) -> usize {
        let Some((filter_id, filter)) = &entry.bound else {
            log::warn!("chunk system {} ran before init, skipped", entry.name);
            return 0;
        };
        let commands = world.commands();
        let context = world.system_context(entry.context_key);
        let mut chunks = 0;

        for &archetype_id in world.filters().archetypes(*filter_id) {
            let Some(archetype) = world.storage().archetype(archetype_id) else {
                continue;
            };
            for chunk in archetype.chunks().filter(|chunk| !chunk.is_empty()) {
                let mut view = ChunkView::new(archetype_id, chunk, world.registry(), filter, context);
                entry.system.run(delta, &mut view, &commands);
                chunks += 1;
            }
        }
        chunks
    }
}
