//! The World owns every entity, component and filter of one simulation.
//!
//! A `World` coordinates:
//! - **Component Registry**: component types and their dense ids, capped at `max_components`
//! - **Entity Allocator**: monotonically issued entity ids, shared with command handles
//! - **Storage**: archetypes, chunks and their pooled memory
//! - **Filters**: registered filters with cached matching archetypes
//! - **Commands**: the deferred command queue and its custom handlers
//! - **Contexts**: per-system shared data visible to chunk systems
//!
//! # Sync points
//!
//! Structural changes requested while systems run (component adds and removes, destroys) are only
//! staged. [`World::run_sync_point`] applies them in a fixed order:
//!
//! ```text
//!  apply migrations  ->  remove marked entities  ->  rebalance chunks  ->  update filters
//! ```
//!
//! After a sync point every previously handed out [`EntityAddress`] may be stale.
//!
//! # Example
//!
//! ```ignore
//! use bucket_ecs::ecs::world::World;
//!
//! let mut world = World::default();
//!
//! let (entity, address) = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0, dy: 0.0 }))?;
//! world.add_component(address, Health(100))?;
//! world.run_sync_point();
//!
//! let address = world.locate(entity).unwrap();
//! assert_eq!(world.get::<Health>(address), Some(&Health(100)));
//! ```

use std::{
    any::{self, Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use crate::{
    core::config::Config,
    ecs::{
        bitset::BitSet,
        command::{self, Call, CommandQueue, Commands, Handlers},
        component::{self, Bundle, Component, Target},
        entity::{Allocator, EntityAddress, EntityId},
        error::{EcsError, Result},
        filter::{self, Filter, Query},
        migration::Migration,
        storage::{Event, Storage, archetype, chunk, components::ComponentsStorage},
    },
};

type Context = Box<dyn Any + Send + Sync>;

pub struct World {
    config: Config,
    registry: component::Registry,
    allocator: Arc<Allocator>,
    storage: Storage,
    filters: filter::Registry,
    queue: Arc<CommandQueue>,
    handlers: Handlers,
    contexts: HashMap<TypeId, Context>,
}

impl World {
    /// Create a world, validating the configuration first.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: Config) -> Self {
        let mut world = Self {
            registry: component::Registry::new(config.max_components),
            allocator: Arc::new(Allocator::new()),
            storage: Storage::new(&config, config.max_components),
            filters: filter::Registry::new(config.expected_filters, config.expected_archetypes_in_filter),
            queue: Arc::new(CommandQueue::new()),
            handlers: Handlers::new(),
            contexts: HashMap::with_capacity(config.max_contexts.min(16)),
            config,
        };
        world.sync_filters();
        world
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn registry(&self) -> &component::Registry {
        &self.registry
    }

    #[inline]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[inline]
    pub fn filters(&self) -> &filter::Registry {
        &self.filters
    }

    #[inline]
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Register a component type up front. Registration also happens on first use.
    pub fn register_component<C: Component>(&self) -> Result<component::Id> {
        self.registry.register::<C>()
    }

    /// Total number of live entities, including those marked for removal.
    pub fn entity_count(&self) -> usize {
        self.storage.archetypes().map(|archetype| archetype.entity_count()).sum()
    }

    #[inline]
    pub fn archetype_count(&self) -> usize {
        self.storage.archetype_count()
    }

    /// The archetype for exactly the components of `B`, created if needed.
    pub fn archetype_of<B: Bundle>(&mut self) -> Result<archetype::Id> {
        let mask = self.bundle_mask::<B>()?;
        let id = self.storage.get_or_create(&mask, &self.registry);
        self.sync_filters();
        Ok(id)
    }

    /// Spawn an entity with the given components.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Result<(EntityId, EntityAddress)> {
        let entity = self.allocator.alloc();
        let address = self.spawn_reserved(entity, bundle)?;
        Ok((entity, address))
    }

    /// Spawn an entity without components.
    pub fn spawn_empty(&mut self) -> (EntityId, EntityAddress) {
        let entity = self.allocator.alloc();
        let empty = self.storage.empty_archetype();
        // The empty archetype is never recycled.
        let address = self
            .storage
            .add_entity(empty, entity)
            .unwrap_or_else(|| unreachable!("empty archetype missing"));
        (entity, address)
    }

    /// Spawn an entity under an id issued earlier by this world's allocator.
    pub(crate) fn spawn_reserved<B: Bundle>(&mut self, entity: EntityId, bundle: B) -> Result<EntityAddress> {
        let archetype = self.archetype_of::<B>()?;
        let address = self
            .storage
            .add_entity(archetype, entity)
            .ok_or(EcsError::InvalidAddress)?;

        if let Some(chunk) = self.storage.chunk_mut(address) {
            let mut writer = Writer {
                registry: &self.registry,
                components: chunk.components_mut(),
                slot: address.index(),
            };
            bundle.apply(&mut writer);
        }
        Ok(address)
    }

    /// Mark an entity for removal at the next sync point. Returns `false` for a stale address.
    pub fn destroy(&mut self, address: EntityAddress) -> bool {
        self.storage.mark(address)
    }

    /// Mark every entity of a chunk for removal at the next sync point.
    pub fn destroy_chunk(&mut self, archetype: archetype::Id, chunk: chunk::Index) -> bool {
        self.storage.mark_chunk(archetype, chunk)
    }

    /// Stage the same migration onto every entity of a chunk.
    pub fn stage_chunk(&mut self, archetype: archetype::Id, chunk: chunk::Index, migration: &Migration) -> bool {
        let mask_len = self.registry.limit();
        let Some(chunk) = self.storage.archetype(archetype).and_then(|a| a.chunk(chunk)) else {
            return false;
        };
        for slot in 0..chunk.len() {
            chunk.stage(slot, mask_len, |staged| staged.merge(migration));
        }
        true
    }

    /// Find the current address of an entity. Scans every chunk.
    pub fn locate(&self, entity: EntityId) -> Option<EntityAddress> {
        self.storage.locate(entity)
    }

    /// The entity at an address, if the address is live.
    #[inline]
    pub fn entity(&self, address: EntityAddress) -> Option<EntityId> {
        self.storage.entity(address)
    }

    #[inline]
    pub fn contains(&self, address: EntityAddress) -> bool {
        self.storage.contains(address)
    }

    /// Returns `true` if the entity at `address` has component `T`.
    pub fn has<T: Component>(&self, address: EntityAddress) -> bool {
        let Some(id) = self.registry.get::<T>() else {
            return false;
        };
        self.live_chunk(address)
            .is_some_and(|chunk| chunk.components().has(id))
    }

    pub fn get<T: Component>(&self, address: EntityAddress) -> Option<&T> {
        let id = self.registry.get::<T>()?;
        self.live_chunk(address)?.components().get(address.index(), id)
    }

    pub fn get_mut<T: Component>(&mut self, address: EntityAddress) -> Option<&mut T> {
        let id = self.registry.get::<T>()?;
        if !self.storage.contains(address) {
            return None;
        }
        self.storage
            .chunk_mut(address)?
            .components_mut()
            .get_mut(address.index(), id)
    }

    /// Overwrite a component in place. Returns `false` if the address is stale or the entity
    /// lacks `T`.
    pub fn set<T: Component>(&mut self, address: EntityAddress, value: T) -> bool {
        match self.get_mut::<T>(address) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn try_get<T: Component>(&self, address: EntityAddress) -> Result<T> {
        let chunk = self.live_chunk(address).ok_or(EcsError::InvalidAddress)?;
        self.registry
            .get::<T>()
            .and_then(|id| chunk.components().read(address.index(), id))
            .ok_or(EcsError::MissingComponent {
                component: any::type_name::<T>(),
            })
    }

    pub fn try_set<T: Component>(&mut self, address: EntityAddress, value: T) -> Result<()> {
        if !self.storage.contains(address) {
            return Err(EcsError::InvalidAddress);
        }
        if self.set(address, value) {
            Ok(())
        } else {
            Err(EcsError::MissingComponent {
                component: any::type_name::<T>(),
            })
        }
    }

    /// Stage adding `T` with a value. Applied at the next sync point.
    pub fn add_component<T: Component>(&mut self, address: EntityAddress, value: T) -> Result<()> {
        let id = self.check_absent::<T>(address)?;
        self.stage(address, |migration| migration.add_value(id, value))
    }

    /// Stage adding a zeroed `T`. Applied at the next sync point.
    pub fn add_component_default<T: Component>(&mut self, address: EntityAddress) -> Result<()> {
        let id = self.check_absent::<T>(address)?;
        self.stage(address, |migration| migration.add(id))
    }

    /// Stage removing `T`. Applied at the next sync point.
    pub fn remove_component<T: Component>(&mut self, address: EntityAddress) -> Result<()> {
        if !self.storage.contains(address) {
            return Err(EcsError::InvalidAddress);
        }
        if !self.has::<T>(address) {
            return Err(EcsError::MissingComponent {
                component: any::type_name::<T>(),
            });
        }
        let id = self.registry.register::<T>()?;
        self.stage(address, |migration| migration.remove(id))
    }

    /// Start building a filter. Components named are registered with this world.
    #[inline]
    pub fn filter(&self) -> filter::Builder<'_> {
        filter::Builder::new(&self.registry)
    }

    /// Register a filter so its matching archetypes are tracked incrementally.
    pub fn register_filter(&mut self, filter: Filter) -> filter::Id {
        self.sync_filters();
        self.filters.register(filter, &self.storage)
    }

    /// Recompute a registered filter's matches from scratch.
    pub fn refresh_filter(&mut self, id: filter::Id) {
        self.sync_filters();
        self.filters.refresh(id, &self.storage);
    }

    /// Addresses of every entity matching `filter`.
    pub fn query(&self, filter: &Filter) -> Query<'_> {
        let archetypes = self
            .storage
            .archetypes()
            .filter(|archetype| filter.matches(archetype.mask()))
            .map(|archetype| archetype.id())
            .collect();
        Query::new(&self.storage, archetypes)
    }

    /// Addresses of every entity matching a registered filter, from its cached archetypes.
    pub fn query_registered(&self, id: filter::Id) -> Query<'_> {
        Query::new(&self.storage, self.filters.archetypes(id).to_vec())
    }

    /// A handle for queueing commands, usable from any thread.
    pub fn commands(&self) -> Commands {
        Commands::new(Arc::clone(&self.queue), Arc::clone(&self.allocator))
    }

    /// Register a custom command under the next free id.
    pub fn register_command(&mut self, handler: impl FnMut(&mut World, Call) + Send + 'static) -> command::Id {
        self.handlers.register(Box::new(handler))
    }

    /// Register a custom command under a fixed id.
    pub fn register_command_at(
        &mut self,
        id: command::Id,
        handler: impl FnMut(&mut World, Call) + Send + 'static,
    ) -> Result<()> {
        self.handlers.register_at(id, Box::new(handler))
    }

    /// Execute every queued command in FIFO order. Returns how many ran.
    pub fn dispatch_scheduled_commands(&mut self) -> usize {
        let mut handlers = std::mem::take(&mut self.handlers);
        let mut count = 0;
        while let Some(call) = self.queue.pop() {
            handlers.dispatch(self, call);
            count += 1;
        }
        // Handlers registered from inside a handler landed on the placeholder.
        handlers.merge(std::mem::take(&mut self.handlers));
        self.handlers = handlers;
        count
    }

    /// Apply staged migrations, remove marked entities, rebalance chunks and update filters.
    pub fn run_sync_point(&mut self) {
        let migrated = self.storage.apply_migrations(&self.registry);
        let removed = self.storage.remove_marked();
        self.storage.rebalance();
        self.sync_filters();
        log::trace!("sync point: {migrated} migrated, {removed} removed");
    }

    /// Attach shared data to system `S`. Its chunk views reach it through
    /// [`ChunkView::context`](crate::ecs::system::ChunkView::context).
    pub fn set_context<S: 'static, C: Any + Send + Sync>(&mut self, context: C) -> Result<()> {
        let key = TypeId::of::<S>();
        if !self.contexts.contains_key(&key) && self.contexts.len() >= self.config.max_contexts {
            return Err(EcsError::OutOfRange {
                kind: "system contexts",
                limit: self.config.max_contexts,
            });
        }
        self.contexts.insert(key, Box::new(context));
        Ok(())
    }

    pub fn context<S: 'static, C: Any>(&self) -> Option<&C> {
        self.contexts.get(&TypeId::of::<S>())?.downcast_ref::<C>()
    }

    pub fn context_mut<S: 'static, C: Any>(&mut self) -> Option<&mut C> {
        self.contexts.get_mut(&TypeId::of::<S>())?.downcast_mut::<C>()
    }

    pub fn remove_context<S: 'static>(&mut self) -> bool {
        self.contexts.remove(&TypeId::of::<S>()).is_some()
    }

    pub(crate) fn system_context(&self, key: TypeId) -> Option<&(dyn Any + Send + Sync)> {
        self.contexts.get(&key).map(|context| context.as_ref())
    }

    fn bundle_mask<B: Bundle>(&self) -> Result<BitSet> {
        let mut mask = BitSet::new(self.registry.limit());
        B::register(&self.registry, &mut mask)?;
        Ok(mask)
    }

    fn live_chunk(&self, address: EntityAddress) -> Option<&chunk::Chunk> {
        self.storage
            .chunk(address)
            .filter(|chunk| address.index() < chunk.len())
    }

    fn check_absent<T: Component>(&self, address: EntityAddress) -> Result<component::Id> {
        let id = self.registry.register::<T>()?;
        let chunk = self.live_chunk(address).ok_or(EcsError::InvalidAddress)?;
        let removing = chunk.staged(address.index(), |migration| {
            migration.is_some_and(|m| m.removed().is_set(id.index()))
        });
        if chunk.components().has(id) && !removing {
            return Err(EcsError::ComponentAlreadyPresent {
                component: any::type_name::<T>(),
            });
        }
        Ok(id)
    }

    fn stage(&self, address: EntityAddress, f: impl FnOnce(&mut Migration)) -> Result<()> {
        let mask_len = self.registry.limit();
        let chunk = self.live_chunk(address).ok_or(EcsError::InvalidAddress)?;
        chunk.stage(address.index(), mask_len, f);
        Ok(())
    }

    fn sync_filters(&mut self) {
        for event in self.storage.drain_events() {
            match event {
                Event::Created(id) => {
                    if let Some(archetype) = self.storage.archetype(id) {
                        self.filters.on_archetype_created(id, archetype.mask());
                    }
                }
                Event::Recycled(id) => self.filters.on_archetype_recycled(id),
            }
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::with_valid_config(Config::default())
    }
}

struct Writer<'a> {
    registry: &'a component::Registry,
    components: &'a mut ComponentsStorage,
    slot: usize,
}

impl Target for Writer<'_> {
    fn apply<C: Component>(&mut self, value: C) {
        if let Some(id) = self.registry.get::<C>() {
            self.components.write(self.slot, id, value);
        }
    }
}
