//! Chunked archetype storage.
//!
//! [`Storage`] owns every [`Archetype`](archetype::Archetype) of a world together with the
//! [`Pool`](pool::Pool) their chunks draw memory from. It is the only code that changes archetype
//! membership, and it only does so through `&mut self`, which the world only hands out outside of
//! system execution.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ Storage                                                   │
//! │  by_mask: BitSet → archetype::Id (hash + equality)        │
//! │  archetypes: Arena<Archetype>                             │
//! │  pool: recycled entity arrays and blobs                   │
//! └──────────────┬────────────────────────────────────────────┘
//!                │
//! ┌──────────────▼──────────────┐
//! │ Archetype {Position, Vel}   │  layout: offsets + stride, computed once
//! │  chunks: Arena<Chunk>       │
//! └──────────────┬──────────────┘
//!                │
//! ┌──────────────▼──────────────┐
//! │ Chunk (capacity N)          │  entities: [EntityId; len]
//! │  ComponentsStorage          │  blob: N * stride bytes
//! │  migrations / marked slots  │
//! └─────────────────────────────┘
//! ```
//!
//! # Identity
//!
//! Archetypes are keyed by their component mask. Two entities spawned with the same components,
//! in any declaration order, land in the same archetype. The empty archetype (no components)
//! always exists and is never recycled; every other archetype is recycled as soon as its last
//! entity leaves, and its id stops resolving.
//!
//! # Events
//!
//! Creation and recycling are recorded as [`Event`]s so the world can keep filter caches current
//! without rescanning.

pub mod archetype;
pub(crate) mod arena;
pub(crate) mod blob;
pub mod chunk;
pub mod components;
pub(crate) mod pool;

use std::collections::HashMap;

pub use blob::BLOB_ALIGN;

use crate::{
    core::config::Config,
    ecs::{
        bitset::BitSet,
        component,
        entity::{EntityAddress, EntityId},
        storage::{
            archetype::Archetype,
            arena::Arena,
            chunk::Chunk,
            components::Layout,
            pool::Pool,
        },
    },
};

/// Archetype lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Created(archetype::Id),
    Recycled(archetype::Id),
}

pub struct Storage {
    archetypes: Arena<Archetype>,
    by_mask: HashMap<BitSet, archetype::Id>,
    empty: archetype::Id,
    pool: Pool,
    events: Vec<Event>,
    mask_len: usize,
    config: Config,
}

impl Storage {
    /// Create storage for a component space of `mask_len` components, with the empty archetype.
    pub fn new(config: &Config, mask_len: usize) -> Self {
        let mut storage = Self {
            archetypes: Arena::with_capacity(config.expected_archetypes),
            by_mask: HashMap::with_capacity(config.expected_archetypes),
            empty: archetype::Id::new(arena::Handle::default()),
            pool: Pool::new(),
            events: Vec::new(),
            mask_len,
            config: config.clone(),
        };

        let empty = BitSet::new(mask_len);
        storage.empty = storage.create(empty, |_| None);
        storage
    }

    /// Number of components an archetype mask spans.
    #[inline]
    pub fn mask_len(&self) -> usize {
        self.mask_len
    }

    /// The archetype of entities without components.
    #[inline]
    pub fn empty_archetype(&self) -> archetype::Id {
        self.empty
    }

    #[inline]
    pub fn archetype(&self, id: archetype::Id) -> Option<&Archetype> {
        self.archetypes.get(id.handle())
    }

    #[inline]
    pub fn archetype_mut(&mut self, id: archetype::Id) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.handle())
    }

    /// Live archetypes, the empty archetype included.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter().map(|(_, archetype)| archetype)
    }

    pub fn archetype_ids(&self) -> Vec<archetype::Id> {
        self.archetypes.handles().into_iter().map(archetype::Id::new).collect()
    }

    #[inline]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Find the archetype with exactly the given components.
    #[inline]
    pub fn find(&self, mask: &BitSet) -> Option<archetype::Id> {
        self.by_mask.get(mask).copied()
    }

    /// Find or create the archetype with exactly the given components.
    pub fn get_or_create(&mut self, mask: &BitSet, registry: &component::Registry) -> archetype::Id {
        if let Some(id) = self.find(mask) {
            return id;
        }
        self.create(mask.clone(), |id| registry.info(id))
    }

    #[inline]
    pub fn chunk(&self, address: EntityAddress) -> Option<&Chunk> {
        self.archetype(address.archetype())?.chunk(address.chunk())
    }

    #[inline]
    pub fn chunk_mut(&mut self, address: EntityAddress) -> Option<&mut Chunk> {
        self.archetype_mut(address.archetype())?.chunk_mut(address.chunk())
    }

    /// Returns `true` if the address names a live slot.
    pub fn contains(&self, address: EntityAddress) -> bool {
        self.chunk(address).is_some_and(|chunk| address.index() < chunk.len())
    }

    /// The entity at an address, if the address is live.
    pub fn entity(&self, address: EntityAddress) -> Option<EntityId> {
        self.chunk(address)?.entity(address.index())
    }

    /// Find an entity by scanning every chunk.
    pub fn locate(&self, entity: EntityId) -> Option<EntityAddress> {
        self.archetypes.iter().find_map(|(handle, archetype)| {
            archetype.chunks().find_map(|chunk| {
                let slot = chunk.entities().iter().position(|e| *e == entity)?;
                Some(EntityAddress::new(archetype::Id::new(handle), chunk.index(), slot as u32))
            })
        })
    }

    /// Add an entity with zeroed components to an archetype.
    pub fn add_entity(&mut self, archetype: archetype::Id, entity: EntityId) -> Option<EntityAddress> {
        let archetype = self.archetypes.get_mut(archetype.handle())?;
        Some(archetype.add_entity(entity, &mut self.pool))
    }

    /// Remove an entity right away, recycling its archetype if it empties. Only valid outside of
    /// system execution; addresses into the same chunk may shift.
    pub fn remove_entity(&mut self, address: EntityAddress) -> bool {
        if !self.contains(address) {
            return false;
        }
        if let Some(archetype) = self.archetypes.get_mut(address.archetype().handle()) {
            archetype.remove_entity(address, &mut self.pool);
        }
        self.recycle_if_empty(address.archetype());
        true
    }

    /// Flag an entity for removal at the next sync point.
    pub fn mark(&mut self, address: EntityAddress) -> bool {
        self.archetype_mut(address.archetype())
            .is_some_and(|archetype| archetype.mark_for_removal(address))
    }

    /// Flag every entity of a chunk for removal at the next sync point.
    pub fn mark_chunk(&mut self, archetype: archetype::Id, chunk: chunk::Index) -> bool {
        self.archetype_mut(archetype)
            .is_some_and(|archetype| archetype.mark_chunk_for_removal(chunk))
    }

    /// Apply every staged migration. Returns how many entities changed archetype.
    pub fn apply_migrations(&mut self, registry: &component::Registry) -> usize {
        let mut migrated = 0;

        for id in self.archetype_ids() {
            let Some(archetype) = self.archetype(id) else {
                continue;
            };
            let base = archetype.mask().clone();

            for chunk_index in archetype.chunk_indexes() {
                let mut slot = 0;
                loop {
                    let address = EntityAddress::new(id, chunk_index, slot as u32);
                    slot += 1;

                    let Some(chunk) = self.chunk_mut(address) else {
                        break;
                    };
                    if address.index() >= chunk.len() {
                        break;
                    }
                    let Some(migration) = chunk.take_migration(address.index()) else {
                        continue;
                    };
                    // Destroyed this frame; nothing to move.
                    if chunk.is_marked(address.index()) {
                        continue;
                    }

                    let target = migration.apply_mask(&base);
                    if target == base {
                        migration.apply_values(chunk.components_mut(), address.index());
                        continue;
                    }

                    let Some(entity) = chunk.entity(address.index()) else {
                        continue;
                    };
                    let destination = self.get_or_create(&target, registry);
                    let Some(new_address) = self.move_entity(address, destination, entity) else {
                        log::warn!("failed to migrate {entity} from {address:?}");
                        continue;
                    };
                    if let Some(chunk) = self.chunk_mut(new_address) {
                        migration.apply_values(chunk.components_mut(), new_address.index());
                    }
                    self.mark(address);
                    migrated += 1;
                }
            }
        }

        migrated
    }

    /// Remove every marked entity and recycle archetypes that emptied. Returns how many entities
    /// were removed.
    pub fn remove_marked(&mut self) -> usize {
        let mut removed = 0;
        for id in self.archetype_ids() {
            if let Some(archetype) = self.archetypes.get_mut(id.handle()) {
                removed += archetype.remove_marked(&mut self.pool);
            }
            self.recycle_if_empty(id);
        }
        removed
    }

    /// Compact partially filled chunks of every archetype flagged by a removal.
    pub fn rebalance(&mut self) {
        for archetype in self.archetypes.values_mut() {
            archetype.rebalance(&mut self.pool);
        }
    }

    /// Take the archetype lifecycle events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Blobs waiting in the pool for reuse.
    #[inline]
    pub fn free_blobs(&self) -> usize {
        self.pool.free_blobs()
    }

    /// Blobs ever allocated by the pool.
    #[inline]
    pub fn allocated_blobs(&self) -> usize {
        self.pool.allocated_blobs()
    }

    fn create(&mut self, mask: BitSet, info: impl Fn(component::Id) -> Option<component::Info>) -> archetype::Id {
        let layout = Layout::new(&mask, info);
        let capacity = self.config.chunk_capacity(layout.stride());
        let expected_chunks = self.config.expected_chunks_in_archetype;
        let archetype_mask = mask.clone();

        let handle = self.archetypes.insert_with(|handle| {
            Archetype::new(archetype::Id::new(handle), archetype_mask, layout, capacity, expected_chunks)
        });
        let id = archetype::Id::new(handle);
        log::debug!(
            "created archetype {}#{} with components {:?}",
            id.index(),
            id.generation(),
            mask.ones().collect::<Vec<_>>()
        );

        self.by_mask.insert(mask, id);
        self.events.push(Event::Created(id));
        id
    }

    fn recycle_if_empty(&mut self, id: archetype::Id) {
        if id == self.empty {
            return;
        }
        let is_empty = self.archetype(id).is_some_and(Archetype::is_empty);
        if !is_empty {
            return;
        }

        if let Some(archetype) = self.archetypes.remove(id.handle()) {
            self.by_mask.remove(archetype.mask());
            archetype.release(&mut self.pool);
            self.events.push(Event::Recycled(id));
            log::debug!("recycled archetype {}#{}", id.index(), id.generation());
        }
    }

    fn move_entity(&mut self, from: EntityAddress, to: archetype::Id, entity: EntityId) -> Option<EntityAddress> {
        let (source, destination) = self.archetypes.get_two_mut(from.archetype().handle(), to.handle())?;
        let new_address = destination.add_entity(entity, &mut self.pool);

        let source_chunk = source.chunk(from.chunk())?;
        let destination_chunk = destination.chunk_mut(new_address.chunk())?;
        source_chunk.components().migrate_all_components(
            from.index(),
            destination_chunk.components_mut(),
            new_address.index(),
        );
        Some(new_address)
    }
}
