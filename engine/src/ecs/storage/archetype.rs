//! Archetypes: the storage unit for one exact set of components.
//!
//! An archetype owns a list of fixed capacity [`Chunk`]s behind a generation stamped arena.
//! Entities are added to the last non-full chunk (tracked in a free list, so no scan), and a new
//! chunk is only allocated once every chunk is full. A chunk that empties is released straight
//! back to the [`Pool`].
//!
//! Removals leave chunks partially filled. Instead of compacting on every removal the archetype
//! flags itself and [`rebalance`](Archetype::rebalance) runs at the sync point:
//!
//! ```text
//!  before (capacity 4):   [##..]  [#...]  [###.]
//!  sorted by occupancy:   [#...]  [##..]  [###.]
//!                          src ───────────► dst      pour 1, dst full, src drained
//!                                  src ──► (next dst)
//!  after:                 [####]  [#...]
//! ```

use std::sync::Arc;

use crate::ecs::{
    bitset::BitSet,
    entity::{EntityAddress, EntityId},
    storage::{
        arena::{Arena, Handle},
        chunk::{self, Chunk},
        components::Layout,
        pool::Pool,
    },
};

/// Identifies a live archetype within a world. Ids of recycled archetypes never resolve again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(Handle);

impl Id {
    #[inline]
    pub(crate) fn new(handle: Handle) -> Self {
        Self(handle)
    }

    #[inline]
    pub(crate) fn handle(&self) -> Handle {
        self.0
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0.index()
    }

    /// Bumped each time the slot at [`index`](Id::index) is recycled.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.0.generation()
    }
}

pub struct Archetype {
    id: Id,
    mask: BitSet,
    layout: Arc<Layout>,
    chunks: Arena<Chunk>,
    not_full: Vec<chunk::Index>,
    chunk_capacity: usize,
    entity_count: usize,
    needs_rebalance: bool,
}

impl Archetype {
    pub(crate) fn new(id: Id, mask: BitSet, layout: Layout, chunk_capacity: usize, expected_chunks: usize) -> Self {
        debug_assert!(chunk_capacity > 0);
        Self {
            id,
            mask,
            layout: Arc::new(layout),
            chunks: Arena::with_capacity(expected_chunks),
            not_full: Vec::with_capacity(expected_chunks),
            chunk_capacity,
            entity_count: 0,
            needs_rebalance: false,
        }
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// The component set of this archetype.
    #[inline]
    pub fn mask(&self) -> &BitSet {
        &self.mask
    }

    #[inline]
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entity_count == 0
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Entities per chunk.
    #[inline]
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    #[inline]
    pub fn chunk(&self, index: chunk::Index) -> Option<&Chunk> {
        self.chunks.get(index.handle())
    }

    #[inline]
    pub fn chunk_mut(&mut self, index: chunk::Index) -> Option<&mut Chunk> {
        self.chunks.get_mut(index.handle())
    }

    /// Live chunks in slot order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().map(|(_, chunk)| chunk)
    }

    pub fn chunk_indexes(&self) -> Vec<chunk::Index> {
        self.chunks.handles().into_iter().map(chunk::Index::new).collect()
    }

    /// Add an entity with zeroed components.
    pub(crate) fn add_entity(&mut self, entity: EntityId, pool: &mut Pool) -> EntityAddress {
        let index = match self.not_full.last() {
            Some(index) => *index,
            None => self.allocate_chunk(pool),
        };

        let Some(chunk) = self.chunks.get_mut(index.handle()) else {
            unreachable!("free chunk list names a released chunk");
        };

        let slot = chunk.add(entity);
        if chunk.is_full() {
            self.not_full.pop();
        }
        self.entity_count += 1;

        EntityAddress::new(self.id, index, slot as u32)
    }

    /// Remove an entity immediately. Returns the entity swapped into the freed slot, if any.
    ///
    /// # Panics
    ///
    /// Panics if the address does not name a live slot of this archetype.
    pub(crate) fn remove_entity(&mut self, address: EntityAddress, pool: &mut Pool) -> Option<EntityId> {
        assert_eq!(address.archetype(), self.id, "address belongs to another archetype");
        let Some(chunk) = self.chunks.get_mut(address.chunk().handle()) else {
            panic!("address names a released chunk");
        };

        let was_full = chunk.is_full();
        let moved = chunk.remove(address.index());
        self.entity_count -= 1;
        self.after_removal(address.chunk(), was_full, pool);
        moved
    }

    /// Flag a slot for removal at the next sync point. Returns `false` for a stale address.
    pub(crate) fn mark_for_removal(&mut self, address: EntityAddress) -> bool {
        if address.archetype() != self.id {
            return false;
        }
        match self.chunks.get_mut(address.chunk().handle()) {
            Some(chunk) if address.index() < chunk.len() => {
                chunk.mark(address.index());
                true
            }
            _ => false,
        }
    }

    /// Flag every entity of a chunk for removal. Returns `false` for a stale chunk index.
    pub(crate) fn mark_chunk_for_removal(&mut self, index: chunk::Index) -> bool {
        match self.chunks.get_mut(index.handle()) {
            Some(chunk) => {
                chunk.mark_all();
                true
            }
            None => false,
        }
    }

    /// Remove every marked entity, releasing chunks that empty. Returns how many were removed.
    pub(crate) fn remove_marked(&mut self, pool: &mut Pool) -> usize {
        let mut total = 0;
        for handle in self.chunks.handles() {
            let Some(chunk) = self.chunks.get_mut(handle) else {
                continue;
            };
            if chunk.marked_count() == 0 {
                continue;
            }

            let was_full = chunk.is_full();
            let removed = chunk.remove_marked();
            self.entity_count -= removed;
            total += removed;
            self.after_removal(chunk::Index::new(handle), was_full, pool);
        }
        total
    }

    /// Pour the emptiest chunks into the fullest ones, releasing chunks that drain. Only runs when
    /// a removal left partially filled chunks behind.
    pub(crate) fn rebalance(&mut self, pool: &mut Pool) {
        if !self.needs_rebalance {
            return;
        }
        self.needs_rebalance = false;

        let mut partial: Vec<(chunk::Index, usize)> = self
            .not_full
            .iter()
            .filter_map(|index| self.chunks.get(index.handle()).map(|chunk| (*index, chunk.len())))
            .collect();
        if partial.len() < 2 {
            return;
        }
        partial.sort_by_key(|(_, len)| *len);

        let (mut low, mut high) = (0, partial.len() - 1);
        while low < high {
            let (source_index, dest_index) = (partial[low].0, partial[high].0);
            let Some((source, dest)) = self.chunks.get_two_mut(source_index.handle(), dest_index.handle()) else {
                break;
            };

            let count = (dest.capacity() - dest.len()).min(source.len());
            dest.combine_with(source, count);

            let dest_full = dest.is_full();
            if source.is_empty() {
                self.release_chunk(source_index, pool);
                low += 1;
            }
            if dest_full {
                high -= 1;
            }
        }

        self.not_full = self
            .chunks
            .iter()
            .filter(|(_, chunk)| !chunk.is_full())
            .map(|(handle, _)| chunk::Index::new(handle))
            .collect();
        log::trace!("rebalanced archetype {:?} into {} chunks", self.id, self.chunks.len());
    }

    /// Release every chunk back to the pool.
    pub(crate) fn release(mut self, pool: &mut Pool) {
        for handle in self.chunks.handles() {
            if let Some(chunk) = self.chunks.remove(handle) {
                chunk.release(pool);
            }
        }
    }

    fn allocate_chunk(&mut self, pool: &mut Pool) -> chunk::Index {
        let layout = &self.layout;
        let capacity = self.chunk_capacity;
        let handle = self
            .chunks
            .insert_with(|handle| Chunk::new(chunk::Index::new(handle), Arc::clone(layout), capacity, pool));
        let index = chunk::Index::new(handle);
        self.not_full.push(index);

        log::debug!(
            "allocated chunk {} for archetype {:?} ({} entities of {} bytes)",
            index.index(),
            self.id,
            capacity,
            self.layout.stride()
        );
        index
    }

    fn after_removal(&mut self, index: chunk::Index, was_full: bool, pool: &mut Pool) {
        let Some(chunk) = self.chunks.get(index.handle()) else {
            return;
        };

        if chunk.is_empty() {
            self.release_chunk(index, pool);
            return;
        }

        if was_full {
            self.not_full.push(index);
        }
        if self.not_full.len() > 1 {
            self.needs_rebalance = true;
        }
    }

    fn release_chunk(&mut self, index: chunk::Index, pool: &mut Pool) {
        self.not_full.retain(|other| *other != index);
        if let Some(chunk) = self.chunks.remove(index.handle()) {
            chunk.release(pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{Component, Registry};
    use crate::ecs::entity::Allocator;

    #[derive(Component, Clone, Copy, Debug, PartialEq)]
    struct Health(u32);

    fn archetype(capacity: usize) -> (Archetype, Registry) {
        let registry = Registry::new(8);
        let health = registry.register::<Health>().unwrap();
        let mask = BitSet::from_bits(8, [health.index()]);
        let layout = Layout::new(&mask, |id| registry.info(id));
        let mut handles = Arena::<()>::default();
        let id = Id::new(handles.insert_with(|_| ()));
        (Archetype::new(id, mask, layout, capacity, 2), registry)
    }

    #[test]
    fn capacity_plus_one_allocates_second_chunk() {
        // Given
        let (mut archetype, _) = archetype(4);
        let mut pool = Pool::new();
        let allocator = Allocator::new();

        // When
        let addresses: Vec<_> = (0..5).map(|_| archetype.add_entity(allocator.alloc(), &mut pool)).collect();

        // Then
        assert_eq!(archetype.chunk_count(), 2);
        assert_eq!(archetype.entity_count(), 5);
        assert_eq!(addresses[3].chunk(), addresses[0].chunk());
        assert_ne!(addresses[4].chunk(), addresses[0].chunk());
        assert_eq!(addresses[4].index(), 0);
    }

    #[test]
    fn removing_everything_releases_chunks() {
        // Given
        let (mut archetype, _) = archetype(2);
        let mut pool = Pool::new();
        let allocator = Allocator::new();
        let addresses: Vec<_> = (0..4).map(|_| archetype.add_entity(allocator.alloc(), &mut pool)).collect();

        // When
        for address in &addresses {
            assert!(archetype.mark_for_removal(*address));
        }
        let removed = archetype.remove_marked(&mut pool);

        // Then
        assert_eq!(removed, 4);
        assert!(archetype.is_empty());
        assert_eq!(archetype.chunk_count(), 0);
        assert_eq!(pool.free_blobs(), 2);
    }

    #[test]
    fn released_chunk_slot_is_reused() {
        // Given
        let (mut archetype, _) = archetype(1);
        let mut pool = Pool::new();
        let allocator = Allocator::new();
        let first = archetype.add_entity(allocator.alloc(), &mut pool);
        archetype.remove_entity(first, &mut pool);

        // When
        let second = archetype.add_entity(allocator.alloc(), &mut pool);

        // Then
        assert_eq!(second.chunk().index(), first.chunk().index());
        assert_ne!(second.chunk(), first.chunk());
        assert!(archetype.chunk(first.chunk()).is_none());
        assert_eq!(pool.allocated_blobs(), 1);
    }

    #[test]
    fn stale_address_is_not_marked() {
        // Given
        let (mut archetype, _) = archetype(1);
        let mut pool = Pool::new();
        let allocator = Allocator::new();
        let address = archetype.add_entity(allocator.alloc(), &mut pool);
        archetype.remove_entity(address, &mut pool);

        // Then
        assert!(!archetype.mark_for_removal(address));
    }

    #[test]
    fn rebalance_compacts_partial_chunks() {
        // Given
        let (mut archetype, registry) = archetype(4);
        let health = registry.get::<Health>().unwrap();
        let mut pool = Pool::new();
        let allocator = Allocator::new();
        let addresses: Vec<_> = (0..12)
            .map(|i| {
                let address = archetype.add_entity(allocator.alloc(), &mut pool);
                archetype
                    .chunk_mut(address.chunk())
                    .unwrap()
                    .components_mut()
                    .write(address.index(), health, Health(i));
                address
            })
            .collect();

        // Leave 2 + 1 + 3 entities behind
        for i in [0, 1, 4, 5, 6, 8] {
            archetype.mark_for_removal(addresses[i]);
        }
        archetype.remove_marked(&mut pool);
        assert_eq!(archetype.chunk_count(), 3);

        // When
        archetype.rebalance(&mut pool);

        // Then
        assert_eq!(archetype.entity_count(), 6);
        assert_eq!(archetype.chunk_count(), 2);
        let mut values: Vec<u32> = archetype
            .chunks()
            .flat_map(|chunk| {
                (0..chunk.len()).map(move |slot| chunk.components().read::<Health>(slot, health).unwrap().0)
            })
            .collect();
        values.sort();
        assert_eq!(values, vec![2, 3, 7, 9, 10, 11]);
        assert_eq!(archetype.chunks().filter(|chunk| chunk.is_full()).count(), 1);
    }
}
