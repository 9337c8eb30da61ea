use std::sync::Arc;

use parking_lot::Mutex;

use crate::ecs::{
    bitset::BitSet,
    entity::EntityId,
    migration::Migration,
    storage::{
        arena::Handle,
        components::{ComponentsStorage, Layout},
        pool::Pool,
    },
};

/// Index of a chunk within its archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index(Handle);

impl Index {
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
}

/// A fixed capacity block of entities sharing one archetype.
///
/// Slots `0..len` are live and packed: removal swaps the last entity into the freed slot. Each
/// slot also owns a lazily created [`Migration`] ledger, guarded by its own lock so chunk systems
/// can stage structural changes while other slots are being processed.
pub struct Chunk {
    index: Index,
    entities: Vec<EntityId>,
    components: ComponentsStorage,
    migrations: Vec<Mutex<Option<Migration>>>,
    marked: BitSet,
    capacity: usize,
}

impl Chunk {
    pub(crate) fn new(index: Index, layout: Arc<Layout>, capacity: usize, pool: &mut Pool) -> Self {
        let mut migrations = Vec::with_capacity(capacity);
        migrations.resize_with(capacity, || Mutex::new(None));

        Self {
            index,
            entities: pool.take_entities(capacity),
            components: ComponentsStorage::new(layout, capacity, pool),
            migrations,
            marked: BitSet::new(capacity),
            capacity,
        }
    }

    /// Return the entity array and blob to the pool.
    pub(crate) fn release(self, pool: &mut Pool) {
        pool.return_entities(self.entities);
        self.components.release(pool);
    }

    #[inline]
    pub fn index(&self) -> Index {
        self.index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entities.len() == self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    #[inline]
    pub fn entity(&self, slot: usize) -> Option<EntityId> {
        self.entities.get(slot).copied()
    }

    #[inline]
    pub fn components(&self) -> &ComponentsStorage {
        &self.components
    }

    #[inline]
    pub fn components_mut(&mut self) -> &mut ComponentsStorage {
        &mut self.components
    }

    /// Append an entity with zeroed components, returning its slot.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is full.
    pub(crate) fn add(&mut self, entity: EntityId) -> usize {
        assert!(!self.is_full(), "chunk is full");
        let slot = self.entities.len();
        self.entities.push(entity);
        self.components.zero_slot(slot);
        slot
    }

    /// Swap-remove the entity at `slot`. Returns the entity that moved into `slot`, if any.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not live.
    pub(crate) fn remove(&mut self, slot: usize) -> Option<EntityId> {
        assert!(slot < self.len(), "slot {slot} out of range");
        let last = self.len() - 1;

        self.components.copy_slot(last, slot);
        self.entities.swap_remove(slot);

        let moved = self.migrations[last].get_mut().take();
        *self.migrations[slot].get_mut() = if slot != last { moved } else { None };

        let moved_marked = self.marked.is_set(last);
        self.marked.clear(last);
        self.marked.put(slot, moved_marked && slot != last);

        (slot != last).then(|| self.entities[slot])
    }

    /// Flag a live slot for removal at the next sync point.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not live.
    pub(crate) fn mark(&mut self, slot: usize) {
        assert!(slot < self.len(), "slot {slot} out of range");
        self.marked.set(slot);
    }

    /// Flag every live slot for removal.
    pub(crate) fn mark_all(&mut self) {
        self.marked.set_all(true, self.len());
    }

    #[inline]
    pub fn is_marked(&self, slot: usize) -> bool {
        self.marked.is_set(slot)
    }

    #[inline]
    pub fn marked_count(&self) -> usize {
        self.marked.count_set()
    }

    /// Remove every marked slot, highest slot first so swaps only ever pull in unmarked entities.
    pub(crate) fn remove_marked(&mut self) -> usize {
        let marked: Vec<_> = self.marked.iter_rev().filter(|(_, set)| *set).map(|(slot, _)| slot).collect();
        for slot in &marked {
            self.remove(*slot);
        }
        self.marked.clear_all();
        marked.len()
    }

    /// Run `f` against the migration ledger of `slot`, creating it on first use.
    ///
    /// Safe to call from several threads for different slots of the same chunk.
    pub fn stage(&self, slot: usize, mask_len: usize, f: impl FnOnce(&mut Migration)) {
        assert!(slot < self.len(), "slot {slot} out of range");
        let mut ledger = self.migrations[slot].lock();
        f(ledger.get_or_insert_with(|| Migration::new(mask_len)));
    }

    /// Inspect the migration ledger of `slot` without creating it.
    pub fn staged<R>(&self, slot: usize, f: impl FnOnce(Option<&Migration>) -> R) -> R {
        match self.migrations.get(slot) {
            Some(ledger) => f(ledger.lock().as_ref()),
            None => f(None),
        }
    }

    #[inline]
    pub fn has_migration(&self, slot: usize) -> bool {
        self.migrations.get(slot).is_some_and(|ledger| ledger.lock().is_some())
    }

    pub(crate) fn take_migration(&mut self, slot: usize) -> Option<Migration> {
        self.migrations.get_mut(slot)?.get_mut().take()
    }

    /// Move the last `count` entities of `other` to the end of this chunk.
    pub(crate) fn combine_with(&mut self, other: &mut Chunk, count: usize) {
        assert!(count <= other.len(), "not enough entities to move");
        assert!(self.len() + count <= self.capacity, "combined chunk exceeds capacity");

        let from = other.len() - count;
        self.components.combine_with(self.len(), &other.components, from, count);
        self.entities.extend_from_slice(&other.entities[from..]);
        other.entities.truncate(from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::{Component, Registry};
    use crate::ecs::storage::arena::Arena;

    #[derive(Component, Clone, Copy, Debug, PartialEq)]
    struct Health(u32);

    struct Fixture {
        registry: Registry,
        layout: Arc<Layout>,
        pool: Pool,
        indexes: Arena<()>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Registry::new(8);
            let health = registry.register::<Health>().unwrap();
            let mask = BitSet::from_bits(8, [health.index()]);
            let layout = Arc::new(Layout::new(&mask, |id| registry.info(id)));
            Self {
                registry,
                layout,
                pool: Pool::new(),
                indexes: Arena::default(),
            }
        }

        fn chunk(&mut self, capacity: usize) -> Chunk {
            let index = Index::new(self.indexes.insert_with(|_| ()));
            Chunk::new(index, Arc::clone(&self.layout), capacity, &mut self.pool)
        }

        fn fill(&self, chunk: &mut Chunk, values: &[u32]) {
            let id = self.registry.get::<Health>().unwrap();
            for value in values {
                let slot = chunk.add(EntityId::new(*value as u64).unwrap());
                chunk.components_mut().write(slot, id, Health(*value));
            }
        }

        fn healths(&self, chunk: &Chunk) -> Vec<u32> {
            let id = self.registry.get::<Health>().unwrap();
            (0..chunk.len())
                .map(|slot| chunk.components().read::<Health>(slot, id).unwrap().0)
                .collect()
        }
    }

    #[test]
    fn add_until_full() {
        // Given
        let mut fixture = Fixture::new();
        let mut chunk = fixture.chunk(2);

        // When
        fixture.fill(&mut chunk, &[1, 2]);

        // Then
        assert!(chunk.is_full());
        assert_eq!(chunk.entities().len(), 2);
    }

    #[test]
    #[should_panic(expected = "chunk is full")]
    fn add_past_capacity_panics() {
        let mut fixture = Fixture::new();
        let mut chunk = fixture.chunk(1);
        fixture.fill(&mut chunk, &[1, 2]);
    }

    #[test]
    fn remove_swaps_last_into_slot() {
        // Given
        let mut fixture = Fixture::new();
        let mut chunk = fixture.chunk(4);
        fixture.fill(&mut chunk, &[10, 20, 30]);

        // When
        let moved = chunk.remove(0);

        // Then
        assert_eq!(moved.map(|e| e.get()), Some(30));
        assert_eq!(fixture.healths(&chunk), vec![30, 20]);
    }

    #[test]
    fn remove_marked_keeps_unmarked_entities() {
        // Given
        let mut fixture = Fixture::new();
        let mut chunk = fixture.chunk(8);
        fixture.fill(&mut chunk, &[1, 2, 3, 4, 5]);
        chunk.mark(0);
        chunk.mark(3);
        chunk.mark(4);

        // When
        let removed = chunk.remove_marked();

        // Then
        assert_eq!(removed, 3);
        assert_eq!(chunk.marked_count(), 0);
        let mut remaining = fixture.healths(&chunk);
        remaining.sort();
        assert_eq!(remaining, vec![2, 3]);
    }

    #[test]
    fn staged_migration_follows_swapped_entity() {
        // Given
        let mut fixture = Fixture::new();
        let mut chunk = fixture.chunk(4);
        fixture.fill(&mut chunk, &[1, 2, 3]);
        chunk.stage(2, 8, |migration| migration.remove(crate::ecs::component::Id::new(0)));

        // When
        chunk.remove(0);

        // Then
        assert!(chunk.has_migration(0));
        assert!(!chunk.has_migration(2));
    }

    #[test]
    fn combine_moves_tail_entities() {
        // Given
        let mut fixture = Fixture::new();
        let mut dest = fixture.chunk(4);
        let mut source = fixture.chunk(4);
        fixture.fill(&mut dest, &[1]);
        fixture.fill(&mut source, &[2, 3, 4]);

        // When
        dest.combine_with(&mut source, 2);

        // Then
        assert_eq!(fixture.healths(&dest), vec![1, 3, 4]);
        assert_eq!(fixture.healths(&source), vec![2]);
        assert_eq!(dest.entity(2).map(|e| e.get()), Some(4));
    }
}
