use crate::ecs::{
    entity::EntityAddress,
    storage::{Storage, archetype, chunk},
};

/// Iterates the addresses of every live entity in a set of archetypes, archetype by archetype and
/// chunk by chunk.
///
/// A query borrows the storage, so the world cannot change structurally while one is alive. Slots
/// marked for removal are still yielded until the next sync point.
pub struct Query<'w> {
    storage: &'w Storage,
    archetypes: Vec<archetype::Id>,
    next_archetype: usize,
    chunks: Vec<chunk::Index>,
    next_chunk: usize,
    current: Option<(archetype::Id, chunk::Index, usize)>,
    slot: usize,
}

impl<'w> Query<'w> {
    pub fn new(storage: &'w Storage, archetypes: Vec<archetype::Id>) -> Self {
        Self {
            storage,
            archetypes,
            next_archetype: 0,
            chunks: Vec::new(),
            next_chunk: 0,
            current: None,
            slot: 0,
        }
    }

    /// The archetypes this query walks.
    #[inline]
    pub fn archetypes(&self) -> &[archetype::Id] {
        &self.archetypes
    }

    /// Total number of entities in the matched archetypes.
    pub fn entity_count(&self) -> usize {
        self.archetypes
            .iter()
            .filter_map(|id| self.storage.archetype(*id))
            .map(|archetype| archetype.entity_count())
            .sum()
    }

    fn advance_chunk(&mut self) -> bool {
        loop {
            if let Some(index) = self.chunks.get(self.next_chunk).copied() {
                self.next_chunk += 1;
                let archetype = self.archetypes[self.next_archetype - 1];
                let len = self
                    .storage
                    .archetype(archetype)
                    .and_then(|a| a.chunk(index))
                    .map_or(0, |chunk| chunk.len());
                if len > 0 {
                    self.current = Some((archetype, index, len));
                    self.slot = 0;
                    return true;
                }
                continue;
            }

            let Some(id) = self.archetypes.get(self.next_archetype).copied() else {
                self.current = None;
                return false;
            };
            self.next_archetype += 1;
            self.chunks = self.storage.archetype(id).map(|a| a.chunk_indexes()).unwrap_or_default();
            self.next_chunk = 0;
        }
    }
}

impl Iterator for Query<'_> {
    type Item = EntityAddress;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((archetype, chunk, len)) = self.current {
                if self.slot < len {
                    let address = EntityAddress::new(archetype, chunk, self.slot as u32);
                    self.slot += 1;
                    return Some(address);
                }
            }
            if !self.advance_chunk() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::ecs::bitset::BitSet;
    use crate::ecs::component::{Component, Registry};
    use crate::ecs::entity::Allocator;

    #[derive(Component, Clone, Copy)]
    struct Marker;

    #[test]
    fn walks_every_chunk_of_every_archetype() {
        // Given
        let config = Config {
            chunk_entities_count: 3,
            ..Config::default()
        };
        let registry = Registry::new(8);
        let marker = registry.register::<Marker>().unwrap();
        let mut storage = Storage::new(&config, 8);
        let allocator = Allocator::new();
        let with_marker = storage.get_or_create(&BitSet::from_bits(8, [marker.index()]), &registry);
        let empty = storage.empty_archetype();
        for _ in 0..7 {
            storage.add_entity(with_marker, allocator.alloc());
        }
        for _ in 0..2 {
            storage.add_entity(empty, allocator.alloc());
        }

        // When
        let query = Query::new(&storage, vec![with_marker, empty]);
        let count = query.entity_count();
        let addresses: Vec<_> = query.collect();

        // Then
        assert_eq!(count, 9);
        assert_eq!(addresses.len(), 9);
        assert!(addresses.iter().all(|address| storage.contains(*address)));
        assert_eq!(addresses.iter().filter(|a| a.archetype() == with_marker).count(), 7);
    }

    #[test]
    fn empty_query() {
        let config = Config::default();
        let storage = Storage::new(&config, 8);
        assert_eq!(Query::new(&storage, Vec::new()).count(), 0);
    }
}
