//! Entity identities and addresses.
//!
//! An entity is a bare [`EntityId`]: a 64-bit value issued monotonically by the world's
//! [`Allocator`] and never zero. It carries no data and keeps its value for its whole life, even
//! when structural changes move it to another archetype.
//!
//! Where the entity's components currently live is an [`EntityAddress`]. Addresses are volatile:
//! a sync point may migrate, compact or rebalance the slot an address names, so an address is only
//! meaningful until the next sync point. Archetype and chunk handles are generation stamped, so an
//! address into a recycled archetype or chunk is detected rather than silently read.

use std::{
    fmt,
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::ecs::storage::{archetype, chunk};

/// Stable identity of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(NonZeroU64);

impl EntityId {
    /// Construct an id from a raw value, which must not be zero.
    #[inline]
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    /// The raw id value.
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// Issues entity ids. Safe to share between threads so chunk systems can reserve ids for entities
/// they queue for creation.
#[derive(Debug, Default)]
pub struct Allocator {
    issued: AtomicU64,
}

impl Allocator {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next entity id.
    #[inline]
    pub fn alloc(&self) -> EntityId {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        EntityId(NonZeroU64::MIN.saturating_add(n))
    }

    /// Number of ids issued so far.
    #[inline]
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

/// Location of an entity's slot: archetype, chunk within the archetype, slot within the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityAddress {
    archetype: archetype::Id,
    chunk: chunk::Index,
    index: u32,
}

impl EntityAddress {
    #[inline]
    pub const fn new(archetype: archetype::Id, chunk: chunk::Index, index: u32) -> Self {
        Self {
            archetype,
            chunk,
            index,
        }
    }

    #[inline]
    pub fn archetype(&self) -> archetype::Id {
        self.archetype
    }

    #[inline]
    pub fn chunk(&self) -> chunk::Index {
        self.chunk
    }

    /// Slot index within the chunk.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread};

    #[test]
    fn ids_are_non_zero_and_monotonic() {
        // Given
        let allocator = Allocator::new();

        // When
        let first = allocator.alloc();
        let second = allocator.alloc();

        // Then
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 2);
        assert!(first < second);
        assert_eq!(allocator.issued(), 2);
    }

    #[test]
    fn zero_is_not_an_id() {
        assert_eq!(EntityId::new(0), None);
        assert_eq!(EntityId::new(5).map(|id| id.get()), Some(5));
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        // Given
        let allocator = Arc::new(Allocator::new());

        // When
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || (0..250).map(|_| allocator.alloc()).collect::<Vec<_>>())
            })
            .collect();

        let ids: HashSet<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        // Then
        assert_eq!(ids.len(), 1000);
    }
}
