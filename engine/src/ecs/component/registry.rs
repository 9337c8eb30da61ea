use std::any::{self, TypeId};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::ecs::{
    component::{Component, Id, Info},
    error::{EcsError, Result},
    storage::BLOB_ALIGN,
};

/// A thread-safe, per-world component registry.
///
/// Lookups from `TypeId` to [`Id`] are lock-free reads via `DashMap`, so chunk systems running on
/// worker threads can resolve ids (and register a component they stage an add for) while other
/// chunks are processed. Registration takes a single shard and a short write lock on the info
/// table.
///
/// The registry is capped at a configured number of components: every mask in the world is sized
/// from that cap.
pub struct Registry {
    /// Map from TypeId to component Id. Lock-free reads via sharded concurrent hashmap.
    type_map: DashMap<TypeId, Id>,

    /// Registered component layouts, indexed by id. Protected by RwLock for rare writes.
    components: RwLock<Vec<Info>>,

    /// Maximum number of component types.
    limit: usize,
}

impl Registry {
    /// Create a new component registry admitting at most `limit` component types.
    #[inline]
    pub fn new(limit: usize) -> Self {
        Self {
            type_map: DashMap::new(),
            components: RwLock::new(Vec::new()),
            limit,
        }
    }

    /// Register a component type and get its identifier.
    ///
    /// Registration is idempotent: a type already registered returns its existing id. Fails when
    /// the registry is full or the type needs more alignment than chunk storage guarantees.
    pub fn register<C: Component>(&self) -> Result<Id> {
        let type_id = TypeId::of::<C>();

        // Fast path: check if already registered (lock-free read)
        if let Some(id) = self.type_map.get(&type_id) {
            return Ok(*id);
        }

        if align_of::<C>() > BLOB_ALIGN {
            return Err(EcsError::UnalignedComponent {
                component: any::type_name::<C>(),
                align: align_of::<C>(),
            });
        }

        // Slow path: the entry API keeps two racing threads from both allocating an id.
        let entry = self.type_map.entry(type_id).or_try_insert_with(|| {
            let mut components = self.components.write();
            if components.len() >= self.limit {
                return Err(EcsError::OutOfRange {
                    kind: "component types",
                    limit: self.limit,
                });
            }

            let id = Id::new(components.len() as u16);
            components.push(Info::of::<C>(id));
            log::debug!("registered component {} as {:?}", any::type_name::<C>(), id);
            Ok(id)
        })?;

        Ok(*entry.value())
    }

    /// Get the component ID for a provided type `C`, if registered.
    #[inline]
    pub fn get<C: Component>(&self) -> Option<Id> {
        self.type_map.get(&TypeId::of::<C>()).map(|entry| *entry.value())
    }

    /// Get the component info for a provided type `C`, if registered.
    #[inline]
    pub fn get_info<C: Component>(&self) -> Option<Info> {
        let id = self.get::<C>()?;
        self.info(id)
    }

    /// Get component info by ID.
    #[inline]
    pub fn info(&self, id: Id) -> Option<Info> {
        self.components.read().get(id.index()).copied()
    }

    /// Byte size of every registered component, indexed by id.
    pub fn sizes(&self) -> Vec<usize> {
        self.components.read().iter().map(Info::size).collect()
    }

    /// Number of registered component types.
    #[inline]
    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of component types; the bit length of every component mask.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }
}
