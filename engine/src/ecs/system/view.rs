use std::any::{self, Any};

use crate::ecs::{
    component::{self, Component},
    entity::{EntityAddress, EntityId},
    filter::Filter,
    storage::{
        archetype,
        chunk::{self, Chunk},
    },
};

/// Accesses a chunk view may perform without a matching dependency declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    /// Undeclared reads are allowed.
    Read,
    /// Undeclared reads and writes are allowed.
    Write,
}

/// What a chunk system sees of one chunk while it runs.
///
/// Component access is checked against the system's filter in debug builds: reading needs a
/// `read_only` or `read_write` declaration, writing needs `read_write`. Structural changes
/// ([`add`](Self::add), [`del`](Self::del)) are only staged and take effect at the next sync
/// point, so slot indexes stay valid for the whole run.
pub struct ChunkView<'w> {
    archetype: archetype::Id,
    chunk: &'w Chunk,
    registry: &'w component::Registry,
    filter: &'w Filter,
    context: Option<&'w (dyn Any + Send + Sync)>,
    unchecked: Option<Access>,
}

impl<'w> ChunkView<'w> {
    pub(crate) fn new(
        archetype: archetype::Id,
        chunk: &'w Chunk,
        registry: &'w component::Registry,
        filter: &'w Filter,
        context: Option<&'w (dyn Any + Send + Sync)>,
    ) -> Self {
        Self {
            archetype,
            chunk,
            registry,
            filter,
            context,
            unchecked: None,
        }
    }

    /// Disable dependency checks up to the given access for the rest of this run.
    pub fn allow_undeclared(&mut self, access: Access) {
        self.unchecked = Some(access);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    #[inline]
    pub fn archetype(&self) -> archetype::Id {
        self.archetype
    }

    /// Index of the viewed chunk within its archetype, for chunk-wide commands.
    #[inline]
    pub fn chunk_index(&self) -> chunk::Index {
        self.chunk.index()
    }

    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        self.chunk.entities()
    }

    /// # Panics
    ///
    /// Panics if `slot` is not live.
    #[inline]
    pub fn entity(&self, slot: usize) -> EntityId {
        self.entities()[slot]
    }

    #[inline]
    pub fn address(&self, slot: usize) -> EntityAddress {
        EntityAddress::new(self.archetype, self.chunk.index(), slot as u32)
    }

    /// Returns `true` if entities of this chunk have component `T`.
    pub fn has<T: Component>(&self) -> bool {
        self.registry
            .get::<T>()
            .is_some_and(|id| self.chunk.components().has(id))
    }

    /// Returns `true` if the slot is flagged for removal at the next sync point.
    #[inline]
    pub fn is_marked(&self, slot: usize) -> bool {
        self.chunk.is_marked(slot)
    }

    /// Read a copy of component `T` of `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the chunk lacks `T`, and in debug builds if `T` was not declared readable.
    #[inline]
    pub fn read<T: Component>(&self, slot: usize) -> T {
        *self.get::<T>(slot)
    }

    pub fn get<T: Component>(&self, slot: usize) -> &T {
        let id = self.checked_id::<T>(Access::Read);
        // Safety: writers of this component in this chunk are excluded by the scheduler for as
        // long as this system declares a read on it.
        unsafe { &*self.ptr::<T>(slot, id) }
    }

    pub fn get_mut<T: Component>(&mut self, slot: usize) -> &mut T {
        let id = self.checked_id::<T>(Access::Write);
        // Safety: `&mut self` keeps this the only reference handed out by this view, and the
        // scheduler never runs another system touching this component in parallel.
        unsafe { &mut *self.ptr::<T>(slot, id) }
    }

    /// Overwrite component `T` of `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the chunk lacks `T`, and in debug builds if `T` was not declared writable.
    pub fn write<T: Component>(&mut self, slot: usize, value: T) {
        *self.get_mut::<T>(slot) = value;
    }

    /// Stage adding a zeroed `T` to the entity in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the entity already has `T`.
    pub fn add<T: Component>(&self, slot: usize) {
        let id = self.structural_id::<T>();
        self.assert_absent::<T>(slot, id);
        self.chunk
            .stage(slot, self.registry.limit(), |migration| migration.add(id));
    }

    /// Stage adding `T` with a value to the entity in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the entity already has `T`.
    pub fn add_value<T: Component>(&self, slot: usize, value: T) {
        let id = self.structural_id::<T>();
        self.assert_absent::<T>(slot, id);
        self.chunk
            .stage(slot, self.registry.limit(), |migration| migration.add_value(id, value));
    }

    /// Stage removing `T` from the entity in `slot`. Removing an absent component is a no-op at
    /// the sync point.
    pub fn del<T: Component>(&self, slot: usize) {
        let id = self.structural_id::<T>();
        self.chunk
            .stage(slot, self.registry.limit(), |migration| migration.remove(id));
    }

    /// The context registered for the running system, if it has one of type `C`.
    pub fn context<C: Any>(&self) -> Option<&C> {
        self.context.and_then(|context| context.downcast_ref::<C>())
    }

    fn checked_id<T: Component>(&self, access: Access) -> component::Id {
        let Some(id) = self.registry.get::<T>() else {
            panic!("component {} is not part of this chunk", any::type_name::<T>());
        };
        if cfg!(debug_assertions) && self.unchecked.is_none_or(|allowed| allowed < access) {
            let declared = match access {
                Access::Read => self.filter.can_read(id),
                Access::Write => self.filter.can_write(id),
            };
            assert!(
                declared,
                "undeclared {} access to component {}",
                if access == Access::Read { "read" } else { "write" },
                any::type_name::<T>()
            );
        }
        id
    }

    fn structural_id<T: Component>(&self) -> component::Id {
        match self.registry.register::<T>() {
            Ok(id) => id,
            Err(error) => panic!("cannot stage {}: {error}", any::type_name::<T>()),
        }
    }

    fn assert_absent<T: Component>(&self, slot: usize, id: component::Id) {
        if !self.chunk.components().has(id) {
            return;
        }
        let removed = self
            .chunk
            .staged(slot, |migration| migration.is_some_and(|m| m.removed().is_set(id.index())));
        assert!(removed, "component {} is already present", any::type_name::<T>());
    }

    /// # Panics
    ///
    /// Panics if `slot` is not live or the chunk lacks the component.
    fn ptr<T: Component>(&self, slot: usize, id: component::Id) -> *mut T {
        assert!(slot < self.len(), "slot {slot} out of range");
        // Safety: `id` was resolved from `T` through the registry.
        match unsafe { self.chunk.components().ptr::<T>(slot, id) } {
            Some(ptr) => ptr.as_ptr(),
            None => panic!("component {} is not part of this chunk", any::type_name::<T>()),
        }
    }
}
