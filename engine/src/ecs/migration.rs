//! Staged structural changes for one entity.
//!
//! Structural changes cannot happen while chunks are being iterated: moving an entity to another
//! archetype would invalidate the slot indexes and counts every running system holds. A chunk
//! system therefore only records its intent in a [`Migration`] attached to the entity's slot, and
//! the world's sync point is the single place that applies them:
//!
//! ```text
//!  target = base | added & !removed
//!  target == base  ->  write queued values in place
//!  otherwise       ->  get or create archetype(target)
//!                      add the entity there (same EntityId)
//!                      copy every component both archetypes share
//!                      write queued values
//!                      mark the old slot for removal
//! ```
//!
//! Adding a component and later removing it in the same frame cancels out (the last request for
//! a component wins), and a queued value for a component that ends up absent is dropped.

use std::mem::{self, MaybeUninit};
use std::ops::Range;
use std::ptr;

use crate::ecs::{
    bitset::BitSet,
    component::{self, Component},
    storage::components::ComponentsStorage,
};

#[derive(Clone)]
pub struct Migration {
    added: BitSet,
    removed: BitSet,
    values: Vec<(component::Id, Range<usize>)>,
    bytes: Vec<MaybeUninit<u8>>,
}

impl Migration {
    /// An empty migration over a component space of `mask_len` components.
    pub fn new(mask_len: usize) -> Self {
        Self {
            added: BitSet::new(mask_len),
            removed: BitSet::new(mask_len),
            values: Vec::new(),
            bytes: Vec::new(),
        }
    }

    /// Request a component (zeroed unless a value is queued).
    #[inline]
    pub fn add(&mut self, id: component::Id) {
        self.added.set(id.index());
        self.removed.clear(id.index());
    }

    /// Request a component with an explicit value.
    pub fn add_value<T: Component>(&mut self, id: component::Id, value: T) {
        self.add(id);

        let start = self.bytes.len();
        let size = mem::size_of::<T>();
        self.bytes.resize(start + size, MaybeUninit::uninit());
        // Safety: the destination range was just reserved; T is Copy so a bitwise copy is a move.
        unsafe {
            ptr::copy_nonoverlapping(
                (&value as *const T).cast::<MaybeUninit<u8>>(),
                self.bytes.as_mut_ptr().add(start),
                size,
            );
        }
        self.values.push((id, start..start + size));
    }

    /// Request removal of a component.
    #[inline]
    pub fn remove(&mut self, id: component::Id) {
        self.removed.set(id.index());
        self.added.clear(id.index());
    }

    #[inline]
    pub fn added(&self) -> &BitSet {
        &self.added
    }

    #[inline]
    pub fn removed(&self) -> &BitSet {
        &self.removed
    }

    /// Returns `true` if nothing has been requested.
    pub fn is_empty(&self) -> bool {
        !self.added.any_set() && !self.removed.any_set() && self.values.is_empty()
    }

    /// The component set an entity currently in `base` ends up with.
    pub fn apply_mask(&self, base: &BitSet) -> BitSet {
        let mut target = base.clone();
        target.or(&self.added);
        target.and_not(&self.removed);
        target
    }

    /// Write every queued value the storage has room for, in request order.
    pub fn apply_values(&self, storage: &mut ComponentsStorage, slot: usize) {
        for (id, range) in &self.values {
            if self.removed.is_set(id.index()) {
                continue;
            }
            storage.write_raw(slot, *id, &self.bytes[range.clone()]);
        }
    }

    /// Fold another migration into this one, as if its requests were made after ours.
    pub fn merge(&mut self, other: &Migration) {
        for bit in other.added.ones() {
            self.add(component::Id::new(bit as u16));
        }
        for bit in other.removed.ones() {
            self.remove(component::Id::new(bit as u16));
        }

        let offset = self.bytes.len();
        self.bytes.extend_from_slice(&other.bytes);
        self.values.extend(
            other
                .values
                .iter()
                .map(|(id, range)| (*id, range.start + offset..range.end + offset)),
        );
    }
}
