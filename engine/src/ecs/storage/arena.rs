use crate::ecs::bitset::BitSet;

/// Generation stamped index into an [`Arena`].
///
/// A handle stays valid until its slot is removed. Reusing the slot bumps the generation, so an
/// old handle no longer resolves.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with liveness tracked by a [`BitSet`].
///
/// Insertion takes the first free slot from the liveness set and only grows (doubling) when every
/// slot is in use, so handle indexes stay dense.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    live: BitSet,
    len: usize,
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            value: None,
        });

        Self {
            slots,
            live: BitSet::new(capacity),
            len: 0,
        }
    }

    /// Number of live values.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Insert a value built from the handle it will live at.
    pub fn insert_with(&mut self, f: impl FnOnce(Handle) -> T) -> Handle {
        let index = match self.live.first_clear_bit() {
            Some(index) => index,
            None => {
                let index = self.slots.len();
                let capacity = (index * 2).max(1);
                self.slots.resize_with(capacity, || Slot {
                    generation: 0,
                    value: None,
                });
                self.live.resize(capacity);
                index
            }
        };

        let slot = &mut self.slots[index];
        let handle = Handle {
            index: index as u32,
            generation: slot.generation,
        };
        slot.value = Some(f(handle));
        self.live.set(index);
        self.len += 1;
        handle
    }

    /// Remove the value at `handle`. The slot's generation moves on, invalidating the handle.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.live.clear(handle.index());
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    #[inline]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Mutable access to two distinct values at once.
    pub fn get_two_mut(&mut self, a: Handle, b: Handle) -> Option<(&mut T, &mut T)> {
        if a.index() == b.index() || !self.contains(a) || !self.contains(b) {
            return None;
        }

        let (low, high, swapped) = if a.index() < b.index() {
            (a, b, false)
        } else {
            (b, a, true)
        };

        let (head, tail) = self.slots.split_at_mut(high.index());
        let low = head[low.index()].value.as_mut()?;
        let high = tail[0].value.as_mut()?;
        Some(if swapped { (high, low) } else { (low, high) })
    }

    /// Handles of every live value, in slot order.
    pub fn handles(&self) -> Vec<Handle> {
        self.live
            .ones()
            .map(|index| Handle {
                index: index as u32,
                generation: self.slots[index].generation,
            })
            .collect()
    }

    /// Iterate live values with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.live.ones().filter_map(|index| {
            let slot = &self.slots[index];
            let handle = Handle {
                index: index as u32,
                generation: slot.generation,
            };
            slot.value.as_ref().map(|value| (handle, value))
        })
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
