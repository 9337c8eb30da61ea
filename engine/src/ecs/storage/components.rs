//! Inline component storage for one chunk.
//!
//! Every entity in a chunk owns one `stride` sized row of the chunk's blob. Inside a row each
//! component lives at a fixed offset computed once per archetype:
//!
//! ```text
//!  Layout for {Position(8), Health(4), Velocity(8)}: stride 24
//!
//!  offset:   0         8        12 (pad)  16
//!  row 0:  [ Position | Health | ....... | Velocity ]
//!  row 1:  [ Position | Health | ....... | Velocity ]
//!  ...
//!  byte of component C in slot i = i * stride + offset[C]
//! ```
//!
//! Offsets are aligned to each component's alignment and the stride is rounded up to the largest
//! alignment, so every row is aligned as long as the blob is (see [`BLOB_ALIGN`]).

use std::{
    mem::{self, MaybeUninit},
    ptr::{self, NonNull},
    sync::Arc,
};

use crate::ecs::{
    bitset::BitSet,
    component::{self, Component, Info},
    storage::{
        blob::{BLOB_ALIGN, Blob},
        pool::Pool,
    },
};

/// Per-archetype byte layout, shared by all of its chunks.
#[derive(Debug)]
pub struct Layout {
    offsets: Vec<Option<u32>>,
    sizes: Vec<usize>,
    present: Vec<component::Id>,
    stride: usize,
}

impl Layout {
    /// Lay out every component set in `mask`, in ascending id order.
    pub fn new(mask: &BitSet, info: impl Fn(component::Id) -> Option<Info>) -> Self {
        let mut offsets = vec![None; mask.len()];
        let mut sizes = vec![0; mask.len()];
        let mut present = Vec::with_capacity(mask.count_set());
        let mut offset: usize = 0;
        let mut max_align: usize = 1;

        for bit in mask.ones() {
            let id = component::Id::new(bit as u16);
            let Some(info) = info(id) else {
                log::warn!("archetype mask names unregistered component {id:?}");
                continue;
            };

            debug_assert!(info.align() <= BLOB_ALIGN);
            offset = offset.next_multiple_of(info.align());
            offsets[bit] = Some(offset as u32);
            sizes[bit] = info.size();
            present.push(id);
            offset += info.size();
            max_align = max_align.max(info.align());
        }

        Self {
            offsets,
            sizes,
            present,
            stride: offset.next_multiple_of(max_align),
        }
    }

    /// Bytes per entity.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Byte offset of a component inside a row, if the layout has it.
    #[inline]
    pub fn offset(&self, id: component::Id) -> Option<usize> {
        self.offsets.get(id.index()).copied().flatten().map(|o| o as usize)
    }

    #[inline]
    pub fn size(&self, id: component::Id) -> usize {
        self.sizes.get(id.index()).copied().unwrap_or(0)
    }

    #[inline]
    pub fn has(&self, id: component::Id) -> bool {
        self.offset(id).is_some()
    }

    /// Components in the layout, in ascending id order.
    #[inline]
    pub fn components(&self) -> &[component::Id] {
        &self.present
    }
}

/// The component bytes of one chunk.
pub struct ComponentsStorage {
    blob: Option<Blob>,
    layout: Arc<Layout>,
    capacity: usize,
}

impl ComponentsStorage {
    /// Storage for `capacity` rows, with its blob taken from the pool. Layouts with a zero stride
    /// hold only zero sized components and allocate nothing.
    pub fn new(layout: Arc<Layout>, capacity: usize, pool: &mut Pool) -> Self {
        let len = layout.stride() * capacity;
        let blob = (len > 0).then(|| pool.take_blob(len));
        Self {
            blob,
            layout,
            capacity,
        }
    }

    /// Hand the blob back to the pool.
    pub fn release(self, pool: &mut Pool) {
        if let Some(blob) = self.blob {
            pool.return_blob(blob);
        }
    }

    #[inline]
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    #[inline]
    pub fn has(&self, id: component::Id) -> bool {
        self.layout.has(id)
    }

    /// Pointer to component `id` of `slot`, or `None` when the layout lacks the component.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is outside the chunk capacity or `T` does not have the registered size of
    /// `id`.
    ///
    /// # Safety
    ///
    /// `id` must be the id registered for `T`. Writing through the pointer requires that no other
    /// reference to the same component of the same slot is live.
    #[inline]
    pub unsafe fn ptr<T: Component>(&self, slot: usize, id: component::Id) -> Option<NonNull<T>> {
        assert!(slot < self.capacity, "slot {slot} out of range");
        let offset = self.layout.offset(id)?;
        assert_eq!(
            self.layout.size(id),
            mem::size_of::<T>(),
            "component {id:?} does not have the size of {}",
            std::any::type_name::<T>()
        );

        let Some(blob) = &self.blob else {
            return Some(NonNull::dangling());
        };

        if mem::size_of::<T>() == 0 {
            return Some(NonNull::dangling());
        }

        // Safety: slot < capacity and offset + size <= stride, so the pointer is in bounds.
        let ptr = unsafe { blob.ptr_at(slot * self.layout.stride() + offset) };
        NonNull::new(ptr.cast::<T>())
    }

    /// Read a copy of a component.
    #[inline]
    pub fn read<T: Component>(&self, slot: usize, id: component::Id) -> Option<T> {
        // Safety: reads a Copy value; callers resolve `id` from `T` through the registry.
        unsafe { self.ptr::<T>(slot, id).map(|ptr| ptr.as_ptr().read()) }
    }

    #[inline]
    pub fn get<T: Component>(&self, slot: usize, id: component::Id) -> Option<&T> {
        // Safety: shared borrow of self prevents writes through safe methods.
        unsafe { self.ptr::<T>(slot, id).map(|ptr| &*ptr.as_ptr()) }
    }

    #[inline]
    pub fn get_mut<T: Component>(&mut self, slot: usize, id: component::Id) -> Option<&mut T> {
        // Safety: exclusive borrow of self.
        unsafe { self.ptr::<T>(slot, id).map(|ptr| &mut *ptr.as_ptr()) }
    }

    /// Overwrite a component. Returns `false` when the layout lacks it.
    #[inline]
    pub fn write<T: Component>(&mut self, slot: usize, id: component::Id, value: T) -> bool {
        // Safety: exclusive borrow of self.
        match unsafe { self.ptr::<T>(slot, id) } {
            Some(ptr) => {
                unsafe { ptr.as_ptr().write(value) };
                true
            }
            None => false,
        }
    }

    /// Overwrite a component from raw bytes. Returns `false` when the layout lacks it.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is not exactly the component's size.
    pub fn write_raw(&mut self, slot: usize, id: component::Id, bytes: &[MaybeUninit<u8>]) -> bool {
        assert!(slot < self.capacity, "slot {slot} out of range");
        let Some(offset) = self.layout.offset(id) else {
            return false;
        };
        assert_eq!(bytes.len(), self.layout.size(id), "raw value size mismatch");

        if let Some(blob) = &self.blob {
            // Safety: in bounds as in `ptr`; source and destination are different allocations.
            unsafe {
                let dst = blob.ptr_at(slot * self.layout.stride() + offset);
                ptr::copy_nonoverlapping(bytes.as_ptr().cast::<u8>(), dst, bytes.len());
            }
        }
        true
    }

    /// Copy a whole row from one slot to another.
    pub fn copy_slot(&mut self, from: usize, to: usize) {
        assert!(from < self.capacity && to < self.capacity, "slot out of range");
        if from == to {
            return;
        }
        if let Some(blob) = &self.blob {
            let stride = self.layout.stride();
            // Safety: distinct rows of the same blob never overlap.
            unsafe { ptr::copy_nonoverlapping(blob.ptr_at(from * stride), blob.ptr_at(to * stride), stride) };
        }
    }

    /// Zero a whole row.
    pub fn zero_slot(&mut self, slot: usize) {
        assert!(slot < self.capacity, "slot {slot} out of range");
        if let Some(blob) = &self.blob {
            let stride = self.layout.stride();
            // Safety: the row is in bounds.
            unsafe { blob.ptr_at(slot * stride).write_bytes(0, stride) };
        }
    }

    /// Copy every component present in both layouts from `src_slot` of this storage into
    /// `dst_slot` of `dest`, using each component's registered size.
    pub fn migrate_all_components(&self, src_slot: usize, dest: &mut ComponentsStorage, dst_slot: usize) {
        assert!(src_slot < self.capacity, "slot {src_slot} out of range");
        assert!(dst_slot < dest.capacity, "slot {dst_slot} out of range");

        let (Some(src_blob), Some(dst_blob)) = (&self.blob, &dest.blob) else {
            return;
        };

        let src_row = src_slot * self.layout.stride();
        let dst_row = dst_slot * dest.layout.stride();

        for id in self.layout.components() {
            let (Some(src_offset), Some(dst_offset)) = (self.layout.offset(*id), dest.layout.offset(*id)) else {
                continue;
            };
            let size = self.layout.size(*id);
            // Safety: both rows are in bounds and the blobs are different allocations.
            unsafe {
                ptr::copy_nonoverlapping(
                    src_blob.ptr_at(src_row + src_offset),
                    dst_blob.ptr_at(dst_row + dst_offset),
                    size,
                );
            }
        }
    }

    /// Append `count` rows of `other`, starting at row `from`, after the first `dest_count` rows
    /// of this storage. Both storages must share a layout.
    pub fn combine_with(&mut self, dest_count: usize, other: &ComponentsStorage, from: usize, count: usize) {
        assert!(Arc::ptr_eq(&self.layout, &other.layout), "chunks do not share a layout");
        assert!(dest_count + count <= self.capacity, "combined rows exceed capacity");
        assert!(from + count <= other.capacity, "source rows out of range");

        let (Some(dst_blob), Some(src_blob)) = (&self.blob, &other.blob) else {
            return;
        };
        let stride = self.layout.stride();
        // Safety: ranges are in bounds and the blobs are different allocations.
        unsafe {
            ptr::copy_nonoverlapping(
                src_blob.ptr_at(from * stride),
                dst_blob.ptr_at(dest_count * stride),
                count * stride,
            );
        }
    }
}
