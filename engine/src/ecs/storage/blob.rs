//! Raw, untyped chunk memory.
//!
//! A [`Blob`] is a zeroed heap allocation aligned to [`BLOB_ALIGN`]. It knows nothing about what
//! it stores: [`ComponentsStorage`](super::components::ComponentsStorage) lays components out in
//! it using an archetype's offset map and is responsible for every read and write.
//!
//! # Safety Contract
//!
//! The blob hands out raw pointers from `&self`. Callers must:
//! - Stay within [`len`](Blob::len) bytes
//! - Never create overlapping `&mut` references to the same bytes
//! - Only read back bytes as the type that was written there
//!
//! Components are `Copy`, so nothing stored in a blob ever needs dropping.

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
};

/// Alignment of every blob, and therefore the largest component alignment chunks support.
pub const BLOB_ALIGN: usize = 16;

pub struct Blob {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: the blob owns its allocation outright; synchronising access to the bytes is the
// caller's obligation, as with any raw buffer.
unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    /// Allocate `len` zeroed bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or too large to describe as a layout.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "blob length must be greater than 0");
        assert!(
            len <= isize::MAX as usize - (BLOB_ALIGN - 1),
            "blob length overflows a layout"
        );

        // Safety: BLOB_ALIGN is a power of two and len was bounds checked above.
        let layout = unsafe { Layout::from_size_align_unchecked(len, BLOB_ALIGN) };
        // Safety: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout);
        };

        Self { ptr, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to the first byte.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Pointer to the byte at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must not exceed `len`.
    #[inline]
    pub unsafe fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len, "blob offset {offset} out of range");
        unsafe { self.ptr.as_ptr().add(offset) }
    }

    /// Zero the first `len` bytes (clamped to the blob length).
    pub fn zero(&mut self, len: usize) {
        // Safety: the write stays within the allocation and we hold the only reference.
        unsafe { self.ptr.as_ptr().write_bytes(0, len.min(self.len)) };
    }

    #[inline]
    fn layout(&self) -> Layout {
        // Safety: the same size and alignment were validated in `new`.
        unsafe { Layout::from_size_align_unchecked(self.len, BLOB_ALIGN) }
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        // Safety: ptr was allocated in `new` with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout()) };
    }
}
