use crate::ecs::{entity::EntityId, storage::blob::Blob};

/// Recycles chunk backing storage by size class.
///
/// Entity arrays and component blobs freed by released chunks are kept and handed to the next
/// chunk that needs at least as much room. The pool is owned by [`Storage`](super::Storage) and is
/// only touched through `&mut` access at sync points, never from worker threads.
#[derive(Default)]
pub struct Pool {
    entity_arrays: Vec<Vec<EntityId>>,
    blobs: Vec<Blob>,
    allocated_blobs: usize,
}

impl Pool {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty entity array with room for at least `capacity` ids.
    pub fn take_entities(&mut self, capacity: usize) -> Vec<EntityId> {
        match self
            .entity_arrays
            .iter()
            .rposition(|array| array.capacity() >= capacity)
        {
            Some(index) => self.entity_arrays.swap_remove(index),
            None => Vec::with_capacity(capacity),
        }
    }

    pub fn return_entities(&mut self, mut array: Vec<EntityId>) {
        array.clear();
        self.entity_arrays.push(array);
    }

    /// A zeroed blob of at least `len` bytes.
    pub fn take_blob(&mut self, len: usize) -> Blob {
        match self.blobs.iter().rposition(|blob| blob.len() >= len) {
            Some(index) => {
                let mut blob = self.blobs.swap_remove(index);
                blob.zero(len);
                blob
            }
            None => {
                self.allocated_blobs += 1;
                log::trace!("allocating chunk blob of {len} bytes");
                Blob::new(len)
            }
        }
    }

    pub fn return_blob(&mut self, blob: Blob) {
        self.blobs.push(blob);
    }

    /// Blobs waiting for reuse.
    #[inline]
    pub fn free_blobs(&self) -> usize {
        self.blobs.len()
    }

    /// Blobs ever allocated by this pool.
    #[inline]
    pub fn allocated_blobs(&self) -> usize {
        self.allocated_blobs
    }
}
