//! Component registration for a world.
//!
//! Components are plain data (`Copy`) payloads stored inline in a chunk's byte blob. Each world
//! owns a [`Registry`] mapping a Rust type to a small dense [`Id`] together with the [`Info`]
//! (size, alignment, name) needed to copy its bytes between archetypes without knowing the type.
//!
//! ## Usage
//!
//! ```ignore
//! use bucket_ecs::ecs::component::{Component, Registry};
//!
//! #[derive(Component, Clone, Copy)]
//! struct Position { x: f32, y: f32 }
//!
//! let registry = Registry::new(100);
//! let pos_id = registry.register::<Position>()?;
//! ```

use std::{any, mem};

mod bundle;
mod registry;

pub use bucket_macros::Component;
pub use bundle::{Bundle, Target};
pub use registry::Registry;

/// A component identifier, dense from zero in registration order. It is the component's bit in
/// every archetype mask and filter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u16);

impl Id {
    /// Construct a new component Id from a raw value.
    #[inline]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the index of this component if it were to live in indexable storage (e.g. Vec)
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u16> for Id {
    #[inline]
    fn from(value: u16) -> Self {
        Self::new(value)
    }
}

/// A trait representing a component in the ECS.
///
/// Component bytes are copied between chunks and never dropped, so components must be `Copy`.
pub trait Component: 'static + Copy + Send + Sync {}

/// Layout metadata for a registered component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    id: Id,
    size: usize,
    align: usize,
    name: &'static str,
}

impl Info {
    pub(crate) fn of<C: Component>(id: Id) -> Self {
        Self {
            id,
            size: mem::size_of::<C>(),
            align: mem::align_of::<C>(),
            name: any::type_name::<C>(),
        }
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}
