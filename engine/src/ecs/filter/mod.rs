//! Filters select archetypes by component set and declare component access.
//!
//! A [`Filter`] carries three masks over the component space:
//!
//! - `include`: components an archetype must have
//! - `exclude`: components an archetype must not have
//! - `dependencies`: two bits per component ([`BITS_PER_DEPENDENCY`]), bit `2i` for read and
//!   bit `2i + 1` for write, so `10` is read-only, `11` read-write and `00` no interest
//!
//! An archetype with mask `A` matches when `A ⊇ include` and `A ∩ exclude = ∅`. The dependency
//! mask is what the scheduler uses to decide which chunk systems may run side by side.
//!
//! Filters registered with a world ([`Registry`]) cache their matching archetypes, updated
//! incrementally as archetypes are created and recycled.

mod query;

pub use query::Query;

use crate::{
    core::config::BITS_PER_DEPENDENCY,
    ecs::{
        bitset::BitSet,
        component::{self, Component},
        error::{EcsError, Result},
        storage::{Storage, archetype},
    },
};

/// Low bit of every 2-bit dependency lane.
const LANE_MASK: u64 = 0x5555_5555_5555_5555;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    include: BitSet,
    exclude: BitSet,
    dependencies: BitSet,
}

impl Filter {
    pub(crate) fn from_parts(include: BitSet, exclude: BitSet, dependencies: BitSet) -> Self {
        Self {
            include,
            exclude,
            dependencies,
        }
    }

    #[inline]
    pub fn include(&self) -> &BitSet {
        &self.include
    }

    #[inline]
    pub fn exclude(&self) -> &BitSet {
        &self.exclude
    }

    #[inline]
    pub fn dependencies(&self) -> &BitSet {
        &self.dependencies
    }

    /// Returns `true` if an archetype with the given components matches.
    #[inline]
    pub fn matches(&self, archetype: &BitSet) -> bool {
        archetype.is_superset(&self.include) && !archetype.intersects(&self.exclude)
    }

    /// Returns `true` if the filter declares read access to the component.
    #[inline]
    pub fn can_read(&self, id: component::Id) -> bool {
        self.dependencies.is_set(id.index() * BITS_PER_DEPENDENCY)
    }

    /// Returns `true` if the filter declares write access to the component.
    #[inline]
    pub fn can_write(&self, id: component::Id) -> bool {
        self.dependencies.is_set(id.index() * BITS_PER_DEPENDENCY + 1)
    }

    /// Returns `true` if systems with these two filters must not run concurrently: they share a
    /// component and at least one of them writes it.
    pub fn conflicts_with(&self, other: &Filter) -> bool {
        self.dependencies
            .words()
            .iter()
            .zip(other.dependencies.words())
            .any(|(a, b)| {
                let interest_a = (a | (a >> 1)) & LANE_MASK;
                let interest_b = (b | (b >> 1)) & LANE_MASK;
                let writes = ((a >> 1) | (b >> 1)) & LANE_MASK;
                interest_a & interest_b & writes != 0
            })
    }
}

/// Chained construction of a [`Filter`]. Components named in the chain are registered on the way;
/// the first registration failure is reported by [`build`](Builder::build).
///
/// ```ignore
/// let filter = world
///     .filter()
///     .read_only::<Velocity>()
///     .read_write::<Position>()
///     .without::<Frozen>()
///     .build()?;
/// ```
pub struct Builder<'r> {
    registry: &'r component::Registry,
    include: BitSet,
    exclude: BitSet,
    dependencies: BitSet,
    error: Option<EcsError>,
}

impl<'r> Builder<'r> {
    pub fn new(registry: &'r component::Registry) -> Self {
        let len = registry.limit();
        Self {
            registry,
            include: BitSet::new(len),
            exclude: BitSet::new(len),
            dependencies: BitSet::new(len * BITS_PER_DEPENDENCY),
            error: None,
        }
    }

    /// Require the component without declaring access to it.
    pub fn with<T: Component>(&mut self) -> &mut Self {
        if let Some(id) = self.register::<T>() {
            self.include.set(id.index());
            self.exclude.clear(id.index());
        }
        self
    }

    /// Reject archetypes with the component.
    pub fn without<T: Component>(&mut self) -> &mut Self {
        if let Some(id) = self.register::<T>() {
            self.include.clear(id.index());
            self.exclude.set(id.index());
            self.dependencies.clear(id.index() * BITS_PER_DEPENDENCY);
            self.dependencies.clear(id.index() * BITS_PER_DEPENDENCY + 1);
        }
        self
    }

    /// Require the component and declare read access.
    pub fn read_only<T: Component>(&mut self) -> &mut Self {
        if let Some(id) = self.register::<T>() {
            self.include.set(id.index());
            self.exclude.clear(id.index());
            self.dependencies.set(id.index() * BITS_PER_DEPENDENCY);
            self.dependencies.clear(id.index() * BITS_PER_DEPENDENCY + 1);
        }
        self
    }

    /// Require the component and declare read and write access.
    pub fn read_write<T: Component>(&mut self) -> &mut Self {
        if let Some(id) = self.register::<T>() {
            self.include.set(id.index());
            self.exclude.clear(id.index());
            self.dependencies.set(id.index() * BITS_PER_DEPENDENCY);
            self.dependencies.set(id.index() * BITS_PER_DEPENDENCY + 1);
        }
        self
    }

    pub fn build(&mut self) -> Result<Filter> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        Ok(Filter {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            dependencies: self.dependencies.clone(),
        })
    }

    fn register<T: Component>(&mut self) -> Option<component::Id> {
        match self.registry.register::<T>() {
            Ok(id) => Some(id),
            Err(error) => {
                self.error.get_or_insert(error);
                None
            }
        }
    }
}

/// Identifies a filter registered with a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(usize);

impl Id {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

struct Entry {
    filter: Filter,
    archetypes: Vec<archetype::Id>,
}

/// Filters with cached matching archetypes.
pub struct Registry {
    entries: Vec<Entry>,
    expected_archetypes: usize,
}

impl Registry {
    pub fn new(expected_filters: usize, expected_archetypes: usize) -> Self {
        Self {
            entries: Vec::with_capacity(expected_filters),
            expected_archetypes,
        }
    }

    /// Register a filter, matching it against every live archetype.
    pub fn register(&mut self, filter: Filter, storage: &Storage) -> Id {
        let mut archetypes = Vec::with_capacity(self.expected_archetypes);
        collect_matches(&filter, storage, &mut archetypes);
        self.entries.push(Entry { filter, archetypes });
        Id(self.entries.len() - 1)
    }

    #[inline]
    pub fn get(&self, id: Id) -> Option<&Filter> {
        self.entries.get(id.0).map(|entry| &entry.filter)
    }

    /// Archetypes currently matching a registered filter.
    #[inline]
    pub fn archetypes(&self, id: Id) -> &[archetype::Id] {
        self.entries.get(id.0).map_or(&[], |entry| &entry.archetypes)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a new archetype to every filter it matches.
    pub fn on_archetype_created(&mut self, id: archetype::Id, mask: &BitSet) {
        for entry in &mut self.entries {
            if entry.filter.matches(mask) {
                entry.archetypes.push(id);
            }
        }
    }

    /// Drop a recycled archetype from every filter.
    pub fn on_archetype_recycled(&mut self, id: archetype::Id) {
        for entry in &mut self.entries {
            entry.archetypes.retain(|other| *other != id);
        }
    }

    /// Recompute a filter's matches from scratch.
    pub fn refresh(&mut self, id: Id, storage: &Storage) {
        if let Some(entry) = self.entries.get_mut(id.0) {
            entry.archetypes.clear();
            collect_matches(&entry.filter, storage, &mut entry.archetypes);
        }
    }
}

fn collect_matches(filter: &Filter, storage: &Storage, out: &mut Vec<archetype::Id>) {
    out.extend(
        storage
            .archetypes()
            .filter(|archetype| filter.matches(archetype.mask()))
            .map(|archetype| archetype.id()),
    );
}
