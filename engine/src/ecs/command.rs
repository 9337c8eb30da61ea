//! Deferred structural commands.
//!
//! Chunk systems run against shared chunks and must not destroy or create entities while other
//! workers iterate the same storage. Instead they queue [`Call`]s through a [`Commands`] handle.
//! The world drains the queue once the step that produced them has fully completed:
//!
//! ```text
//! ┌───────────────────────── step ─────────────────────────┐
//! │  worker 0 ──destroy──────┐                              │
//! │  worker 1 ──create───────┼──► CommandQueue (FIFO)       │
//! │  worker 2 ──custom(7)────┘                              │
//! └─────────────────────────────────────────────────────────┘
//!                     │ barrier
//!                     ▼
//!    World::dispatch_scheduled_commands ──► built-in or custom handler
//! ```
//!
//! Built-in commands only mark slots or stage migrations, so the addresses queued during one step
//! stay valid for the whole dispatch. Entities actually leave storage at the next sync point.
//!
//! Custom commands are registered on the world with a handler and an id, either the next free one
//! ([`World::register_command`]) or a fixed one ([`World::register_command_at`]).

use std::{any::Any, fmt, sync::Arc};

use crossbeam::queue::SegQueue;

use crate::ecs::{
    component::Bundle,
    entity::{Allocator, EntityAddress, EntityId},
    error::{EcsError, Result},
    migration::Migration,
    storage::{archetype, chunk},
    world::World,
};

/// Identifies a command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u32);

impl Id {
    /// Mark one entity for removal.
    pub const DESTROY: Id = Id(0);
    /// Stage one migration onto every entity of a chunk.
    pub const MIGRATE_ALL: Id = Id(1);
    /// Mark every entity of a chunk for removal.
    pub const DESTROY_ALL: Id = Id(2);
    /// Spawn an entity whose id was reserved when the command was queued.
    pub const CREATE_ENTITY: Id = Id(3);
    /// First id available to custom commands.
    pub const FIRST_CUSTOM: Id = Id(4);

    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_builtin(&self) -> bool {
        self.0 < Self::FIRST_CUSTOM.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self.0)
    }
}

/// Payload carried by a call. Handlers downcast it to the type they expect.
pub type Payload = Box<dyn Any + Send>;

/// A handler for a custom command.
pub type Handler = Box<dyn FnMut(&mut World, Call) + Send>;

type Spawn = Box<dyn FnOnce(&mut World) + Send>;

/// One queued command.
pub struct Call {
    pub id: Id,
    pub address: Option<EntityAddress>,
    pub payload: Option<Payload>,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

/// Lock-free FIFO of calls, shared by every [`Commands`] handle of a world.
#[derive(Default)]
pub struct CommandQueue {
    calls: SegQueue<Call>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&self, call: Call) {
        self.calls.push(call);
    }

    #[inline]
    pub fn pop(&self) -> Option<Call> {
        self.calls.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Handle for queueing commands from any thread.
#[derive(Clone)]
pub struct Commands {
    queue: Arc<CommandQueue>,
    allocator: Arc<Allocator>,
}

impl Commands {
    pub(crate) fn new(queue: Arc<CommandQueue>, allocator: Arc<Allocator>) -> Self {
        Self { queue, allocator }
    }

    /// Queue removal of the entity at `address`.
    pub fn destroy(&self, address: EntityAddress) {
        self.schedule(Id::DESTROY, Some(address), None);
    }

    /// Queue removal of every entity in a chunk.
    pub fn destroy_all(&self, archetype: archetype::Id, chunk: chunk::Index) {
        self.schedule(Id::DESTROY_ALL, Some(EntityAddress::new(archetype, chunk, 0)), None);
    }

    /// Queue the same structural change for every entity in a chunk.
    pub fn migrate_all(&self, archetype: archetype::Id, chunk: chunk::Index, migration: Migration) {
        self.schedule(
            Id::MIGRATE_ALL,
            Some(EntityAddress::new(archetype, chunk, 0)),
            Some(Box::new(migration)),
        );
    }

    /// Queue creation of an entity. The id is reserved immediately and is the one the entity gets
    /// when the command is dispatched.
    pub fn create<B: Bundle>(&self, bundle: B) -> EntityId {
        let entity = self.allocator.alloc();
        let spawn: Spawn = Box::new(move |world: &mut World| {
            if let Err(error) = world.spawn_reserved(entity, bundle) {
                log::error!("failed to create {entity}: {error}");
            }
        });
        self.schedule(Id::CREATE_ENTITY, None, Some(Box::new(spawn)));
        entity
    }

    /// Queue any command, built-in or custom.
    pub fn schedule(&self, id: Id, address: Option<EntityAddress>, payload: Option<Payload>) {
        self.queue.push(Call { id, address, payload });
    }

    /// Number of calls waiting for dispatch.
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Custom command handlers indexed by command id.
#[derive(Default)]
pub struct Handlers {
    handlers: Vec<Option<Handler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under the next free custom id.
    pub fn register(&mut self, handler: Handler) -> Id {
        let first = Id::FIRST_CUSTOM.index();
        if self.handlers.len() < first {
            self.handlers.resize_with(first, || None);
        }
        let index = (first..self.handlers.len())
            .find(|index| self.handlers[*index].is_none())
            .unwrap_or(self.handlers.len());
        self.put(index, handler);
        Id(index as u32)
    }

    /// Register a handler under a fixed custom id.
    pub fn register_at(&mut self, id: Id, handler: Handler) -> Result<()> {
        if id.is_builtin() || self.contains(id) {
            return Err(EcsError::CommandAlreadyRegistered { id: id.0 });
        }
        self.put(id.index(), handler);
        Ok(())
    }

    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        self.handlers.get(id.index()).is_some_and(Option::is_some)
    }

    /// Move every handler of `other` into free ids of `self`. Handlers whose id is already taken
    /// are dropped with an error.
    pub(crate) fn merge(&mut self, other: Handlers) {
        for (index, handler) in other.handlers.into_iter().enumerate() {
            let Some(handler) = handler else { continue };
            if self.contains(Id(index as u32)) {
                log::error!("command handler {} registered twice, keeping the first", Id(index as u32));
                continue;
            }
            self.put(index, handler);
        }
    }

    /// Execute one call against the world.
    pub(crate) fn dispatch(&mut self, world: &mut World, call: Call) {
        match call.id {
            Id::DESTROY => match call.address {
                Some(address) if world.destroy(address) => {}
                _ => log::warn!("destroy command for stale address {:?} skipped", call.address),
            },
            Id::DESTROY_ALL => match call.address {
                Some(address) if world.destroy_chunk(address.archetype(), address.chunk()) => {}
                _ => log::warn!("destroy-all command for stale chunk {:?} skipped", call.address),
            },
            Id::MIGRATE_ALL => {
                let migration = call.payload.and_then(|payload| payload.downcast::<Migration>().ok());
                match (call.address, migration) {
                    (Some(address), Some(migration))
                        if world.stage_chunk(address.archetype(), address.chunk(), &migration) => {}
                    (address, _) => log::warn!("migrate-all command for {address:?} skipped"),
                }
            }
            Id::CREATE_ENTITY => match call.payload.and_then(|payload| payload.downcast::<Spawn>().ok()) {
                Some(spawn) => spawn(world),
                None => log::error!("create command without a spawn payload"),
            },
            id => match self.handlers.get_mut(id.index()).and_then(Option::as_mut) {
                Some(handler) => handler(world, call),
                None => log::error!("no handler registered for {id}"),
            },
        }
    }

    fn put(&mut self, index: usize, handler: Handler) {
        if self.handlers.len() <= index {
            self.handlers.resize_with(index + 1, || None);
        }
        self.handlers[index] = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Handler {
        Box::new(|_, _| {})
    }

    #[test]
    fn custom_ids_start_after_builtins() {
        // Given
        let mut handlers = Handlers::new();

        // When
        let first = handlers.register(noop());
        let second = handlers.register(noop());

        // Then
        assert_eq!(first, Id::FIRST_CUSTOM);
        assert_eq!(second, Id::new(5));
        assert!(handlers.contains(first));
    }

    #[test]
    fn fixed_id_collisions_are_rejected() {
        // Given
        let mut handlers = Handlers::new();
        handlers.register_at(Id::new(10), noop()).unwrap();

        // Then
        assert!(matches!(
            handlers.register_at(Id::new(10), noop()),
            Err(EcsError::CommandAlreadyRegistered { id: 10 })
        ));
        assert!(matches!(
            handlers.register_at(Id::DESTROY, noop()),
            Err(EcsError::CommandAlreadyRegistered { id: 0 })
        ));
        // The gap below the fixed id is still available.
        assert_eq!(handlers.register(noop()), Id::FIRST_CUSTOM);
    }

    #[test]
    fn queue_is_fifo() {
        // Given
        let queue = Arc::new(CommandQueue::new());
        let commands = Commands::new(Arc::clone(&queue), Arc::new(Allocator::new()));

        // When
        for id in 4..8 {
            commands.schedule(Id::new(id), None, None);
        }

        // Then
        assert_eq!(commands.pending(), 4);
        let ids: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|call| call.id).collect();
        assert_eq!(ids, (4..8).map(Id::new).collect::<Vec<_>>());
    }

    #[test]
    fn create_reserves_ids_up_front() {
        // Given
        let allocator = Arc::new(Allocator::new());
        let commands = Commands::new(Arc::new(CommandQueue::new()), Arc::clone(&allocator));

        // When
        let a = commands.create(());
        let b = commands.create(());

        // Then
        assert_ne!(a, b);
        assert_eq!(allocator.issued(), 2);
        assert_eq!(commands.pending(), 2);
    }
}
