pub mod bitset;
pub mod command;
pub mod component;
pub mod entity;
pub mod error;
pub mod filter;
pub mod migration;
pub mod storage;
pub mod system;
pub(crate) mod util;
pub mod world;

pub use command::Commands;
pub use component::{Bundle, Component};
pub use entity::{EntityAddress, EntityId};
pub use error::{EcsError, Result};
pub use filter::{Filter, Query};
pub use migration::Migration;
pub use system::{ChunkSystem, ChunkView, ForEachSystem, Group, Scope, System, Systems};
pub use world::World;
