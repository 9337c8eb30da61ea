pub mod config;
pub mod tasks;

pub use config::{ChunkMemoryMode, Config, ConfigError};
pub use tasks::{Executor, Scope};
