//! Runtime configuration for a [`World`](crate::ecs::World) and its scheduler.
//!
//! Every field has a default, so an empty TOML document is a valid configuration:
//!
//! ```toml
//! chunk_memory_mode = "fit_in_cache"
//! chunk_memory_size = 16384
//! worker_threads = 4
//! ```

use std::{fs, path::Path, thread};

use serde::Deserialize;

/// Bits used per component in a filter's dependency mask: read, then write.
pub const BITS_PER_DEPENDENCY: usize = 2;

/// How chunk capacity is derived from an archetype's stride.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMemoryMode {
    /// Every chunk holds exactly `chunk_entities_count` entities.
    #[default]
    FixNumberOfEntities,
    /// Chunks are sized to `chunk_memory_size` bytes, so capacity shrinks as the stride grows.
    FitInCache,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub chunk_memory_mode: ChunkMemoryMode,
    pub chunk_entities_count: usize,
    pub chunk_memory_size: usize,
    pub expected_chunks_in_archetype: usize,
    pub expected_archetypes: usize,
    pub expected_archetypes_in_filter: usize,
    pub expected_filters: usize,
    /// Recompute dependency graph steps every frame from the systems whose conditions are open,
    /// instead of replaying the steps computed at init.
    pub rebuild_graph_each_frame: bool,
    pub max_components: usize,
    pub max_chunk_systems: usize,
    pub max_contexts: usize,
    pub worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_memory_mode: ChunkMemoryMode::default(),
            chunk_entities_count: 4096,
            chunk_memory_size: 16384,
            expected_chunks_in_archetype: 2,
            expected_archetypes: 256,
            expected_archetypes_in_filter: 10,
            expected_filters: 100,
            rebuild_graph_each_frame: false,
            max_components: 100,
            max_chunk_systems: 100,
            max_contexts: 100,
            worker_threads: thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("chunk_entities_count", self.chunk_entities_count),
            ("chunk_memory_size", self.chunk_memory_size),
            ("max_components", self.max_components),
            ("max_chunk_systems", self.max_chunk_systems),
            ("worker_threads", self.worker_threads),
        ];

        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        if self.max_components > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_components must not exceed {}",
                u16::MAX
            )));
        }

        // Slots within a chunk are addressed by u32.
        let limits = [
            ("chunk_entities_count", self.chunk_entities_count),
            ("chunk_memory_size", self.chunk_memory_size),
        ];
        for (name, value) in limits {
            if value > u32::MAX as usize {
                return Err(ConfigError::Invalid(format!("{name} must not exceed {}", u32::MAX)));
            }
        }

        Ok(())
    }

    /// Number of entities a chunk holds for an archetype with the given per-entity stride.
    pub fn chunk_capacity(&self, stride: usize) -> usize {
        match self.chunk_memory_mode {
            ChunkMemoryMode::FixNumberOfEntities => self.chunk_entities_count,
            ChunkMemoryMode::FitInCache => {
                let per_entity = stride + size_of::<u64>();
                (self.chunk_memory_size / per_entity).max(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        // When
        let config = Config::from_toml_str("").unwrap();

        // Then
        assert_eq!(config, Config::default());
        assert_eq!(config.chunk_entities_count, 4096);
        assert!(!config.rebuild_graph_each_frame);
    }

    #[test]
    fn parses_overrides() {
        // Given
        let source = r#"
            chunk_memory_mode = "fit_in_cache"
            chunk_memory_size = 1024
            worker_threads = 3
            rebuild_graph_each_frame = true
        "#;

        // When
        let config = Config::from_toml_str(source).unwrap();

        // Then
        assert_eq!(config.chunk_memory_mode, ChunkMemoryMode::FitInCache);
        assert_eq!(config.worker_threads, 3);
        assert!(config.rebuild_graph_each_frame);
        // 1024 / (24 + 8)
        assert_eq!(config.chunk_capacity(24), 32);
    }

    #[test]
    fn fit_in_cache_admits_one_entity() {
        let config = Config {
            chunk_memory_mode: ChunkMemoryMode::FitInCache,
            chunk_memory_size: 16,
            ..Config::default()
        };
        assert_eq!(config.chunk_capacity(4096), 1);
    }

    #[test]
    fn rejects_zero_limits() {
        let error = Config::from_toml_str("max_components = 0").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_chunks_beyond_u32_slots() {
        // Given
        let oversized = [
            Config {
                chunk_entities_count: u32::MAX as usize + 1,
                ..Config::default()
            },
            Config {
                chunk_memory_mode: ChunkMemoryMode::FitInCache,
                chunk_memory_size: usize::MAX,
                ..Config::default()
            },
        ];

        // Then
        for config in oversized {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
        let largest = Config {
            chunk_entities_count: u32::MAX as usize,
            ..Config::default()
        };
        assert!(largest.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_keys() {
        let error = Config::from_toml_str("chunk_size = 3").unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let error = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(error, ConfigError::Io(_)));
    }
}
