//! A chunked archetype ECS runtime.
//!
//! - [`core`]: configuration and the worker pool
//! - [`ecs`]: entities, components, storage, filters, commands, systems and the world

// Lets `#[derive(Component)]` refer to `::bucket_ecs` from inside this crate.
extern crate self as bucket_ecs;

pub mod core;
pub mod ecs;
