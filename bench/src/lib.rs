//! Benchmarks for the bucket ECS runtime.
//!
//! - **Microbenchmarks**: spawn, chunk iteration, migration, sync points and plan building
//! - **Scenario benchmarks**: particle and rigid body workloads driven through [`Systems`]
//!
//! ```bash
//! cargo bench -p bucket_bench
//! cargo bench -p bucket_bench -- migrate
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports.
//!
//! [`Systems`]: bucket_ecs::ecs::Systems

pub mod components;
pub mod scenarios;
