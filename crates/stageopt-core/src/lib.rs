#![forbid(unsafe_code)]
//! stageopt-core: the data model shared by the walker, the optimization passes,
//! and the local runtime.
//!
//! - `stage`: the Stage Graph (one node per synchronization-point unit of work).
//! - `plan`: the Operator Sub-Plan each stage owns.
//! - `config`: resolved, read-only engine configuration.
//! - `hash`/`manifest`: stable fingerprints for plans and run provenance.
//!
//! No I/O and no async here.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod plan;
pub mod prelude;
pub mod stage;
pub mod types;

/// Engine version string recorded in manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
