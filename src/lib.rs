#![forbid(unsafe_code)]
//! stageopt: stage-plan optimization for a batch dataflow engine.
//!
//! This crate only re-exports the workspace members so integration tests and
//! benches can reach them through one dependency.

pub use stageopt_core as core;
pub use stageopt_exec as exec;
pub use stageopt_planner as planner;
pub use stageopt_walk as walk;
