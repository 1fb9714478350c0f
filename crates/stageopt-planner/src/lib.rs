#![forbid(unsafe_code)]
//! stageopt-planner: optimization passes over a compiled Stage Graph.
//!
//! Design:
//! - Every pass implements `pass::OptimizerPass` and runs as its own full
//!   traversal of the graph (`stageopt-walk`), evaluating every stage first and
//!   applying its edits afterwards.
//! - `rules::optimize` runs the fixed pass order: accumulative mode, then
//!   fragment-replicate join repair.
//! - `estimate` fills in output file counts the compiler left unknown.
//! - `dsl::yaml` builds a Stage Graph from a YAML description (CLI and tests).
//!
//! Configuration is an explicit `EngineConfig` argument; nothing here reads the
//! environment or does I/O.

pub mod accumulator;
pub mod dsl;
pub mod estimate;
pub mod explain;
pub mod frjoin;
pub mod pass;
pub mod rules;

pub use accumulator::{AccumulativePass, Qualification};
pub use dsl::yaml::{parse_yaml_stage_plan, DslError, ParsedStagePlan};
pub use estimate::{annotate_output_files, FileCatalog};
pub use frjoin::{FrJoinRepairPass, JoinRepairState, SkipReason};
pub use pass::{OptimizationDecision, OptimizerPass, PassOutcome};
pub use rules::{optimize, validate_graph, OptimizationReport};
