#![forbid(unsafe_code)]
//! stageopt-exec: a local reference runtime for optimized stage graphs.
//!
//! Each stage runs as one job: map tasks over input splits, an optional reduce
//! phase behind the grouping operator, and part files written per task into an
//! in-memory file store. The realized `JobGraph` (jobs, edges, task counts) is
//! what tests assert the optimizer's graph shape against.

pub mod aggregate;
pub mod eval;
pub mod job_graph;
pub mod metrics;
pub mod runtime;
pub mod scheduler;
pub mod storage;

pub use job_graph::{Job, JobGraph, JobStats};
pub use runtime::{Engine, ExecError, RunOutcome};
pub use storage::MemoryFileStore;
