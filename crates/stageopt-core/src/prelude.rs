//! Convenient re-exports for downstream crates.

pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::hash::Hash256;
pub use crate::id::{JobId, OpId, StageId};
pub use crate::manifest::{ManifestId, RunManifest};
pub use crate::plan::{AggFn, CmpOp, Expr, LoadSource, OpKind, PhysicalOperator, Predicate, SubPlan};
pub use crate::stage::{FileCount, Stage, StageGraph, StageKind, StageMeta};
pub use crate::types::{Row, Scalar};
