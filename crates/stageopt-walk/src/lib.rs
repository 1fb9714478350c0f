#![forbid(unsafe_code)]
//! stageopt-walk: traversal of the Stage Graph, decoupled from what happens at
//! each stage.
//!
//! - `walker`: depth-first, predecessors-first ordering with cycle detection.
//! - `visitor`: the `PlanVisitor` contract passes implement.
//! - `verify`: debug/test helpers for checking a visit order.
//!
//! The order is computed from the graph as it is when the walk starts; visitors
//! only get shared access, so a pass that wants to mutate records its edits and
//! applies them after the walk.

pub mod verify;
pub mod visitor;
pub mod walker;

pub use visitor::PlanVisitor;
pub use walker::{walk, DepthFirstWalker};
