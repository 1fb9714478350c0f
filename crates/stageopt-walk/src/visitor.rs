//! The per-stage operation a walk invokes.

use stageopt_core::error::Result;
use stageopt_core::stage::{Stage, StageGraph, StageKind};

/// Invoked once per stage, after all of the stage's predecessors.
///
/// `visit_stage` dispatches on the closed set of stage kinds; implementors
/// usually override the per-kind hooks and keep the dispatch.
pub trait PlanVisitor {
    fn visit_stage(&mut self, stage: &Stage, graph: &StageGraph) -> Result<()> {
        match stage.kind {
            StageKind::Ordinary => self.visit_ordinary(stage, graph),
            StageKind::Concatenate => self.visit_concatenate(stage, graph),
        }
    }

    fn visit_ordinary(&mut self, _stage: &Stage, _graph: &StageGraph) -> Result<()> {
        Ok(())
    }

    fn visit_concatenate(&mut self, _stage: &Stage, _graph: &StageGraph) -> Result<()> {
        Ok(())
    }
}
