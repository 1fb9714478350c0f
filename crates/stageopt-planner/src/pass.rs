//! The optimization pass contract and the per-stage decisions passes report.

use std::fmt;

use serde::Serialize;

use stageopt_core::config::EngineConfig;
use stageopt_core::error::{Error, Result};
use stageopt_core::id::{OpId, StageId};
use stageopt_core::stage::StageGraph;

use crate::accumulator::Qualification;
use crate::frjoin::JoinRepairState;

/// One full-graph optimization pass.
///
/// A pass sees the graph as left by the passes before it and must finish
/// before the next one starts.
pub trait OptimizerPass {
    fn name(&self) -> &'static str;

    fn run(&mut self, graph: &mut StageGraph, config: &EngineConfig) -> Result<PassOutcome>;
}

/// What one pass did.
#[derive(Debug, Clone, Serialize)]
pub struct PassOutcome {
    pub pass: &'static str,
    pub stages_visited: usize,
    pub decisions: Vec<OptimizationDecision>,
}

impl PassOutcome {
    /// Number of decisions that changed the graph.
    pub fn changed(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_change()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "pass", rename_all = "snake_case")]
pub enum OptimizationDecision {
    Accumulative {
        stage: StageId,
        outcome: Qualification,
    },
    JoinRepair {
        stage: StageId,
        join: OpId,
        side: usize,
        state: JoinRepairState,
    },
}

impl OptimizationDecision {
    pub fn stage(&self) -> StageId {
        match self {
            OptimizationDecision::Accumulative { stage, .. }
            | OptimizationDecision::JoinRepair { stage, .. } => *stage,
        }
    }

    pub fn is_change(&self) -> bool {
        match self {
            OptimizationDecision::Accumulative { outcome, .. } => {
                matches!(outcome, Qualification::Qualifies { .. })
            }
            OptimizationDecision::JoinRepair { state, .. } => {
                matches!(state, JoinRepairState::StageInserted { .. })
            }
        }
    }
}

impl fmt::Display for OptimizationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationDecision::Accumulative { stage, outcome } => {
                write!(f, "accumulative {stage}: {outcome}")
            }
            OptimizationDecision::JoinRepair {
                stage,
                join,
                side,
                state,
            } => write!(f, "frjoin-repair {stage} {join} side {side}: {state}"),
        }
    }
}

/// Fold per-stage structural failures into one error naming every offending stage.
pub(crate) fn combine_failures(pass: &str, mut failures: Vec<Error>) -> Option<Error> {
    match failures.len() {
        0 => None,
        1 => failures.pop(),
        n => {
            let first = failures.iter().find_map(Error::stage);
            let details: Vec<String> = failures.iter().map(|e| e.to_string()).collect();
            Some(Error::MalformedPlan {
                stage: first,
                reason: format!("{pass}: {n} stages failed: {}", details.join("; ")),
            })
        }
    }
}
