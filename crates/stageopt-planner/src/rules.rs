//! The optimization pipeline: a fixed sequence of full-graph passes.

use serde::Serialize;

use stageopt_core::config::EngineConfig;
use stageopt_core::error::Result;
use stageopt_core::hash::Hash256;
use stageopt_core::id::StageId;
use stageopt_core::stage::StageGraph;
use stageopt_walk::DepthFirstWalker;

use crate::accumulator::AccumulativePass;
use crate::frjoin::{FrJoinRepairPass, JoinRepairState};
use crate::pass::{OptimizationDecision, OptimizerPass, PassOutcome};

/// Everything the pipeline decided, plus fingerprints of the graph around it.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub passes: Vec<PassOutcome>,
    pub before: Hash256,
    pub after: Hash256,
}

impl OptimizationReport {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }

    pub fn decisions(&self) -> impl Iterator<Item = &OptimizationDecision> {
        self.passes.iter().flat_map(|p| p.decisions.iter())
    }

    /// Concatenate Stages inserted by this run, each once.
    pub fn inserted_stages(&self) -> Vec<StageId> {
        let mut ids: Vec<StageId> = self
            .decisions()
            .filter_map(|d| match d {
                OptimizationDecision::JoinRepair {
                    state: JoinRepairState::StageInserted { concatenate, .. },
                    ..
                } => Some(*concatenate),
                _ => None,
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Stages whose grouping operators were marked accumulative.
    pub fn accumulative_stages(&self) -> Vec<StageId> {
        self.decisions()
            .filter(|d| matches!(d, OptimizationDecision::Accumulative { .. }) && d.is_change())
            .map(OptimizationDecision::stage)
            .collect()
    }
}

/// Structural checks over the whole graph: no cycles, every sub-plan well
/// formed, every stage load backed by an edge. Returns the number of stages.
pub fn validate_graph(graph: &StageGraph) -> Result<usize> {
    let order = DepthFirstWalker::new(graph).order()?;
    for id in &order {
        graph.check_stage(*id)?;
    }
    Ok(order.len())
}

/// Passes in the order they must run. Join repair comes last so it sees the
/// final operator flags.
pub fn default_passes() -> Vec<Box<dyn OptimizerPass>> {
    vec![Box::new(AccumulativePass), Box::new(FrJoinRepairPass)]
}

/// Run the default pipeline over `graph` in place.
pub fn optimize(graph: &mut StageGraph, config: &EngineConfig) -> Result<OptimizationReport> {
    optimize_with(graph, config, &mut default_passes())
}

/// Run `passes` in sequence; the first failing pass aborts the whole run.
pub fn optimize_with(
    graph: &mut StageGraph,
    config: &EngineConfig,
    passes: &mut [Box<dyn OptimizerPass>],
) -> Result<OptimizationReport> {
    // Cycles are fatal before any pass touches the graph.
    DepthFirstWalker::new(graph).order()?;
    let before = graph.fingerprint()?;

    let mut outcomes = Vec::with_capacity(passes.len());
    for pass in passes.iter_mut() {
        let outcome = pass.run(graph, config).map_err(|e| {
            tracing::warn!(pass = pass.name(), error = %e, "optimization aborted");
            e
        })?;
        outcomes.push(outcome);
    }

    let after = graph.fingerprint()?;
    tracing::debug!(before = %before.short(), after = %after.short(), "optimization finished");
    Ok(OptimizationReport {
        passes: outcomes,
        before,
        after,
    })
}
