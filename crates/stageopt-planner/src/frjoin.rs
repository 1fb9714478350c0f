//! Fragment-replicate join repair.
//!
//! Every task of a fragment-replicate join reads each file of every replicated
//! side in full. When the runtime is not allowed to combine small files
//! (`disable-split-combination`), a replicated side backed by many files makes
//! every join task open all of them. If the stage feeding such a side is known to
//! write more than `merge-files-threshold` files, a Concatenate Stage is inserted
//! on that edge: it reads the predecessor's output as one split and writes a
//! single file, and the join's load is pointed at it. Rows are unchanged; only
//! the job graph grows by one map-only job.
//!
//! Unknown file counts never trigger an insertion.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use stageopt_core::config::EngineConfig;
use stageopt_core::error::{Error, Result};
use stageopt_core::id::{OpId, StageId};
use stageopt_core::plan::{LoadSource, OpKind, SubPlan};
use stageopt_core::stage::{FileCount, Stage, StageGraph, StageKind, StageMeta};
use stageopt_walk::{walk, PlanVisitor};

use crate::pass::{OptimizationDecision, OptimizerPass, PassOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The runtime combines small files itself.
    SplitCombinationEnabled,
    /// The feeding stage's file count is not known statically.
    UnknownFileCount,
    WithinThreshold { files: u32, threshold: u32 },
    /// The side already reads from a Concatenate Stage.
    AlreadyConcatenated,
    /// The side is not a plain load of another stage's output.
    NotStageBacked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JoinRepairState {
    NoOp(SkipReason),
    StageInserted {
        source: StageId,
        concatenate: StageId,
        files: u32,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SplitCombinationEnabled => f.write_str("split combination enabled"),
            SkipReason::UnknownFileCount => f.write_str("file count unknown"),
            SkipReason::WithinThreshold { files, threshold } => {
                write!(f, "{files} file(s) within threshold {threshold}")
            }
            SkipReason::AlreadyConcatenated => f.write_str("already concatenated"),
            SkipReason::NotStageBacked => f.write_str("not loaded from a stage"),
        }
    }
}

impl fmt::Display for JoinRepairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinRepairState::NoOp(reason) => write!(f, "no-op ({reason})"),
            JoinRepairState::StageInserted {
                source,
                concatenate,
                files,
            } => write!(
                f,
                "inserted {concatenate} after {source} ({files} files -> 1)"
            ),
        }
    }
}

/// Target a Concatenate Stage stores its single file under.
pub fn concatenate_target(source: StageId, join: StageId) -> String {
    format!("tmp/concat-{}-{}", source.get(), join.get())
}

/// The pass-through plan of a Concatenate Stage: load `source`, store it again.
pub fn concatenate_plan(source: StageId, join: StageId) -> SubPlan {
    let mut plan = SubPlan::new();
    let load = plan.add(
        OpKind::Load {
            source: LoadSource::Stage(source),
        },
        &[],
    );
    plan.add(
        OpKind::Store {
            target: concatenate_target(source, join),
        },
        &[load],
    );
    plan
}

/// Outcome of the decision rule for one replicated join side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideDecision {
    Skip(SkipReason),
    Concatenate { source: StageId, files: u32 },
}

/// The decision rule for the replicated side loaded by `side_input`. Pure; no graph changes.
pub fn decide(
    graph: &StageGraph,
    plan: &SubPlan,
    side_input: OpId,
    config: &EngineConfig,
) -> SideDecision {
    if !config.split_combination_disabled {
        return SideDecision::Skip(SkipReason::SplitCombinationEnabled);
    }
    let source = match plan.get(side_input).map(|op| &op.kind) {
        Some(OpKind::Load {
            source: LoadSource::Stage(s),
        }) => *s,
        _ => return SideDecision::Skip(SkipReason::NotStageBacked),
    };
    let Some(feeder) = graph.stage(source) else {
        return SideDecision::Skip(SkipReason::NotStageBacked);
    };
    if feeder.is_concatenate() {
        return SideDecision::Skip(SkipReason::AlreadyConcatenated);
    }
    match feeder.meta.output_files {
        FileCount::Unknown => SideDecision::Skip(SkipReason::UnknownFileCount),
        FileCount::Known(files) if files > config.merge_files_threshold => {
            SideDecision::Concatenate { source, files }
        }
        FileCount::Known(files) => SideDecision::Skip(SkipReason::WithinThreshold {
            files,
            threshold: config.merge_files_threshold,
        }),
    }
}

/// One replicated side of one join.
struct SideVerdict {
    stage: StageId,
    join: OpId,
    side: usize,
    load: OpId,
    decision: SideDecision,
}

struct Evaluator<'c> {
    config: &'c EngineConfig,
    verdicts: Vec<SideVerdict>,
}

impl PlanVisitor for Evaluator<'_> {
    fn visit_ordinary(&mut self, stage: &Stage, graph: &StageGraph) -> Result<()> {
        let joins = stage.plan.frjoins();
        if joins.is_empty() {
            return Ok(());
        }
        // Join sides pointing at operators or stages that do not exist are fatal.
        graph.check_stage(stage.id)?;

        for join in joins {
            let Some(op) = stage.plan.get(join) else {
                continue;
            };
            let OpKind::FrJoin { fragment, .. } = &op.kind else {
                continue;
            };
            for (side, &input) in op.inputs.iter().enumerate() {
                if side == *fragment {
                    continue;
                }
                let decision = decide(graph, &stage.plan, input, self.config);
                tracing::debug!(stage = %stage.id, %join, side, ?decision, "frjoin-repair: evaluated");
                self.verdicts.push(SideVerdict {
                    stage: stage.id,
                    join,
                    side,
                    load: input,
                    decision,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FrJoinRepairPass;

impl OptimizerPass for FrJoinRepairPass {
    fn name(&self) -> &'static str {
        "frjoin-repair"
    }

    fn run(&mut self, graph: &mut StageGraph, config: &EngineConfig) -> Result<PassOutcome> {
        let mut eval = Evaluator {
            config,
            verdicts: Vec::new(),
        };
        let visited = walk(graph, &mut eval)?;

        // Sides of the same stage that read the same source share one Concatenate Stage.
        let mut inserted: BTreeMap<(StageId, StageId), StageId> = BTreeMap::new();
        let mut decisions = Vec::with_capacity(eval.verdicts.len());

        for v in eval.verdicts {
            let state = match v.decision {
                SideDecision::Concatenate { source, files } => {
                    let concatenate = match inserted.get(&(source, v.stage)) {
                        Some(existing) => *existing,
                        None => {
                            let id = insert_concatenate(graph, source, v.stage)?;
                            inserted.insert((source, v.stage), id);
                            id
                        }
                    };
                    repoint_load(graph, v.stage, v.load, source, concatenate)?;
                    JoinRepairState::StageInserted {
                        source,
                        concatenate,
                        files,
                    }
                }
                SideDecision::Skip(reason) => JoinRepairState::NoOp(reason),
            };
            decisions.push(OptimizationDecision::JoinRepair {
                stage: v.stage,
                join: v.join,
                side: v.side,
                state,
            });
        }

        let outcome = PassOutcome {
            pass: self.name(),
            stages_visited: visited,
            decisions,
        };
        tracing::info!(
            pass = outcome.pass,
            stages = outcome.stages_visited,
            changed = outcome.changed(),
            "optimization pass finished"
        );
        Ok(outcome)
    }
}

fn insert_concatenate(graph: &mut StageGraph, source: StageId, join: StageId) -> Result<StageId> {
    let meta = StageMeta {
        output_files: FileCount::Known(1),
        parallelism: None,
    };
    let id = graph.insert_between(
        source,
        join,
        StageKind::Concatenate,
        concatenate_plan(source, join),
        meta,
    )?;
    tracing::debug!(%source, %join, concatenate = %id, "frjoin-repair: inserted concatenate stage");
    Ok(id)
}

/// Point the join stage's `load` at `concatenate`; keep the direct edge from
/// `source` only if something else in the stage still reads it.
fn repoint_load(
    graph: &mut StageGraph,
    stage: StageId,
    load: OpId,
    source: StageId,
    concatenate: StageId,
) -> Result<()> {
    let still_reads_source = {
        let st = graph
            .stage_mut(stage)
            .ok_or_else(|| Error::Invariant(format!("{stage} vanished")))?;
        let op = st
            .plan
            .get_mut(load)
            .ok_or_else(|| Error::malformed(stage, format!("{load} vanished")))?;
        op.kind = OpKind::Load {
            source: LoadSource::Stage(concatenate),
        };
        st.plan.stage_inputs().contains(&source)
    };
    if still_reads_source {
        graph.connect(source, stage)?;
    } else {
        graph.disconnect(source, stage);
    }
    Ok(())
}
