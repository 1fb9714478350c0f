//! Accumulative-mode pass: mark grouping operators whose groups can be consumed
//! as a stream instead of being materialized.
//!
//! A stage qualifies when every grouping operator in its sub-plan feeds only
//! projections, and everything downstream of the grouping point folds into a
//! bounded accumulator. Qualifying stages get `accumulative: true` on all their
//! `Package` operators; nothing else in the plan changes.

use std::fmt;

use serde::Serialize;

use stageopt_core::config::EngineConfig;
use stageopt_core::error::{Error, Result};
use stageopt_core::id::{OpId, StageId};
use stageopt_core::plan::{Expr, OpKind, SubPlan};
use stageopt_core::stage::{Stage, StageGraph};
use stageopt_walk::{walk, PlanVisitor};

use crate::pass::{combine_failures, OptimizationDecision, OptimizerPass, PassOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Qualification {
    /// No grouping operator in the stage.
    NoGrouping,
    Qualifies { packages: Vec<OpId> },
    /// `op` needs the whole group.
    Unsafe { op: OpId, reason: String },
}

impl fmt::Display for Qualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualification::NoGrouping => f.write_str("no grouping"),
            Qualification::Qualifies { packages } => {
                write!(f, "flagged {} package(s)", packages.len())
            }
            Qualification::Unsafe { op, reason } => write!(f, "left as is ({op}: {reason})"),
        }
    }
}

/// Decide whether a (well-formed) sub-plan can run its grouping in accumulative mode.
pub fn qualify(plan: &SubPlan) -> Qualification {
    let packages = plan.packages();
    if packages.is_empty() {
        return Qualification::NoGrouping;
    }

    for &pkg in &packages {
        for consumer in plan.consumers(pkg) {
            let Some(op) = plan.get(consumer) else {
                continue;
            };
            let OpKind::ForEach { exprs } = &op.kind else {
                return Qualification::Unsafe {
                    op: consumer,
                    reason: format!("group consumed directly by {}", op.kind.name()),
                };
            };
            // Right after grouping, column 1 is the group's bag.
            if exprs.iter().any(|e| matches!(e, Expr::Column(n) if *n >= 1)) {
                return Qualification::Unsafe {
                    op: consumer,
                    reason: "projection reads the group's bag".into(),
                };
            }
        }
        if plan.consumers(pkg).is_empty() {
            return Qualification::Unsafe {
                op: pkg,
                reason: "group output is not projected".into(),
            };
        }

        for id in plan.downstream_of(pkg) {
            let Some(op) = plan.get(id) else {
                continue;
            };
            if let Some(reason) = unsafe_reason(&op.kind) {
                return Qualification::Unsafe { op: id, reason };
            }
        }
    }

    Qualification::Qualifies { packages }
}

/// Why an operator downstream of a grouping point would need the full group.
fn unsafe_reason(kind: &OpKind) -> Option<String> {
    match kind {
        OpKind::ForEach { exprs } => exprs.iter().find(|e| !e.is_accumulation_safe()).map(|e| {
            format!("projection {e:?} is not computable from an accumulator")
        }),
        OpKind::Filter { .. } | OpKind::Limit { .. } | OpKind::Store { .. } => None,
        OpKind::FrJoin { .. } => None,
        OpKind::Sort { .. } => Some("sort requires the full group".into()),
        OpKind::Package { .. } | OpKind::LocalRearrange { .. } => {
            Some("regrouping after the grouping point".into())
        }
        OpKind::Load { .. } => Some("load downstream of a grouping point".into()),
    }
}

/// Evaluation phase: per-stage verdicts, structural failures kept per stage.
#[derive(Default)]
struct Evaluator {
    verdicts: Vec<(StageId, Qualification)>,
    failures: Vec<Error>,
}

impl PlanVisitor for Evaluator {
    fn visit_ordinary(&mut self, stage: &Stage, graph: &StageGraph) -> Result<()> {
        if let Err(e) = graph.check_stage(stage.id) {
            tracing::debug!(stage = %stage.id, error = %e, "accumulative: malformed stage");
            self.failures.push(e);
            return Ok(());
        }
        let verdict = qualify(&stage.plan);
        tracing::debug!(stage = %stage.id, %verdict, "accumulative: evaluated");
        self.verdicts.push((stage.id, verdict));
        Ok(())
    }

    fn visit_concatenate(&mut self, stage: &Stage, _graph: &StageGraph) -> Result<()> {
        self.verdicts.push((stage.id, Qualification::NoGrouping));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct AccumulativePass;

impl OptimizerPass for AccumulativePass {
    fn name(&self) -> &'static str {
        "accumulative"
    }

    fn run(&mut self, graph: &mut StageGraph, _config: &EngineConfig) -> Result<PassOutcome> {
        let mut eval = Evaluator::default();
        let visited = walk(graph, &mut eval)?;
        if let Some(err) = combine_failures(self.name(), eval.failures) {
            return Err(err);
        }

        let mut decisions = Vec::with_capacity(eval.verdicts.len());
        for (stage_id, verdict) in eval.verdicts {
            if let Qualification::Qualifies { packages } = &verdict {
                let stage = graph
                    .stage_mut(stage_id)
                    .ok_or_else(|| Error::Invariant(format!("{stage_id} vanished")))?;
                for pkg in packages {
                    if let Some(op) = stage.plan.get_mut(*pkg) {
                        if let OpKind::Package { accumulative, .. } = &mut op.kind {
                            *accumulative = true;
                        }
                    }
                }
            }
            decisions.push(OptimizationDecision::Accumulative {
                stage: stage_id,
                outcome: verdict,
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

#[cfg(test)]
mod tests {
    use super::*;
    use stageopt_core::plan::{AggFn, LoadSource};

    fn grouped(exprs: Vec<Expr>) -> (SubPlan, OpId, OpId) {
        let mut p = SubPlan::new();
        let load = p.add(
            OpKind::Load {
                source: LoadSource::Dataset("in".into()),
            },
            &[],
        );
        let lr = p.add(OpKind::LocalRearrange { key: 0 }, &[load]);
        let pkg = p.add(
            OpKind::Package {
                parallelism: None,
                accumulative: false,
            },
            &[lr],
        );
        let fe = p.add(OpKind::ForEach { exprs }, &[pkg]);
        (p, pkg, fe)
    }

    fn sum(distinct: bool) -> Expr {
        Expr::Aggregate {
            func: AggFn::Sum,
            column: 1,
            distinct,
        }
    }

    #[test]
    fn incremental_aggregates_qualify() {
        let (p, pkg, _) = grouped(vec![Expr::GroupKey, sum(false)]);
        assert_eq!(qualify(&p), Qualification::Qualifies { packages: vec![pkg] });
    }

    #[test]
    fn distinct_aggregates_need_the_whole_group() {
        let (p, _, fe) = grouped(vec![Expr::GroupKey, sum(true)]);
        assert!(matches!(qualify(&p), Qualification::Unsafe { op, .. } if op == fe));
    }

    #[test]
    fn projecting_the_bag_column_disqualifies() {
        let (p, _, fe) = grouped(vec![Expr::GroupKey, Expr::Column(1)]);
        assert!(matches!(qualify(&p), Qualification::Unsafe { op, .. } if op == fe));
        let (p, pkg, _) = grouped(vec![Expr::Column(0), sum(false)]);
        assert_eq!(qualify(&p), Qualification::Qualifies { packages: vec![pkg] });
    }

    #[test]
    fn non_accumulative_udf_disqualifies() {
        let udf = Expr::Aggregate {
            func: AggFn::Udf {
                name: "median".into(),
                accumulative: false,
            },
            column: 1,
            distinct: false,
        };
        let (p, _, _) = grouped(vec![udf]);
        assert!(matches!(qualify(&p), Qualification::Unsafe { .. }));
    }

    #[test]
    fn sort_after_grouping_disqualifies() {
        let (mut p, _, fe) = grouped(vec![Expr::GroupKey, sum(false)]);
        let sort = p.add(
            OpKind::Sort {
                column: 1,
                descending: false,
            },
            &[fe],
        );
        assert!(matches!(qualify(&p), Qualification::Unsafe { op, .. } if op == sort));
    }

    #[test]
    fn no_package_means_nothing_to_flag() {
        let mut p = SubPlan::new();
        p.add(
            OpKind::Load {
                source: LoadSource::Dataset("in".into()),
            },
            &[],
        );
        assert_eq!(qualify(&p), Qualification::NoGrouping);
    }
}
