//! Human-readable rendering of a stage graph and of what the optimizer did to it.

use std::fmt::Write as _;

use stageopt_core::plan::{LoadSource, OpKind, PhysicalOperator};
use stageopt_core::stage::{StageGraph, StageKind};

use crate::rules::OptimizationReport;

/// Render `graph` one stage per block, in id order, followed by the decisions in `report`.
pub fn render(graph: &StageGraph, report: Option<&OptimizationReport>) -> String {
    let mut out = String::new();
    for stage in graph.stages() {
        let kind = match stage.kind {
            StageKind::Ordinary => "ordinary",
            StageKind::Concatenate => "concatenate",
        };
        let preds: Vec<String> = graph
            .predecessors(stage.id)
            .iter()
            .map(|p| p.to_string())
            .collect();
        let _ = write!(
            out,
            "{} [{}] files={}",
            stage.id, kind, stage.meta.output_files
        );
        if !preds.is_empty() {
            let _ = write!(out, " after {}", preds.join(", "));
        }
        out.push('\n');
        for op in stage.plan.ops() {
            let _ = writeln!(out, "  {}", describe(op));
        }
    }

    if let Some(report) = report {
        let _ = writeln!(
            out,
            "plan {} -> {}",
            report.before.short(),
            report.after.short()
        );
        for pass in &report.passes {
            let _ = writeln!(
                out,
                "pass {}: {} stage(s), {} change(s)",
                pass.pass,
                pass.stages_visited,
                pass.changed()
            );
            for d in &pass.decisions {
                let _ = writeln!(out, "  {d}");
            }
        }
    }
    out
}

fn describe(op: &PhysicalOperator) -> String {
    let inputs: Vec<String> = op.inputs.iter().map(|i| i.to_string()).collect();
    let detail = match &op.kind {
        OpKind::Load {
            source: LoadSource::Dataset(path),
        } => format!("dataset {path}"),
        OpKind::Load {
            source: LoadSource::Stage(s),
        } => format!("output of {s}"),
        OpKind::Filter { predicate } => {
            format!("${} {:?} {:?}", predicate.column, predicate.op, predicate.value)
        }
        OpKind::LocalRearrange { key } => format!("key ${key}"),
        OpKind::Package {
            parallelism,
            accumulative,
        } => {
            let p = parallelism.map(|p| p.to_string()).unwrap_or_else(|| "default".into());
            if *accumulative {
                format!("parallel {p} accumulative")
            } else {
                format!("parallel {p}")
            }
        }
        OpKind::ForEach { exprs } => format!("{} expr(s)", exprs.len()),
        OpKind::Sort { column, descending } => {
            format!("${column} {}", if *descending { "desc" } else { "asc" })
        }
        OpKind::Limit { n } => format!("{n}"),
        OpKind::FrJoin { keys, fragment } => format!("keys {keys:?} fragment {fragment}"),
        OpKind::Store { target } => target.clone(),
    };
    if inputs.is_empty() {
        format!("{} {} {}", op.id, op.kind.name(), detail)
    } else {
        format!(
            "{} {} {} <- {}",
            op.id,
            op.kind.name(),
            detail,
            inputs.join(", ")
        )
    }
}
