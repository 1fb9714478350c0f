//! Static task and file-count model.
//!
//! The join repair pass only looks at `StageMeta::output_files`. Compilers may
//! leave it unknown; `annotate_output_files` fills it in from structure, using
//! the same task model the runtime follows:
//!
//! - a load splits into one task per file, or one task per load when split
//!   combination is enabled;
//! - loads feeding a replicated join side are broadcast, not split;
//! - a grouping stage runs `parallelism` reduce tasks and writes one file per
//!   reduce task; a map-only stage writes one file per map task;
//! - a Concatenate Stage always runs one map task and writes one file.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use stageopt_core::config::EngineConfig;
use stageopt_core::error::Result;
use stageopt_core::id::OpId;
use stageopt_core::plan::{LoadSource, OpKind, SubPlan};
use stageopt_core::stage::{FileCount, Stage, StageGraph, StageKind};
use stageopt_walk::DepthFirstWalker;

/// Read-only lookup of how many files back a dataset.
pub trait FileCatalog {
    fn file_count(&self, dataset: &str) -> Option<u32>;
}

impl FileCatalog for BTreeMap<String, u32> {
    fn file_count(&self, dataset: &str) -> Option<u32> {
        self.get(dataset).copied()
    }
}

impl FileCatalog for HashMap<String, u32> {
    fn file_count(&self, dataset: &str) -> Option<u32> {
        self.get(dataset).copied()
    }
}

/// Loads that feed a non-fragment side of a fragment-replicate join.
pub fn broadcast_loads(plan: &SubPlan) -> BTreeSet<OpId> {
    let mut out = BTreeSet::new();
    for op in plan.ops() {
        if let OpKind::FrJoin { fragment, .. } = &op.kind {
            for (side, input) in op.inputs.iter().enumerate() {
                let is_load = plan
                    .get(*input)
                    .map(|i| matches!(i.kind, OpKind::Load { .. }))
                    .unwrap_or(false);
                if side != *fragment && is_load {
                    out.insert(*input);
                }
            }
        }
    }
    out
}

/// Tasks one load contributes for `files` input files.
pub fn load_splits(files: u32, split_combination_disabled: bool) -> u32 {
    if split_combination_disabled {
        files
    } else {
        files.min(1)
    }
}

/// Reduce tasks a stage runs; zero without a grouping phase.
pub fn reduce_tasks(stage: &Stage, config: &EngineConfig) -> u32 {
    if stage.is_concatenate() {
        return 0;
    }
    let packages: Vec<Option<u32>> = stage
        .plan
        .ops()
        .filter_map(|op| match op.kind {
            OpKind::Package { parallelism, .. } => Some(parallelism),
            _ => None,
        })
        .collect();
    if packages.is_empty() {
        return 0;
    }
    packages
        .into_iter()
        .flatten()
        .max()
        .or(stage.meta.parallelism)
        .unwrap_or(config.default_parallelism)
        .max(1)
}

/// Map tasks a stage runs, given the file count behind each of its loads.
pub fn map_tasks(
    stage: &Stage,
    config: &EngineConfig,
    files_of: impl Fn(&LoadSource) -> FileCount,
) -> FileCount {
    if stage.kind == StageKind::Concatenate {
        return FileCount::Known(1);
    }
    let broadcast = broadcast_loads(&stage.plan);
    let mut total = 0u32;
    for op in stage.plan.ops() {
        let OpKind::Load { source } = &op.kind else {
            continue;
        };
        if broadcast.contains(&op.id) {
            continue;
        }
        match files_of(source) {
            FileCount::Known(n) => {
                total = total.saturating_add(load_splits(n, config.split_combination_disabled))
            }
            FileCount::Unknown => return FileCount::Unknown,
        }
    }
    FileCount::Known(total)
}

/// Files a stage writes, given the file count behind each of its loads.
pub fn output_files(
    stage: &Stage,
    config: &EngineConfig,
    files_of: impl Fn(&LoadSource) -> FileCount,
) -> FileCount {
    match stage.kind {
        StageKind::Concatenate => FileCount::Known(1),
        StageKind::Ordinary if stage.plan.has_reduce_phase() => {
            FileCount::Known(reduce_tasks(stage, config))
        }
        StageKind::Ordinary => map_tasks(stage, config, files_of),
    }
}

/// Fill in unknown `output_files` from structure; known counts are kept.
/// Returns how many stages changed from unknown to known.
pub fn annotate_output_files(
    graph: &mut StageGraph,
    catalog: &dyn FileCatalog,
    config: &EngineConfig,
) -> Result<usize> {
    let order = DepthFirstWalker::new(graph).order()?;
    let mut annotated = 0;

    for id in order {
        let stage = graph.require(id)?;
        if stage.meta.output_files.is_known() {
            continue;
        }
        let estimate = output_files(stage, config, |source| match source {
            LoadSource::Dataset(path) => catalog
                .file_count(path)
                .map(FileCount::Known)
                .unwrap_or(FileCount::Unknown),
            LoadSource::Stage(s) => graph
                .stage(*s)
                .map(|st| st.meta.output_files)
                .unwrap_or(FileCount::Unknown),
        });
        tracing::debug!(stage = %id, files = %estimate, "estimated output files");
        if let (FileCount::Known(_), Some(st)) = (estimate, graph.stage_mut(id)) {
            st.meta.output_files = estimate;
            annotated += 1;
        }
    }
    Ok(annotated)
}
