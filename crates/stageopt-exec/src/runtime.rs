//! Runtime: execute a stage graph job by job and emit a RunManifest.
//!
//! Every stage becomes one job, submitted once all of its predecessors have
//! finished. A job runs map tasks over its input splits, shuffles whatever
//! reaches a grouping operator to its reduce tasks, and writes one part file
//! per task into each store target it owns.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use stageopt_core::config::EngineConfig;
use stageopt_core::hash::{hash_serde, Hash256};
use stageopt_core::id::{JobId, OpId, StageId};
use stageopt_core::manifest::RunManifest;
use stageopt_core::plan::{LoadSource, OpKind};
use stageopt_core::stage::{Stage, StageGraph, StageKind};
use stageopt_core::types::Row;

use stageopt_planner::estimate::{annotate_output_files, broadcast_loads, reduce_tasks};
use stageopt_planner::{optimize, validate_graph, OptimizationReport};

use crate::eval::{
    group_by_key, partition, run_map_task, run_reduce_task, split_phases, Groups, TaskOutput,
};
use crate::job_graph::{Job, JobGraph, JobStats};
use crate::metrics;
use crate::scheduler::ReadyQueue;
use crate::storage::{part_path, MemoryFileStore};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Plan(#[from] stageopt_core::error::Error),
    #[error("invalid plan: {0}")]
    Invalid(String),
    #[error("operator exec: {0}")]
    Operator(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("hashing error: {0}")]
    Hash(String),
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub job_graph: JobGraph,
    /// Store target of every leaf stage → all rows written there, in part order.
    pub outputs: BTreeMap<String, Vec<Row>>,
    pub manifest: RunManifest,
}

/// Engine owns the configuration and the file store jobs read from and write to.
pub struct Engine {
    cfg: EngineConfig,
    store: MemoryFileStore,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self::with_store(cfg, MemoryFileStore::new())
    }

    pub fn with_store(cfg: EngineConfig, store: MemoryFileStore) -> Self {
        Self { cfg, store }
    }

    /// The file store (for tests and callers to pre-populate datasets).
    pub fn store(&self) -> &MemoryFileStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Fill in file counts from the store, optimize, then run the result.
    pub fn optimize_and_run(
        &self,
        mut graph: StageGraph,
    ) -> Result<(StageGraph, OptimizationReport, RunOutcome), ExecError> {
        annotate_output_files(&mut graph, &self.store, &self.cfg)?;
        let report = optimize(&mut graph, &self.cfg)?;
        let outcome = self.run(&graph)?;
        Ok((graph, report, outcome))
    }

    /// Execute `graph` as-is. The graph is not modified.
    pub fn run(&self, graph: &StageGraph) -> Result<RunOutcome, ExecError> {
        validate_graph(graph)?;
        let plan_hash = graph.fingerprint()?;
        let started_ms = now_millis();

        let mut jobs = JobGraph::new();
        let mut job_of: BTreeMap<StageId, JobId> = BTreeMap::new();
        let mut queue = ReadyQueue::new(graph);

        while let Some(id) = queue.pop() {
            let stage = graph.require(id)?;
            let job_id = JobId::new(job_of.len() as u64);
            let stats = self.run_stage(graph, stage)?;
            let job = Job {
                id: job_id,
                stage: id,
                kind: stage.kind,
                stats,
            };
            metrics::emit_job(&job);
            jobs.push(job);
            job_of.insert(id, job_id);
            queue.complete(id);
        }
        if !queue.is_finished() {
            return Err(ExecError::Invalid(format!(
                "{} stages never became ready",
                queue.remaining()
            )));
        }
        for (from, to) in graph.edges() {
            if let (Some(a), Some(b)) = (job_of.get(&from), job_of.get(&to)) {
                jobs.link(*a, *b);
            }
        }

        let mut outputs = BTreeMap::new();
        for leaf in graph.leaves() {
            if let Some(target) = graph.require(leaf)?.plan.store_target() {
                outputs.insert(target.to_string(), self.store.read_dir(target)?);
            }
        }
        let digest = digest_outputs(&outputs)?;
        let manifest =
            RunManifest::new(plan_hash, jobs.len(), started_ms).finish(now_millis(), Some(digest));
        metrics::emit_run(&manifest);

        Ok(RunOutcome {
            job_graph: jobs,
            outputs,
            manifest,
        })
    }

    fn run_stage(&self, graph: &StageGraph, stage: &Stage) -> Result<JobStats, ExecError> {
        let plan = &stage.plan;
        let phases = split_phases(plan)?;
        let broadcast = broadcast_loads(plan);
        let mut stats = JobStats::default();

        // Replicated sides are read in full by every task that touches them.
        let mut broadcast_rows: BTreeMap<OpId, Vec<Row>> = BTreeMap::new();
        let mut splits: Vec<(OpId, Vec<String>)> = Vec::new();
        for op in plan.ops() {
            let OpKind::Load { source } = &op.kind else {
                continue;
            };
            let files = self.store.list(&self.resolve(graph, source)?)?;
            if broadcast.contains(&op.id) {
                stats.broadcast_files += files.len() as u32;
                broadcast_rows.insert(op.id, self.read_files(&files)?);
                continue;
            }
            match stage.kind {
                StageKind::Concatenate => splits.push((op.id, files)),
                StageKind::Ordinary if self.cfg.split_combination_disabled => {
                    splits.extend(files.into_iter().map(|f| (op.id, vec![f])));
                }
                StageKind::Ordinary if files.is_empty() => {}
                StageKind::Ordinary => splits.push((op.id, files)),
            }
        }

        let mut map_out: Vec<TaskOutput> = Vec::with_capacity(splits.len());
        for (load, files) in &splits {
            let mut bound = broadcast_rows.clone();
            bound.insert(*load, self.read_files(files)?);
            map_out.push(run_map_task(plan, &phases, &bound)?);
        }
        stats.map_tasks = map_out.len() as u32;

        let mut reduce_out: Vec<TaskOutput> = Vec::new();
        if phases.has_reduce() {
            let reducers = reduce_tasks(stage, &self.cfg) as usize;
            let mut per_reducer: Vec<BTreeMap<OpId, Groups>> =
                (0..reducers.max(1)).map(|_| BTreeMap::new()).collect();
            for pkg in plan.packages() {
                let keyed: Vec<Row> = map_out
                    .iter_mut()
                    .flat_map(|t| t.shuffle.remove(&pkg).unwrap_or_default())
                    .collect();
                let parts = partition(group_by_key(keyed)?, reducers);
                for (i, part) in parts.into_iter().enumerate() {
                    per_reducer[i].insert(pkg, part);
                }
            }
            for groups in &per_reducer {
                reduce_out.push(run_reduce_task(plan, &phases, groups, &broadcast_rows)?);
            }
            stats.reduce_tasks = reduce_out.len() as u32;
        }

        for op in plan.ops() {
            let OpKind::Store { target } = &op.kind else {
                continue;
            };
            let tasks = if phases.reduce.contains(&op.id) {
                &reduce_out
            } else {
                &map_out
            };
            self.store.clear_dir(target)?;
            for (i, task) in tasks.iter().enumerate() {
                let rows = task.stores.get(target).cloned().unwrap_or_default();
                stats.output_rows += rows.len() as u64;
                self.store.write(&part_path(target, i), rows)?;
            }
            stats.output_files += tasks.len() as u32;
        }

        tracing::debug!(
            stage = %stage.id,
            splits = splits.len(),
            reduce = phases.has_reduce(),
            "stage executed"
        );
        Ok(stats)
    }

    /// Directory a load reads: the dataset path, or the producing stage's store target.
    fn resolve(&self, graph: &StageGraph, source: &LoadSource) -> Result<String, ExecError> {
        match source {
            LoadSource::Dataset(path) => Ok(path.clone()),
            LoadSource::Stage(s) => graph
                .require(*s)?
                .plan
                .store_target()
                .map(str::to_string)
                .ok_or_else(|| ExecError::Invalid(format!("{s} is loaded from but stores nothing"))),
        }
    }

    fn read_files(&self, files: &[String]) -> Result<Vec<Row>, ExecError> {
        let mut rows = Vec::new();
        for f in files {
            rows.extend(self.store.read(f)?);
        }
        Ok(rows)
    }
}

fn digest_outputs(outputs: &BTreeMap<String, Vec<Row>>) -> Result<Hash256, ExecError> {
    hash_serde(outputs).map_err(|e| ExecError::Hash(e.to_string()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
