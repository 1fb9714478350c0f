//! The realized job graph: one job per executed stage, with task statistics.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use stageopt_core::id::{JobId, StageId};
use stageopt_core::stage::StageKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub map_tasks: u32,
    pub reduce_tasks: u32,
    pub output_files: u32,
    pub output_rows: u64,
    /// Files every map task of this job reads in full (replicated join sides).
    pub broadcast_files: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub stage: StageId,
    pub kind: StageKind,
    pub stats: JobStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobGraph {
    jobs: BTreeMap<JobId, Job>,
    edges: BTreeSet<(JobId, JobId)>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, job: Job) {
        self.jobs.insert(job.id, job);
    }

    pub(crate) fn link(&mut self, from: JobId, to: JobId) {
        self.edges.insert((from, to));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs in submission order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn job_for_stage(&self, stage: StageId) -> Option<&Job> {
        self.jobs.values().find(|j| j.stage == stage)
    }

    /// Jobs with no predecessor.
    pub fn sources(&self) -> Vec<&Job> {
        let targets: BTreeSet<JobId> = self.edges.iter().map(|(_, to)| *to).collect();
        self.jobs
            .values()
            .filter(|j| !targets.contains(&j.id))
            .collect()
    }

    pub fn successors(&self, id: JobId) -> Vec<&Job> {
        self.edges
            .iter()
            .filter(|(from, _)| *from == id)
            .filter_map(|(_, to)| self.jobs.get(to))
            .collect()
    }

    pub fn predecessors(&self, id: JobId) -> Vec<&Job> {
        self.edges
            .iter()
            .filter(|(_, to)| *to == id)
            .filter_map(|(from, _)| self.jobs.get(from))
            .collect()
    }

    pub fn count_kind(&self, kind: StageKind) -> usize {
        self.jobs.values().filter(|j| j.kind == kind).count()
    }

    pub fn total_map_tasks(&self) -> u64 {
        self.jobs.values().map(|j| u64::from(j.stats.map_tasks)).sum()
    }
}
