//! Tracing hooks for executed jobs and runs.
//!
//! No subscriber is installed here; binaries decide where events go.

use stageopt_core::manifest::RunManifest;

use crate::job_graph::Job;

pub fn emit_job(job: &Job) {
    tracing::info!(
        job = %job.id,
        stage = %job.stage,
        kind = ?job.kind,
        maps = job.stats.map_tasks,
        reduces = job.stats.reduce_tasks,
        files = job.stats.output_files,
        rows = job.stats.output_rows,
        broadcast_files = job.stats.broadcast_files,
        "job finished"
    );
}

pub fn emit_run(manifest: &RunManifest) {
    tracing::info!(
        run = %manifest.id.0,
        plan = %manifest.plan_hash.short(),
        jobs = manifest.job_count,
        ms = manifest.duration_ms(),
        "run finished"
    );
}
