//! Test fixtures: small relations and stage graphs shared by the integration tests.

#![allow(dead_code)]

use stageopt_core::config::EngineConfig;
use stageopt_core::id::StageId;
use stageopt_core::plan::{AggFn, Expr, LoadSource, OpKind, SubPlan};
use stageopt_core::stage::{FileCount, StageGraph, StageKind, StageMeta};
use stageopt_core::types::{Row, Scalar};
use stageopt_exec::Engine;

pub fn r(vals: &[i64]) -> Row {
    vals.iter().map(|v| Scalar::I64(*v)).collect()
}

pub fn config(threshold: u32, disabled: bool) -> EngineConfig {
    EngineConfig::default()
        .with_merge_files_threshold(threshold)
        .with_split_combination_disabled(disabled)
}

/// `rows` rows `[i % 4, i]` dealt round-robin over `files` files.
pub fn small_relation(files: usize, rows: usize) -> Vec<Vec<Row>> {
    let mut out: Vec<Vec<Row>> = (0..files).map(|_| Vec::new()).collect();
    for i in 0..rows {
        out[i % files].push(r(&[(i % 4) as i64, i as i64]));
    }
    out
}

/// One file of `[k, k * 10]` for `k` in `0..rows`.
pub fn big_relation(rows: usize) -> Vec<Vec<Row>> {
    vec![(0..rows as i64).map(|k| r(&[k, k * 10])).collect()]
}

pub fn copy_plan(source: LoadSource, target: &str) -> SubPlan {
    let mut p = SubPlan::new();
    let l = p.add(OpKind::Load { source }, &[]);
    p.add(
        OpKind::Store {
            target: target.into(),
        },
        &[l],
    );
    p
}

/// Load → LocalRearrange(0) → Package → ForEach(exprs) → Store, two reducers.
pub fn grouping_plan(source: LoadSource, exprs: Vec<Expr>, target: &str) -> SubPlan {
    grouping_plan_with(source, exprs, target, 2)
}

pub fn grouping_plan_with(
    source: LoadSource,
    exprs: Vec<Expr>,
    target: &str,
    reducers: u32,
) -> SubPlan {
    let mut p = SubPlan::new();
    let l = p.add(OpKind::Load { source }, &[]);
    let lr = p.add(OpKind::LocalRearrange { key: 0 }, &[l]);
    let pkg = p.add(
        OpKind::Package {
            parallelism: Some(reducers),
            accumulative: false,
        },
        &[lr],
    );
    let fe = p.add(OpKind::ForEach { exprs }, &[pkg]);
    p.add(
        OpKind::Store {
            target: target.into(),
        },
        &[fe],
    );
    p
}

pub fn sum_and_count() -> Vec<Expr> {
    vec![
        Expr::GroupKey,
        Expr::Aggregate {
            func: AggFn::Sum,
            column: 1,
            distinct: false,
        },
        Expr::Aggregate {
            func: AggFn::Count,
            column: 1,
            distinct: false,
        },
    ]
}

/// `FrJoin([Load(fragment), Load(replicated)])` on column 0, stored at `target`.
pub fn frjoin_plan(fragment: LoadSource, replicated: LoadSource, target: &str) -> SubPlan {
    let mut p = SubPlan::new();
    let f = p.add(OpKind::Load { source: fragment }, &[]);
    let rep = p.add(OpKind::Load { source: replicated }, &[]);
    let j = p.add(
        OpKind::FrJoin {
            keys: vec![0, 0],
            fragment: 0,
        },
        &[f, rep],
    );
    p.add(
        OpKind::Store {
            target: target.into(),
        },
        &[j],
    );
    p
}

pub struct JoinFixture {
    pub graph: StageGraph,
    pub small: StageId,
    pub join: StageId,
}

/// Stage `small` copies dataset `small` to `tmp/small`; stage `join` joins
/// dataset `big` (fragment) with that output (replicated) into `out/joined`.
pub fn join_fixture(small_files: FileCount) -> JoinFixture {
    let mut graph = StageGraph::new();
    let small = graph.add_stage(
        StageKind::Ordinary,
        copy_plan(LoadSource::Dataset("small".into()), "tmp/small"),
        StageMeta {
            output_files: small_files,
            parallelism: None,
        },
    );

    let mut p = SubPlan::new();
    let big = p.add(
        OpKind::Load {
            source: LoadSource::Dataset("big".into()),
        },
        &[],
    );
    let side = p.add(
        OpKind::Load {
            source: LoadSource::Stage(small),
        },
        &[],
    );
    let j = p.add(
        OpKind::FrJoin {
            keys: vec![0, 0],
            fragment: 0,
        },
        &[big, side],
    );
    p.add(
        OpKind::Store {
            target: "out/joined".into(),
        },
        &[j],
    );
    let join = graph.add_stage(StageKind::Ordinary, p, StageMeta::default());
    graph.connect(small, join).expect("fixture edge");
    JoinFixture { graph, small, join }
}

/// An engine whose store holds `small` (`files` files, `rows` rows) and `big`.
pub fn engine_with(cfg: EngineConfig, files: usize, rows: usize) -> Engine {
    let engine = Engine::new(cfg);
    engine
        .store()
        .put_dataset("small", small_relation(files, rows))
        .expect("put small");
    engine
        .store()
        .put_dataset("big", big_relation(8))
        .expect("put big");
    engine
}
