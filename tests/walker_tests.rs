//! Graph walking over optimizer-shaped graphs.

mod test_data_gen;

use stageopt_core::error::Error;
use stageopt_core::id::StageId;
use stageopt_core::plan::LoadSource;
use stageopt_core::stage::{Stage, StageGraph, StageKind, StageMeta};
use stageopt_planner::optimize;
use stageopt_walk::verify::assert_topological;
use stageopt_walk::{walk, DepthFirstWalker, PlanVisitor};
use test_data_gen::{config, copy_plan};

/// A diamond plus an unrelated stage: 0 -> {1, 2} -> 3, and 4 alone.
fn diamond() -> StageGraph {
    let mut g = StageGraph::new();
    let ids: Vec<StageId> = (0..5)
        .map(|i| {
            g.add_stage(
                StageKind::Ordinary,
                copy_plan(LoadSource::Dataset(format!("d{i}")), &format!("t{i}")),
                StageMeta::default(),
            )
        })
        .collect();
    for (from, to) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
        g.connect(ids[from], ids[to]).unwrap();
    }
    g
}

#[derive(Default)]
struct Recorder {
    ordinary: Vec<StageId>,
    concatenate: Vec<StageId>,
}

impl PlanVisitor for Recorder {
    fn visit_ordinary(&mut self, stage: &Stage, _graph: &StageGraph) -> stageopt_core::error::Result<()> {
        self.ordinary.push(stage.id);
        Ok(())
    }

    fn visit_concatenate(&mut self, stage: &Stage, _graph: &StageGraph) -> stageopt_core::error::Result<()> {
        self.concatenate.push(stage.id);
        Ok(())
    }
}

#[test]
fn every_stage_once_after_its_predecessors() {
    let g = diamond();
    let order = DepthFirstWalker::new(&g).order().unwrap();
    assert_eq!(order.len(), 5);
    assert_topological(&g, &order);

    let mut rec = Recorder::default();
    assert_eq!(walk(&g, &mut rec).unwrap(), 5);
    assert_eq!(rec.ordinary, order);
    assert!(rec.concatenate.is_empty());
}

#[test]
fn cycles_abort_optimization_with_the_path() {
    let mut g = diamond();
    g.connect(StageId::new(3), StageId::new(0)).unwrap();
    let before = g.fingerprint().unwrap();

    let err = optimize(&mut g, &config(4, true)).unwrap_err();
    match &err {
        Error::MalformedPlan { reason, .. } => assert!(reason.contains("cycle"), "{reason}"),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(g.fingerprint().unwrap(), before);
}

#[test]
fn concatenate_stages_dispatch_to_their_own_hook() {
    let mut g = StageGraph::new();
    let a = g.add_stage(
        StageKind::Ordinary,
        copy_plan(LoadSource::Dataset("in".into()), "tmp/a"),
        StageMeta::default(),
    );
    let c = g.add_stage(
        StageKind::Concatenate,
        copy_plan(LoadSource::Stage(a), "tmp/c"),
        StageMeta::default(),
    );
    g.connect(a, c).unwrap();

    let mut rec = Recorder::default();
    walk(&g, &mut rec).unwrap();
    assert_eq!(rec.ordinary, vec![a]);
    assert_eq!(rec.concatenate, vec![c]);
}
