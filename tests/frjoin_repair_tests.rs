//! Fragment-replicate join repair: when a Concatenate Stage is inserted and how
//! the graph is rewired around it.

mod test_data_gen;

use stageopt_core::error::Error;
use stageopt_core::plan::{LoadSource, OpKind};
use stageopt_core::stage::{FileCount, StageKind};
use stageopt_planner::frjoin::concatenate_target;
use stageopt_planner::{optimize, JoinRepairState, OptimizationDecision, SkipReason};
use stageopt_walk::verify::assert_topological;
use stageopt_walk::DepthFirstWalker;
use test_data_gen::{config, join_fixture, JoinFixture};

fn repair_states(report: &stageopt_planner::OptimizationReport) -> Vec<JoinRepairState> {
    report
        .decisions()
        .filter_map(|d| match d {
            OptimizationDecision::JoinRepair { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

#[test]
fn threshold_is_strictly_greater_than() {
    let JoinFixture { mut graph, .. } = join_fixture(FileCount::Known(4));
    let report = optimize(&mut graph, &config(4, true)).unwrap();
    assert_eq!(
        repair_states(&report),
        vec![JoinRepairState::NoOp(SkipReason::WithinThreshold {
            files: 4,
            threshold: 4
        })]
    );
    assert_eq!(graph.count_kind(StageKind::Concatenate), 0);
    assert!(!report.changed());

    let JoinFixture { mut graph, .. } = join_fixture(FileCount::Known(5));
    let report = optimize(&mut graph, &config(4, true)).unwrap();
    assert_eq!(report.inserted_stages().len(), 1);
    assert_eq!(graph.count_kind(StageKind::Concatenate), 1);
    assert!(report.changed());
}

#[test]
fn inserted_stage_sits_between_source_and_join() {
    let JoinFixture {
        mut graph,
        small,
        join,
    } = join_fixture(FileCount::Known(12));
    let report = optimize(&mut graph, &config(4, true)).unwrap();
    let concat = report.inserted_stages()[0];

    assert!(graph.has_edge(small, concat));
    assert!(graph.has_edge(concat, join));
    assert!(!graph.has_edge(small, join));
    assert_eq!(graph.len(), 3);

    let stage = graph.stage(concat).unwrap();
    assert_eq!(stage.kind, StageKind::Concatenate);
    assert_eq!(stage.meta.output_files, FileCount::Known(1));
    assert_eq!(
        stage.plan.store_target(),
        Some(concatenate_target(small, join).as_str())
    );

    let join_stage = graph.stage(join).unwrap();
    assert!(join_stage.plan.ops().any(|op| matches!(
        &op.kind,
        OpKind::Load { source: LoadSource::Stage(s) } if *s == concat
    )));
    assert!(!join_stage.plan.stage_inputs().contains(&small));

    let order = DepthFirstWalker::new(&graph).order().unwrap();
    assert_topological(&graph, &order);
    assert_eq!(
        repair_states(&report),
        vec![JoinRepairState::StageInserted {
            source: small,
            concatenate: concat,
            files: 12
        }]
    );
}

#[test]
fn split_combination_enabled_never_inserts() {
    let JoinFixture { mut graph, .. } = join_fixture(FileCount::Known(100));
    let report = optimize(&mut graph, &config(4, false)).unwrap();
    assert_eq!(
        repair_states(&report),
        vec![JoinRepairState::NoOp(SkipReason::SplitCombinationEnabled)]
    );
    assert_eq!(graph.len(), 2);
}

#[test]
fn unknown_file_count_is_left_alone() {
    let JoinFixture { mut graph, .. } = join_fixture(FileCount::Unknown);
    let report = optimize(&mut graph, &config(0, true)).unwrap();
    assert_eq!(
        repair_states(&report),
        vec![JoinRepairState::NoOp(SkipReason::UnknownFileCount)]
    );
    assert_eq!(graph.count_kind(StageKind::Concatenate), 0);
}

#[test]
fn second_run_changes_nothing() {
    let JoinFixture { mut graph, .. } = join_fixture(FileCount::Known(9));
    let cfg = config(4, true);
    optimize(&mut graph, &cfg).unwrap();
    let once = graph.fingerprint().unwrap();

    let report = optimize(&mut graph, &cfg).unwrap();
    assert!(!report.changed());
    assert_eq!(graph.fingerprint().unwrap(), once);
    assert_eq!(graph.count_kind(StageKind::Concatenate), 1);
    assert_eq!(
        repair_states(&report),
        vec![JoinRepairState::NoOp(SkipReason::AlreadyConcatenated)]
    );
}

#[test]
fn load_from_a_non_predecessor_is_malformed() {
    let JoinFixture {
        mut graph,
        small,
        join,
    } = join_fixture(FileCount::Known(9));
    graph.disconnect(small, join);
    let before = graph.fingerprint().unwrap();

    let err = optimize(&mut graph, &config(4, true)).unwrap_err();
    assert!(matches!(err, Error::MalformedPlan { .. }));
    assert_eq!(err.stage(), Some(join));
    assert_eq!(graph.fingerprint().unwrap(), before);
}
