//! Accumulative mode: which stages are flagged, and that flagging never changes
//! what a stage computes.

mod test_data_gen;

use stageopt_core::error::Error;
use stageopt_core::plan::{AggFn, Expr, LoadSource, OpKind};
use stageopt_core::stage::{StageGraph, StageKind, StageMeta};
use stageopt_core::types::sorted_rows;
use stageopt_planner::{optimize, OptimizationDecision, Qualification};
use test_data_gen::{config, copy_plan, engine_with, grouping_plan, sum_and_count};

fn flags(graph: &StageGraph) -> Vec<bool> {
    graph
        .stages()
        .flat_map(|s| s.plan.ops())
        .filter_map(|op| match op.kind {
            OpKind::Package { accumulative, .. } => Some(accumulative),
            _ => None,
        })
        .collect()
}

fn two_groupings() -> StageGraph {
    let mut g = StageGraph::new();
    let copy = g.add_stage(
        StageKind::Ordinary,
        copy_plan(LoadSource::Dataset("small".into()), "tmp/small"),
        StageMeta::default(),
    );
    let sums = g.add_stage(
        StageKind::Ordinary,
        grouping_plan(LoadSource::Stage(copy), sum_and_count(), "out/sums"),
        StageMeta::default(),
    );
    let medians = g.add_stage(
        StageKind::Ordinary,
        grouping_plan(
            LoadSource::Stage(copy),
            vec![
                Expr::GroupKey,
                Expr::Aggregate {
                    func: AggFn::Udf {
                        name: "median".into(),
                        accumulative: false,
                    },
                    column: 1,
                    distinct: false,
                },
            ],
            "out/medians",
        ),
        StageMeta::default(),
    );
    g.connect(copy, sums).unwrap();
    g.connect(copy, medians).unwrap();
    g
}

#[test]
fn only_qualifying_stages_are_flagged() {
    let mut g = two_groupings();
    let report = optimize(&mut g, &config(4, false)).unwrap();
    assert_eq!(flags(&g), vec![true, false]);
    assert_eq!(report.accumulative_stages().len(), 1);

    let verdicts: Vec<&Qualification> = report
        .decisions()
        .filter_map(|d| match d {
            OptimizationDecision::Accumulative { outcome, .. } => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(verdicts.len(), 3);
    assert!(matches!(verdicts[0], Qualification::NoGrouping));
}

#[test]
fn flagging_is_monotone_and_stable() {
    let mut g = two_groupings();
    let cfg = config(4, false);
    optimize(&mut g, &cfg).unwrap();
    let once = g.fingerprint().unwrap();
    optimize(&mut g, &cfg).unwrap();
    assert_eq!(g.fingerprint().unwrap(), once);
    assert_eq!(flags(&g), vec![true, false]);
}

#[test]
fn flagged_stages_compute_the_same_rows() {
    let plain = two_groupings();
    let mut flagged = plain.clone();
    optimize(&mut flagged, &config(4, true)).unwrap();
    assert_eq!(flags(&flagged), vec![true, false]);

    let a = engine_with(config(4, true), 3, 10).run(&plain).unwrap();
    let b = engine_with(config(4, true), 3, 10).run(&flagged).unwrap();
    for target in ["out/sums", "out/medians"] {
        assert_eq!(
            sorted_rows(a.outputs[target].clone()),
            sorted_rows(b.outputs[target].clone()),
            "{target}"
        );
    }
    // Keys 0..4 over rows 0..10: key 0 sums 0 + 4 + 8.
    let sums = sorted_rows(b.outputs["out/sums"].clone());
    assert_eq!(sums.len(), 4);
    assert_eq!(sums[0], test_data_gen::r(&[0, 12, 3]));
}

#[test]
fn malformed_stages_fail_the_pass_without_flagging_anything() {
    let mut g = two_groupings();
    let broken = |g: &mut StageGraph, target: &str| {
        g.add_stage(
            StageKind::Ordinary,
            grouping_plan(
                LoadSource::Stage(stageopt_core::id::StageId::new(0)),
                sum_and_count(),
                target,
            ),
            StageMeta::default(),
        )
    };
    let x = broken(&mut g, "out/x");
    let y = broken(&mut g, "out/y");
    let before = g.fingerprint().unwrap();

    let err = optimize(&mut g, &config(4, false)).unwrap_err();
    let Error::MalformedPlan { reason, .. } = &err else {
        panic!("unexpected error {err}");
    };
    assert!(reason.contains(&x.to_string()), "{reason}");
    assert!(reason.contains(&y.to_string()), "{reason}");
    assert_eq!(g.fingerprint().unwrap(), before);
    assert!(flags(&g).iter().all(|f| !f));
}
