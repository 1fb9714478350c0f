//! Debug-time verification helpers for visit orders.
//!
//! Intended for tests and debug builds; they panic on violation.

use std::collections::HashSet;

use stageopt_core::id::StageId;
use stageopt_core::stage::StageGraph;

/// Verify that `order` lists every stage exactly once, each after its predecessors.
pub fn assert_topological(graph: &StageGraph, order: &[StageId]) {
    let mut seen = HashSet::<StageId>::new();
    for id in order {
        for p in graph.predecessors(*id) {
            assert!(
                seen.contains(&p),
                "predecessor {p} not visited before stage {id}"
            );
        }
        assert!(seen.insert(*id), "stage {id} visited twice");
    }
    assert_eq!(
        seen.len(),
        graph.len(),
        "order covers {} of {} stages",
        seen.len(),
        graph.len()
    );
}
