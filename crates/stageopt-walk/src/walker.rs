//! Depth-first, dependency-respecting traversal of a `StageGraph`.

use std::collections::{BTreeMap, HashMap};

use stageopt_core::error::{Error, Result};
use stageopt_core::id::StageId;
use stageopt_core::stage::StageGraph;

use crate::visitor::PlanVisitor;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current DFS path.
    Active,
    Done,
}

pub struct DepthFirstWalker<'g> {
    graph: &'g StageGraph,
}

impl<'g> DepthFirstWalker<'g> {
    pub fn new(graph: &'g StageGraph) -> Self {
        Self { graph }
    }

    /// Every stage exactly once, each after all of its predecessors.
    ///
    /// Starts a DFS over predecessor edges from every stage in id order, emitting
    /// a stage once all its predecessors are emitted. Reaching a stage that is
    /// still on the current path means a cycle, reported as `MalformedPlan`.
    pub fn order(&self) -> Result<Vec<StageId>> {
        let mut preds: BTreeMap<StageId, Vec<StageId>> = self
            .graph
            .stage_ids()
            .into_iter()
            .map(|id| (id, Vec::new()))
            .collect();
        for (from, to) in self.graph.edges() {
            if !preds.contains_key(&from) {
                return Err(Error::MalformedPlan {
                    stage: Some(to),
                    reason: format!("edge from unknown stage {from}"),
                });
            }
            match preds.get_mut(&to) {
                Some(list) => list.push(from),
                None => {
                    return Err(Error::MalformedPlan {
                        stage: Some(from),
                        reason: format!("edge into unknown stage {to}"),
                    })
                }
            }
        }

        let mut marks: HashMap<StageId, Mark> = HashMap::with_capacity(preds.len());
        let mut order = Vec::with_capacity(preds.len());

        for &start in preds.keys() {
            if marks.contains_key(&start) {
                continue;
            }
            marks.insert(start, Mark::Active);
            let mut stack: Vec<(StageId, usize)> = vec![(start, 0)];

            while let Some((id, next)) = stack.last_mut() {
                let pending = preds.get(&*id).and_then(|p| p.get(*next)).copied();
                match pending {
                    Some(p) => {
                        *next += 1;
                        match marks.get(&p) {
                            Some(Mark::Done) => {}
                            Some(Mark::Active) => {
                                let path: Vec<String> = stack
                                    .iter()
                                    .map(|(s, _)| *s)
                                    .skip_while(|s| *s != p)
                                    .map(|s| s.to_string())
                                    .collect();
                                return Err(Error::MalformedPlan {
                                    stage: Some(p),
                                    reason: format!(
                                        "stage graph has a cycle: {} <- {p}",
                                        path.join(" <- ")
                                    ),
                                });
                            }
                            None => {
                                marks.insert(p, Mark::Active);
                                stack.push((p, 0));
                            }
                        }
                    }
                    None => {
                        let done = *id;
                        stack.pop();
                        marks.insert(done, Mark::Done);
                        order.push(done);
                    }
                }
            }
        }

        Ok(order)
    }
}

/// Run `visitor` over every stage of `graph` in dependency order.
///
/// The order is fixed before the first visit. Returns the number of stages visited.
pub fn walk<V: PlanVisitor + ?Sized>(graph: &StageGraph, visitor: &mut V) -> Result<usize> {
    let order = DepthFirstWalker::new(graph).order()?;
    tracing::trace!(stages = order.len(), "walk order computed");
    for id in &order {
        visitor.visit_stage(graph.require(*id)?, graph)?;
    }
    Ok(order.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::assert_topological;
    use stageopt_core::plan::SubPlan;
    use stageopt_core::stage::{Stage, StageKind, StageMeta};

    fn graph(n: usize, edges: &[(usize, usize)]) -> (StageGraph, Vec<StageId>) {
        let mut g = StageGraph::new();
        let ids: Vec<StageId> = (0..n)
            .map(|_| g.add_stage(StageKind::Ordinary, SubPlan::new(), StageMeta::default()))
            .collect();
        for (a, b) in edges {
            g.connect(ids[*a], ids[*b]).unwrap();
        }
        (g, ids)
    }

    #[test]
    fn diamond_is_visited_once_in_dependency_order() {
        let (g, ids) = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let order = DepthFirstWalker::new(&g).order().unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], ids[0]);
        assert_eq!(order[3], ids[3]);
        assert_topological(&g, &order);
    }

    #[test]
    fn predecessors_with_higher_ids_come_first() {
        let (g, ids) = graph(3, &[(2, 0), (1, 0)]);
        let order = DepthFirstWalker::new(&g).order().unwrap();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn cycles_are_malformed_plans() {
        let (mut g, ids) = graph(3, &[(0, 1), (1, 2)]);
        g.connect(ids[2], ids[0]).unwrap();
        let err = DepthFirstWalker::new(&g).order().unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
        assert!(err.stage().is_some());
    }

    #[test]
    fn disconnected_components_are_all_visited() {
        let (g, _) = graph(5, &[(0, 1), (3, 4)]);
        let order = DepthFirstWalker::new(&g).order().unwrap();
        assert_eq!(order.len(), 5);
        assert_topological(&g, &order);
    }

    struct Recorder {
        seen: Vec<(StageId, StageKind)>,
    }

    impl PlanVisitor for Recorder {
        fn visit_ordinary(&mut self, stage: &Stage, _graph: &StageGraph) -> Result<()> {
            self.seen.push((stage.id, StageKind::Ordinary));
            Ok(())
        }

        fn visit_concatenate(&mut self, stage: &Stage, _graph: &StageGraph) -> Result<()> {
            self.seen.push((stage.id, StageKind::Concatenate));
            Ok(())
        }
    }

    #[test]
    fn walk_dispatches_on_stage_kind() {
        let (mut g, ids) = graph(2, &[(0, 1)]);
        let concat = g
            .insert_between(
                ids[0],
                ids[1],
                StageKind::Concatenate,
                SubPlan::new(),
                StageMeta::default(),
            )
            .unwrap();
        let mut rec = Recorder { seen: vec![] };
        let visited = walk(&g, &mut rec).unwrap();
        assert_eq!(visited, 3);
        assert_eq!(
            rec.seen,
            vec![
                (ids[0], StageKind::Ordinary),
                (concat, StageKind::Concatenate),
                (ids[1], StageKind::Ordinary),
            ]
        );
    }

    #[test]
    fn a_failing_visitor_aborts_the_walk() {
        struct Fails(usize);
        impl PlanVisitor for Fails {
            fn visit_ordinary(&mut self, stage: &Stage, _graph: &StageGraph) -> Result<()> {
                self.0 += 1;
                Err(Error::malformed(stage.id, "boom"))
            }
        }
        let (g, _) = graph(3, &[]);
        let mut v = Fails(0);
        assert!(walk(&g, &mut v).is_err());
        assert_eq!(v.0, 1);
    }
}
