//! Release stages to the runtime once all of their predecessors have completed.

use std::collections::{BTreeMap, VecDeque};

use stageopt_core::id::StageId;
use stageopt_core::stage::StageGraph;

/// Kahn-style ready queue over a frozen stage graph.
pub struct ReadyQueue {
    pending: BTreeMap<StageId, usize>,
    dependents: BTreeMap<StageId, Vec<StageId>>,
    ready: VecDeque<StageId>,
    completed: usize,
    total: usize,
}

impl ReadyQueue {
    pub fn new(graph: &StageGraph) -> Self {
        let mut pending: BTreeMap<StageId, usize> =
            graph.stage_ids().into_iter().map(|id| (id, 0)).collect();
        let mut dependents: BTreeMap<StageId, Vec<StageId>> = BTreeMap::new();
        for (from, to) in graph.edges() {
            *pending.entry(to).or_default() += 1;
            dependents.entry(from).or_default().push(to);
        }
        let ready = pending
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let total = pending.len();
        Self {
            pending,
            dependents,
            ready,
            completed: 0,
            total,
        }
    }

    /// Next stage whose predecessors are all complete, lowest id first among
    /// stages released together.
    pub fn pop(&mut self) -> Option<StageId> {
        self.ready.pop_front()
    }

    /// Mark `id` complete and release dependents that became ready.
    pub fn complete(&mut self, id: StageId) {
        self.completed += 1;
        if let Some(next) = self.dependents.get(&id) {
            for n in next {
                if let Some(deg) = self.pending.get_mut(n) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        self.ready.push_back(*n);
                    }
                }
            }
        }
    }

    pub fn remaining(&self) -> usize {
        self.total - self.completed
    }

    pub fn is_finished(&self) -> bool {
        self.completed == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageopt_core::plan::SubPlan;
    use stageopt_core::stage::{StageKind, StageMeta};

    #[test]
    fn releases_stages_after_their_predecessors() {
        let mut g = StageGraph::new();
        let ids: Vec<StageId> = (0..3)
            .map(|_| g.add_stage(StageKind::Ordinary, SubPlan::new(), StageMeta::default()))
            .collect();
        g.connect(ids[0], ids[2]).unwrap();
        g.connect(ids[1], ids[2]).unwrap();

        let mut q = ReadyQueue::new(&g);
        assert_eq!(q.pop(), Some(ids[0]));
        assert_eq!(q.pop(), Some(ids[1]));
        assert_eq!(q.pop(), None);
        q.complete(ids[0]);
        assert_eq!(q.pop(), None);
        q.complete(ids[1]);
        assert_eq!(q.pop(), Some(ids[2]));
        q.complete(ids[2]);
        assert!(q.is_finished());
        assert_eq!(q.remaining(), 0);
    }
}
