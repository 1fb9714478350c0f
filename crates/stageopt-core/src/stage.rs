//! The Stage Graph: one node per stage (a synchronization-point unit of work
//! that becomes one job), edges meaning "must complete before".
//!
//! Passes only ever add stages and rewire edges; nothing here removes a stage.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{hash_serde, Hash256};
use crate::id::StageId;
use crate::plan::{LoadSource, OpKind, SubPlan};

/// Static estimate of how many files a stage writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileCount {
    Known(u32),
    #[default]
    Unknown,
}

impl FileCount {
    pub fn known(self) -> Option<u32> {
        match self {
            FileCount::Known(n) => Some(n),
            FileCount::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, FileCount::Known(_))
    }
}

impl std::fmt::Display for FileCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileCount::Known(n) => write!(f, "{n}"),
            FileCount::Unknown => f.write_str("?"),
        }
    }
}

/// Closed set of stage kinds. Passes dispatch on this with `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StageKind {
    #[default]
    Ordinary,
    /// Inserted by join repair: merges its predecessor's files into one.
    Concatenate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMeta {
    /// Number of files this stage's output is stored as.
    #[serde(default)]
    pub output_files: FileCount,

    /// Reduce parallelism requested by the compiler for the whole stage; a
    /// `Package` with its own parallelism takes precedence.
    #[serde(default)]
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub kind: StageKind,
    pub plan: SubPlan,
    pub meta: StageMeta,
}

impl Stage {
    pub fn new(id: StageId, kind: StageKind, plan: SubPlan) -> Self {
        Self {
            id,
            kind,
            plan,
            meta: StageMeta::default(),
        }
    }

    pub fn with_output_files(mut self, files: FileCount) -> Self {
        self.meta.output_files = files;
        self
    }

    pub fn is_concatenate(&self) -> bool {
        self.kind == StageKind::Concatenate
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageGraph {
    stages: BTreeMap<StageId, Stage>,
    edges: BTreeSet<(StageId, StageId)>,
    next_id: u64,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage under a fresh id.
    pub fn add_stage(&mut self, kind: StageKind, plan: SubPlan, meta: StageMeta) -> StageId {
        let id = StageId::new(self.next_id);
        self.next_id += 1;
        self.stages.insert(
            id,
            Stage {
                id,
                kind,
                plan,
                meta,
            },
        );
        id
    }

    /// Add a stage that carries its own id (plans coming from the compiler or the DSL).
    pub fn insert_stage(&mut self, stage: Stage) -> Result<()> {
        if self.stages.contains_key(&stage.id) {
            return Err(Error::malformed(stage.id, "duplicate stage id"));
        }
        self.next_id = self.next_id.max(stage.id.get() + 1);
        self.stages.insert(stage.id, stage);
        Ok(())
    }

    /// Add the edge `from → to` ("from must complete before to").
    pub fn connect(&mut self, from: StageId, to: StageId) -> Result<()> {
        for id in [from, to] {
            if !self.stages.contains_key(&id) {
                return Err(Error::MalformedPlan {
                    stage: Some(id),
                    reason: format!("edge {from} -> {to} references an unknown stage"),
                });
            }
        }
        if from == to {
            return Err(Error::malformed(from, "stage depends on itself"));
        }
        self.edges.insert((from, to));
        Ok(())
    }

    /// Remove the edge `from → to`; returns whether it existed.
    pub fn disconnect(&mut self, from: StageId, to: StageId) -> bool {
        self.edges.remove(&(from, to))
    }

    pub fn has_edge(&self, from: StageId, to: StageId) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(&id)
    }

    pub fn stage_mut(&mut self, id: StageId) -> Option<&mut Stage> {
        self.stages.get_mut(&id)
    }

    /// Like `stage`, for ids that must exist.
    pub fn require(&self, id: StageId) -> Result<&Stage> {
        self.stages
            .get(&id)
            .ok_or_else(|| Error::Invariant(format!("{id} is not in the stage graph")))
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.values()
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.keys().copied().collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = (StageId, StageId)> + '_ {
        self.edges.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn predecessors(&self, id: StageId) -> Vec<StageId> {
        self.edges
            .iter()
            .filter(|(_, to)| *to == id)
            .map(|(from, _)| *from)
            .collect()
    }

    pub fn successors(&self, id: StageId) -> Vec<StageId> {
        self.edges
            .range((id, StageId::new(0))..)
            .take_while(|(from, _)| *from == id)
            .map(|(_, to)| *to)
            .collect()
    }

    /// Stages with no predecessors.
    pub fn roots(&self) -> Vec<StageId> {
        let targets: BTreeSet<StageId> = self.edges.iter().map(|(_, to)| *to).collect();
        self.stages
            .keys()
            .filter(|id| !targets.contains(id))
            .copied()
            .collect()
    }

    /// Stages nothing depends on.
    pub fn leaves(&self) -> Vec<StageId> {
        let sources: BTreeSet<StageId> = self.edges.iter().map(|(from, _)| *from).collect();
        self.stages
            .keys()
            .filter(|id| !sources.contains(id))
            .copied()
            .collect()
    }

    pub fn count_kind(&self, kind: StageKind) -> usize {
        self.stages.values().filter(|s| s.kind == kind).count()
    }

    /// Replace `from → to` with `from → new → to` and return the new stage's id.
    /// The edge must exist.
    pub fn insert_between(
        &mut self,
        from: StageId,
        to: StageId,
        kind: StageKind,
        plan: SubPlan,
        meta: StageMeta,
    ) -> Result<StageId> {
        if !self.disconnect(from, to) {
            return Err(Error::MalformedPlan {
                stage: Some(to),
                reason: format!("no edge {from} -> {to} to insert a stage into"),
            });
        }
        let id = self.add_stage(kind, plan, meta);
        self.connect(from, id)?;
        self.connect(id, to)?;
        Ok(id)
    }

    /// Structural checks for one stage: its sub-plan is well formed and every
    /// stage it loads from is one of its predecessors.
    pub fn check_stage(&self, id: StageId) -> Result<()> {
        let stage = self.require(id)?;
        stage
            .plan
            .validate()
            .map_err(|reason| Error::malformed(id, reason))?;
        let preds: BTreeSet<StageId> = self.predecessors(id).into_iter().collect();
        for op in stage.plan.ops() {
            if let OpKind::Load {
                source: LoadSource::Stage(src),
            } = &op.kind
            {
                if !preds.contains(src) {
                    return Err(Error::malformed(
                        id,
                        format!("{} loads from {src}, which is not a predecessor", op.id),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Stable hash of the whole graph (stages, operators, flags, edges).
    pub fn fingerprint(&self) -> Result<Hash256> {
        hash_serde(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::OpKind;

    fn load_store(source: LoadSource, target: &str) -> SubPlan {
        let mut p = SubPlan::new();
        let load = p.add(OpKind::Load { source }, &[]);
        p.add(
            OpKind::Store {
                target: target.into(),
            },
            &[load],
        );
        p
    }

    fn chain() -> (StageGraph, StageId, StageId) {
        let mut g = StageGraph::new();
        let a = g.add_stage(
            StageKind::Ordinary,
            load_store(LoadSource::Dataset("in".into()), "a"),
            StageMeta::default(),
        );
        let b = g.add_stage(
            StageKind::Ordinary,
            load_store(LoadSource::Stage(a), "b"),
            StageMeta::default(),
        );
        g.connect(a, b).unwrap();
        (g, a, b)
    }

    #[test]
    fn roots_leaves_and_neighbours() {
        let (g, a, b) = chain();
        assert_eq!(g.roots(), vec![a]);
        assert_eq!(g.leaves(), vec![b]);
        assert_eq!(g.successors(a), vec![b]);
        assert_eq!(g.predecessors(b), vec![a]);
        assert!(g.check_stage(b).is_ok());
    }

    #[test]
    fn insert_between_rewires_the_edge() {
        let (mut g, a, b) = chain();
        let c = g
            .insert_between(
                a,
                b,
                StageKind::Concatenate,
                load_store(LoadSource::Stage(a), "c"),
                StageMeta::default(),
            )
            .unwrap();
        assert!(!g.has_edge(a, b));
        assert!(g.has_edge(a, c));
        assert!(g.has_edge(c, b));
        assert_eq!(g.len(), 3);
        assert_eq!(g.count_kind(StageKind::Concatenate), 1);
    }

    #[test]
    fn insert_between_requires_an_existing_edge() {
        let (mut g, a, b) = chain();
        let err = g
            .insert_between(
                b,
                a,
                StageKind::Concatenate,
                SubPlan::new(),
                StageMeta::default(),
            )
            .unwrap_err();
        assert_eq!(err.stage(), Some(a));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn loading_from_a_non_predecessor_is_malformed() {
        let (mut g, a, b) = chain();
        g.disconnect(a, b);
        let err = g.check_stage(b).unwrap_err();
        assert!(err.to_string().contains("not a predecessor"), "{err}");
        assert_eq!(err.stage(), Some(b));
    }

    #[test]
    fn fingerprint_tracks_changes() {
        let (mut g, _, b) = chain();
        let before = g.fingerprint().unwrap();
        assert_eq!(before, g.clone().fingerprint().unwrap());
        g.stage_mut(b).unwrap().meta.output_files = FileCount::Known(3);
        assert_ne!(before, g.fingerprint().unwrap());
    }

    #[test]
    fn graph_roundtrips_through_json() {
        let (g, _, _) = chain();
        let json = serde_json::to_string(&g).unwrap();
        let back: StageGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }
}
