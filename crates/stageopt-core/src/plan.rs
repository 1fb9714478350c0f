//! Operator sub-plans: the fine-grained physical operators one stage runs.
//!
//! A `SubPlan` is a small DAG of `PhysicalOperator`s keyed by `OpId`. Edges are
//! expressed as `inputs` on the consuming operator. Everything upstream of a
//! `Package` runs map-side; the `Package` and everything downstream of it runs
//! reduce-side.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::id::{OpId, StageId};
use crate::types::Scalar;

/// Where a `Load` reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadSource {
    /// A dataset (a single file or a directory of part files).
    Dataset(String),
    /// The stored output of another stage.
    Stage(StageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn eval(self, left: &Scalar, right: &Scalar) -> bool {
        match self {
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
        }
    }
}

/// `$column <op> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: usize,
    pub op: CmpOp,
    pub value: Scalar,
}

/// Aggregation functions usable over a group's bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFn {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    /// User function; `accumulative` is true when it implements incremental updates.
    Udf { name: String, accumulative: bool },
}

impl AggFn {
    /// Whether the function folds into a bounded accumulator one row at a time.
    pub fn is_incremental(&self) -> bool {
        match self {
            AggFn::Count | AggFn::Sum | AggFn::Min | AggFn::Max | AggFn::Avg => true,
            AggFn::Udf { accumulative, .. } => *accumulative,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AggFn::Count => "count",
            AggFn::Sum => "sum",
            AggFn::Min => "min",
            AggFn::Max => "max",
            AggFn::Avg => "avg",
            AggFn::Udf { name, .. } => name,
        }
    }
}

/// Projection expressions evaluated by `ForEach`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column(usize),
    Literal(Scalar),
    /// Key of the current group (`$0` of a grouped row).
    GroupKey,
    /// Aggregate over a column of the current group's bag. `distinct` applies a
    /// nested distinct over the whole group first.
    Aggregate {
        func: AggFn,
        column: usize,
        distinct: bool,
    },
    /// The whole group, as a bag.
    Bag,
}

impl Expr {
    /// True when the expression can be computed from a bounded, incrementally
    /// updated accumulator (i.e. without materializing the group).
    pub fn is_accumulation_safe(&self) -> bool {
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::GroupKey => true,
            Expr::Aggregate { func, distinct, .. } => !distinct && func.is_incremental(),
            Expr::Bag => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    Load {
        source: LoadSource,
    },
    Filter {
        predicate: Predicate,
    },
    /// Map-side key extraction: emits `[row[key], row...]`.
    LocalRearrange {
        key: usize,
    },
    /// The grouping operator: collects `[key, bag]` per distinct key.
    Package {
        parallelism: Option<u32>,
        #[serde(default)]
        accumulative: bool,
    },
    ForEach {
        exprs: Vec<Expr>,
    },
    Sort {
        column: usize,
        #[serde(default)]
        descending: bool,
    },
    Limit {
        n: usize,
    },
    /// Fragment-replicate join: every input except `fragment` is broadcast in
    /// full to each task. `keys[i]` is the join column of input `i`.
    FrJoin {
        keys: Vec<usize>,
        fragment: usize,
    },
    Store {
        target: String,
    },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Load { .. } => "load",
            OpKind::Filter { .. } => "filter",
            OpKind::LocalRearrange { .. } => "local_rearrange",
            OpKind::Package { .. } => "package",
            OpKind::ForEach { .. } => "foreach",
            OpKind::Sort { .. } => "sort",
            OpKind::Limit { .. } => "limit",
            OpKind::FrJoin { .. } => "frjoin",
            OpKind::Store { .. } => "store",
        }
    }

    /// Expected number of inputs; `None` means "at least two" (joins).
    fn arity(&self) -> Option<usize> {
        match self {
            OpKind::Load { .. } => Some(0),
            OpKind::FrJoin { .. } => None,
            _ => Some(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalOperator {
    pub id: OpId,
    pub kind: OpKind,
    #[serde(default)]
    pub inputs: Vec<OpId>,
}

/// A stage's operator DAG. Ordered by id for deterministic traversal and hashing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubPlan {
    ops: BTreeMap<OpId, PhysicalOperator>,
    next_id: u64,
}

impl SubPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operator and return its fresh id.
    pub fn add(&mut self, kind: OpKind, inputs: &[OpId]) -> OpId {
        let id = OpId::new(self.next_id);
        self.insert(PhysicalOperator {
            id,
            kind,
            inputs: inputs.to_vec(),
        });
        id
    }

    /// Insert an operator under its own id (used by the DSL); replaces any previous one.
    pub fn insert(&mut self, op: PhysicalOperator) {
        self.next_id = self.next_id.max(op.id.get() + 1);
        self.ops.insert(op.id, op);
    }

    pub fn get(&self, id: OpId) -> Option<&PhysicalOperator> {
        self.ops.get(&id)
    }

    pub fn get_mut(&mut self, id: OpId) -> Option<&mut PhysicalOperator> {
        self.ops.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> impl Iterator<Item = &PhysicalOperator> {
        self.ops.values()
    }

    /// Operators that take `id` as an input.
    pub fn consumers(&self, id: OpId) -> Vec<OpId> {
        self.ops
            .values()
            .filter(|op| op.inputs.contains(&id))
            .map(|op| op.id)
            .collect()
    }

    /// Operators nothing else consumes (normally the stores).
    pub fn leaves(&self) -> Vec<OpId> {
        let consumed: BTreeSet<OpId> = self
            .ops
            .values()
            .flat_map(|op| op.inputs.iter().copied())
            .collect();
        self.ops
            .keys()
            .filter(|id| !consumed.contains(id))
            .copied()
            .collect()
    }

    /// Grouping operators in this plan.
    pub fn packages(&self) -> Vec<OpId> {
        self.ops
            .values()
            .filter(|op| matches!(op.kind, OpKind::Package { .. }))
            .map(|op| op.id)
            .collect()
    }

    pub fn frjoins(&self) -> Vec<OpId> {
        self.ops
            .values()
            .filter(|op| matches!(op.kind, OpKind::FrJoin { .. }))
            .map(|op| op.id)
            .collect()
    }

    /// True when the stage has a reduce phase (a grouping operator).
    pub fn has_reduce_phase(&self) -> bool {
        self.ops
            .values()
            .any(|op| matches!(op.kind, OpKind::Package { .. }))
    }

    /// Stages this plan loads from.
    pub fn stage_inputs(&self) -> BTreeSet<StageId> {
        self.ops
            .values()
            .filter_map(|op| match &op.kind {
                OpKind::Load {
                    source: LoadSource::Stage(s),
                } => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn store_target(&self) -> Option<&str> {
        self.ops.values().find_map(|op| match &op.kind {
            OpKind::Store { target } => Some(target.as_str()),
            _ => None,
        })
    }

    /// Every operator reachable downstream of `id` (excluding `id`).
    pub fn downstream_of(&self, id: OpId) -> BTreeSet<OpId> {
        let mut seen = BTreeSet::new();
        let mut stack = self.consumers(id);
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.consumers(next));
            }
        }
        seen
    }

    /// Check the operator DAG for dangling references, arity violations,
    /// inconsistent joins, and cycles. Returns the violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        for op in self.ops.values() {
            for input in &op.inputs {
                if !self.ops.contains_key(input) {
                    return Err(format!(
                        "{} ({}) references missing input {}",
                        op.id,
                        op.kind.name(),
                        input
                    ));
                }
            }
            match op.kind.arity() {
                Some(n) if op.inputs.len() != n => {
                    return Err(format!(
                        "{} ({}) expects {} input(s), has {}",
                        op.id,
                        op.kind.name(),
                        n,
                        op.inputs.len()
                    ));
                }
                None if op.inputs.len() < 2 => {
                    return Err(format!(
                        "{} ({}) needs at least two inputs, has {}",
                        op.id,
                        op.kind.name(),
                        op.inputs.len()
                    ));
                }
                _ => {}
            }
            if let OpKind::FrJoin { keys, fragment } = &op.kind {
                if keys.len() != op.inputs.len() {
                    return Err(format!(
                        "{} (frjoin) has {} key(s) for {} input(s)",
                        op.id,
                        keys.len(),
                        op.inputs.len()
                    ));
                }
                if *fragment >= op.inputs.len() {
                    return Err(format!(
                        "{} (frjoin) names fragment side {} but has only {} side(s)",
                        op.id,
                        fragment,
                        op.inputs.len()
                    ));
                }
                // Replicated sides are read in full by every task, so they
                // must be files.
                for (side, input) in op.inputs.iter().enumerate() {
                    if side == *fragment {
                        continue;
                    }
                    let kind = &self.ops[input].kind;
                    if !matches!(kind, OpKind::Load { .. }) {
                        return Err(format!(
                            "{} (frjoin) replicated side {} is fed by {} ({}), not a load",
                            op.id,
                            side,
                            input,
                            kind.name()
                        ));
                    }
                }
            }
        }
        self.topo_order().map(|_| ())
    }

    /// Operators in input-before-consumer order.
    pub fn topo_order(&self) -> Result<Vec<OpId>, String> {
        let mut remaining: BTreeMap<OpId, usize> = self
            .ops
            .values()
            .map(|op| (op.id, op.inputs.len()))
            .collect();
        let mut ready: Vec<OpId> = remaining
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.reverse();
        let mut order = Vec::with_capacity(self.ops.len());

        while let Some(id) = ready.pop() {
            remaining.remove(&id);
            order.push(id);
            for consumer in self.consumers(id) {
                if let Some(deg) = remaining.get_mut(&consumer) {
                    // An operator may list the same input twice.
                    let times = self.ops[&consumer]
                        .inputs
                        .iter()
                        .filter(|i| **i == id)
                        .count();
                    *deg = deg.saturating_sub(times);
                    if *deg == 0 {
                        ready.push(consumer);
                    }
                }
            }
        }

        if order.len() != self.ops.len() {
            let stuck: Vec<String> = remaining.keys().map(|id| id.to_string()).collect();
            return Err(format!("operator cycle through {}", stuck.join(", ")));
        }
        Ok(order)
    }
}
