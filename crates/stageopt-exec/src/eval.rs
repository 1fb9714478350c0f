//! Task-level evaluation of a stage's operator sub-plan.
//!
//! A sub-plan splits into a map phase (everything not downstream of a grouping
//! operator) and a reduce phase (the `Package` operators and everything after
//! them). A map task evaluates the map phase over one input split; map output
//! reaching a `Package` is shuffled by key to reduce tasks, each of which
//! evaluates the reduce phase over its partition of the groups.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use stageopt_core::id::OpId;
use stageopt_core::plan::{Expr, OpKind, PhysicalOperator, SubPlan};
use stageopt_core::types::{Row, Scalar};

use crate::aggregate::{accumulate_row, aggregate_bag, Accumulator};
use crate::runtime::ExecError;

/// Groups of one partition: `(key, rows)` in key order.
pub type Groups = Vec<(Scalar, Vec<Row>)>;

/// Operators of each phase, in dependency order.
#[derive(Debug, Clone, Default)]
pub struct Phases {
    pub map: Vec<OpId>,
    pub reduce: Vec<OpId>,
}

impl Phases {
    pub fn has_reduce(&self) -> bool {
        !self.reduce.is_empty()
    }
}

pub fn split_phases(plan: &SubPlan) -> Result<Phases, ExecError> {
    let order = plan.topo_order().map_err(ExecError::Invalid)?;
    let mut reduce_set = BTreeSet::new();
    for pkg in plan.packages() {
        reduce_set.insert(pkg);
        reduce_set.extend(plan.downstream_of(pkg));
    }
    let (reduce, map): (Vec<OpId>, Vec<OpId>) =
        order.into_iter().partition(|id| reduce_set.contains(id));
    Ok(Phases { map, reduce })
}

/// What one task produced.
#[derive(Debug, Default)]
pub struct TaskOutput {
    /// Store target → rows this task wrote there.
    pub stores: BTreeMap<String, Vec<Row>>,
    /// `Package` id → keyed rows (`[key, row...]`) this map task sent to it.
    pub shuffle: BTreeMap<OpId, Vec<Row>>,
}

/// Evaluate the map phase. `loads` binds every load this task reads (its split,
/// plus broadcast sides in full); unbound loads read nothing.
pub fn run_map_task(
    plan: &SubPlan,
    phases: &Phases,
    loads: &BTreeMap<OpId, Vec<Row>>,
) -> Result<TaskOutput, ExecError> {
    run_phase(plan, &phases.map, loads, None)
}

/// Evaluate the reduce phase over one partition. `broadcast` binds loads the
/// reduce side reads in full.
pub fn run_reduce_task(
    plan: &SubPlan,
    phases: &Phases,
    groups: &BTreeMap<OpId, Groups>,
    broadcast: &BTreeMap<OpId, Vec<Row>>,
) -> Result<TaskOutput, ExecError> {
    run_phase(plan, &phases.reduce, broadcast, Some(groups))
}

fn run_phase(
    plan: &SubPlan,
    ops: &[OpId],
    seeded: &BTreeMap<OpId, Vec<Row>>,
    groups: Option<&BTreeMap<OpId, Groups>>,
) -> Result<TaskOutput, ExecError> {
    let mut values: HashMap<OpId, Vec<Row>> = seeded.iter().map(|(k, v)| (*k, v.clone())).collect();
    let mut streamed: BTreeSet<OpId> = BTreeSet::new();
    let mut out = TaskOutput::default();

    for &id in ops {
        let op = plan
            .get(id)
            .ok_or_else(|| ExecError::Invalid(format!("{id} vanished from its plan")))?;

        let rows = match &op.kind {
            OpKind::Load { .. } => values.remove(&id).unwrap_or_default(),
            OpKind::Package { accumulative, .. } => {
                let empty = Groups::new();
                let grouped = groups.and_then(|g| g.get(&id)).unwrap_or(&empty);
                if *accumulative && consumers_are_projections(plan, id) {
                    // Consumers fold the partition's groups themselves.
                    streamed.insert(id);
                    values.insert(id, Vec::new());
                    continue;
                }
                grouped
                    .iter()
                    .map(|(key, rows)| vec![key.clone(), Scalar::Bag(rows.clone())])
                    .collect()
            }
            OpKind::ForEach { exprs } if op.inputs.first().is_some_and(|i| streamed.contains(i)) => {
                let pkg = op.inputs[0];
                let empty = Groups::new();
                let grouped = groups.and_then(|g| g.get(&pkg)).unwrap_or(&empty);
                stream_foreach(exprs, grouped)?
            }
            OpKind::Store { target } => {
                let rows = input(&values, op, 0)?.to_vec();
                out.stores
                    .entry(target.clone())
                    .or_default()
                    .extend(rows.iter().cloned());
                rows
            }
            _ => apply(op, &values)?,
        };
        values.insert(id, rows);
    }

    // Map side: whatever reaches a grouping operator is shuffled.
    if groups.is_none() {
        for pkg in plan.packages() {
            if let Some(input) = plan.get(pkg).and_then(|p| p.inputs.first()) {
                if let Some(rows) = values.get(input) {
                    out.shuffle.insert(pkg, rows.clone());
                }
            }
        }
    }
    Ok(out)
}

fn consumers_are_projections(plan: &SubPlan, id: OpId) -> bool {
    let consumers = plan.consumers(id);
    !consumers.is_empty()
        && consumers.iter().all(|c| {
            plan.get(*c)
                .is_some_and(|op| matches!(op.kind, OpKind::ForEach { .. }))
        })
}

fn input<'v>(
    values: &'v HashMap<OpId, Vec<Row>>,
    op: &PhysicalOperator,
    i: usize,
) -> Result<&'v [Row], ExecError> {
    let src = op.inputs.get(i).ok_or_else(|| {
        ExecError::Invalid(format!("{} ({}) is missing input {i}", op.id, op.kind.name()))
    })?;
    values.get(src).map(Vec::as_slice).ok_or_else(|| {
        ExecError::Invalid(format!(
            "{} ({}) reads {src}, which this phase does not produce",
            op.id,
            op.kind.name()
        ))
    })
}

fn cell(row: &Row, column: usize) -> Result<&Scalar, ExecError> {
    row.get(column).ok_or_else(|| {
        ExecError::Operator(format!(
            "column ${column} out of range for row of width {}",
            row.len()
        ))
    })
}

/// Row-at-a-time operators.
fn apply(op: &PhysicalOperator, values: &HashMap<OpId, Vec<Row>>) -> Result<Vec<Row>, ExecError> {
    match &op.kind {
        OpKind::Filter { predicate } => {
            let mut out = Vec::new();
            for row in input(values, op, 0)? {
                let v = cell(row, predicate.column)?;
                if !v.is_null() && predicate.op.eval(v, &predicate.value) {
                    out.push(row.clone());
                }
            }
            Ok(out)
        }
        OpKind::LocalRearrange { key } => input(values, op, 0)?
            .iter()
            .map(|row| -> Result<Row, ExecError> {
                let mut keyed = Vec::with_capacity(row.len() + 1);
                keyed.push(cell(row, *key)?.clone());
                keyed.extend(row.iter().cloned());
                Ok(keyed)
            })
            .collect(),
        OpKind::ForEach { exprs } => input(values, op, 0)?
            .iter()
            .map(|row| {
                exprs
                    .iter()
                    .map(|e| project(e, row))
                    .collect::<Result<Row, _>>()
            })
            .collect(),
        OpKind::Sort { column, descending } => {
            let mut rows = input(values, op, 0)?.to_vec();
            let null = Scalar::Null;
            rows.sort_by(|a, b| {
                let ord = a.get(*column).unwrap_or(&null).cmp(b.get(*column).unwrap_or(&null));
                if *descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
            Ok(rows)
        }
        OpKind::Limit { n } => {
            let rows = input(values, op, 0)?;
            Ok(rows[..rows.len().min(*n)].to_vec())
        }
        OpKind::FrJoin { keys, fragment } => {
            let sides = (0..op.inputs.len())
                .map(|i| input(values, op, i))
                .collect::<Result<Vec<_>, _>>()?;
            fr_join(&sides, keys, *fragment)
        }
        OpKind::Load { .. } | OpKind::Package { .. } | OpKind::Store { .. } => Err(
            ExecError::Invalid(format!("{} ({}) is not a row operator", op.id, op.kind.name())),
        ),
    }
}

/// Materialized projection of one row (grouped rows are `[key, bag]`).
fn project(expr: &Expr, row: &Row) -> Result<Scalar, ExecError> {
    match expr {
        Expr::Column(i) => cell(row, *i).cloned(),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::GroupKey => cell(row, 0).cloned(),
        Expr::Bag => match cell(row, 1)? {
            bag @ Scalar::Bag(_) => Ok(bag.clone()),
            other => Err(ExecError::Operator(format!("expected a group, got {other:?}"))),
        },
        Expr::Aggregate {
            func,
            column,
            distinct,
        } => {
            let bag = cell(row, 1)?
                .as_bag()
                .ok_or_else(|| ExecError::Operator("aggregate over an ungrouped row".into()))?;
            aggregate_bag(func, *column, *distinct, bag)
        }
    }
}

enum Slot {
    Key,
    Value(Scalar),
    Acc { acc: Accumulator, column: usize },
}

/// Accumulative projection: fold each group's rows into per-expression
/// accumulators without building the group's bag.
fn stream_foreach(exprs: &[Expr], groups: &Groups) -> Result<Vec<Row>, ExecError> {
    let mut out = Vec::with_capacity(groups.len());
    for (key, rows) in groups {
        let mut slots = exprs
            .iter()
            .map(|e| -> Result<Slot, ExecError> {
                match e {
                    Expr::GroupKey | Expr::Column(0) => Ok(Slot::Key),
                    Expr::Literal(v) => Ok(Slot::Value(v.clone())),
                    Expr::Aggregate {
                        func,
                        column,
                        distinct: false,
                    } => {
                        let acc = Accumulator::new(func)?;
                        if !acc.is_bounded() {
                            return Err(ExecError::Operator(format!(
                                "{} cannot run accumulatively",
                                func.name()
                            )));
                        }
                        Ok(Slot::Acc {
                            acc,
                            column: *column,
                        })
                    }
                    other => Err(ExecError::Operator(format!(
                        "{other:?} needs the materialized group"
                    ))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        for row in rows {
            for slot in slots.iter_mut() {
                if let Slot::Acc { acc, column } = slot {
                    accumulate_row(acc, *column, row)?;
                }
            }
        }

        out.push(
            slots
                .into_iter()
                .map(|s| match s {
                    Slot::Key => key.clone(),
                    Slot::Value(v) => v,
                    Slot::Acc { acc, .. } => acc.finish(),
                })
                .collect(),
        );
    }
    Ok(out)
}

/// Inner fragment-replicate join: every non-fragment side is indexed in full,
/// the fragment side is streamed. Output rows concatenate the sides in input
/// order; null keys never match.
pub fn fr_join(sides: &[&[Row]], keys: &[usize], fragment: usize) -> Result<Vec<Row>, ExecError> {
    let mut tables: Vec<BTreeMap<Scalar, Vec<&Row>>> = Vec::with_capacity(sides.len());
    for (i, rows) in sides.iter().enumerate() {
        let mut table: BTreeMap<Scalar, Vec<&Row>> = BTreeMap::new();
        if i != fragment {
            for row in rows.iter() {
                let k = cell(row, keys[i])?;
                if !k.is_null() {
                    table.entry(k.clone()).or_default().push(row);
                }
            }
        }
        tables.push(table);
    }

    let mut out = Vec::new();
    for frag in sides[fragment] {
        let key = cell(frag, keys[fragment])?;
        if key.is_null() {
            continue;
        }
        let mut partial: Vec<Row> = vec![Vec::new()];
        for (i, table) in tables.iter().enumerate() {
            let choices: Vec<&Row> = if i == fragment {
                vec![frag]
            } else {
                match table.get(key) {
                    Some(rows) => rows.clone(),
                    None => {
                        partial.clear();
                        break;
                    }
                }
            };
            partial = partial
                .into_iter()
                .flat_map(|p| {
                    choices.iter().map(move |c| {
                        let mut r = p.clone();
                        r.extend(c.iter().cloned());
                        r
                    })
                })
                .collect();
        }
        out.extend(partial);
    }
    Ok(out)
}

/// Collect keyed map output (`[key, row...]`) into groups of the original rows.
pub fn group_by_key(keyed: Vec<Row>) -> Result<BTreeMap<Scalar, Vec<Row>>, ExecError> {
    let mut groups: BTreeMap<Scalar, Vec<Row>> = BTreeMap::new();
    for mut row in keyed {
        if row.is_empty() {
            return Err(ExecError::Operator("keyed row without a key".into()));
        }
        let key = row.remove(0);
        groups.entry(key).or_default().push(row);
    }
    Ok(groups)
}

/// Deal groups to `reducers` partitions: the i-th key (in key order) goes to `i % reducers`.
pub fn partition(groups: BTreeMap<Scalar, Vec<Row>>, reducers: usize) -> Vec<Groups> {
    let reducers = reducers.max(1);
    let mut parts: Vec<Groups> = (0..reducers).map(|_| Groups::new()).collect();
    for (i, group) in groups.into_iter().enumerate() {
        parts[i % reducers].push(group);
    }
    parts
}
