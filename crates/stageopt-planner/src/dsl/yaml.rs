//! YAML → StageGraph parser.
//!
//! Example:
//! ```yaml
//! config:
//!   merge-files-threshold: 4
//!   disable-split-combination: true
//! datasets:
//!   small: [ [[1, "a"]], [[2, "b"]] ]     # two files, one row each
//!   big:   [ [[1, 10], [2, 20]] ]
//! stages:
//!   - id: 0
//!     ops:
//!       - { id: 0, op: load, dataset: small }
//!       - { id: 1, op: store, target: tmp/small, input: 0 }
//!   - id: 1
//!     ops:
//!       - { id: 0, op: load, dataset: big }
//!       - { id: 1, op: load, stage: 0 }
//!       - { id: 2, op: frjoin, inputs: [0, 1], keys: [0, 0], fragment: 0 }
//!       - { id: 3, op: store, target: out/joined, input: 2 }
//! ```
//!
//! Stage edges are the union of each stage's `after:` list and the stages its
//! loads read from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stageopt_core::config::EngineConfig;
use stageopt_core::id::{OpId, StageId};
use stageopt_core::plan::{AggFn, CmpOp, Expr, LoadSource, OpKind, PhysicalOperator, Predicate, SubPlan};
use stageopt_core::stage::{FileCount, Stage, StageGraph, StageKind, StageMeta};
use stageopt_core::types::{Row, Scalar};

#[derive(Debug, Error)]
pub enum DslError {
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid stage plan: {0}")]
    Invalid(String),
    #[error(transparent)]
    Plan(#[from] stageopt_core::error::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePlanDoc {
    #[serde(default)]
    pub config: BTreeMap<String, serde_yaml::Value>,
    /// Dataset name → files → rows.
    #[serde(default)]
    pub datasets: BTreeMap<String, Vec<Vec<Vec<ScalarDef>>>>,
    pub stages: Vec<StageDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDef {
    pub id: u64,
    #[serde(default)]
    pub after: Vec<u64>,
    #[serde(default)]
    pub kind: StageKindDef,
    #[serde(default)]
    pub output_files: Option<u32>,
    #[serde(default)]
    pub parallelism: Option<u32>,
    pub ops: Vec<OpDef>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKindDef {
    #[default]
    Ordinary,
    Concatenate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpDef {
    pub id: u64,
    #[serde(default)]
    pub input: Option<u64>,
    #[serde(default)]
    pub inputs: Vec<u64>,
    #[serde(flatten)]
    pub step: Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Step {
    #[serde(rename = "load")]
    Load {
        #[serde(default)]
        dataset: Option<String>,
        #[serde(default)]
        stage: Option<u64>,
    },

    #[serde(rename = "filter")]
    Filter {
        column: usize,
        cmp: CmpDef,
        value: ScalarDef,
    },

    #[serde(rename = "local_rearrange")]
    LocalRearrange { key: usize },

    #[serde(rename = "package")]
    Package {
        #[serde(default)]
        parallelism: Option<u32>,
    },

    #[serde(rename = "foreach")]
    ForEach { exprs: Vec<ExprDef> },

    #[serde(rename = "sort")]
    Sort {
        column: usize,
        #[serde(default)]
        descending: bool,
    },

    #[serde(rename = "limit")]
    Limit { n: usize },

    #[serde(rename = "frjoin")]
    FrJoin {
        keys: Vec<usize>,
        #[serde(default)]
        fragment: usize,
    },

    #[serde(rename = "store")]
    Store { target: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpDef {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExprDef {
    Column {
        index: usize,
    },
    Literal {
        value: ScalarDef,
    },
    GroupKey,
    Aggregate {
        func: String,
        column: usize,
        #[serde(default)]
        distinct: bool,
        /// Only meaningful for user functions.
        #[serde(default)]
        accumulative: bool,
    },
    Bag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarDef {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<ScalarDef> for Scalar {
    fn from(d: ScalarDef) -> Self {
        match d {
            ScalarDef::Null => Scalar::Null,
            ScalarDef::Bool(b) => Scalar::Bool(b),
            ScalarDef::Int(i) => Scalar::I64(i),
            ScalarDef::Float(f) => Scalar::F64(f),
            ScalarDef::Str(s) => Scalar::Str(s),
        }
    }
}

impl From<CmpDef> for CmpOp {
    fn from(c: CmpDef) -> Self {
        match c {
            CmpDef::Eq => CmpOp::Eq,
            CmpDef::Ne => CmpOp::Ne,
            CmpDef::Lt => CmpOp::Lt,
            CmpDef::Le => CmpOp::Le,
            CmpDef::Gt => CmpOp::Gt,
            CmpDef::Ge => CmpOp::Ge,
        }
    }
}

fn agg_fn(name: &str, accumulative: bool) -> AggFn {
    match name {
        "count" => AggFn::Count,
        "sum" => AggFn::Sum,
        "min" => AggFn::Min,
        "max" => AggFn::Max,
        "avg" => AggFn::Avg,
        other => AggFn::Udf {
            name: other.to_string(),
            accumulative,
        },
    }
}

impl From<ExprDef> for Expr {
    fn from(d: ExprDef) -> Self {
        match d {
            ExprDef::Column { index } => Expr::Column(index),
            ExprDef::Literal { value } => Expr::Literal(value.into()),
            ExprDef::GroupKey => Expr::GroupKey,
            ExprDef::Aggregate {
                func,
                column,
                distinct,
                accumulative,
            } => Expr::Aggregate {
                func: agg_fn(&func, accumulative),
                column,
                distinct,
            },
            ExprDef::Bag => Expr::Bag,
        }
    }
}

/// A parsed plan plus the configuration and inline data that came with it.
#[derive(Debug, Clone)]
pub struct ParsedStagePlan {
    pub graph: StageGraph,
    /// Raw `config:` entries, stringified for `EngineConfig::from_properties`.
    pub properties: BTreeMap<String, String>,
    pub datasets: BTreeMap<String, Vec<Vec<Row>>>,
}

impl ParsedStagePlan {
    /// Override (or add) one configuration property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig::from_properties(&self.properties)
    }

    /// File counts of the inline datasets.
    pub fn file_catalog(&self) -> BTreeMap<String, u32> {
        self.datasets
            .iter()
            .map(|(name, files)| (name.clone(), files.len() as u32))
            .collect()
    }
}

fn property_string(v: &serde_yaml::Value) -> Result<String, DslError> {
    match v {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(DslError::Invalid(format!(
            "config values must be scalars, got {other:?}"
        ))),
    }
}

fn op_kind(stage: u64, op: &OpDef) -> Result<OpKind, DslError> {
    Ok(match op.step.clone() {
        Step::Load { dataset, stage: src } => match (dataset, src) {
            (Some(path), None) => OpKind::Load {
                source: LoadSource::Dataset(path),
            },
            (None, Some(s)) => OpKind::Load {
                source: LoadSource::Stage(StageId::new(s)),
            },
            _ => {
                return Err(DslError::Invalid(format!(
                    "stage {stage} op {}: load needs exactly one of `dataset` or `stage`",
                    op.id
                )))
            }
        },
        Step::Filter { column, cmp, value } => OpKind::Filter {
            predicate: Predicate {
                column,
                op: cmp.into(),
                value: value.into(),
            },
        },
        Step::LocalRearrange { key } => OpKind::LocalRearrange { key },
        Step::Package { parallelism } => OpKind::Package {
            parallelism,
            accumulative: false,
        },
        Step::ForEach { exprs } => OpKind::ForEach {
            exprs: exprs.into_iter().map(Expr::from).collect(),
        },
        Step::Sort { column, descending } => OpKind::Sort { column, descending },
        Step::Limit { n } => OpKind::Limit { n },
        Step::FrJoin { keys, fragment } => OpKind::FrJoin { keys, fragment },
        Step::Store { target } => OpKind::Store { target },
    })
}

/// Parse a YAML stage plan. Sub-plans are not validated here; run the
/// optimizer (or `validate_graph`) for structural checks.
pub fn parse_yaml_stage_plan(yaml_src: &str) -> Result<ParsedStagePlan, DslError> {
    let doc: StagePlanDoc = serde_yaml::from_str(yaml_src)?;
    if doc.stages.is_empty() {
        return Err(DslError::Invalid("no stages".into()));
    }

    let mut graph = StageGraph::new();
    let mut deps: Vec<(StageId, Vec<StageId>)> = Vec::with_capacity(doc.stages.len());

    for def in &doc.stages {
        let mut plan = SubPlan::new();
        for op in &def.ops {
            let id = OpId::new(op.id);
            if plan.get(id).is_some() {
                return Err(DslError::Invalid(format!(
                    "stage {} has two operators with id {}",
                    def.id, op.id
                )));
            }
            let inputs = op
                .input
                .iter()
                .chain(op.inputs.iter())
                .map(|i| OpId::new(*i))
                .collect();
            plan.insert(PhysicalOperator {
                id,
                kind: op_kind(def.id, op)?,
                inputs,
            });
        }

        let id = StageId::new(def.id);
        let mut after: Vec<StageId> = def.after.iter().map(|a| StageId::new(*a)).collect();
        after.extend(plan.stage_inputs());
        deps.push((id, after));

        let kind = match def.kind {
            StageKindDef::Ordinary => StageKind::Ordinary,
            StageKindDef::Concatenate => StageKind::Concatenate,
        };
        let mut stage = Stage::new(id, kind, plan);
        stage.meta = StageMeta {
            output_files: def
                .output_files
                .map(FileCount::Known)
                .unwrap_or(FileCount::Unknown),
            parallelism: def.parallelism,
        };
        graph.insert_stage(stage)?;
    }

    for (id, after) in deps {
        for from in after {
            graph.connect(from, id)?;
        }
    }

    let properties = doc
        .config
        .iter()
        .map(|(k, v)| property_string(v).map(|s| (k.clone(), s)))
        .collect::<Result<BTreeMap<_, _>, DslError>>()?;

    let datasets = doc
        .datasets
        .into_iter()
        .map(|(name, files)| {
            let files = files
                .into_iter()
                .map(|rows| {
                    rows.into_iter()
                        .map(|row| row.into_iter().map(Scalar::from).collect())
                        .collect()
                })
                .collect();
            (name, files)
        })
        .collect();

    Ok(ParsedStagePlan {
        graph,
        properties,
        datasets,
    })
}
