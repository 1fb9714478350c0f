//! Aggregate functions over one column of a group.
//!
//! Every function is expressed as an accumulator fed one value at a time, so the
//! materialized path (fold over a bag) and the accumulative path (fold while
//! streaming the group) share the same arithmetic and produce identical values.

use std::collections::BTreeSet;

use stageopt_core::plan::AggFn;
use stageopt_core::types::{Row, Scalar};

use crate::runtime::ExecError;

/// Running state of one aggregate. Nulls are skipped by every function.
#[derive(Debug, Clone)]
pub enum Accumulator {
    Count(i64),
    Sum {
        int: i64,
        float: f64,
        any_float: bool,
        seen: bool,
    },
    Min(Option<Scalar>),
    Max(Option<Scalar>),
    Avg {
        sum: f64,
        n: u64,
    },
    /// `first`: first non-null value in group order.
    First(Option<Scalar>),
    /// `median`: needs every value, so it only ever runs materialized.
    Median(Vec<Scalar>),
}

impl Accumulator {
    pub fn new(func: &AggFn) -> Result<Self, ExecError> {
        Ok(match func {
            AggFn::Count => Accumulator::Count(0),
            AggFn::Sum => Accumulator::Sum {
                int: 0,
                float: 0.0,
                any_float: false,
                seen: false,
            },
            AggFn::Min => Accumulator::Min(None),
            AggFn::Max => Accumulator::Max(None),
            AggFn::Avg => Accumulator::Avg { sum: 0.0, n: 0 },
            AggFn::Udf { name, .. } => match name.as_str() {
                "first" => Accumulator::First(None),
                "median" => Accumulator::Median(Vec::new()),
                other => return Err(ExecError::Operator(format!("unknown function `{other}`"))),
            },
        })
    }

    /// Whether the accumulator keeps bounded state.
    pub fn is_bounded(&self) -> bool {
        !matches!(self, Accumulator::Median(_))
    }

    pub fn update(&mut self, value: &Scalar) -> Result<(), ExecError> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum {
                int,
                float,
                any_float,
                seen,
            } => {
                match value {
                    Scalar::I64(v) => *int = int.wrapping_add(*v),
                    Scalar::F64(v) => {
                        *float += *v;
                        *any_float = true;
                    }
                    other => {
                        return Err(ExecError::Operator(format!("sum over non-number {other:?}")))
                    }
                }
                *seen = true;
            }
            Accumulator::Min(cur) => {
                if cur.as_ref().map_or(true, |c| value < c) {
                    *cur = Some(value.clone());
                }
            }
            Accumulator::Max(cur) => {
                if cur.as_ref().map_or(true, |c| value > c) {
                    *cur = Some(value.clone());
                }
            }
            Accumulator::Avg { sum, n } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| ExecError::Operator(format!("avg over non-number {value:?}")))?;
                *sum += v;
                *n += 1;
            }
            Accumulator::First(cur) => {
                if cur.is_none() {
                    *cur = Some(value.clone());
                }
            }
            Accumulator::Median(values) => values.push(value.clone()),
        }
        Ok(())
    }

    pub fn finish(self) -> Scalar {
        match self {
            Accumulator::Count(n) => Scalar::I64(n),
            Accumulator::Sum { seen: false, .. } => Scalar::Null,
            Accumulator::Sum {
                int,
                float,
                any_float: true,
                ..
            } => Scalar::F64(int as f64 + float),
            Accumulator::Sum { int, .. } => Scalar::I64(int),
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) => {
                v.unwrap_or(Scalar::Null)
            }
            Accumulator::Avg { n: 0, .. } => Scalar::Null,
            Accumulator::Avg { sum, n } => Scalar::F64(sum / n as f64),
            Accumulator::Median(mut values) => {
                if values.is_empty() {
                    return Scalar::Null;
                }
                values.sort();
                values.swap_remove((values.len() - 1) / 2)
            }
        }
    }
}

fn column_value(row: &Row, column: usize) -> Result<&Scalar, ExecError> {
    row.get(column).ok_or_else(|| {
        ExecError::Operator(format!(
            "column ${column} out of range for row of width {}",
            row.len()
        ))
    })
}

/// Materialized evaluation: fold `func` over `column` of every row in `bag`.
pub fn aggregate_bag(
    func: &AggFn,
    column: usize,
    distinct: bool,
    bag: &[Row],
) -> Result<Scalar, ExecError> {
    let mut acc = Accumulator::new(func)?;
    if distinct {
        let mut values = BTreeSet::new();
        for row in bag {
            values.insert(column_value(row, column)?.clone());
        }
        for v in &values {
            acc.update(v)?;
        }
    } else {
        for row in bag {
            acc.update(column_value(row, column)?)?;
        }
    }
    Ok(acc.finish())
}

/// Streaming evaluation: feed one row of the current group.
pub fn accumulate_row(acc: &mut Accumulator, column: usize, row: &Row) -> Result<(), ExecError> {
    acc.update(column_value(row, column)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(values: &[Scalar]) -> Vec<Row> {
        values.iter().map(|v| vec![Scalar::Null, v.clone()]).collect()
    }

    #[test]
    fn builtins_skip_nulls() {
        let rows = bag(&[Scalar::I64(3), Scalar::Null, Scalar::I64(1), Scalar::I64(3)]);
        let eval = |f: AggFn, distinct| aggregate_bag(&f, 1, distinct, &rows).unwrap();
        assert_eq!(eval(AggFn::Count, false), Scalar::I64(3));
        assert_eq!(eval(AggFn::Sum, false), Scalar::I64(7));
        assert_eq!(eval(AggFn::Sum, true), Scalar::I64(4));
        assert_eq!(eval(AggFn::Min, false), Scalar::I64(1));
        assert_eq!(eval(AggFn::Max, false), Scalar::I64(3));
        assert_eq!(eval(AggFn::Avg, false), Scalar::F64(7.0 / 3.0));
    }

    #[test]
    fn empty_or_all_null_groups() {
        let rows = bag(&[Scalar::Null]);
        assert_eq!(aggregate_bag(&AggFn::Sum, 1, false, &rows).unwrap(), Scalar::Null);
        assert_eq!(aggregate_bag(&AggFn::Count, 1, false, &rows).unwrap(), Scalar::I64(0));
    }

    #[test]
    fn streaming_matches_materialized() {
        let rows = bag(&[Scalar::F64(1.5), Scalar::I64(2), Scalar::I64(4)]);
        for func in [AggFn::Count, AggFn::Sum, AggFn::Min, AggFn::Max, AggFn::Avg] {
            let mut acc = Accumulator::new(&func).unwrap();
            for r in &rows {
                accumulate_row(&mut acc, 1, r).unwrap();
            }
            assert_eq!(acc.finish(), aggregate_bag(&func, 1, false, &rows).unwrap());
        }
    }

    #[test]
    fn median_and_first_udfs() {
        let rows = bag(&[Scalar::I64(5), Scalar::I64(1), Scalar::I64(3), Scalar::I64(2)]);
        let median = AggFn::Udf {
            name: "median".into(),
            accumulative: false,
        };
        let first = AggFn::Udf {
            name: "first".into(),
            accumulative: true,
        };
        assert_eq!(aggregate_bag(&median, 1, false, &rows).unwrap(), Scalar::I64(2));
        assert_eq!(aggregate_bag(&first, 1, false, &rows).unwrap(), Scalar::I64(5));
        assert!(!Accumulator::new(&median).unwrap().is_bounded());
        assert!(Accumulator::new(&AggFn::Udf {
            name: "nope".into(),
            accumulative: true
        })
        .is_err());
    }
}
