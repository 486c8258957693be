//! Aggregate functions recombined across shards.
//!
//! Each shard computes a partial aggregate; these functions fold the
//! partial values into the global one:
//!
//! | Function | Partial columns     | Recombination                      |
//! |----------|---------------------|------------------------------------|
//! | SUM      | `SUM(x)`            | addition                           |
//! | COUNT    | `COUNT(x)`          | addition                           |
//! | MAX/MIN  | `MAX(x)` / `MIN(x)` | running comparison                 |
//! | AVG      | `SUM(x)`, `COUNT(x)`| Σsum / Σcount, exact decimal       |
//!
//! AVG is never averaged per shard: averaging averages drifts whenever the
//! shards hold different row counts.

mod merger;

pub use merger::AggregateMerger;

use super::comparator::{CompareFn, ComparatorRegistry};
use crate::error::{Error, Result};
use crate::value::{column_index, Column, ColumnType, Row, Value};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// An aggregate over the partial columns returned by each shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregator {
    Sum {
        column: String,
        alias: Option<String>,
    },
    Count {
        column: String,
        alias: Option<String>,
    },
    Max {
        column: String,
        alias: Option<String>,
    },
    Min {
        column: String,
        alias: Option<String>,
    },
    Avg {
        sum_column: String,
        count_column: String,
        alias: Option<String>,
    },
}

impl Aggregator {
    pub fn sum(column: impl Into<String>) -> Self {
        Aggregator::Sum {
            column: column.into(),
            alias: None,
        }
    }

    pub fn count(column: impl Into<String>) -> Self {
        Aggregator::Count {
            column: column.into(),
            alias: None,
        }
    }

    pub fn max(column: impl Into<String>) -> Self {
        Aggregator::Max {
            column: column.into(),
            alias: None,
        }
    }

    pub fn min(column: impl Into<String>) -> Self {
        Aggregator::Min {
            column: column.into(),
            alias: None,
        }
    }

    /// AVG from a partial SUM column and a partial COUNT column.
    pub fn avg(sum_column: impl Into<String>, count_column: impl Into<String>) -> Self {
        Aggregator::Avg {
            sum_column: sum_column.into(),
            count_column: count_column.into(),
            alias: None,
        }
    }

    /// Name the output column.
    pub fn with_alias(mut self, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match &mut self {
            Aggregator::Sum { alias, .. }
            | Aggregator::Count { alias, .. }
            | Aggregator::Max { alias, .. }
            | Aggregator::Min { alias, .. }
            | Aggregator::Avg { alias, .. } => *alias = name,
        }
        self
    }

    /// Output column name.
    ///
    /// Without an alias SUM, COUNT, MAX and MIN keep the partial column's
    /// name. AVG over `SUM(x)` is named `AVG(x)`.
    pub fn output_name(&self) -> String {
        match self {
            Aggregator::Sum { column, alias }
            | Aggregator::Count { column, alias }
            | Aggregator::Max { column, alias }
            | Aggregator::Min { column, alias } => {
                alias.clone().unwrap_or_else(|| column.clone())
            }
            Aggregator::Avg {
                sum_column, alias, ..
            } => alias.clone().unwrap_or_else(|| {
                let inner = sum_column
                    .strip_prefix("SUM(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .unwrap_or(sum_column);
                format!("AVG({})", inner)
            }),
        }
    }

    /// Resolve column positions and types against the shard columns.
    pub(crate) fn bind(
        &self,
        columns: &[Column],
        registry: &ComparatorRegistry,
    ) -> Result<BoundAggregator> {
        let name = self.output_name();

        let (kind, output) = match self {
            Aggregator::Sum { column, .. } => {
                let (index, col) = lookup(columns, column)?;
                numeric(col)?;
                (Kind::Sum { index, ty: col.ty }, Column::nullable(name, col.ty))
            }
            Aggregator::Count { column, .. } => {
                let (index, col) = lookup(columns, column)?;
                if col.ty != ColumnType::Int {
                    return Err(Error::InvalidAggregator(format!(
                        "{} is {}, expected an int count",
                        col.name, col.ty
                    )));
                }
                (Kind::Count { index }, Column::new(name, ColumnType::Int))
            }
            Aggregator::Max { column, .. } | Aggregator::Min { column, .. } => {
                let (index, col) = lookup(columns, column)?;
                let compare = registry.get(col.ty)?;
                let want = if matches!(self, Aggregator::Max { .. }) {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
                (
                    Kind::Extreme {
                        index,
                        compare,
                        want,
                    },
                    Column::nullable(name, col.ty),
                )
            }
            Aggregator::Avg {
                sum_column,
                count_column,
                ..
            } => {
                let (sum, sum_col) = lookup(columns, sum_column)?;
                numeric(sum_col)?;
                let (count, count_col) = lookup(columns, count_column)?;
                numeric(count_col)?;
                (
                    Kind::Avg { sum, count },
                    Column::nullable(name, ColumnType::Decimal),
                )
            }
        };
        Ok(BoundAggregator { kind, output })
    }
}

fn lookup<'a>(columns: &'a [Column], name: &str) -> Result<(usize, &'a Column)> {
    column_index(columns, name)
        .map(|i| (i, &columns[i]))
        .ok_or_else(|| Error::InvalidAggregator(format!("unknown column {}", name)))
}

fn numeric(col: &Column) -> Result<()> {
    match col.ty {
        ColumnType::Int | ColumnType::Float | ColumnType::Decimal => Ok(()),
        other => Err(Error::InvalidAggregator(format!(
            "{} is {}, expected a numeric column",
            col.name, other
        ))),
    }
}

#[derive(Debug, Clone)]
enum Kind {
    Sum {
        index: usize,
        ty: ColumnType,
    },
    Count {
        index: usize,
    },
    Extreme {
        index: usize,
        compare: CompareFn,
        want: Ordering,
    },
    Avg {
        sum: usize,
        count: usize,
    },
}

/// An aggregator resolved against concrete columns.
#[derive(Debug, Clone)]
pub(crate) struct BoundAggregator {
    kind: Kind,
    output: Column,
}

impl BoundAggregator {
    pub(crate) fn output(&self) -> &Column {
        &self.output
    }

    /// Fold the partial values of `rows` into one value.
    pub(crate) fn aggregate(&self, rows: &[Row]) -> Result<Value> {
        match &self.kind {
            Kind::Sum { index, ty } => sum(rows, *index, *ty, &self.output.name),
            Kind::Count { index } => {
                match sum(rows, *index, ColumnType::Int, &self.output.name)? {
                    Value::Null => Ok(Value::Int(0)),
                    v => Ok(v),
                }
            }
            Kind::Extreme {
                index,
                compare,
                want,
            } => {
                let mut best: Option<&Value> = None;
                for value in non_null(rows, *index) {
                    best = match best {
                        Some(b) if compare(value, b) != *want => Some(b),
                        _ => Some(value),
                    };
                }
                Ok(best.cloned().unwrap_or(Value::Null))
            }
            Kind::Avg { sum, count } => {
                let total = decimal_sum(rows, *sum, &self.output.name)?;
                let n = decimal_sum(rows, *count, &self.output.name)?;
                match (total, n) {
                    (_, None) => Ok(Value::Null),
                    (_, Some(n)) if n.is_zero() => Ok(Value::Null),
                    (None, Some(_)) => Ok(Value::Null),
                    (Some(total), Some(n)) => total
                        .checked_div(n)
                        .map(|avg| Value::Decimal(avg.normalize()))
                        .ok_or_else(|| Error::AggregateOverflow(self.output.name.clone())),
                }
            }
        }
    }
}

fn non_null(rows: &[Row], index: usize) -> impl Iterator<Item = &Value> {
    rows.iter()
        .map(move |r| &r.values()[index])
        .filter(|v| !v.is_null())
}

fn sum(rows: &[Row], index: usize, ty: ColumnType, name: &str) -> Result<Value> {
    let overflow = || Error::AggregateOverflow(name.to_string());
    let mut values = non_null(rows, index).peekable();
    if values.peek().is_none() {
        return Ok(Value::Null);
    }
    match ty {
        ColumnType::Int => {
            let mut acc: i64 = 0;
            for v in values {
                if let Value::Int(x) = v {
                    acc = acc.checked_add(*x).ok_or_else(overflow)?;
                }
            }
            Ok(Value::Int(acc))
        }
        ColumnType::Float => Ok(Value::Float(values.filter_map(|v| v.to_f64()).sum())),
        _ => {
            let mut acc = Decimal::ZERO;
            for v in values {
                if let Value::Decimal(x) = v {
                    acc = acc.checked_add(*x).ok_or_else(overflow)?;
                }
            }
            Ok(Value::Decimal(acc))
        }
    }
}

fn decimal_sum(rows: &[Row], index: usize, name: &str) -> Result<Option<Decimal>> {
    let mut acc: Option<Decimal> = None;
    for v in non_null(rows, index) {
        let x = v
            .to_decimal()
            .ok_or_else(|| Error::AggregateOverflow(name.to_string()))?;
        acc = Some(
            acc.unwrap_or(Decimal::ZERO)
                .checked_add(x)
                .ok_or_else(|| Error::AggregateOverflow(name.to_string()))?,
        );
    }
    Ok(acc)
}

/// Bind every aggregator; at least one is required.
pub(crate) fn bind_all(
    aggregators: &[Aggregator],
    columns: &[Column],
    registry: &ComparatorRegistry,
) -> Result<Vec<BoundAggregator>> {
    if aggregators.is_empty() {
        return Err(Error::InvalidAggregator("no aggregators".to_string()));
    }
    aggregators
        .iter()
        .map(|a| a.bind(columns, registry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("region", ColumnType::Text),
            Column::nullable("total", ColumnType::Int),
            Column::new("cnt", ColumnType::Int),
            Column::nullable("price", ColumnType::Decimal),
        ]
    }

    fn row(total: Option<i64>, cnt: i64, price: Option<Decimal>) -> Row {
        Row::new(vec![
            Value::from("eu"),
            Value::from(total),
            Value::Int(cnt),
            Value::from(price),
        ])
    }

    fn bind(agg: Aggregator) -> BoundAggregator {
        agg.bind(&columns(), &ComparatorRegistry::standard()).unwrap()
    }

    #[test]
    fn test_sum_and_count() {
        let rows = vec![row(Some(100), 10, None), row(None, 0, None), row(Some(50), 5, None)];
        assert_eq!(bind(Aggregator::sum("total")).aggregate(&rows).unwrap(), Value::Int(150));
        assert_eq!(bind(Aggregator::count("cnt")).aggregate(&rows).unwrap(), Value::Int(15));
        assert_eq!(
            bind(Aggregator::sum("total")).aggregate(&[row(None, 0, None)]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_sum_overflow() {
        let rows = vec![row(Some(i64::MAX), 1, None), row(Some(1), 1, None)];
        assert!(matches!(
            bind(Aggregator::sum("total")).aggregate(&rows),
            Err(Error::AggregateOverflow(_))
        ));
    }

    #[test]
    fn test_max_min_skip_nulls() {
        let rows = vec![
            row(None, 1, Some(Decimal::new(1999, 2))),
            row(Some(7), 1, None),
            row(Some(-3), 1, Some(Decimal::new(500, 2))),
        ];
        assert_eq!(bind(Aggregator::max("total")).aggregate(&rows).unwrap(), Value::Int(7));
        assert_eq!(bind(Aggregator::min("total")).aggregate(&rows).unwrap(), Value::Int(-3));
        assert_eq!(
            bind(Aggregator::max("price")).aggregate(&rows).unwrap(),
            Value::Decimal(Decimal::new(1999, 2))
        );
    }

    #[test]
    fn test_avg_is_weighted_by_count() {
        let rows = vec![row(Some(100), 10, None), row(Some(50), 5, None)];
        let avg = bind(Aggregator::avg("total", "cnt").with_alias("avg_total"));
        assert_eq!(avg.output().name, "avg_total");
        assert_eq!(avg.output().ty, ColumnType::Decimal);
        assert_eq!(avg.aggregate(&rows).unwrap(), Value::Decimal(Decimal::from(10)));

        let uneven = vec![row(Some(10), 1, None), row(Some(20), 3, None)];
        assert_eq!(
            avg.aggregate(&uneven).unwrap().to_f64().unwrap(),
            7.5
        );
        assert_eq!(avg.aggregate(&[row(None, 0, None)]).unwrap(), Value::Null);
    }

    #[test]
    fn test_bind_rejects_bad_columns() {
        let registry = ComparatorRegistry::standard();
        assert!(matches!(
            Aggregator::sum("region").bind(&columns(), &registry),
            Err(Error::InvalidAggregator(_))
        ));
        assert!(matches!(
            Aggregator::max("missing").bind(&columns(), &registry),
            Err(Error::InvalidAggregator(_))
        ));
        assert_eq!(Aggregator::sum("total").output_name(), "total");
        assert_eq!(
            Aggregator::avg("SUM(price)", "COUNT(price)").output_name(),
            "AVG(price)"
        );
        assert_eq!(Aggregator::avg("s", "c").output_name(), "AVG(s)");
        assert_eq!(
            Aggregator::max("MAX(price)").with_alias("top").output_name(),
            "top"
        );
    }
}
