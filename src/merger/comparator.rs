//! Typed row comparison.
//!
//! A [`ComparatorRegistry`] maps each [`ColumnType`] to a comparison
//! function. Mergers build a [`RowComparator`] from it once, at
//! construction, using the declared column types; rows are type-checked on
//! read, so comparisons themselves never fail.

use crate::error::{Error, Result};
use crate::value::{column_index, Column, ColumnType, Row, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Comparison function for two non-null values of the same column type.
pub type CompareFn = fn(&Value, &Value) -> Ordering;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

/// A named sort column with its direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortColumn {
    pub name: String,
    pub order: Order,
}

impl SortColumn {
    pub fn new(name: impl Into<String>, order: Order) -> Self {
        Self {
            name: name.into(),
            order,
        }
    }

    pub fn asc(name: impl Into<String>) -> Self {
        Self::new(name, Order::Asc)
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self::new(name, Order::Desc)
    }
}

/// Comparison functions by column type.
#[derive(Debug, Clone)]
pub struct ComparatorRegistry {
    by_type: HashMap<ColumnType, CompareFn>,
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ComparatorRegistry {
    /// Registry with the natural ordering of every supported type.
    pub fn standard() -> Self {
        let mut by_type: HashMap<ColumnType, CompareFn> = HashMap::new();
        by_type.insert(ColumnType::Bool, cmp_bool);
        by_type.insert(ColumnType::Int, cmp_int);
        by_type.insert(ColumnType::Float, cmp_float);
        by_type.insert(ColumnType::Decimal, cmp_decimal);
        by_type.insert(ColumnType::Text, cmp_text);
        by_type.insert(ColumnType::Bytes, cmp_bytes);
        Self { by_type }
    }

    /// Replace the comparison used for one type, e.g. a collation-aware
    /// text comparison.
    pub fn with(mut self, ty: ColumnType, compare: CompareFn) -> Self {
        self.by_type.insert(ty, compare);
        self
    }

    /// Comparison for a type.
    pub fn get(&self, ty: ColumnType) -> Result<CompareFn> {
        self.by_type
            .get(&ty)
            .copied()
            .ok_or_else(|| Error::Config(format!("no comparator registered for {}", ty)))
    }
}

#[derive(Debug, Clone)]
struct KeyPart {
    index: usize,
    order: Order,
    nullable: bool,
    compare: CompareFn,
}

/// Composite comparator over selected columns of a row.
#[derive(Debug, Clone)]
pub struct RowComparator {
    parts: Vec<KeyPart>,
}

impl RowComparator {
    /// Build a comparator for `sort` against `columns`.
    pub fn new(
        registry: &ComparatorRegistry,
        columns: &[Column],
        sort: &[SortColumn],
    ) -> Result<Self> {
        let mut parts = Vec::with_capacity(sort.len());
        for sc in sort {
            let index = column_index(columns, &sc.name)
                .ok_or_else(|| Error::UnknownSortColumn(sc.name.clone()))?;
            let column = &columns[index];
            parts.push(KeyPart {
                index,
                order: sc.order,
                nullable: column.nullable,
                compare: registry.get(column.ty)?,
            });
        }
        Ok(Self { parts })
    }

    /// Ascending comparator over every column, in order.
    pub fn all_columns(registry: &ComparatorRegistry, columns: &[Column]) -> Result<Self> {
        let sort: Vec<SortColumn> = columns.iter().map(|c| SortColumn::asc(&c.name)).collect();
        Self::new(registry, columns, &sort)
    }

    /// Number of key parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Compare two rows by the configured key.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for part in &self.parts {
            let (x, y) = (&a.values()[part.index], &b.values()[part.index]);
            let ord = if part.nullable {
                compare_nullable(part.compare, x, y)
            } else {
                (part.compare)(x, y)
            };
            let ord = match part.order {
                Order::Asc => ord,
                Order::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Nullable path: `NULL` is the minimum, two `NULL`s are equal.
fn compare_nullable(compare: CompareFn, a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare(a, b),
    }
}

/// A row carrying its comparator, so it can live in ordered std
/// collections (`BinaryHeap`, `BTreeMap`).
#[derive(Debug, Clone)]
pub(crate) struct KeyedRow {
    pub(crate) row: Row,
    comparator: Arc<RowComparator>,
}

impl KeyedRow {
    pub(crate) fn new(row: Row, comparator: Arc<RowComparator>) -> Self {
        Self { row, comparator }
    }
}

impl PartialEq for KeyedRow {
    fn eq(&self, other: &Self) -> bool {
        self.comparator.compare(&self.row, &other.row) == Ordering::Equal
    }
}

impl Eq for KeyedRow {}

impl PartialOrd for KeyedRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyedRow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator.compare(&self.row, &other.row)
    }
}

// Values reaching these functions were checked against the column type;
// the fallback arm only keeps the order total.

fn cmp_bool(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn cmp_int(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn cmp_float(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn cmp_decimal(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Decimal(x), Value::Decimal(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn cmp_text(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn cmp_bytes(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) => 2,
        Value::Float(_) => 3,
        Value::Decimal(_) => 4,
        Value::Text(_) => 5,
        Value::Bytes(_) => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", ColumnType::Int),
            Column::nullable("name", ColumnType::Text),
            Column::new("score", ColumnType::Float),
        ]
    }

    fn row(id: i64, name: Option<&str>, score: f64) -> Row {
        Row::new(vec![Value::Int(id), Value::from(name), Value::Float(score)])
    }

    #[test]
    fn test_unknown_sort_column() {
        let registry = ComparatorRegistry::standard();
        let err = RowComparator::new(&registry, &columns(), &[SortColumn::asc("age")]).unwrap_err();
        assert_eq!(err, Error::UnknownSortColumn("age".to_string()));
    }

    #[test]
    fn test_composite_key_with_directions() {
        let registry = ComparatorRegistry::standard();
        let cmp = RowComparator::new(
            &registry,
            &columns(),
            &[SortColumn::asc("id"), SortColumn::desc("score")],
        )
        .unwrap();

        assert_eq!(cmp.compare(&row(1, None, 1.0), &row(2, None, 9.0)), Ordering::Less);
        assert_eq!(cmp.compare(&row(1, None, 9.0), &row(1, None, 1.0)), Ordering::Less);
        assert_eq!(cmp.compare(&row(1, Some("a"), 1.0), &row(1, None, 1.0)), Ordering::Equal);
    }

    #[test]
    fn test_null_is_minimum_under_asc() {
        let registry = ComparatorRegistry::standard();
        let asc = RowComparator::new(&registry, &columns(), &[SortColumn::asc("name")]).unwrap();
        assert_eq!(asc.compare(&row(1, None, 0.0), &row(1, Some("a"), 0.0)), Ordering::Less);
        assert_eq!(asc.compare(&row(1, None, 0.0), &row(2, None, 0.0)), Ordering::Equal);

        let desc = RowComparator::new(&registry, &columns(), &[SortColumn::desc("name")]).unwrap();
        assert_eq!(desc.compare(&row(1, None, 0.0), &row(1, Some("a"), 0.0)), Ordering::Greater);
    }

    #[test]
    fn test_registry_override() {
        fn reverse_text(a: &Value, b: &Value) -> Ordering {
            cmp_text(b, a)
        }
        let registry = ComparatorRegistry::standard().with(ColumnType::Text, reverse_text);
        let cmp = RowComparator::new(&registry, &columns(), &[SortColumn::asc("name")]).unwrap();
        assert_eq!(
            cmp.compare(&row(1, Some("a"), 0.0), &row(1, Some("b"), 0.0)),
            Ordering::Greater
        );
    }
}
