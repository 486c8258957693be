//! Core types passed through the routing tree.

use crate::value::Value;

/// A routed SQL statement.
///
/// `shard_group` and `logical_db` are empty for non-sharded use; the router
/// then falls back to its only (or configured default) entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// SQL text, passed to the driver verbatim.
    pub sql: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Logical database inside the shard group.
    pub logical_db: String,
    /// Shard group (cluster) name.
    pub shard_group: String,
}

impl Query {
    /// Create an unrouted query.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    /// Set the positional arguments.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Route to a logical database.
    pub fn on_db(mut self, logical_db: impl Into<String>) -> Self {
        self.logical_db = logical_db.into();
        self
    }

    /// Route to a shard group.
    pub fn in_group(mut self, shard_group: impl Into<String>) -> Self {
        self.shard_group = shard_group.into();
        self
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Number of rows changed.
    pub rows_affected: u64,
    /// Id generated by the statement, if the driver reports one.
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    /// Create a new exec result.
    pub fn new(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows_affected,
            last_insert_id,
        }
    }

    /// Combine the results of one statement fanned out to several targets.
    ///
    /// Affected rows are summed. The insert id is only meaningful when a
    /// single target produced one.
    pub fn combine(results: &[ExecResult]) -> ExecResult {
        let rows_affected = results.iter().map(|r| r.rows_affected).sum();
        let mut ids = results.iter().filter_map(|r| r.last_insert_id);
        let last_insert_id = match (ids.next(), ids.next()) {
            (Some(id), None) => Some(id),
            _ => None,
        };
        ExecResult {
            rows_affected,
            last_insert_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let q = Query::new("SELECT 1")
            .with_args(vec![Value::Int(1)])
            .on_db("order_db_0")
            .in_group("cluster_a");
        assert_eq!(q.sql, "SELECT 1");
        assert_eq!(q.args, vec![Value::Int(1)]);
        assert_eq!(q.logical_db, "order_db_0");
        assert_eq!(q.shard_group, "cluster_a");
    }

    #[test]
    fn test_exec_result_combine() {
        let combined = ExecResult::combine(&[
            ExecResult::new(2, None),
            ExecResult::new(3, Some(10)),
        ]);
        assert_eq!(combined, ExecResult::new(5, Some(10)));

        let ambiguous = ExecResult::combine(&[
            ExecResult::new(1, Some(1)),
            ExecResult::new(1, Some(2)),
        ]);
        assert_eq!(ambiguous.last_insert_id, None);
        assert_eq!(ExecResult::combine(&[]), ExecResult::default());
    }
}
