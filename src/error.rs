//! Error types for the sharded access layer.

use thiserror::Error;

/// Result type alias for access layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the access layer.
///
/// Errors are `Clone` because merged cursors keep the first iteration
/// error and hand it back on every later `scan`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ---------------------------------------------------------------------
    // Routing
    // ---------------------------------------------------------------------
    /// A shard group, logical database or data source name is not registered.
    #[error("target not found: {name}")]
    TargetNotFound { name: String },

    /// The replica pool for a target currently holds no replicas.
    #[error("no replica available for {target}")]
    NoReplicaAvailable { target: String },

    /// The replica pool was closed and no longer refreshes.
    #[error("replica pool closed: {0}")]
    PoolClosed(String),

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------
    /// A single-target transaction was asked to touch a second target.
    #[error("cross-target transaction: opened on {first}, attempted {attempted}")]
    CrossTargetTransaction { first: String, attempted: String },

    /// The execution context carried no strategy or an unknown one.
    #[error("unsupported transaction strategy: {0:?}")]
    UnsupportedTransactionStrategy(String),

    /// The transaction was already committed or rolled back.
    #[error("transaction already finished")]
    TransactionFinished,

    /// One or more targets failed a multi-target operation.
    #[error("{op} failed on {}", format_failures(.failures))]
    PartialFailure {
        op: &'static str,
        failures: Vec<TargetFailure>,
    },

    // ---------------------------------------------------------------------
    // Merge construction
    // ---------------------------------------------------------------------
    /// A merger was constructed without any cursor.
    #[error("merger requires at least one cursor")]
    NoCursors,

    /// Cursors expose different column lists.
    #[error("column set mismatch: expected {expected:?}, got {actual:?}")]
    ColumnSetMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// A sort column is not part of the cursor columns.
    #[error("unknown sort column: {0}")]
    UnknownSortColumn(String),

    /// A distinct or group-by column is not part of the cursor columns.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// A sort column is not one of the distinct columns.
    #[error("sort column {0} is not a distinct column")]
    SortKeyNotInDistinctColumns(String),

    /// Offset must be >= 0 and limit must be > 0.
    #[error("invalid limit or offset: offset={offset}, limit={limit}")]
    InvalidLimitOrOffset { offset: i64, limit: i64 },

    /// An aggregator references a missing column or an unsupported type.
    #[error("invalid aggregator: {0}")]
    InvalidAggregator(String),

    // ---------------------------------------------------------------------
    // Merge iteration
    // ---------------------------------------------------------------------
    /// One cursor of an aggregate merge returned no row while others did.
    #[error("aggregate source {index} returned no row")]
    AggregateSourceEmpty { index: usize },

    /// One cursor of an aggregate merge returned more than one row.
    #[error("aggregate source {index} returned more than one row")]
    AggregateSourceMultipleRows { index: usize },

    /// An integer aggregate left the i64 range.
    #[error("aggregate overflow in {0}")]
    AggregateOverflow(String),

    /// A value does not match its declared column type.
    #[error("column {column} expects {expected}, got {actual}")]
    ColumnTypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    /// `scan` was called before a successful `next`.
    #[error("scan called without a successful next")]
    ScanWithoutNext,

    /// The cursor was already closed.
    #[error("cursor closed")]
    CursorClosed,

    // ---------------------------------------------------------------------
    // Execution context
    // ---------------------------------------------------------------------
    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The execution deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------
    /// Error reported by the underlying driver.
    #[error("driver error: {0}")]
    Driver(String),

    /// DNS resolution failed.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// Several independent failures, e.g. from closing many cursors.
    #[error("{} errors: {}", .0.len(), format_errors(.0))]
    Multiple(Vec<Error>),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Build a driver error from any displayable value.
    pub fn driver(msg: impl std::fmt::Display) -> Self {
        Error::Driver(msg.to_string())
    }

    /// Whether this error comes from the execution context rather than I/O.
    pub fn is_context(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Collapse a list of errors: `None` when empty, the error itself when
    /// there is exactly one, `Multiple` otherwise.
    pub fn combine(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }
}

/// A failure attributed to one physical target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFailure {
    /// Fully-qualified target name.
    pub target: String,
    /// What went wrong on that target.
    pub error: Error,
}

impl TargetFailure {
    /// Create a new target failure.
    pub fn new(target: impl Into<String>, error: Error) -> Self {
        Self {
            target: target.into(),
            error,
        }
    }
}

impl std::fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

fn format_failures(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Driver(e.to_string())
    }
}

impl From<rust_decimal::Error> for Error {
    fn from(e: rust_decimal::Error) -> Self {
        Error::AggregateOverflow(e.to_string())
    }
}
