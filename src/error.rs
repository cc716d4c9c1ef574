//! Error types for QuickSilver.
//!
//! Most of the public API follows the "reported, not thrown" policy from
//! the design: query helpers return an empty collection or `None`, mutation
//! helpers return `false`, and every native-level failure increments the
//! owning [`IoHandle`](crate::io_handle::IoHandle)'s error counter and is
//! logged. [`Error`] exists for the handful of construction-time boundaries
//! that do propagate.

use thiserror::Error;

/// Result alias used at the throwing boundaries of the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// QuickSilver's structured error type.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation was attempted before `open()` or after `close()`.
    #[error("no open database connection")]
    NoDatabase,

    /// A SQL argument was of a type the binder doesn't recognize.
    #[error("unsupported SQL argument: {0}")]
    UnknownSqlObject(String),

    /// `sqlite3_prepare` (via rusqlite) failed.
    #[error("failed to prepare statement `{sql}`: {source}")]
    PrepareFailed {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Binding arguments failed: arity mismatch or an unsupported value.
    #[error("failed to bind arguments for `{sql}`: {reason}")]
    BindFailed { sql: String, reason: String },

    /// The native step call returned an error or misuse code.
    #[error("step failed for `{sql}`: {source}")]
    StepError {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The busy-retry budget was exhausted on step.
    #[error("busy-retry budget ({retries}) exhausted stepping `{sql}`")]
    StepBusyExhausted { sql: String, retries: u32 },

    /// Supplied argument count didn't match the statement's bind-point
    /// count. Logged, execution is still attempted.
    #[error("arity mismatch for `{sql}`: expected {expected}, got {actual}")]
    ArityMismatch {
        sql: String,
        expected: usize,
        actual: usize,
    },

    /// A `#?` site received a value that wasn't a sequence, set, or null.
    #[error("`#?` site {index} in `{sql}` requires a sequence or set, got {actual}")]
    InvalidMultiBind {
        sql: String,
        index: usize,
        actual: String,
    },

    /// The busy-retry budget was exhausted while closing the connection.
    #[error("busy-retry budget ({retries}) exhausted closing database")]
    CloseBusy { retries: u32 },

    /// `beginTransaction` was called while a transaction was already open.
    #[error("a transaction is already open")]
    TransactionAlreadyOpen,

    /// `commit`/`rollback` was called with no open transaction.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// An entity was registered without the three reserved columns, or with
    /// a duplicate table name.
    #[error("malformed entity `{0}`: {1}")]
    MalformedEntity(String, String),

    /// Propagated from rusqlite at a throwing boundary (open/close/DDL).
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
