//! SQLite bindings for sqlkit.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate wraps the native SQLite library (via `libsqlite3-sys`) with
//! typed, checked handles. Every handle created from a connection is
//! tracked by it and finalized when the connection closes, so use after
//! close reports an error instead of touching freed memory.
//!
//! # Features
//!
//! - Prepared statements with positional and named parameter binding
//! - User-defined scalar functions, aggregates and collations
//! - Update, rollback, trace, profile and closing observers; commit hook,
//!   progress handler and authorizer
//! - Transactions, savepoints and `run_in_transaction`
//! - Incremental blob I/O and online backup
//! - Status counters, WAL checkpoints and column metadata
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlkit_sqlite::{Connection, Value};
//!
//! let conn = Connection::open_memory()?;
//! conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! conn.execute("INSERT INTO users (name) VALUES (?)", &[Value::Text("Alice".into())])?;
//!
//! let rows = conn.query("SELECT id, name FROM users", &[])?;
//! let name: String = rows[0].get_named("name")?;
//! ```
//!
//! # Type Mapping
//!
//! | `Value` | SQLite storage class |
//! |---------|----------------------|
//! | `Null` | NULL |
//! | `Integer` | INTEGER |
//! | `Float` | REAL |
//! | `Text` | TEXT |
//! | `Blob` | BLOB |
//!
//! # Thread Safety
//!
//! `Connection` and everything derived from it are `!Send`. The only handle
//! that may cross threads is [`InterruptHandle`].

pub mod backup;
pub mod blob;
pub mod builder;
pub mod connection;
pub mod error;
pub mod ffi;
pub mod function;
pub mod hooks;
pub mod statement;
pub mod transaction;
pub mod types;

pub use backup::Backup;
pub use blob::Blob;
pub use builder::ConnectionBuilder;
pub use connection::{
    CheckpointMode, Connection, DatabaseStatus, InterruptHandle, OpenFlags, SqliteConfig,
    SqliteStatus, status,
};
pub use function::{AggregateFunction, Collation, ErasedAggregate, FunctionRegistry, ScalarFunction};
pub use hooks::{
    ActionCode, Authorization, AuthorizerAction, AuthorizerRequest, ObserverId, ProfileEvent,
    TraceEvent, UpdateEvent,
};
pub use statement::{BindParameter, Rows, Statement, StatementState, StepResult};
pub use transaction::{Savepoint, Transaction, TransactionMode};

pub use sqlkit_core::{
    ColumnInfo, Error, FromValue, Result, ResultCode, Row, SqliteVersion, StatusResult,
    TableColumnMetadata, Value, ValueType,
};

/// The SQLite library version string.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// The SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}

/// The SQLite library version, decoded.
pub fn sqlite_version_info() -> SqliteVersion {
    SqliteVersion::from_number(u32::try_from(sqlite_version_number()).unwrap_or(0))
}
