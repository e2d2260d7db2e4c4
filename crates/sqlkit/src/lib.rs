//! sqlkit - ergonomic, typed access to SQLite.
//!
//! sqlkit wraps the SQLite C library with handles that know their owner:
//!
//! - Prepared statements with an explicit Ready/Row/Done state machine
//! - Dynamic `Value`s with the engine's own coercion rules
//! - Scalar functions, aggregates and collations written as closures
//! - Observers for updates, rollbacks, tracing, profiling and close
//! - Transactions, savepoints and `run_in_transaction`
//! - Incremental blob I/O, online backup, status counters
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlkit::prelude::*;
//!
//! let conn = ConnectionBuilder::memory()
//!     .with_scalar_function(scalar1("cube", |x| {
//!         let x = x.to_i64();
//!         Ok(Value::Integer(x * x * x))
//!     }))?
//!     .build()?;
//!
//! conn.execute_batch("CREATE TABLE heroes (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")?;
//!
//! conn.run_in_transaction(|c| {
//!     c.execute(
//!         "INSERT INTO heroes (name, age) VALUES (?1, ?2)",
//!         &[Value::Text("Spider-Man".into()), Value::Integer(25)],
//!     )?;
//!     Ok(())
//! })?;
//!
//! for row in conn.query("SELECT name, cube(age) FROM heroes", &[])? {
//!     let name: String = row.get_as(0)?;
//!     let cubed: i64 = row.get_as(1)?;
//!     println!("{name}: {cubed}");
//! }
//! ```

// Re-export all public types from sub-crates
pub use sqlkit_core::{
    ColumnInfo, ContractError, DisposedError, EngineError, Error, FromValue, ObjectKind,
    OpenError, Result, ResultCode, ResultSetValue, Row, SqliteVersion, StatusResult,
    TableColumnMetadata, TypeError, Value, ValueType,
};

pub use sqlkit_sqlite::{
    ActionCode, AggregateFunction, Authorization, AuthorizerAction, AuthorizerRequest, Backup,
    BindParameter, Blob, CheckpointMode, Collation, Connection, ConnectionBuilder,
    DatabaseStatus, ErasedAggregate, FunctionRegistry, InterruptHandle, ObserverId, OpenFlags,
    ProfileEvent, Rows, Savepoint, ScalarFunction, SqliteConfig, SqliteStatus, Statement,
    StatementState, StepResult, TraceEvent, Transaction, TransactionMode, UpdateEvent,
    sqlite_version, sqlite_version_info, sqlite_version_number, status,
};

/// Closure adapters for fixed-arity functions and aggregates.
pub use sqlkit_sqlite::function;

/// Raw access to the native library, for what the safe API does not cover.
pub use sqlkit_sqlite::ffi;

// ============================================================================
// Prelude
// ============================================================================

/// The types most programs need.
pub mod prelude {
    pub use crate::{
        // Connections
        Connection,
        ConnectionBuilder,
        Error,
        OpenFlags,
        Result,
        Row,
        SqliteConfig,
        // Statements
        Statement,
        StepResult,
        // Transactions
        TransactionMode,
        Value,
    };
    pub use sqlkit_sqlite::function::{
        AggregateFunction, Collation, ScalarFunction, aggregate0, aggregate1, aggregate2,
        aggregate3, scalar0, scalar1, scalar2, scalar3,
    };
}
