//! Core types for sqlkit.
//!
//! This crate holds everything that does not need to talk to the native
//! library:
//!
//! - `Value`, the dynamically-typed cell value, with SQLite-style coercions
//! - `ColumnInfo`, `Row` and `ResultSetValue` for reading result sets
//! - `SqliteVersion`, `StatusResult` and `TableColumnMetadata`
//! - the `Error` taxonomy shared by every sqlkit crate

pub mod error;
pub mod info;
pub mod row;
pub mod value;

pub use error::{
    ContractError, DisposedError, EngineError, Error, ObjectKind, OpenError, Result, ResultCode,
    TypeError,
};
pub use info::{SqliteVersion, StatusResult, TableColumnMetadata};
pub use row::{ColumnInfo, FromValue, ResultSetValue, Row};
pub use value::{Value, ValueType};
