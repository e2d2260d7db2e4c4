//! Prepared statements.
//!
//! A `Statement` moves through three states:
//!
//! - `Ready`: freshly prepared or reset; bindings may be changed
//! - `Row`: the last step produced a row, readable with `current()`
//! - `Done`: the statement ran to completion (or failed); further steps
//!   return `Done` without touching the engine until `reset()`
//!
//! Statements register with their connection when prepared. Closing the
//! connection finalizes them; afterwards every operation reports
//! `Error::Disposed`.

#![allow(clippy::cast_possible_truncation)]

use crate::connection::{InnerConnection, LiveHandle};
use crate::error::from_code;
use crate::ffi;
use crate::types;
use sqlkit_core::{ColumnInfo, ContractError, Error, ObjectKind, Result, Row, Value};
use std::cell::{Cell, OnceCell};
use std::ffi::c_int;
use std::ptr;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Result of a single `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Row,
    Done,
}

/// Where a statement is in its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Ready,
    Row,
    Done,
}

/// A bind slot. `index` is 0-based; `name` keeps its sigil (`:id`, `@id`,
/// `$id`, `?1`) and is `None` for anonymous `?` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindParameter {
    pub index: usize,
    pub name: Option<String>,
}

/// The native statement, shared with the connection's live set.
pub(crate) struct StatementHandle {
    raw: Cell<*mut ffi::sqlite3_stmt>,
}

impl StatementHandle {
    fn get(&self) -> Result<*mut ffi::sqlite3_stmt> {
        let raw = self.raw.get();
        if raw.is_null() {
            Err(Error::disposed(ObjectKind::Statement))
        } else {
            Ok(raw)
        }
    }
}

impl LiveHandle for StatementHandle {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Statement
    }

    fn dispose(&self) {
        let raw = self.raw.replace(ptr::null_mut());
        if !raw.is_null() {
            // The return code repeats the last step's error, which was
            // already reported.
            // SAFETY: raw is a live statement and is finalized exactly once
            unsafe { ffi::sqlite3_finalize(raw) };
            tracing::trace!("finalized statement");
        }
    }
}

/// A prepared statement.
pub struct Statement {
    handle: Rc<StatementHandle>,
    conn: Weak<InnerConnection>,
    id: u64,
    state: StatementState,
    sql: String,
    columns: OnceCell<Arc<[ColumnInfo]>>,
    parameters: Vec<BindParameter>,
}

impl Statement {
    pub(crate) fn from_raw(conn: &Rc<InnerConnection>, raw: *mut ffi::sqlite3_stmt) -> Self {
        // SAFETY: raw is a freshly prepared, non-null statement
        let (sql, parameters) = unsafe {
            let sql = ffi::string_from_ptr(ffi::sqlite3_sql(raw)).unwrap_or_default();
            let count = usize::try_from(ffi::sqlite3_bind_parameter_count(raw)).unwrap_or(0);
            let parameters = (0..count)
                .map(|index| BindParameter {
                    index,
                    name: ffi::string_from_ptr(ffi::sqlite3_bind_parameter_name(
                        raw,
                        (index + 1) as c_int,
                    )),
                })
                .collect::<Vec<_>>();
            (sql, parameters)
        };

        let handle = Rc::new(StatementHandle {
            raw: Cell::new(raw),
        });
        let id = conn.register(Rc::clone(&handle) as Rc<dyn LiveHandle>);
        tracing::debug!(sql = %sql, parameters = parameters.len(), "prepared statement");

        Self {
            handle,
            conn: Rc::downgrade(conn),
            id,
            state: StatementState::Ready,
            sql,
            columns: OnceCell::new(),
            parameters,
        }
    }

    fn raw(&self) -> Result<*mut ffi::sqlite3_stmt> {
        self.handle.get()
    }

    fn error(&self, raw: *mut ffi::sqlite3_stmt, rc: c_int) -> Error {
        // SAFETY: raw is live, so its connection is too
        let db = unsafe { ffi::sqlite3_db_handle(raw) };
        from_code(db, rc, Some(&self.sql))
    }

    /// The SQL text this statement was compiled from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The SQL text with current bindings substituted in.
    pub fn expanded_sql(&self) -> Result<Option<String>> {
        let raw = self.raw()?;
        // SAFETY: raw is live; the returned buffer is ours to free
        unsafe {
            let expanded = ffi::sqlite3_expanded_sql(raw);
            let text = ffi::string_from_ptr(expanded);
            if !expanded.is_null() {
                ffi::sqlite3_free(expanded.cast());
            }
            Ok(text)
        }
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    /// Whether the statement makes no direct changes to the database.
    pub fn is_read_only(&self) -> Result<bool> {
        let raw = self.raw()?;
        // SAFETY: raw is live
        Ok(unsafe { ffi::sqlite3_stmt_readonly(raw) } != 0)
    }

    /// Whether the statement has been stepped since its last reset and has
    /// not yet run to completion.
    pub fn is_busy(&self) -> Result<bool> {
        let raw = self.raw()?;
        // SAFETY: raw is live
        Ok(unsafe { ffi::sqlite3_stmt_busy(raw) } != 0)
    }

    pub fn is_closed(&self) -> bool {
        self.handle.raw.get().is_null()
    }

    pub fn bind_parameters(&self) -> &[BindParameter] {
        &self.parameters
    }

    /// 0-based index of the parameter with exactly this name.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .map(|p| p.index)
    }

    /// Result columns, resolved on first use.
    pub fn columns(&self) -> Result<&[ColumnInfo]> {
        self.column_arc().map(|columns| &columns[..])
    }

    pub fn column_count(&self) -> Result<usize> {
        Ok(self.column_arc()?.len())
    }

    fn column_arc(&self) -> Result<&Arc<[ColumnInfo]>> {
        let raw = self.raw()?;
        Ok(self.columns.get_or_init(|| {
            // SAFETY: raw is live and every index is below column_count
            unsafe {
                let count = ffi::sqlite3_column_count(raw);
                (0..count).map(|i| types::column_info(raw, i)).collect()
            }
        }))
    }

    /// Bind `value` to the parameter at 0-based `index`.
    pub fn bind(&mut self, index: usize, value: &Value) -> Result<()> {
        let raw = self.raw()?;
        if index >= self.parameters.len() {
            return Err(Error::Contract(ContractError::IndexOutOfRange {
                index,
                len: self.parameters.len(),
            }));
        }
        // SAFETY: raw is live and index + 1 is a valid 1-based slot
        let rc = unsafe { types::bind_value(raw, (index + 1) as c_int, value) };
        if rc != ffi::SQLITE_OK {
            return Err(self.error(raw, rc));
        }
        Ok(())
    }

    /// Bind by exact parameter name, sigil included.
    pub fn bind_by_name(&mut self, name: &str, value: &Value) -> Result<()> {
        self.raw()?;
        let index = self
            .parameter_index(name)
            .ok_or_else(|| Error::Contract(ContractError::UnknownParameter(name.to_string())))?;
        self.bind(index, value)
    }

    /// Bind every parameter positionally.
    pub fn bind_all(&mut self, values: &[Value]) -> Result<()> {
        self.raw()?;
        if values.len() != self.parameters.len() {
            return Err(Error::Contract(ContractError::InvalidArgument(format!(
                "statement expects {} parameters, got {}",
                self.parameters.len(),
                values.len()
            ))));
        }
        for (index, value) in values.iter().enumerate() {
            self.bind(index, value)?;
        }
        Ok(())
    }

    /// Set every parameter back to NULL.
    pub fn clear_bindings(&mut self) -> Result<()> {
        let raw = self.raw()?;
        // SAFETY: raw is live
        let rc = unsafe { ffi::sqlite3_clear_bindings(raw) };
        if rc != ffi::SQLITE_OK {
            return Err(self.error(raw, rc));
        }
        Ok(())
    }

    /// Advance to the next row.
    pub fn step(&mut self) -> Result<StepResult> {
        let raw = self.raw()?;
        if self.state == StatementState::Done {
            return Ok(StepResult::Done);
        }

        // SAFETY: raw is live
        let rc = unsafe { ffi::sqlite3_step(raw) };
        match rc {
            ffi::SQLITE_ROW => {
                self.state = StatementState::Row;
                tracing::trace!(sql = %self.sql, "step: row");
                Ok(StepResult::Row)
            }
            ffi::SQLITE_DONE => {
                self.state = StatementState::Done;
                tracing::trace!(sql = %self.sql, "step: done");
                Ok(StepResult::Done)
            }
            _ => {
                self.state = StatementState::Done;
                Err(self.error(raw, rc))
            }
        }
    }

    /// Return to `Ready`. Bindings are kept.
    pub fn reset(&mut self) -> Result<()> {
        let raw = self.raw()?;
        // SAFETY: raw is live. The return code repeats the last step's
        // error, which step already reported.
        let rc = unsafe { ffi::sqlite3_reset(raw) };
        if rc != ffi::SQLITE_OK {
            tracing::trace!(code = rc, "reset after failed step");
        }
        self.state = StatementState::Ready;
        Ok(())
    }

    fn require_row(&self) -> Result<*mut ffi::sqlite3_stmt> {
        let raw = self.raw()?;
        if self.state != StatementState::Row {
            return Err(Error::invalid_state(format!(
                "no current row (statement is {:?})",
                self.state
            )));
        }
        Ok(raw)
    }

    /// Copy of the current row.
    pub fn current(&self) -> Result<Row> {
        let raw = self.require_row()?;
        let columns = Arc::clone(self.column_arc()?);
        let values = (0..columns.len())
            // SAFETY: the statement is positioned on a row
            .map(|i| unsafe { types::read_column(raw, i as c_int) })
            .collect();
        Ok(Row::new(columns, values))
    }

    /// One value of the current row.
    pub fn column_value(&self, index: usize) -> Result<Value> {
        let raw = self.require_row()?;
        let len = self.column_count()?;
        if index >= len {
            return Err(Error::Contract(ContractError::IndexOutOfRange { index, len }));
        }
        // SAFETY: the statement is positioned on a row and index is in range
        Ok(unsafe { types::read_column(raw, index as c_int) })
    }

    fn rebind(&mut self, params: &[Value]) -> Result<()> {
        self.reset()?;
        // An empty slice keeps whatever was bound before.
        if !params.is_empty() {
            self.bind_all(params)?;
        }
        Ok(())
    }

    /// Reset, bind `params` and iterate the results.
    pub fn query(&mut self, params: &[Value]) -> Result<Rows<'_>> {
        self.rebind(params)?;
        Ok(Rows {
            stmt: self,
            done: false,
        })
    }

    /// Reset, bind `params` and run to completion, returning the number of
    /// rows changed.
    pub fn execute(&mut self, params: &[Value]) -> Result<usize> {
        self.rebind(params)?;
        while self.step()? == StepResult::Row {}
        let raw = self.raw()?;
        // SAFETY: raw is live, so its connection is too
        let changes = unsafe { ffi::sqlite3_changes64(ffi::sqlite3_db_handle(raw)) };
        Ok(usize::try_from(changes).unwrap_or(0))
    }

    /// Finalize the statement. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.handle.dispose();
        if let Some(conn) = self.conn.upgrade() {
            conn.unregister(self.id);
        }
        self.state = StatementState::Done;
        tracing::debug!(sql = %self.sql, "closed statement");
        Ok(())
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(sql = %self.sql, error = %error, "error closing statement on drop");
        }
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("state", &self.state)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Iterator over the rows of a running query.
///
/// Stops after the first error. Dropping it resets the statement.
pub struct Rows<'s> {
    stmt: &'s mut Statement,
    done: bool,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.stmt.step() {
            Ok(StepResult::Row) => {
                let row = self.stmt.current();
                if row.is_err() {
                    self.done = true;
                }
                Some(row)
            }
            Ok(StepResult::Done) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

impl Drop for Rows<'_> {
    fn drop(&mut self) {
        if !self.stmt.is_closed() {
            let _ = self.stmt.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Connection;

    fn people() -> Connection {
        let conn = Connection::open_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, age INTEGER);
             INSERT INTO people (name, age) VALUES ('Alice', 30), ('Bob', 25);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_state_machine() {
        let conn = people();
        let mut stmt = conn.prepare("SELECT name FROM people ORDER BY id").unwrap();
        assert_eq!(stmt.state(), StatementState::Ready);
        assert!(stmt.current().unwrap_err().is_contract_violation());

        assert_eq!(stmt.step().unwrap(), StepResult::Row);
        assert_eq!(stmt.state(), StatementState::Row);
        assert!(stmt.is_busy().unwrap());
        assert_eq!(stmt.current().unwrap().get_as::<String>(0).unwrap(), "Alice");

        assert_eq!(stmt.step().unwrap(), StepResult::Row);
        assert_eq!(stmt.column_value(0).unwrap(), Value::Text("Bob".into()));
        assert_eq!(stmt.step().unwrap(), StepResult::Done);
        assert_eq!(stmt.state(), StatementState::Done);
        assert!(stmt.current().is_err());

        // Done is sticky until reset.
        assert_eq!(stmt.step().unwrap(), StepResult::Done);
        stmt.reset().unwrap();
        assert_eq!(stmt.state(), StatementState::Ready);
        assert_eq!(stmt.step().unwrap(), StepResult::Row);
    }

    #[test]
    fn test_reset_keeps_bindings() {
        let conn = people();
        let mut stmt = conn.prepare("SELECT name FROM people WHERE age > ?").unwrap();
        stmt.bind(0, &Value::Integer(26)).unwrap();
        assert_eq!(stmt.step().unwrap(), StepResult::Row);
        assert!(stmt.is_busy().unwrap());

        stmt.reset().unwrap();
        assert!(!stmt.is_busy().unwrap());
        assert_eq!(
            stmt.expanded_sql().unwrap().as_deref(),
            Some("SELECT name FROM people WHERE age > 26")
        );
        let rows: Vec<Row> = stmt.query(&[]).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_as::<String>(0).unwrap(), "Alice");
    }

    #[test]
    fn test_named_parameters() {
        let conn = people();
        let mut stmt = conn
            .prepare("SELECT count(*) FROM people WHERE age >= :min AND name <> @skip")
            .unwrap();
        assert_eq!(
            stmt.bind_parameters(),
            &[
                BindParameter {
                    index: 0,
                    name: Some(":min".to_string())
                },
                BindParameter {
                    index: 1,
                    name: Some("@skip".to_string())
                },
            ]
        );
        assert_eq!(stmt.parameter_index("@skip"), Some(1));
        assert_eq!(stmt.parameter_index("skip"), None);

        stmt.bind_by_name(":min", &Value::Integer(0)).unwrap();
        stmt.bind_by_name("@skip", &Value::Text("Bob".into())).unwrap();
        assert_eq!(stmt.step().unwrap(), StepResult::Row);
        assert_eq!(stmt.column_value(0).unwrap(), Value::Integer(1));

        let err = stmt.bind_by_name(":MIN", &Value::Null).unwrap_err();
        assert!(matches!(
            err,
            Error::Contract(ContractError::UnknownParameter(ref n)) if n == ":MIN"
        ));
    }

    #[test]
    fn test_bind_index_out_of_range() {
        let conn = people();
        let mut stmt = conn.prepare("SELECT ?").unwrap();
        let err = stmt.bind(1, &Value::Null).unwrap_err();
        assert!(matches!(
            err,
            Error::Contract(ContractError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(stmt.bind_all(&[]).is_err());
        assert!(stmt.bind_all(&[Value::Null, Value::Null]).is_err());
    }

    #[test]
    fn test_clear_bindings() {
        let conn = people();
        let mut stmt = conn.prepare("SELECT ?").unwrap();
        stmt.bind(0, &Value::Integer(5)).unwrap();
        stmt.clear_bindings().unwrap();
        stmt.step().unwrap();
        assert_eq!(stmt.column_value(0).unwrap(), Value::Null);
    }

    #[test]
    fn test_execute_returns_changes() {
        let conn = people();
        let mut stmt = conn
            .prepare("UPDATE people SET age = age + 1 WHERE age > ?")
            .unwrap();
        assert!(!stmt.is_read_only().unwrap());
        assert_eq!(stmt.execute(&[Value::Integer(0)]).unwrap(), 2);
        assert_eq!(stmt.execute(&[Value::Integer(30)]).unwrap(), 1);
    }

    #[test]
    fn test_step_error_moves_to_done() {
        let conn = people();
        conn.execute_batch("CREATE UNIQUE INDEX people_name ON people(name)")
            .unwrap();
        let mut stmt = conn.prepare("INSERT INTO people (name) VALUES (?)").unwrap();
        let err = stmt.execute(&[Value::Text("Alice".into())]).unwrap_err();
        assert!(err.is_constraint());
        assert_eq!(err.extended_code(), Some(ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert_eq!(stmt.state(), StatementState::Done);
        assert_eq!(stmt.step().unwrap(), StepResult::Done);

        // Re-executing resets first.
        assert_eq!(stmt.execute(&[Value::Text("Carol".into())]).unwrap(), 1);
    }

    #[test]
    fn test_rows_stop_after_error() {
        let conn = Connection::open_memory().unwrap();
        let mut stmt = conn
            .prepare(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 3) \
                 SELECT CASE WHEN x = 2 THEN abs(-9223372036854775807 - 1) ELSE x END FROM c",
            )
            .unwrap();
        let mut rows = stmt.query(&[]).unwrap();
        assert!(rows.next().unwrap().is_ok());
        assert!(rows.next().unwrap().is_err());
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_columns_are_cached() {
        let conn = people();
        let stmt = conn.prepare("SELECT id, name AS who FROM people").unwrap();
        let first = stmt.columns().unwrap().as_ptr();
        assert_eq!(stmt.columns().unwrap().as_ptr(), first);
        assert_eq!(stmt.column_count().unwrap(), 2);
        assert_eq!(stmt.columns().unwrap()[1].name, "who");
        assert!(stmt.is_read_only().unwrap());
    }

    #[test]
    fn test_close_is_idempotent() {
        let conn = people();
        let mut stmt = conn.prepare("SELECT 1").unwrap();
        assert_eq!(conn.statement_count(), 1);
        stmt.close().unwrap();
        stmt.close().unwrap();
        assert_eq!(conn.statement_count(), 0);
        assert!(stmt.step().unwrap_err().is_disposed());
        assert!(stmt.columns().unwrap_err().is_disposed());
        assert!(stmt.bind(0, &Value::Null).unwrap_err().is_disposed());
    }

    #[test]
    fn test_statement_outlives_dropped_connection() {
        let conn = people();
        let mut stmt = conn.prepare("SELECT 1").unwrap();
        drop(conn);
        assert!(stmt.is_closed());
        assert!(stmt.step().unwrap_err().is_disposed());
        stmt.close().unwrap();
    }
}
