//! Transactions and savepoints.
//!
//! Plain `BEGIN`/`COMMIT`/`ROLLBACK` helpers, named savepoints and RAII
//! guards that roll back when dropped without being finished.

use crate::connection::Connection;
use crate::ffi::quote_identifier;
use sqlkit_core::Result;

/// How `BEGIN` acquires locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionMode {
    /// Take locks lazily, on first read or write.
    #[default]
    Deferred,
    /// Take the write lock immediately.
    Immediate,
    /// Take an exclusive lock immediately.
    Exclusive,
}

impl TransactionMode {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionMode::Deferred => "BEGIN DEFERRED",
            TransactionMode::Immediate => "BEGIN IMMEDIATE",
            TransactionMode::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

impl Connection {
    /// Begin a transaction.
    pub fn begin_transaction(&self, mode: TransactionMode) -> Result<()> {
        self.execute_batch(mode.begin_sql())?;
        tracing::debug!(?mode, "begin transaction");
        Ok(())
    }

    /// Commit the current transaction.
    pub fn commit(&self) -> Result<()> {
        self.execute_batch("COMMIT")?;
        tracing::debug!("commit");
        Ok(())
    }

    /// Rollback the current transaction.
    pub fn rollback(&self) -> Result<()> {
        self.execute_batch("ROLLBACK")?;
        tracing::debug!("rollback");
        Ok(())
    }

    /// Open a savepoint with a fresh name (`sqlkit_sp_<n>`) and return the
    /// name.
    pub fn save_transaction_point(&self) -> Result<String> {
        self.inner.db()?;
        let name = format!("sqlkit_sp_{}", self.inner.next_savepoint());
        self.execute_batch(&format!("SAVEPOINT {}", quote_identifier(&name)))?;
        tracing::debug!(savepoint = %name, "savepoint");
        Ok(name)
    }

    /// Release (commit) a savepoint and everything nested inside it.
    pub fn release(&self, name: &str) -> Result<()> {
        self.execute_batch(&format!("RELEASE SAVEPOINT {}", quote_identifier(name)))?;
        tracing::debug!(savepoint = %name, "release savepoint");
        Ok(())
    }

    /// Undo everything since the savepoint. The savepoint stays open.
    pub fn rollback_transaction_to(&self, name: &str) -> Result<()> {
        self.execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", quote_identifier(name)))?;
        tracing::debug!(savepoint = %name, "rollback to savepoint");
        Ok(())
    }

    /// Run `f` inside a savepoint.
    ///
    /// The savepoint is released when `f` returns `Ok`. On `Err` (or a
    /// panic) everything `f` did is rolled back and the error is returned
    /// unchanged. If the release itself fails, for instance on a deferred
    /// constraint, the work is rolled back and the release error returned.
    /// Nests freely, inside or outside an explicit transaction.
    pub fn run_in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut savepoint = self.savepoint()?;
        let outcome = f(self).and_then(|value| {
            self.release(&savepoint.name)?;
            savepoint.finished = true;
            Ok(value)
        });
        if let Err(error) = &outcome {
            savepoint.finished = true;
            if let Err(rollback_error) = savepoint.rollback_and_release() {
                tracing::warn!(
                    error = %error,
                    rollback_error = %rollback_error,
                    "rollback after failed transaction also failed"
                );
            }
        }
        outcome
    }

    /// Begin a transaction guarded by a `Transaction`.
    pub fn transaction(&self, mode: TransactionMode) -> Result<Transaction<'_>> {
        self.begin_transaction(mode)?;
        Ok(Transaction {
            conn: self,
            finished: false,
        })
    }

    /// Open a savepoint guarded by a `Savepoint`.
    pub fn savepoint(&self) -> Result<Savepoint<'_>> {
        let name = self.save_transaction_point()?;
        Ok(Savepoint {
            conn: self,
            name,
            finished: false,
        })
    }
}

/// A transaction that rolls back unless committed.
#[must_use = "dropping a Transaction rolls it back"]
pub struct Transaction<'c> {
    conn: &'c Connection,
    finished: bool,
}

impl<'c> Transaction<'c> {
    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// Commit. On failure the transaction is still open and is rolled
    /// back when the guard drops here.
    pub fn commit(mut self) -> Result<()> {
        self.conn.commit()?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.rollback()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished || self.conn.is_closed() {
            return;
        }
        // Statements such as an explicit COMMIT can end the transaction
        // behind the guard's back.
        if matches!(self.conn.is_auto_commit(), Ok(true)) {
            return;
        }
        if let Err(error) = self.conn.rollback() {
            tracing::warn!(error = %error, "rollback on drop failed");
        }
    }
}

/// A savepoint that rolls back unless released.
#[must_use = "dropping a Savepoint rolls it back"]
pub struct Savepoint<'c> {
    conn: &'c Connection,
    name: String,
    finished: bool,
}

impl<'c> Savepoint<'c> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// Release. On failure the savepoint is rolled back when the guard
    /// drops here.
    pub fn release(mut self) -> Result<()> {
        self.conn.release(&self.name)?;
        self.finished = true;
        Ok(())
    }

    /// Undo everything since the savepoint and close it.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.rollback_and_release()
    }

    fn rollback_and_release(&self) -> Result<()> {
        self.conn.rollback_transaction_to(&self.name)?;
        self.conn.release(&self.name)
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if self.finished || self.conn.is_closed() {
            return;
        }
        if let Err(error) = self.rollback_and_release() {
            tracing::warn!(savepoint = %self.name, error = %error, "savepoint rollback on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlkit_core::{Error, Value};

    fn conn() -> Connection {
        let conn = Connection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        conn
    }

    fn count(conn: &Connection) -> Value {
        conn.query_scalar("SELECT count(*) FROM t", &[]).unwrap()
    }

    #[test]
    fn test_begin_commit_rollback() {
        let conn = conn();
        conn.begin_transaction(TransactionMode::Immediate).unwrap();
        assert!(!conn.is_auto_commit().unwrap());
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        conn.rollback().unwrap();
        assert!(conn.is_auto_commit().unwrap());
        assert_eq!(count(&conn), Value::Integer(0));

        conn.begin_transaction(TransactionMode::default()).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        conn.commit().unwrap();
        assert_eq!(count(&conn), Value::Integer(1));
    }

    #[test]
    fn test_savepoint_names_are_monotonic() {
        let conn = conn();
        let a = conn.save_transaction_point().unwrap();
        let b = conn.save_transaction_point().unwrap();
        assert_eq!(a, "sqlkit_sp_1");
        assert_eq!(b, "sqlkit_sp_2");
        conn.release(&a).unwrap();
        assert!(conn.is_auto_commit().unwrap());
    }

    #[test]
    fn test_rollback_to_savepoint() {
        let conn = conn();
        let outer = conn.save_transaction_point().unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        let inner = conn.save_transaction_point().unwrap();
        conn.execute("INSERT INTO t VALUES (2)", &[]).unwrap();
        conn.rollback_transaction_to(&inner).unwrap();
        conn.release(&outer).unwrap();
        assert_eq!(count(&conn), Value::Integer(1));
    }

    #[test]
    fn test_run_in_transaction_commits() {
        let conn = conn();
        let value = conn
            .run_in_transaction(|c| {
                c.execute("INSERT INTO t VALUES (1)", &[])?;
                Ok(42)
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(count(&conn), Value::Integer(1));
        assert!(conn.is_auto_commit().unwrap());
    }

    #[test]
    fn test_run_in_transaction_rolls_back_on_error() {
        let conn = conn();
        let err = conn
            .run_in_transaction(|c| {
                c.execute("INSERT INTO t VALUES (1)", &[])?;
                c.execute("INSERT INTO missing VALUES (1)", &[])?;
                Ok(())
            })
            .unwrap_err();
        assert!(err.engine().unwrap().message.contains("no such table"));
        assert_eq!(count(&conn), Value::Integer(0));
        assert!(conn.is_auto_commit().unwrap());

        // Still usable.
        conn.execute("INSERT INTO t VALUES (2)", &[]).unwrap();
        assert_eq!(count(&conn), Value::Integer(1));
    }

    #[test]
    fn test_run_in_transaction_returns_error_unchanged() {
        let conn = conn();
        let err = conn
            .run_in_transaction::<(), _>(|_| Err(Error::Custom("nope".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Custom(ref m) if m == "nope"));
    }

    #[test]
    fn test_nested_run_in_transaction() {
        let conn = conn();
        conn.run_in_transaction(|c| {
            c.execute("INSERT INTO t VALUES (1)", &[])?;
            let inner: Result<()> = c.run_in_transaction(|c| {
                c.execute("INSERT INTO t VALUES (2)", &[])?;
                Err(Error::Custom("inner failed".into()))
            });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&conn), Value::Integer(1));
    }

    #[test]
    fn test_panic_in_body_rolls_back() {
        let conn = conn();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = conn.run_in_transaction(|c| -> Result<()> {
                c.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
                panic!("body failed");
            });
        }));
        assert!(result.is_err());
        assert_eq!(count(&conn), Value::Integer(0));
        assert!(conn.is_auto_commit().unwrap());
    }

    #[test]
    fn test_transaction_guard_rolls_back_on_drop() {
        let conn = conn();
        {
            let tx = conn.transaction(TransactionMode::Deferred).unwrap();
            tx.connection()
                .execute("INSERT INTO t VALUES (1)", &[])
                .unwrap();
        }
        assert!(conn.is_auto_commit().unwrap());
        assert_eq!(count(&conn), Value::Integer(0));

        let tx = conn.transaction(TransactionMode::Exclusive).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        tx.commit().unwrap();
        assert_eq!(count(&conn), Value::Integer(1));
    }

    #[test]
    fn test_savepoint_guard() {
        let conn = conn();
        {
            let sp = conn.savepoint().unwrap();
            assert!(sp.name().starts_with("sqlkit_sp_"));
            conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        }
        assert_eq!(count(&conn), Value::Integer(0));

        let sp = conn.savepoint().unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        sp.release().unwrap();
        assert_eq!(count(&conn), Value::Integer(1));
    }

    fn conn_with_deferred_fk() -> Connection {
        let conn = Connection::open_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (
                 parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
             );",
        )
        .unwrap();
        conn
    }

    fn child_count(conn: &Connection) -> Value {
        conn.query_scalar("SELECT count(*) FROM child", &[]).unwrap()
    }

    #[test]
    fn test_failed_release_rolls_back() {
        let conn = conn_with_deferred_fk();
        let err = conn
            .run_in_transaction(|c| {
                c.execute("INSERT INTO child VALUES (99)", &[])?;
                Ok(())
            })
            .unwrap_err();
        assert!(err.engine().unwrap().message.contains("FOREIGN KEY"));
        assert!(conn.is_auto_commit().unwrap());
        assert_eq!(child_count(&conn), Value::Integer(0));

        // Valid work still commits afterwards.
        conn.run_in_transaction(|c| {
            c.execute("INSERT INTO parent VALUES (1)", &[])?;
            c.execute("INSERT INTO child VALUES (1)", &[])?;
            Ok(())
        })
        .unwrap();
        assert_eq!(child_count(&conn), Value::Integer(1));
    }

    #[test]
    fn test_failed_savepoint_release_rolls_back_on_drop() {
        let conn = conn_with_deferred_fk();
        let sp = conn.savepoint().unwrap();
        conn.execute("INSERT INTO child VALUES (99)", &[]).unwrap();
        assert!(sp.release().is_err());
        assert!(conn.is_auto_commit().unwrap());
        assert_eq!(child_count(&conn), Value::Integer(0));
    }

    #[test]
    fn test_failed_commit_rolls_back_on_drop() {
        let conn = conn_with_deferred_fk();
        let tx = conn.transaction(TransactionMode::Deferred).unwrap();
        conn.execute("INSERT INTO child VALUES (99)", &[]).unwrap();
        assert!(tx.commit().is_err());
        assert!(conn.is_auto_commit().unwrap());
        assert_eq!(child_count(&conn), Value::Integer(0));
    }

    #[test]
    fn test_commit_without_transaction_fails() {
        let conn = conn();
        assert!(conn.commit().is_err());
        assert!(conn.release("not_a_savepoint").is_err());
    }
}
