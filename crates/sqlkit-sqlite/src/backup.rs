//! Online backup between two connections.
//!
//! A `Backup` copies pages from a source database into a destination
//! database in increments. It is registered with both connections, so
//! closing either one finishes it.

use crate::connection::{Connection, InnerConnection, LiveHandle};
use crate::error::from_code;
use crate::ffi;
use sqlkit_core::{Error, ObjectKind, Result};
use std::cell::Cell;
use std::ptr;
use std::rc::{Rc, Weak};
use std::time::Duration;

pub(crate) struct BackupHandle {
    raw: Cell<*mut ffi::sqlite3_backup>,
}

impl LiveHandle for BackupHandle {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Backup
    }

    fn dispose(&self) {
        let raw = self.raw.replace(ptr::null_mut());
        if !raw.is_null() {
            // The return code repeats the last step's error.
            // SAFETY: raw is a live backup and is finished exactly once
            unsafe { ffi::sqlite3_backup_finish(raw) };
            tracing::debug!("finished backup");
        }
    }
}

/// An in-progress backup.
pub struct Backup {
    handle: Rc<BackupHandle>,
    dest: Weak<InnerConnection>,
    source: Weak<InnerConnection>,
    dest_id: u64,
    source_id: u64,
}

impl Connection {
    /// Start copying `source_db` of `source` into `dest_db` of this
    /// connection.
    pub fn backup_init(&self, dest_db: &str, source: &Connection, source_db: &str) -> Result<Backup> {
        let dest = self.inner.db()?;
        let src = source.inner.db()?;
        let c_dest = ffi::to_cstring(dest_db)?;
        let c_source = ffi::to_cstring(source_db)?;

        // SAFETY: both handles are live and the names are valid C strings
        let raw = unsafe { ffi::sqlite3_backup_init(dest, c_dest.as_ptr(), src, c_source.as_ptr()) };
        if raw.is_null() {
            // SAFETY: dest is live; the failure is recorded on it
            let rc = unsafe { ffi::sqlite3_errcode(dest) };
            return Err(from_code(dest, rc, None));
        }

        let handle = Rc::new(BackupHandle {
            raw: Cell::new(raw),
        });
        let dest_id = self
            .inner
            .register(Rc::clone(&handle) as Rc<dyn LiveHandle>);
        let source_id = source
            .inner
            .register(Rc::clone(&handle) as Rc<dyn LiveHandle>);
        tracing::debug!(dest = dest_db, source = source_db, "started backup");

        Ok(Backup {
            handle,
            dest: Rc::downgrade(&self.inner),
            source: Rc::downgrade(&source.inner),
            dest_id,
            source_id,
        })
    }
}

impl Backup {
    fn raw(&self) -> Result<*mut ffi::sqlite3_backup> {
        let raw = self.handle.raw.get();
        if raw.is_null() {
            Err(Error::disposed(ObjectKind::Backup))
        } else {
            Ok(raw)
        }
    }

    /// Copy up to `pages` pages (all remaining if negative). Returns `true`
    /// while there is more to copy.
    pub fn step(&mut self, pages: i32) -> Result<bool> {
        let raw = self.raw()?;
        // SAFETY: raw is live
        let rc = unsafe { ffi::sqlite3_backup_step(raw, pages) };
        match rc {
            ffi::SQLITE_OK => Ok(true),
            ffi::SQLITE_DONE => Ok(false),
            _ => {
                let db = self
                    .dest
                    .upgrade()
                    .and_then(|conn| conn.db().ok())
                    .unwrap_or(ptr::null_mut());
                Err(from_code(db, rc, None))
            }
        }
    }

    /// Total pages in the source, as of the last step.
    pub fn page_count(&self) -> Result<i32> {
        let raw = self.raw()?;
        // SAFETY: raw is live
        Ok(unsafe { ffi::sqlite3_backup_pagecount(raw) })
    }

    /// Pages still to copy, as of the last step.
    pub fn remaining_pages(&self) -> Result<i32> {
        let raw = self.raw()?;
        // SAFETY: raw is live
        Ok(unsafe { ffi::sqlite3_backup_remaining(raw) })
    }

    /// Step until done, sleeping `pause` whenever the source is busy.
    pub fn run_to_completion(&mut self, pages_per_step: i32, pause: Duration) -> Result<()> {
        loop {
            match self.step(pages_per_step) {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) if error.is_busy() => {
                    tracing::trace!(?pause, "backup source busy; retrying");
                    std::thread::sleep(pause);
                }
                Err(error) => return Err(error),
            }
        }
        self.finish()
    }

    /// Release the backup. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.is_finished() {
            return Ok(());
        }
        self.handle.dispose();
        if let Some(conn) = self.dest.upgrade() {
            conn.unregister(self.dest_id);
        }
        if let Some(conn) = self.source.upgrade() {
            conn.unregister(self.source_id);
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.raw.get().is_null()
    }
}

impl Drop for Backup {
    fn drop(&mut self) {
        if let Err(error) = self.finish() {
            tracing::warn!(error = %error, "error finishing backup on drop");
        }
    }
}

impl std::fmt::Debug for Backup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backup")
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlkit_core::Value;

    fn source() -> Connection {
        let conn = Connection::open_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, payload TEXT);
             WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 200)
             INSERT INTO t (payload) SELECT hex(randomblob(100)) FROM c;",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_incremental_backup() {
        let src = source();
        let dest = Connection::open_memory().unwrap();
        let mut backup = dest.backup_init("main", &src, "main").unwrap();

        assert!(backup.step(1).unwrap());
        let total = backup.page_count().unwrap();
        assert!(total > 1);
        assert_eq!(backup.remaining_pages().unwrap(), total - 1);

        while backup.step(5).unwrap() {}
        assert_eq!(backup.remaining_pages().unwrap(), 0);
        backup.finish().unwrap();
        backup.finish().unwrap();

        assert_eq!(
            dest.query_scalar("SELECT count(*) FROM t", &[]).unwrap(),
            Value::Integer(200)
        );
    }

    #[test]
    fn test_run_to_completion() {
        let src = source();
        let dest = Connection::open_memory().unwrap();
        let mut backup = dest.backup_init("main", &src, "main").unwrap();
        backup.run_to_completion(-1, Duration::from_millis(1)).unwrap();
        assert!(backup.is_finished());
        assert!(backup.step(1).unwrap_err().is_disposed());
    }

    #[test]
    fn test_closing_source_finishes_backup() {
        let src = source();
        let dest = Connection::open_memory().unwrap();
        let backup = dest.backup_init("main", &src, "main").unwrap();
        src.close().unwrap();
        assert!(backup.is_finished());
        assert!(backup.page_count().unwrap_err().is_disposed());
        // The destination stays usable.
        assert_eq!(dest.query_scalar("SELECT 1", &[]).unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_backup_to_unknown_database_fails() {
        let src = source();
        let dest = Connection::open_memory().unwrap();
        assert!(dest.backup_init("nope", &src, "main").is_err());
    }
}
