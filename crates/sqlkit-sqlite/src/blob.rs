//! Incremental blob I/O.
//!
//! A `Blob` is a cursor over one BLOB cell, usable through the standard
//! `Read`, `Write` and `Seek` traits. Blobs cannot change size: writes past
//! the end are truncated to the space that remains.

#![allow(clippy::cast_possible_truncation)]

use crate::connection::{Connection, InnerConnection, LiveHandle};
use crate::error::from_code;
use crate::ffi;
use sqlkit_core::{Error, ObjectKind, Result};
use std::cell::Cell;
use std::ffi::c_int;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ptr;
use std::rc::{Rc, Weak};

pub(crate) struct BlobHandle {
    raw: Cell<*mut ffi::sqlite3_blob>,
}

impl LiveHandle for BlobHandle {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Blob
    }

    fn dispose(&self) {
        let raw = self.raw.replace(ptr::null_mut());
        if !raw.is_null() {
            // SAFETY: raw is an open blob and is closed exactly once
            let rc = unsafe { ffi::sqlite3_blob_close(raw) };
            if rc != ffi::SQLITE_OK {
                tracing::warn!(code = rc, "blob close reported an error");
            }
        }
    }
}

/// An open handle on a single BLOB value.
pub struct Blob {
    handle: Rc<BlobHandle>,
    conn: Weak<InnerConnection>,
    id: u64,
    position: usize,
}

impl Connection {
    /// Open the BLOB stored in `table.column` of row `rowid` in database
    /// `db_name` for incremental I/O.
    pub fn open_blob(
        &self,
        db_name: &str,
        table: &str,
        column: &str,
        rowid: i64,
        writable: bool,
    ) -> Result<Blob> {
        let db = self.inner.db()?;
        let c_db = ffi::to_cstring(db_name)?;
        let c_table = ffi::to_cstring(table)?;
        let c_column = ffi::to_cstring(column)?;
        let mut raw: *mut ffi::sqlite3_blob = ptr::null_mut();

        // SAFETY: all pointers are valid for the call
        let rc = unsafe {
            ffi::sqlite3_blob_open(
                db,
                c_db.as_ptr(),
                c_table.as_ptr(),
                c_column.as_ptr(),
                rowid,
                c_int::from(writable),
                &mut raw,
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(from_code(db, rc, None));
        }

        let handle = Rc::new(BlobHandle {
            raw: Cell::new(raw),
        });
        let id = self
            .inner
            .register(Rc::clone(&handle) as Rc<dyn LiveHandle>);
        tracing::debug!(table, column, rowid, writable, "opened blob");

        Ok(Blob {
            handle,
            conn: Rc::downgrade(&self.inner),
            id,
            position: 0,
        })
    }
}

impl Blob {
    fn raw(&self) -> Result<*mut ffi::sqlite3_blob> {
        let raw = self.handle.raw.get();
        if raw.is_null() {
            Err(Error::disposed(ObjectKind::Blob))
        } else {
            Ok(raw)
        }
    }

    fn error(&self, rc: c_int) -> Error {
        let db = self
            .conn
            .upgrade()
            .and_then(|conn| conn.db().ok())
            .unwrap_or(ptr::null_mut());
        from_code(db, rc, None)
    }

    /// Size of the BLOB in bytes.
    pub fn len(&self) -> Result<usize> {
        let raw = self.raw()?;
        // SAFETY: raw is open
        let len = unsafe { ffi::sqlite3_blob_bytes(raw) };
        Ok(usize::try_from(len).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.handle.raw.get().is_null()
    }

    /// Point the handle at another row of the same table and column,
    /// rewinding the cursor.
    pub fn reopen(&mut self, rowid: i64) -> Result<()> {
        let raw = self.raw()?;
        // SAFETY: raw is open
        let rc = unsafe { ffi::sqlite3_blob_reopen(raw, rowid) };
        if rc != ffi::SQLITE_OK {
            return Err(self.error(rc));
        }
        self.position = 0;
        Ok(())
    }

    /// Close the handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.handle.dispose();
        if let Some(conn) = self.conn.upgrade() {
            conn.unregister(self.id);
        }
        Ok(())
    }

    fn io_range(&self, requested: usize) -> io::Result<(*mut ffi::sqlite3_blob, usize)> {
        let raw = self.raw().map_err(io::Error::other)?;
        let len = self.len().map_err(io::Error::other)?;
        let n = requested.min(len.saturating_sub(self.position));
        Ok((raw, n))
    }
}

impl Read for Blob {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (raw, n) = self.io_range(buf.len())?;
        if n == 0 {
            return Ok(0);
        }
        // SAFETY: buf holds at least n bytes and offset + n is within the blob
        let rc = unsafe {
            ffi::sqlite3_blob_read(raw, buf.as_mut_ptr().cast(), n as c_int, self.position as c_int)
        };
        if rc != ffi::SQLITE_OK {
            return Err(io::Error::other(self.error(rc)));
        }
        self.position += n;
        Ok(n)
    }
}

impl Write for Blob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (raw, n) = self.io_range(buf.len())?;
        if n == 0 {
            return Ok(0);
        }
        // SAFETY: buf holds at least n bytes and offset + n is within the blob
        let rc = unsafe {
            ffi::sqlite3_blob_write(raw, buf.as_ptr().cast(), n as c_int, self.position as c_int)
        };
        if rc != ffi::SQLITE_OK {
            return Err(io::Error::other(self.error(rc)));
        }
        self.position += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Blob {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.len().map_err(io::Error::other)? as i64;
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
            SeekFrom::End(offset) => len.saturating_add(offset),
            SeekFrom::Current(offset) => (self.position as i64).saturating_add(offset),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        self.position = usize::try_from(target).unwrap_or(usize::MAX);
        Ok(target as u64)
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(error = %error, "error closing blob on drop");
        }
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("position", &self.position)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
