//! Translation of native result codes into `sqlkit_core::Error`.

use crate::ffi;
use sqlkit_core::{EngineError, Error, Result};
use std::ffi::c_int;

/// Build an error for `rc` using the connection's extended code and message.
///
/// If the handle's last error no longer matches `rc` (the code came from
/// somewhere other than the most recent API call), the engine's generic text
/// for `rc` is used instead of a stale message.
pub fn from_code(db: *mut ffi::sqlite3, rc: c_int, sql: Option<&str>) -> Error {
    let error = if db.is_null() {
        EngineError::new(rc, ffi::error_string(rc))
    } else {
        // SAFETY: db is a live connection handle
        let extended = unsafe { ffi::sqlite3_extended_errcode(db) };
        if extended & 0xff == rc & 0xff {
            // SAFETY: as above; errmsg is never null for a live handle
            let message = unsafe { ffi::string_from_ptr(ffi::sqlite3_errmsg(db)) }
                .unwrap_or_else(|| ffi::error_string(rc));
            EngineError::new(extended, message)
        } else {
            EngineError::new(rc, ffi::error_string(rc))
        }
    };

    let error = match sql {
        Some(sql) => error.with_sql(sql),
        None => error,
    };
    tracing::trace!(code = error.extended_code, message = %error.message, "sqlite error");
    Error::from_engine(error)
}

/// Build an error when no connection handle is available.
pub fn from_code_only(rc: c_int) -> Error {
    Error::from_engine(EngineError::new(rc, ffi::error_string(rc)))
}

/// `Ok(())` for `SQLITE_OK`, otherwise the translated error.
pub fn check(db: *mut ffi::sqlite3, rc: c_int) -> Result<()> {
    if rc == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(from_code(db, rc, None))
    }
}
