//! Value marshalling between Rust and SQLite.
//!
//! SQLite has five storage classes, mapped one-to-one onto `Value`:
//! - INTEGER: `Value::Integer`
//! - REAL: `Value::Float`
//! - TEXT: `Value::Text`
//! - BLOB: `Value::Blob`
//! - NULL: `Value::Null`
//!
//! Every read copies out of engine-owned memory immediately; nothing returned
//! from here borrows from a statement or a `sqlite3_value`.

#![allow(clippy::cast_possible_truncation)]

use crate::ffi;
use sqlkit_core::{ColumnInfo, Value};
use std::ffi::{CStr, c_int};

/// Bind a Value to a prepared statement parameter.
///
/// Text and blobs are bound with `SQLITE_TRANSIENT`, so the engine takes its
/// own copy before this returns.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    // SAFETY: forwarded from the caller's contract
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),

            Value::Integer(v) => ffi::sqlite3_bind_int64(stmt, index, *v),

            Value::Float(v) => ffi::sqlite3_bind_double(stmt, index, *v),

            Value::Text(s) => match c_int::try_from(s.len()) {
                Ok(len) => ffi::sqlite3_bind_text(
                    stmt,
                    index,
                    s.as_ptr().cast(),
                    len,
                    ffi::SQLITE_TRANSIENT(),
                ),
                Err(_) => ffi::SQLITE_TOOBIG,
            },

            Value::Blob(b) => match c_int::try_from(b.len()) {
                Ok(len) => ffi::sqlite3_bind_blob(
                    stmt,
                    index,
                    b.as_ptr().cast(),
                    len,
                    ffi::SQLITE_TRANSIENT(),
                ),
                Err(_) => ffi::SQLITE_TOOBIG,
            },
        }
    }
}

/// Read a column value from the current result row.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that has just returned SQLITE_ROW
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: forwarded from the caller's contract. The type is read first
    // and the text/blob pointer before the byte count, as the engine requires.
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(stmt, index)),

            ffi::SQLITE_FLOAT => Value::Float(ffi::sqlite3_column_double(stmt, index)),

            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                Value::Text(text_from_raw(ptr, len))
            }

            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                Value::Blob(bytes_from_raw(ptr.cast(), len))
            }

            _ => Value::Null,
        }
    }
}

/// Read a function argument.
///
/// # Safety
/// `value` must be a valid protected `sqlite3_value` for the duration of the call.
pub unsafe fn read_value(value: *mut ffi::sqlite3_value) -> Value {
    // SAFETY: forwarded from the caller's contract
    unsafe {
        match ffi::sqlite3_value_type(value) {
            ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_value_int64(value)),

            ffi::SQLITE_FLOAT => Value::Float(ffi::sqlite3_value_double(value)),

            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_value_text(value);
                let len = ffi::sqlite3_value_bytes(value);
                Value::Text(text_from_raw(ptr, len))
            }

            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_value_blob(value);
                let len = ffi::sqlite3_value_bytes(value);
                Value::Blob(bytes_from_raw(ptr.cast(), len))
            }

            _ => Value::Null,
        }
    }
}

/// Set the result of a user function.
///
/// # Safety
/// `ctx` must be the context of the currently executing function call.
pub unsafe fn set_result(ctx: *mut ffi::sqlite3_context, value: &Value) {
    // SAFETY: forwarded from the caller's contract
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_result_null(ctx),

            Value::Integer(v) => ffi::sqlite3_result_int64(ctx, *v),

            Value::Float(v) => ffi::sqlite3_result_double(ctx, *v),

            Value::Text(s) => match c_int::try_from(s.len()) {
                Ok(len) => {
                    ffi::sqlite3_result_text(ctx, s.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT());
                }
                Err(_) => ffi::sqlite3_result_error_toobig(ctx),
            },

            Value::Blob(b) => match c_int::try_from(b.len()) {
                Ok(len) => {
                    ffi::sqlite3_result_blob(ctx, b.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT());
                }
                Err(_) => ffi::sqlite3_result_error_toobig(ctx),
            },
        }
    }
}

/// Report an error message (and optionally a specific result code) from a
/// user function.
///
/// # Safety
/// `ctx` must be the context of the currently executing function call.
pub unsafe fn set_error(ctx: *mut ffi::sqlite3_context, message: &str, code: Option<c_int>) {
    let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
    // SAFETY: the message is copied by the engine before this returns
    unsafe {
        ffi::sqlite3_result_error(ctx, message.as_ptr().cast(), len);
        if let Some(code) = code {
            ffi::sqlite3_result_error_code(ctx, code);
        }
    }
}

/// Get the column name from a result.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: forwarded from the caller's contract
    let ptr = unsafe { ffi::sqlite3_column_name(stmt, index) };
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null column names are NUL-terminated
        unsafe { CStr::from_ptr(ptr) }.to_str().ok().map(String::from)
    }
}

/// Resolve the full metadata of a result column.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_info(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> ColumnInfo {
    // SAFETY: forwarded from the caller's contract; every returned pointer
    // is either null or a NUL-terminated string owned by the statement.
    unsafe {
        ColumnInfo {
            name: column_name(stmt, index).unwrap_or_else(|| format!("column{}", index)),
            database_name: ffi::string_from_ptr(ffi::sqlite3_column_database_name(stmt, index))
                .unwrap_or_default(),
            table_name: ffi::string_from_ptr(ffi::sqlite3_column_table_name(stmt, index))
                .unwrap_or_default(),
            origin_name: ffi::string_from_ptr(ffi::sqlite3_column_origin_name(stmt, index))
                .unwrap_or_default(),
            declared_type: ffi::string_from_ptr(ffi::sqlite3_column_decltype(stmt, index)),
        }
    }
}

/// # Safety
/// `ptr` must be null or valid for `len` bytes.
unsafe fn text_from_raw(ptr: *const u8, len: c_int) -> String {
    // SAFETY: forwarded
    let bytes = unsafe { bytes_from_raw(ptr, len) };
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// # Safety
/// `ptr` must be null or valid for `len` bytes.
unsafe fn bytes_from_raw(ptr: *const u8, len: c_int) -> Vec<u8> {
    if ptr.is_null() || len <= 0 {
        Vec::new()
    } else {
        // SAFETY: forwarded
        unsafe { std::slice::from_raw_parts(ptr, len as usize) }.to_vec()
    }
}
