//! Raw libsqlite3 bindings plus a few safe helpers.
//!
//! The bindings come from `libsqlite3-sys` (bundled amalgamation). Everything
//! here that touches a raw pointer documents what it expects of it.

#![allow(non_camel_case_types)]

pub use libsqlite3_sys::*;

use sqlkit_core::{ContractError, Error, Result};
use std::ffi::{CStr, CString, c_char, c_int};

/// Get the SQLite library version as a string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        let ptr = sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// Get the SQLite library version as a number.
pub fn version_number() -> i32 {
    // SAFETY: sqlite3_libversion_number is always safe to call
    unsafe { sqlite3_libversion_number() }
}

/// English description of a result code.
pub fn error_string(code: c_int) -> String {
    // sqlite3_errstr appeared in 3.7.15
    if version_number() < 3_007_015 {
        return format!("SQLite error {}", code);
    }
    // SAFETY: sqlite3_errstr returns a static string for any input
    unsafe {
        let ptr = sqlite3_errstr(code);
        if ptr.is_null() {
            format!("SQLite error {}", code)
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

/// Convert a Rust string to a C string, rejecting interior NUL bytes.
pub fn to_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| {
        Error::Contract(ContractError::NulByte(format!(
            "string contains an interior NUL byte: {:?}",
            s
        )))
    })
}

/// Copy a possibly-null C string owned by the engine.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub unsafe fn string_from_ptr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null and NUL-terminated per the caller's contract
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// Quote an identifier for interpolation into SQL (`"a""b"`).
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
