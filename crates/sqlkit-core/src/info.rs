//! Engine version, status counters and column metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A SQLite library version, decoded from `SQLITE_VERSION_NUMBER` form
/// (`major * 1_000_000 + minor * 1_000 + release`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SqliteVersion {
    pub major: u32,
    pub minor: u32,
    pub release: u32,
}

impl SqliteVersion {
    pub const fn new(major: u32, minor: u32, release: u32) -> Self {
        Self {
            major,
            minor,
            release,
        }
    }

    pub const fn from_number(number: u32) -> Self {
        Self {
            major: number / 1_000_000,
            minor: (number / 1_000) % 1_000,
            release: number % 1_000,
        }
    }

    pub const fn to_number(self) -> u32 {
        self.major * 1_000_000 + self.minor * 1_000 + self.release
    }
}

impl fmt::Display for SqliteVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.release)
    }
}

/// A status counter reading: the current value and its high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusResult {
    pub current: i64,
    pub high_water: i64,
}

/// Declared metadata for a table column, from
/// `sqlite3_table_column_metadata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumnMetadata {
    pub declared_type: Option<String>,
    pub collation_sequence: Option<String>,
    pub has_not_null_constraint: bool,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_decoding() {
        let v = SqliteVersion::from_number(3_045_001);
        assert_eq!(v, SqliteVersion::new(3, 45, 1));
        assert_eq!(v.to_number(), 3_045_001);
        assert_eq!(v.to_string(), "3.45.1");
    }

    #[test]
    fn version_ordering() {
        assert!(SqliteVersion::new(3, 7, 15) < SqliteVersion::new(3, 8, 0));
        assert!(SqliteVersion::new(3, 45, 1) > SqliteVersion::new(3, 45, 0));
    }

    #[test]
    fn status_serde() {
        let status = StatusResult {
            current: 12,
            high_water: 40,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"current":12,"high_water":40}"#);
    }
}
