//! `MigrationRecord` - a row of the `stock_ledger_migrations` state table

use super::error::MigrationError;
use chrono::{DateTime, Utc};
use may_postgres::Row;

pub const RECORD_COLUMNS: &str = "version, name, checksum, applied_at, execution_time_ms, success";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    /// SHA-256 of the migration's generated SQL
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub execution_time_ms: Option<i64>,
    pub success: bool,
}

impl MigrationRecord {
    /// Decode a row selected with [`RECORD_COLUMNS`].
    pub fn from_row(row: &Row) -> Result<Self, MigrationError> {
        let decode = |e: may_postgres::Error| MigrationError::Decode(e.to_string());
        Ok(Self {
            version: row.try_get("version").map_err(decode)?,
            name: row.try_get("name").map_err(decode)?,
            checksum: row.try_get("checksum").map_err(decode)?,
            applied_at: row.try_get("applied_at").map_err(decode)?,
            execution_time_ms: row.try_get("execution_time_ms").map_err(decode)?,
            success: row.try_get("success").map_err(decode)?,
        })
    }
}
