//! Migration-specific error types

use crate::executor::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error(
        "Migration '{name}' (version {version}) has been modified after being applied.\n\
         Stored checksum: {stored}\n\
         Current checksum: {current}"
    )]
    ChecksumMismatch {
        version: i64,
        name: String,
        stored: String,
        current: String,
    },

    #[error(
        "Migration lock timeout: {0}\n\
         Another process may be running migrations. If this persists, check for a stuck \
         migration process or a leftover lock row in stock_ledger_migrations"
    )]
    LockTimeout(String),

    #[error("Migration '{name}' (version {version}) failed during execution: {error}")]
    ExecutionFailed {
        version: i64,
        name: String,
        error: String,
    },

    #[error("Invalid migration version: {0}")]
    InvalidVersion(i64),

    #[error("Two migrations share version {0}")]
    DuplicateVersion(i64),

    #[error("Applied migration '{name}' (version {version}) is not known to this build")]
    UnknownApplied { version: i64, name: String },

    #[error("Could not decode migration record: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_names_both_sums() {
        let err = MigrationError::ChecksumMismatch {
            version: 1,
            name: "create_time_periods".to_string(),
            stored: "aaa".to_string(),
            current: "bbb".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("create_time_periods"));
        assert!(msg.contains("aaa"));
        assert!(msg.contains("bbb"));
    }
}
