//! Migration trait definition

use super::error::MigrationError;
use super::schema_manager::SchemaManager;

/// A versioned schema change compiled into the binary.
///
/// `up` and `down` issue their statements through the [`SchemaManager`]; the
/// same calls are replayed against a recording manager to compute the
/// migration's checksum, so they must not branch on database state.
pub trait Migration: Send + Sync {
    /// Human-readable identifier
    fn name(&self) -> &str;

    /// Timestamp version (`YYYYMMDDHHMMSS`), strictly positive
    fn version(&self) -> i64;

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), MigrationError>;

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), MigrationError>;
}
