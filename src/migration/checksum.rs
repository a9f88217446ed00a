//! Checksums of compiled-in migrations

use super::error::MigrationError;
use super::migration::Migration;
use super::schema_manager::SchemaManager;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of `content`.
pub fn calculate_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Checksum of the SQL `migration.up` issues, one statement per line.
pub fn migration_checksum(migration: &dyn Migration) -> Result<String, MigrationError> {
    let recorder = SchemaManager::recording();
    migration.up(&recorder)?;
    Ok(calculate_checksum(&recorder.recorded().join("\n")))
}
