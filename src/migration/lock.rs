//! Flyway-style migration lock held in the state table itself.
//!
//! The process that manages to insert the row with version [`LOCK_VERSION`]
//! holds the lock; deleting the row releases it.

use super::error::MigrationError;
use super::state_table::STATE_TABLE;
use crate::executor::Executor;
use std::time::{Duration, Instant};

/// Never a real migration version (those are positive timestamps).
pub const LOCK_VERSION: i64 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Releases the migration lock on drop.
pub struct MigrationLockGuard<'a> {
    executor: &'a dyn Executor,
}

impl<'a> MigrationLockGuard<'a> {
    pub fn acquire(executor: &'a dyn Executor, timeout_seconds: u64) -> Result<Self, MigrationError> {
        acquire_migration_lock(executor, timeout_seconds)?;
        Ok(Self { executor })
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = release_migration_lock(self.executor) {
            log::error!("failed to release migration lock: {e}");
        }
    }
}

/// Poll until the lock row is inserted or `timeout_seconds` pass.
pub fn acquire_migration_lock(executor: &dyn Executor, timeout_seconds: u64) -> Result<(), MigrationError> {
    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_seconds);
    let sql = format!(
        "INSERT INTO {STATE_TABLE} (version, name, checksum, applied_at, success) \
         VALUES ({LOCK_VERSION}, 'LOCK', 'lock', NOW(), TRUE) \
         ON CONFLICT (version) DO NOTHING"
    );

    loop {
        if executor.execute(&sql, &[])? > 0 {
            log::debug!("migration lock acquired");
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(MigrationError::LockTimeout(format!(
                "Failed to acquire migration lock within {timeout_seconds} seconds. \
                 To clear a stale lock: DELETE FROM {STATE_TABLE} WHERE version = {LOCK_VERSION}"
            )));
        }
        log::debug!("migration lock held elsewhere, waiting");
        std::thread::sleep(POLL_INTERVAL);
    }
}

pub fn release_migration_lock(executor: &dyn Executor) -> Result<(), MigrationError> {
    executor.execute(
        &format!("DELETE FROM {STATE_TABLE} WHERE version = {LOCK_VERSION}"),
        &[],
    )?;
    Ok(())
}

pub fn is_migration_lock_held(executor: &dyn Executor) -> Result<bool, MigrationError> {
    let row = executor.query_one(
        &format!("SELECT COUNT(*) AS held FROM {STATE_TABLE} WHERE version = {LOCK_VERSION}"),
        &[],
    )?;
    let held: i64 = row
        .try_get("held")
        .map_err(|e| MigrationError::Decode(e.to_string()))?;
    Ok(held > 0)
}
