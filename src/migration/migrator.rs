//! Migrator - applies and rolls back compiled-in migrations

use super::checksum::migration_checksum;
use super::error::MigrationError;
use super::lock::MigrationLockGuard;
use super::migration::Migration;
use super::record::{MigrationRecord, RECORD_COLUMNS};
use super::schema::ledger_migrations;
use super::schema_manager::SchemaManager;
use super::state_table::{initialize_state_table, STATE_TABLE};
use super::status::{MigrationStatus, PendingMigration};
use crate::config::MigrationConfig;
use crate::executor::Executor;
use chrono::Utc;
use std::collections::HashSet;
use std::time::Instant;

pub struct Migrator {
    migrations: Vec<Box<dyn Migration>>,
    lock_timeout_seconds: u64,
}

impl Migrator {
    /// A migrator over `migrations`; versions must be positive and unique.
    pub fn new(mut migrations: Vec<Box<dyn Migration>>) -> Result<Self, MigrationError> {
        migrations.sort_by_key(|m| m.version());
        let mut seen = HashSet::new();
        for m in &migrations {
            if m.version() <= 0 {
                return Err(MigrationError::InvalidVersion(m.version()));
            }
            if !seen.insert(m.version()) {
                return Err(MigrationError::DuplicateVersion(m.version()));
            }
        }
        Ok(Self {
            migrations,
            lock_timeout_seconds: MigrationConfig::default().lock_timeout_seconds,
        })
    }

    /// The ledger schema.
    pub fn ledger() -> Result<Self, MigrationError> {
        Self::new(ledger_migrations())
    }

    pub fn with_config(mut self, config: &MigrationConfig) -> Self {
        self.lock_timeout_seconds = config.lock_timeout_seconds;
        self
    }

    pub fn migrations(&self) -> &[Box<dyn Migration>] {
        &self.migrations
    }

    /// Applied vs pending, validating the checksum of every applied migration.
    pub fn status(&self, executor: &dyn Executor) -> Result<MigrationStatus, MigrationError> {
        initialize_state_table(executor)?;
        let applied = Self::query_applied_migrations(executor)?;

        let mut applied_records = Vec::new();
        let mut pending = Vec::new();
        for migration in &self.migrations {
            let checksum = migration_checksum(migration.as_ref())?;
            match applied.iter().find(|r| r.version == migration.version()) {
                Some(record) if record.checksum != checksum => {
                    return Err(MigrationError::ChecksumMismatch {
                        version: record.version,
                        name: record.name.clone(),
                        stored: record.checksum.clone(),
                        current: checksum,
                    });
                }
                Some(record) => applied_records.push(record.clone()),
                None => pending.push(PendingMigration {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    checksum,
                }),
            }
        }

        let known: HashSet<i64> = self.migrations.iter().map(|m| m.version()).collect();
        if let Some(stray) = applied.iter().find(|r| !known.contains(&r.version)) {
            return Err(MigrationError::UnknownApplied {
                version: stray.version,
                name: stray.name.clone(),
            });
        }

        Ok(MigrationStatus::new(applied_records, pending))
    }

    /// Apply up to `steps` pending migrations (all when `None`) under the
    /// migration lock. Returns how many were applied.
    pub fn up(&self, executor: &dyn Executor, steps: Option<usize>) -> Result<usize, MigrationError> {
        initialize_state_table(executor)?;
        let _lock = MigrationLockGuard::acquire(executor, self.lock_timeout_seconds)?;

        let status = self.status(executor)?;
        let manager = SchemaManager::new(executor);
        let take = steps.unwrap_or(status.pending.len());

        let mut applied = 0;
        for pending in status.pending.iter().take(take) {
            let migration = self.find(pending.version)?;
            let start = Instant::now();
            log::info!("applying migration {} ({})", pending.name, pending.version);
            migration
                .up(&manager)
                .map_err(|e| MigrationError::ExecutionFailed {
                    version: pending.version,
                    name: pending.name.clone(),
                    error: e.to_string(),
                })?;

            let record = MigrationRecord {
                version: pending.version,
                name: pending.name.clone(),
                checksum: pending.checksum.clone(),
                applied_at: Utc::now(),
                execution_time_ms: Some(start.elapsed().as_millis() as i64),
                success: true,
            };
            Self::record_migration(executor, &record)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Roll back the newest `steps` applied migrations (one when `None`).
    pub fn down(&self, executor: &dyn Executor, steps: Option<usize>) -> Result<usize, MigrationError> {
        initialize_state_table(executor)?;
        let _lock = MigrationLockGuard::acquire(executor, self.lock_timeout_seconds)?;

        let mut applied = self.status(executor)?.applied;
        applied.sort_by_key(|m| std::cmp::Reverse(m.version));
        let manager = SchemaManager::new(executor);

        let mut rolled_back = 0;
        for record in applied.iter().take(steps.unwrap_or(1)) {
            let migration = self.find(record.version)?;
            log::info!("rolling back migration {} ({})", record.name, record.version);
            migration
                .down(&manager)
                .map_err(|e| MigrationError::ExecutionFailed {
                    version: record.version,
                    name: record.name.clone(),
                    error: e.to_string(),
                })?;
            Self::remove_migration_record(executor, record.version)?;
            rolled_back += 1;
        }
        Ok(rolled_back)
    }

    fn find(&self, version: i64) -> Result<&dyn Migration, MigrationError> {
        self.migrations
            .iter()
            .find(|m| m.version() == version)
            .map(|m| m.as_ref())
            .ok_or(MigrationError::InvalidVersion(version))
    }

    /// Applied migrations, excluding the lock row.
    fn query_applied_migrations(executor: &dyn Executor) -> Result<Vec<MigrationRecord>, MigrationError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {STATE_TABLE} WHERE version > 0 ORDER BY version ASC"
        );
        executor
            .query_all(&sql, &[])?
            .iter()
            .map(MigrationRecord::from_row)
            .collect()
    }

    fn record_migration(executor: &dyn Executor, record: &MigrationRecord) -> Result<(), MigrationError> {
        let sql = format!(
            "INSERT INTO {STATE_TABLE} ({RECORD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        );
        executor.execute(
            &sql,
            &[
                &record.version,
                &record.name,
                &record.checksum,
                &record.applied_at,
                &record.execution_time_ms,
                &record.success,
            ],
        )?;
        Ok(())
    }

    fn remove_migration_record(executor: &dyn Executor, version: i64) -> Result<(), MigrationError> {
        executor.execute(
            &format!("DELETE FROM {STATE_TABLE} WHERE version = $1"),
            &[&version],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(i64);

    impl Migration for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn version(&self) -> i64 {
            self.0
        }

        fn up(&self, manager: &SchemaManager<'_>) -> Result<(), MigrationError> {
            manager.execute("SELECT 1")
        }

        fn down(&self, _manager: &SchemaManager<'_>) -> Result<(), MigrationError> {
            Ok(())
        }
    }

    #[test]
    fn test_rejects_duplicate_and_non_positive_versions() {
        assert!(matches!(
            Migrator::new(vec![Box::new(Noop(5)), Box::new(Noop(5))]),
            Err(MigrationError::DuplicateVersion(5))
        ));
        assert!(matches!(
            Migrator::new(vec![Box::new(Noop(-1))]),
            Err(MigrationError::InvalidVersion(-1))
        ));
    }

    #[test]
    fn test_sorts_by_version() {
        let migrator = Migrator::new(vec![Box::new(Noop(3)), Box::new(Noop(1))]).unwrap();
        let versions: Vec<_> = migrator.migrations().iter().map(|m| m.version()).collect();
        assert_eq!(versions, vec![1, 3]);
    }

    #[test]
    fn test_ledger_checksums_are_stable() {
        let migrator = Migrator::ledger().unwrap();
        for m in migrator.migrations() {
            let a = migration_checksum(m.as_ref()).unwrap();
            let b = migration_checksum(m.as_ref()).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.len(), 64);
        }
    }
}
