//! SchemaManager - Provides methods for schema operations in migrations

use super::error::MigrationError;
use crate::executor::Executor;
use sea_query::{
    IndexCreateStatement, IndexDropStatement, PostgresQueryBuilder, TableCreateStatement,
    TableDropStatement,
};
use std::cell::RefCell;

enum Target<'a> {
    Execute(&'a dyn Executor),
    Record(RefCell<Vec<String>>),
}

/// Runs schema statements for a migration.
///
/// A manager either executes against a database or records the generated SQL
/// without touching one; the recorded SQL is what migration checksums hash.
pub struct SchemaManager<'a> {
    target: Target<'a>,
}

impl<'a> SchemaManager<'a> {
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self {
            target: Target::Execute(executor),
        }
    }

    /// A manager that only collects SQL.
    pub fn recording() -> SchemaManager<'static> {
        SchemaManager {
            target: Target::Record(RefCell::new(Vec::new())),
        }
    }

    /// SQL collected by a recording manager, in issue order.
    pub fn recorded(&self) -> Vec<String> {
        match &self.target {
            Target::Record(statements) => statements.borrow().clone(),
            Target::Execute(_) => Vec::new(),
        }
    }

    /// # Example
    /// ```rust,no_run
    /// use sea_query::{ColumnDef, Table};
    /// # fn run(manager: &stock_ledger::migration::SchemaManager<'_>) -> Result<(), stock_ledger::migration::MigrationError> {
    /// let table = Table::create()
    ///     .table("suppliers")
    ///     .if_not_exists()
    ///     .col(ColumnDef::new("id").big_integer().not_null().auto_increment().primary_key())
    ///     .to_owned();
    /// manager.create_table(table)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn create_table(&self, table: TableCreateStatement) -> Result<(), MigrationError> {
        self.run(table.build(PostgresQueryBuilder))
    }

    pub fn drop_table(&self, table: TableDropStatement) -> Result<(), MigrationError> {
        self.run(table.build(PostgresQueryBuilder))
    }

    pub fn create_index(&self, index: IndexCreateStatement) -> Result<(), MigrationError> {
        self.run(index.build(PostgresQueryBuilder))
    }

    pub fn drop_index(&self, index: IndexDropStatement) -> Result<(), MigrationError> {
        self.run(index.build(PostgresQueryBuilder))
    }

    /// Execute raw SQL
    pub fn execute(&self, sql: &str) -> Result<(), MigrationError> {
        self.run(sql.to_string())
    }

    fn run(&self, sql: String) -> Result<(), MigrationError> {
        match &self.target {
            Target::Execute(executor) => {
                log::debug!("migration statement: {sql}");
                executor.execute(&sql, &[])?;
                Ok(())
            }
            Target::Record(statements) => {
                statements.borrow_mut().push(sql);
                Ok(())
            }
        }
    }
}
