//! Migration state table management

use super::error::MigrationError;
use crate::executor::Executor;
use sea_query::{ColumnDef, Expr, Index, IndexCreateStatement, PostgresQueryBuilder, Table, TableCreateStatement};

pub const STATE_TABLE: &str = "stock_ledger_migrations";

/// `stock_ledger_migrations`: one row per applied migration plus, while a
/// migration run is in progress, the lock row.
pub fn create_state_table() -> TableCreateStatement {
    Table::create()
        .table(STATE_TABLE)
        .if_not_exists()
        .col(ColumnDef::new("version").big_integer().not_null().primary_key())
        .col(ColumnDef::new("name").string_len(255).not_null())
        .col(ColumnDef::new("checksum").string_len(64).not_null())
        .col(ColumnDef::new("applied_at").timestamp_with_time_zone().not_null())
        .col(ColumnDef::new("execution_time_ms").big_integer().null())
        .col(ColumnDef::new("success").boolean().not_null().default(true))
        .to_owned()
}

pub fn create_state_table_index() -> IndexCreateStatement {
    Index::create()
        .name("idx_stock_ledger_migrations_applied_at")
        .table(STATE_TABLE)
        .col(Expr::col("applied_at"))
        .if_not_exists()
        .to_owned()
}

/// Create the state table and its index if missing.
pub fn initialize_state_table(executor: &dyn Executor) -> Result<(), MigrationError> {
    executor.execute(&create_state_table().build(PostgresQueryBuilder), &[])?;
    executor.execute(&create_state_table_index().build(PostgresQueryBuilder), &[])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_table_sql() {
        let sql = create_state_table().build(PostgresQueryBuilder);
        assert!(sql.contains("IF NOT EXISTS"));
        assert!(sql.contains("\"stock_ledger_migrations\""));
        assert!(sql.contains("\"checksum\""));
    }
}
