//! The ledger schema: `time_periods`, `inventory_periods` and `products`.
//!
//! Column names here must match the column lists in `crate::store::postgres`.

use super::error::MigrationError;
use super::migration::Migration;
use super::schema_manager::SchemaManager;
use sea_query::{ColumnDef, Expr, ForeignKey, ForeignKeyAction, Index, Table};

/// Every migration of the ledger schema, ascending by version.
pub fn ledger_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateTimePeriods),
        Box::new(CreateInventoryPeriods),
        Box::new(CreateProducts),
    ]
}

fn id_column() -> ColumnDef {
    ColumnDef::new("id")
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

fn money_column(name: &'static str) -> ColumnDef {
    ColumnDef::new(name)
        .decimal_len(19, 4)
        .not_null()
        .default(0)
        .to_owned()
}

fn drop(manager: &SchemaManager<'_>, table: &'static str) -> Result<(), MigrationError> {
    manager.drop_table(Table::drop().table(table).if_exists().to_owned())
}

pub struct CreateTimePeriods;

impl Migration for CreateTimePeriods {
    fn name(&self) -> &str {
        "create_time_periods"
    }

    fn version(&self) -> i64 {
        20240101000001
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), MigrationError> {
        manager.create_table(
            Table::create()
                .table("time_periods")
                .if_not_exists()
                .col(id_column())
                .col(ColumnDef::new("created_by").big_integer().not_null())
                .col(ColumnDef::new("year").integer().not_null())
                .col(ColumnDef::new("month").integer().not_null())
                .col(ColumnDef::new("period_name").string_len(50).not_null())
                .col(ColumnDef::new("is_active").boolean().not_null().default(false))
                .col(ColumnDef::new("is_locked").boolean().not_null().default(false))
                .col(ColumnDef::new("locked_at").timestamp_with_time_zone().null())
                .col(ColumnDef::new("start_date").date().not_null())
                .col(ColumnDef::new("end_date").date().not_null())
                .col(
                    ColumnDef::new("created_at")
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .to_owned(),
        )?;
        manager.create_index(
            Index::create()
                .name("uq_time_periods_owner_year_month")
                .table("time_periods")
                .col(Expr::col("created_by"))
                .col(Expr::col("year"))
                .col(Expr::col("month"))
                .unique()
                .to_owned(),
        )?;
        manager.execute(
            "ALTER TABLE time_periods ADD CONSTRAINT chk_time_periods_month CHECK (month BETWEEN 1 AND 12)",
        )
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), MigrationError> {
        drop(manager, "time_periods")
    }
}

pub struct CreateInventoryPeriods;

impl Migration for CreateInventoryPeriods {
    fn name(&self) -> &str {
        "create_inventory_periods"
    }

    fn version(&self) -> i64 {
        20240101000002
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), MigrationError> {
        manager.create_table(
            Table::create()
                .table("inventory_periods")
                .if_not_exists()
                .col(id_column())
                .col(ColumnDef::new("time_period_id").big_integer().not_null().unique_key())
                .col(money_column("opening_balance"))
                .col(money_column("current_inventory"))
                .col(money_column("closing_balance"))
                .col(money_column("total_sales"))
                .col(money_column("total_profit"))
                .col(ColumnDef::new("status").string_len(20).not_null().default("active"))
                .col(ColumnDef::new("updated_at").timestamp_with_time_zone().not_null())
                .col(ColumnDef::new("version").big_integer().not_null().default(0))
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_inventory_periods_time_period")
                        .from("inventory_periods", "time_period_id")
                        .to("time_periods", "id")
                        .on_delete(ForeignKeyAction::Cascade),
                )
                .to_owned(),
        )
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), MigrationError> {
        drop(manager, "inventory_periods")
    }
}

pub struct CreateProducts;

impl Migration for CreateProducts {
    fn name(&self) -> &str {
        "create_products"
    }

    fn version(&self) -> i64 {
        20240101000003
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), MigrationError> {
        manager.create_table(
            Table::create()
                .table("products")
                .if_not_exists()
                .col(id_column())
                .col(ColumnDef::new("created_by").big_integer().not_null())
                .col(ColumnDef::new("period_id").big_integer().not_null())
                .col(ColumnDef::new("sku").string_len(100).not_null())
                .col(ColumnDef::new("name").string_len(255).not_null())
                .col(ColumnDef::new("category_id").big_integer().null())
                .col(ColumnDef::new("description").text().null())
                .col(ColumnDef::new("stock_quantity").big_integer().not_null().default(0))
                .col(money_column("cost_price"))
                .col(money_column("selling_price"))
                .col(ColumnDef::new("min_stock").big_integer().not_null().default(0))
                .col(ColumnDef::new("is_active").boolean().not_null().default(true))
                .col(ColumnDef::new("is_carried_forward").boolean().not_null().default(false))
                .col(ColumnDef::new("carried_from_period_id").big_integer().null())
                .col(ColumnDef::new("created_at").timestamp_with_time_zone().not_null())
                .col(ColumnDef::new("updated_at").timestamp_with_time_zone().not_null())
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_products_period")
                        .from("products", "period_id")
                        .to("time_periods", "id")
                        .on_delete(ForeignKeyAction::Restrict),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_products_carried_from")
                        .from("products", "carried_from_period_id")
                        .to("time_periods", "id")
                        .on_delete(ForeignKeyAction::SetNull),
                )
                .to_owned(),
        )?;
        manager.create_index(
            Index::create()
                .name("uq_products_owner_sku")
                .table("products")
                .col(Expr::col("created_by"))
                .col(Expr::col("sku"))
                .unique()
                .to_owned(),
        )?;
        manager.create_index(
            Index::create()
                .name("idx_products_period")
                .table("products")
                .col(Expr::col("period_id"))
                .to_owned(),
        )
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), MigrationError> {
        drop(manager, "products")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_ascend() {
        let versions: Vec<_> = ledger_migrations().iter().map(|m| m.version()).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_ledger_table_carries_version_column() {
        let manager = SchemaManager::recording();
        CreateInventoryPeriods.up(&manager).unwrap();
        let sql = manager.recorded().join("\n");
        assert!(sql.contains("\"version\""));
        assert!(sql.contains("REFERENCES \"time_periods\""));
    }

    #[test]
    fn test_periods_are_unique_per_owner_month() {
        let manager = SchemaManager::recording();
        CreateTimePeriods.up(&manager).unwrap();
        let sql = manager.recorded();
        assert!(sql.iter().any(|s| s.starts_with("CREATE UNIQUE INDEX")));
    }
}
