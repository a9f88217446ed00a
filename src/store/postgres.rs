//! PostgreSQL ledger store over `may_postgres`.
//!
//! Every statement names its columns explicitly; the column lists below are the
//! single source of truth for row decoding and must match the migrations in
//! `crate::migration::schema`.

use super::{LedgerStore, LedgerTx, StoreResult};
use crate::error::{Result, StoreError};
use crate::executor::{Executor, PgExecutor};
use crate::model::{
    Balances, LedgerEntry, LedgerId, LedgerStatus, NewPeriod, NewStock, OwnerId, PeriodId,
    StockId, StockRecord, TimePeriod, YearMonth,
};
use crate::transaction::IsolationLevel;
use chrono::{DateTime, Utc};
use may::sync::Mutex;
use may_postgres::types::FromSql;
use may_postgres::{Client, Row};
use rust_decimal::Decimal;

const PERIOD_COLUMNS: &str =
    "id, created_by, year, month, period_name, is_active, is_locked, locked_at, start_date, end_date";

const LEDGER_COLUMNS: &str = "id, time_period_id, opening_balance, current_inventory, closing_balance, \
     total_sales, total_profit, status, updated_at, version";

const STOCK_COLUMNS: &str = "id, created_by, period_id, sku, name, category_id, description, \
     stock_quantity, cost_price, selling_price, min_stock, is_active, is_carried_forward, \
     carried_from_period_id";

/// Ledger store on one PostgreSQL connection.
///
/// Transactions on the shared connection are serialised by an internal gate;
/// run one `PgStore` per connection to get parallelism.
pub struct PgStore {
    executor: PgExecutor,
    isolation: IsolationLevel,
    gate: Mutex<()>,
}

impl PgStore {
    pub fn new(client: Client) -> Self {
        Self::with_isolation(client, IsolationLevel::ReadCommitted)
    }

    pub fn with_isolation(client: Client, isolation: IsolationLevel) -> Self {
        Self {
            executor: PgExecutor::new(client),
            isolation,
            gate: Mutex::new(()),
        }
    }

    pub fn executor(&self) -> &PgExecutor {
        &self.executor
    }
}

impl LedgerStore for PgStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T>,
    {
        let _gate = self
            .gate
            .lock()
            .map_err(|_| StoreError::Unavailable("connection gate poisoned".to_string()))?;

        let txn = self.executor.begin_with_isolation(self.isolation)?;
        let outcome = {
            let mut tx = PgTx { exec: &txn };
            f(&mut tx)
        };

        match outcome {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback() {
                    log::error!("rollback after '{e}' failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}

struct PgTx<'a> {
    exec: &'a dyn Executor,
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, column: &'static str) -> StoreResult<T> {
    row.try_get(column).map_err(|e| StoreError::Decode {
        column,
        message: e.to_string(),
    })
}

fn period_from_row(row: &Row) -> StoreResult<TimePeriod> {
    let month: i32 = col(row, "month")?;
    Ok(TimePeriod {
        id: PeriodId(col(row, "id")?),
        owner: OwnerId(col(row, "created_by")?),
        year: col(row, "year")?,
        month: u32::try_from(month).map_err(|_| StoreError::Decode {
            column: "month",
            message: format!("negative month {month}"),
        })?,
        period_name: col(row, "period_name")?,
        is_active: col(row, "is_active")?,
        is_locked: col(row, "is_locked")?,
        locked_at: col(row, "locked_at")?,
        start_date: col(row, "start_date")?,
        end_date: col(row, "end_date")?,
    })
}

fn ledger_from_row(row: &Row) -> StoreResult<LedgerEntry> {
    let status: String = col(row, "status")?;
    Ok(LedgerEntry {
        id: LedgerId(col(row, "id")?),
        time_period_id: PeriodId(col(row, "time_period_id")?),
        opening_balance: col(row, "opening_balance")?,
        current_inventory: col(row, "current_inventory")?,
        closing_balance: col(row, "closing_balance")?,
        total_sales: col(row, "total_sales")?,
        total_profit: col(row, "total_profit")?,
        status: LedgerStatus::parse(&status).ok_or_else(|| StoreError::Decode {
            column: "status",
            message: format!("unknown ledger status '{status}'"),
        })?,
        updated_at: col(row, "updated_at")?,
        version: col(row, "version")?,
    })
}

fn stock_from_row(row: &Row) -> StoreResult<StockRecord> {
    let carried_from: Option<i64> = col(row, "carried_from_period_id")?;
    Ok(StockRecord {
        id: StockId(col(row, "id")?),
        owner: OwnerId(col(row, "created_by")?),
        period_id: PeriodId(col(row, "period_id")?),
        sku: col(row, "sku")?,
        name: col(row, "name")?,
        category_id: col(row, "category_id")?,
        description: col(row, "description")?,
        stock_quantity: col(row, "stock_quantity")?,
        cost_price: col(row, "cost_price")?,
        selling_price: col(row, "selling_price")?,
        min_stock: col(row, "min_stock")?,
        is_active: col(row, "is_active")?,
        is_carried_forward: col(row, "is_carried_forward")?,
        carried_from_period_id: carried_from.map(PeriodId),
    })
}

impl LedgerTx for PgTx<'_> {
    fn serialize_on(&mut self, period: PeriodId) -> StoreResult<()> {
        self.exec
            .execute("SELECT pg_advisory_xact_lock($1)", &[&period.0])?;
        Ok(())
    }

    fn find_period(&mut self, id: PeriodId) -> StoreResult<Option<TimePeriod>> {
        let sql = format!("SELECT {PERIOD_COLUMNS} FROM time_periods WHERE id = $1");
        self.exec
            .query_opt(&sql, &[&id.0])?
            .map(|row| period_from_row(&row))
            .transpose()
    }

    fn find_period_by_key(&mut self, owner: OwnerId, key: YearMonth) -> StoreResult<Option<TimePeriod>> {
        let sql = format!(
            "SELECT {PERIOD_COLUMNS} FROM time_periods WHERE created_by = $1 AND year = $2 AND month = $3"
        );
        let month = key.month as i32;
        self.exec
            .query_opt(&sql, &[&owner.0, &key.year, &month])?
            .map(|row| period_from_row(&row))
            .transpose()
    }

    fn periods_for_owner(&mut self, owner: OwnerId) -> StoreResult<Vec<TimePeriod>> {
        let sql = format!(
            "SELECT {PERIOD_COLUMNS} FROM time_periods WHERE created_by = $1 ORDER BY year ASC, month ASC, id ASC"
        );
        self.exec
            .query_all(&sql, &[&owner.0])?
            .iter()
            .map(period_from_row)
            .collect()
    }

    fn insert_period(&mut self, new: &NewPeriod) -> StoreResult<TimePeriod> {
        let sql = format!(
            "INSERT INTO time_periods (created_by, year, month, period_name, is_active, is_locked, start_date, end_date) \
             VALUES ($1, $2, $3, $4, FALSE, FALSE, $5, $6) RETURNING {PERIOD_COLUMNS}"
        );
        let month = new.key.month as i32;
        let row = self.exec.query_one(
            &sql,
            &[
                &new.owner.0,
                &new.key.year,
                &month,
                &new.period_name,
                &new.start_date,
                &new.end_date,
            ],
        )?;
        period_from_row(&row)
    }

    fn mark_locked(&mut self, id: PeriodId, at: DateTime<Utc>) -> StoreResult<bool> {
        let changed = self.exec.execute(
            "UPDATE time_periods SET is_locked = TRUE, locked_at = $2 WHERE id = $1 AND is_locked = FALSE",
            &[&id.0, &at],
        )?;
        Ok(changed > 0)
    }

    fn activate_exclusive(&mut self, owner: OwnerId, id: PeriodId) -> StoreResult<()> {
        self.exec.execute(
            "UPDATE time_periods SET is_active = (id = $2) WHERE created_by = $1",
            &[&owner.0, &id.0],
        )?;
        Ok(())
    }

    fn find_ledger(&mut self, period: PeriodId) -> StoreResult<Option<LedgerEntry>> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM inventory_periods WHERE time_period_id = $1");
        self.exec
            .query_opt(&sql, &[&period.0])?
            .map(|row| ledger_from_row(&row))
            .transpose()
    }

    fn find_ledger_by_id(&mut self, id: LedgerId) -> StoreResult<Option<LedgerEntry>> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM inventory_periods WHERE id = $1");
        self.exec
            .query_opt(&sql, &[&id.0])?
            .map(|row| ledger_from_row(&row))
            .transpose()
    }

    fn insert_ledger(&mut self, period: PeriodId, at: DateTime<Utc>) -> StoreResult<LedgerEntry> {
        let sql = format!(
            "INSERT INTO inventory_periods \
             (time_period_id, opening_balance, current_inventory, closing_balance, total_sales, total_profit, status, updated_at, version) \
             VALUES ($1, 0, 0, 0, 0, 0, $2, $3, 0) RETURNING {LEDGER_COLUMNS}"
        );
        let row = self
            .exec
            .query_one(&sql, &[&period.0, &LedgerStatus::Active.as_str(), &at])?;
        ledger_from_row(&row)
    }

    fn write_balances(
        &mut self,
        period: PeriodId,
        expected_version: i64,
        balances: Balances,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let changed = self.exec.execute(
            "UPDATE inventory_periods \
             SET opening_balance = $3, current_inventory = $4, closing_balance = $5, updated_at = $6, version = version + 1 \
             WHERE time_period_id = $1 AND version = $2",
            &[
                &period.0,
                &expected_version,
                &balances.opening,
                &balances.current,
                &balances.closing,
                &at,
            ],
        )?;
        Ok(changed > 0)
    }

    fn add_sales(
        &mut self,
        period: PeriodId,
        sales: Decimal,
        profit: Decimal,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let changed = self.exec.execute(
            "UPDATE inventory_periods \
             SET total_sales = total_sales + $2, total_profit = total_profit + $3, updated_at = $4, version = version + 1 \
             WHERE time_period_id = $1",
            &[&period.0, &sales, &profit, &at],
        )?;
        Ok(changed > 0)
    }

    fn find_stock(&mut self, id: StockId) -> StoreResult<Option<StockRecord>> {
        let sql = format!("SELECT {STOCK_COLUMNS} FROM products WHERE id = $1");
        self.exec
            .query_opt(&sql, &[&id.0])?
            .map(|row| stock_from_row(&row))
            .transpose()
    }

    fn stock_in_period(&mut self, period: PeriodId) -> StoreResult<Vec<StockRecord>> {
        let sql = format!("SELECT {STOCK_COLUMNS} FROM products WHERE period_id = $1 ORDER BY name ASC, id ASC");
        self.exec
            .query_all(&sql, &[&period.0])?
            .iter()
            .map(stock_from_row)
            .collect()
    }

    fn insert_stock(&mut self, new: &NewStock) -> StoreResult<StockRecord> {
        let sql = format!(
            "INSERT INTO products \
             (created_by, period_id, sku, name, category_id, description, stock_quantity, cost_price, selling_price, \
              min_stock, is_active, is_carried_forward, carried_from_period_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW()) \
             RETURNING {STOCK_COLUMNS}"
        );
        let carried_from = new.carried_from_period_id.map(|p| p.0);
        let row = self.exec.query_one(
            &sql,
            &[
                &new.owner.0,
                &new.period_id.0,
                &new.sku,
                &new.name,
                &new.category_id,
                &new.description,
                &new.stock_quantity,
                &new.cost_price,
                &new.selling_price,
                &new.min_stock,
                &new.is_active,
                &new.is_carried_forward,
                &carried_from,
            ],
        )?;
        stock_from_row(&row)
    }

    fn update_stock(&mut self, record: &StockRecord) -> StoreResult<bool> {
        let changed = self.exec.execute(
            "UPDATE products SET period_id = $2, name = $3, category_id = $4, description = $5, \
             stock_quantity = $6, cost_price = $7, selling_price = $8, min_stock = $9, is_active = $10, \
             updated_at = NOW() WHERE id = $1",
            &[
                &record.id.0,
                &record.period_id.0,
                &record.name,
                &record.category_id,
                &record.description,
                &record.stock_quantity,
                &record.cost_price,
                &record.selling_price,
                &record.min_stock,
                &record.is_active,
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete_stock(&mut self, id: StockId) -> StoreResult<bool> {
        let changed = self
            .exec
            .execute("DELETE FROM products WHERE id = $1", &[&id.0])?;
        Ok(changed > 0)
    }

    fn count_carried_into(&mut self, period: PeriodId) -> StoreResult<i64> {
        let row = self.exec.query_one(
            "SELECT COUNT(*) FROM products WHERE period_id = $1 AND is_carried_forward = TRUE",
            &[&period.0],
        )?;
        col(&row, "count")
    }

    fn stock_valuation(&mut self, period: PeriodId) -> StoreResult<Decimal> {
        let row = self.exec.query_one(
            "SELECT COALESCE(SUM(stock_quantity * cost_price), 0)::NUMERIC AS valuation \
             FROM products WHERE period_id = $1",
            &[&period.0],
        )?;
        col(&row, "valuation")
    }
}
