//! Persistence seam for the ledger.
//!
//! Every ledger component is written against [`LedgerTx`], a handle to one open
//! transaction. [`LedgerStore::transaction`] is the injected transaction
//! boundary: the closure's writes are committed when it returns `Ok` and rolled
//! back when it returns `Err`. Two backends exist: [`PgStore`] over
//! `may_postgres` and [`MemoryStore`] for embedding and tests.

use crate::error::{Result, StoreError};
use crate::model::{
    Balances, LedgerEntry, LedgerId, NewPeriod, NewStock, OwnerId, PeriodId, StockId, StockRecord,
    TimePeriod, YearMonth,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Opens transactions.
pub trait LedgerStore: Send + Sync {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for &S {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T>,
    {
        (**self).transaction(f)
    }
}

impl<S: LedgerStore + ?Sized> LedgerStore for std::sync::Arc<S> {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T>,
    {
        (**self).transaction(f)
    }
}

/// Operations available inside one transaction.
///
/// Writers of `opening_balance`/`closing_balance` are limited to the reconciler
/// and the carry-forward operator; both go through [`LedgerTx::write_balances`].
pub trait LedgerTx {
    /// Serialise concurrent writers of the same period until this transaction ends.
    fn serialize_on(&mut self, period: PeriodId) -> StoreResult<()>;

    // periods
    fn find_period(&mut self, id: PeriodId) -> StoreResult<Option<TimePeriod>>;
    fn find_period_by_key(&mut self, owner: OwnerId, key: YearMonth) -> StoreResult<Option<TimePeriod>>;
    /// Every period of `owner`, ascending by `(year, month)`.
    fn periods_for_owner(&mut self, owner: OwnerId) -> StoreResult<Vec<TimePeriod>>;
    fn insert_period(&mut self, new: &NewPeriod) -> StoreResult<TimePeriod>;
    /// Set the lock flag if not already set; returns whether a row changed.
    fn mark_locked(&mut self, id: PeriodId, at: DateTime<Utc>) -> StoreResult<bool>;
    /// Deactivate every period of `owner` and activate `id`.
    fn activate_exclusive(&mut self, owner: OwnerId, id: PeriodId) -> StoreResult<()>;

    // ledger entries
    fn find_ledger(&mut self, period: PeriodId) -> StoreResult<Option<LedgerEntry>>;
    fn find_ledger_by_id(&mut self, id: LedgerId) -> StoreResult<Option<LedgerEntry>>;
    fn insert_ledger(&mut self, period: PeriodId, at: DateTime<Utc>) -> StoreResult<LedgerEntry>;
    /// Compare-and-set write of the three balances. Returns `false` without
    /// writing when the stored version is not `expected_version`.
    fn write_balances(
        &mut self,
        period: PeriodId,
        expected_version: i64,
        balances: Balances,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    fn add_sales(
        &mut self,
        period: PeriodId,
        sales: Decimal,
        profit: Decimal,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    // stock
    fn find_stock(&mut self, id: StockId) -> StoreResult<Option<StockRecord>>;
    /// Every record of the period, ordered by name.
    fn stock_in_period(&mut self, period: PeriodId) -> StoreResult<Vec<StockRecord>>;
    fn insert_stock(&mut self, new: &NewStock) -> StoreResult<StockRecord>;
    fn update_stock(&mut self, record: &StockRecord) -> StoreResult<bool>;
    fn delete_stock(&mut self, id: StockId) -> StoreResult<bool>;
    fn count_carried_into(&mut self, period: PeriodId) -> StoreResult<i64>;
    /// `SUM(stock_quantity * cost_price)` over the period's records.
    fn stock_valuation(&mut self, period: PeriodId) -> StoreResult<Decimal>;
}
