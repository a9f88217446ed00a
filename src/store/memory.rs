//! In-process ledger store.
//!
//! A transaction works on a private copy of the state taken while holding the
//! store lock; the copy replaces the shared state only when the closure returns
//! `Ok`. Holding the lock for the whole transaction serialises writers, which is
//! the in-memory counterpart of the per-period advisory lock used on PostgreSQL.
//!
//! Faults can be injected to exercise rollback and partial-walk behaviour; each
//! injected fault fires once. [`MemoryStore::lock_on_next_serialize`] stands in
//! for a `lock` committed by another connection while this transaction waited
//! for the period.

use super::{LedgerStore, LedgerTx, StoreResult};
use crate::error::{LedgerError, Result, StoreError};
use crate::model::{
    Balances, LedgerEntry, LedgerId, LedgerStatus, NewPeriod, NewStock, OwnerId, PeriodId,
    StockId, StockRecord, TimePeriod, YearMonth,
};
use chrono::{DateTime, Utc};
use may::sync::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    periods: BTreeMap<PeriodId, TimePeriod>,
    ledgers: BTreeMap<PeriodId, LedgerEntry>,
    stock: BTreeMap<StockId, StockRecord>,
}

impl MemoryState {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
struct Faults {
    balance_write_failures: HashSet<PeriodId>,
    balance_conflicts: HashMap<PeriodId, u32>,
    stock_insert_failure_after: Option<usize>,
    lock_on_serialize: HashSet<PeriodId>,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    faults: Mutex<Faults>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// The next balance write for `period` fails with a storage error.
    pub fn fail_next_balance_write(&self, period: PeriodId) {
        self.with_faults(|f| {
            f.balance_write_failures.insert(period);
        });
    }

    /// The next `times` balance writes for `period` see a stale version.
    pub fn conflict_next_balance_writes(&self, period: PeriodId, times: u32) {
        self.with_faults(|f| {
            f.balance_conflicts.insert(period, times);
        });
    }

    /// Within the next transaction that inserts stock, the insert after the
    /// first `successful` ones fails.
    pub fn fail_stock_insert_after(&self, successful: usize) {
        self.with_faults(|f| f.stock_insert_failure_after = Some(successful));
    }

    /// The next `serialize_on(period)` returns with `period` locked, in the
    /// committed state and in the transaction's own view, as if another
    /// connection locked it while this transaction waited for the period.
    pub fn lock_on_next_serialize(&self, period: PeriodId) {
        self.with_faults(|f| {
            f.lock_on_serialize.insert(period);
        });
    }

    pub fn clear_faults(&self) {
        self.with_faults(|f| *f = Faults::default());
    }

    fn with_faults<R>(&self, apply: impl FnOnce(&mut Faults) -> R) -> R {
        match self.faults.lock() {
            Ok(mut faults) => apply(&mut faults),
            Err(poisoned) => {
                let mut faults = poisoned.into_inner();
                apply(&mut faults)
            }
        }
    }
}

impl LedgerStore for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T>,
    {
        let mut shared = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;

        let mut tx = MemoryTx {
            state: shared.clone(),
            committed: &mut *shared,
            store: self,
            stock_inserts: 0,
        };
        let out = f(&mut tx);
        let state = tx.state;
        let out = out?;
        *shared = state;
        Ok(out)
    }
}

struct MemoryTx<'a> {
    state: MemoryState,
    /// Shared state as of the last commit; only written by injected concurrent commits.
    committed: &'a mut MemoryState,
    store: &'a MemoryStore,
    stock_inserts: usize,
}

impl LedgerTx for MemoryTx<'_> {
    fn serialize_on(&mut self, period: PeriodId) -> StoreResult<()> {
        let locked_meanwhile = self.store.with_faults(|f| f.lock_on_serialize.remove(&period));
        if locked_meanwhile {
            let at = Utc::now();
            for state in [&mut *self.committed, &mut self.state] {
                if let Some(p) = state.periods.get_mut(&period) {
                    p.is_locked = true;
                    p.locked_at = Some(at);
                }
            }
        }
        Ok(())
    }

    fn find_period(&mut self, id: PeriodId) -> StoreResult<Option<TimePeriod>> {
        Ok(self.state.periods.get(&id).cloned())
    }

    fn find_period_by_key(&mut self, owner: OwnerId, key: YearMonth) -> StoreResult<Option<TimePeriod>> {
        Ok(self
            .state
            .periods
            .values()
            .find(|p| p.owner == owner && p.key() == key)
            .cloned())
    }

    fn periods_for_owner(&mut self, owner: OwnerId) -> StoreResult<Vec<TimePeriod>> {
        let mut periods: Vec<TimePeriod> = self
            .state
            .periods
            .values()
            .filter(|p| p.owner == owner)
            .cloned()
            .collect();
        periods.sort_by_key(|p| (p.key(), p.id));
        Ok(periods)
    }

    fn insert_period(&mut self, new: &NewPeriod) -> StoreResult<TimePeriod> {
        if self.find_period_by_key(new.owner, new.key)?.is_some() {
            return Err(StoreError::Constraint(format!(
                "time_periods ({}, {}) already exists",
                new.owner, new.key
            )));
        }
        let id = PeriodId(self.state.allocate());
        let period = TimePeriod {
            id,
            owner: new.owner,
            year: new.key.year,
            month: new.key.month,
            period_name: new.period_name.clone(),
            is_active: false,
            is_locked: false,
            locked_at: None,
            start_date: new.start_date,
            end_date: new.end_date,
        };
        self.state.periods.insert(id, period.clone());
        Ok(period)
    }

    fn mark_locked(&mut self, id: PeriodId, at: DateTime<Utc>) -> StoreResult<bool> {
        match self.state.periods.get_mut(&id) {
            Some(p) if !p.is_locked => {
                p.is_locked = true;
                p.locked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn activate_exclusive(&mut self, owner: OwnerId, id: PeriodId) -> StoreResult<()> {
        for p in self.state.periods.values_mut().filter(|p| p.owner == owner) {
            p.is_active = p.id == id;
        }
        Ok(())
    }

    fn find_ledger(&mut self, period: PeriodId) -> StoreResult<Option<LedgerEntry>> {
        Ok(self.state.ledgers.get(&period).cloned())
    }

    fn find_ledger_by_id(&mut self, id: LedgerId) -> StoreResult<Option<LedgerEntry>> {
        Ok(self.state.ledgers.values().find(|l| l.id == id).cloned())
    }

    fn insert_ledger(&mut self, period: PeriodId, at: DateTime<Utc>) -> StoreResult<LedgerEntry> {
        if self.state.ledgers.contains_key(&period) {
            return Err(StoreError::Constraint(format!(
                "inventory_periods.time_period_id {period} already exists"
            )));
        }
        let entry = LedgerEntry {
            id: LedgerId(self.state.allocate()),
            time_period_id: period,
            opening_balance: Decimal::ZERO,
            current_inventory: Decimal::ZERO,
            closing_balance: Decimal::ZERO,
            total_sales: Decimal::ZERO,
            total_profit: Decimal::ZERO,
            status: LedgerStatus::Active,
            updated_at: at,
            version: 0,
        };
        self.state.ledgers.insert(period, entry.clone());
        Ok(entry)
    }

    fn write_balances(
        &mut self,
        period: PeriodId,
        expected_version: i64,
        balances: Balances,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let injected_failure = self.store.with_faults(|f| f.balance_write_failures.remove(&period));
        if injected_failure {
            return Err(StoreError::Unavailable(format!(
                "injected write failure for period {period}"
            )));
        }
        let injected_conflict = self.store.with_faults(|f| match f.balance_conflicts.get_mut(&period) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        });
        if injected_conflict {
            return Ok(false);
        }

        match self.state.ledgers.get_mut(&period) {
            Some(entry) if entry.version == expected_version => {
                entry.opening_balance = balances.opening;
                entry.current_inventory = balances.current;
                entry.closing_balance = balances.closing;
                entry.updated_at = at;
                entry.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn add_sales(
        &mut self,
        period: PeriodId,
        sales: Decimal,
        profit: Decimal,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        match self.state.ledgers.get_mut(&period) {
            Some(entry) => {
                let overflow = || StoreError::Constraint(format!("sales totals of period {period} overflow"));
                entry.total_sales = entry.total_sales.checked_add(sales).ok_or_else(overflow)?;
                entry.total_profit = entry.total_profit.checked_add(profit).ok_or_else(overflow)?;
                entry.updated_at = at;
                entry.version += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_stock(&mut self, id: StockId) -> StoreResult<Option<StockRecord>> {
        Ok(self.state.stock.get(&id).cloned())
    }

    fn stock_in_period(&mut self, period: PeriodId) -> StoreResult<Vec<StockRecord>> {
        let mut records: Vec<StockRecord> = self
            .state
            .stock
            .values()
            .filter(|s| s.period_id == period)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    fn insert_stock(&mut self, new: &NewStock) -> StoreResult<StockRecord> {
        let inserted = self.stock_inserts;
        let fail = self.store.with_faults(|f| match f.stock_insert_failure_after {
            Some(limit) if inserted >= limit => {
                f.stock_insert_failure_after = None;
                true
            }
            _ => false,
        });
        if fail {
            return Err(StoreError::Unavailable(format!(
                "injected insert failure for sku {}",
                new.sku
            )));
        }
        if self
            .state
            .stock
            .values()
            .any(|s| s.owner == new.owner && s.sku == new.sku)
        {
            return Err(StoreError::Constraint(format!(
                "products.sku {} already exists",
                new.sku
            )));
        }
        let record = new.clone().into_record(StockId(self.state.allocate()));
        self.state.stock.insert(record.id, record.clone());
        self.stock_inserts += 1;
        Ok(record)
    }

    fn update_stock(&mut self, record: &StockRecord) -> StoreResult<bool> {
        match self.state.stock.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_stock(&mut self, id: StockId) -> StoreResult<bool> {
        Ok(self.state.stock.remove(&id).is_some())
    }

    fn count_carried_into(&mut self, period: PeriodId) -> StoreResult<i64> {
        Ok(self
            .state
            .stock
            .values()
            .filter(|s| s.period_id == period && s.is_carried_forward)
            .count() as i64)
    }

    fn stock_valuation(&mut self, period: PeriodId) -> StoreResult<Decimal> {
        let overflow = || StoreError::Constraint(format!("valuation of period {period} overflows"));
        self.state
            .stock
            .values()
            .filter(|s| s.period_id == period)
            .try_fold(Decimal::ZERO, |total, s| {
                let value = s.value().map_err(|_| overflow())?;
                total.checked_add(value).ok_or_else(overflow)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn jan(tx: &mut dyn LedgerTx) -> TimePeriod {
        let key = YearMonth::new(2024, 1).unwrap();
        tx.insert_period(&NewPeriod::for_month(OwnerId(1), key).unwrap())
            .unwrap()
    }

    #[test]
    fn test_err_rolls_back_everything() {
        let store = MemoryStore::new();
        let result: Result<()> = store.transaction(|tx| {
            jan(tx);
            Err(LedgerError::validation("abort"))
        });
        assert!(result.is_err());

        let periods = store
            .transaction(|tx| Ok(tx.periods_for_owner(OwnerId(1))?))
            .unwrap();
        assert!(periods.is_empty());
    }

    #[test]
    fn test_write_balances_checks_version() {
        let store = MemoryStore::new();
        let period = store
            .transaction(|tx| {
                let p = jan(tx);
                tx.insert_ledger(p.id, Utc::now())?;
                Ok(p)
            })
            .unwrap();

        let balances = Balances::compute(dec!(0), dec!(10)).unwrap();
        let stale = store
            .transaction(|tx| Ok(tx.write_balances(period.id, 5, balances, Utc::now())?))
            .unwrap();
        assert!(!stale);

        let fresh = store
            .transaction(|tx| Ok(tx.write_balances(period.id, 0, balances, Utc::now())?))
            .unwrap();
        assert!(fresh);

        let entry = store
            .transaction(|tx| Ok(tx.find_ledger(period.id)?))
            .unwrap()
            .unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.closing_balance, dec!(10));
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let store = MemoryStore::new();
        let period = store
            .transaction(|tx| {
                let p = jan(tx);
                tx.insert_ledger(p.id, Utc::now())?;
                Ok(p)
            })
            .unwrap();
        store.fail_next_balance_write(period.id);

        let balances = Balances::compute(dec!(0), dec!(1)).unwrap();
        let first = store.transaction(|tx| Ok(tx.write_balances(period.id, 0, balances, Utc::now())?));
        assert!(matches!(first, Err(LedgerError::Storage(StoreError::Unavailable(_)))));

        let second = store.transaction(|tx| Ok(tx.write_balances(period.id, 0, balances, Utc::now())?));
        assert!(second.unwrap());
    }

    #[test]
    fn test_valuation_sums_every_record() {
        let store = MemoryStore::new();
        let total = store
            .transaction(|tx| {
                let p = jan(tx);
                tx.insert_stock(&NewStock::new(OwnerId(1), p.id, "A", "A", 10, dec!(100)))?;
                tx.insert_stock(&NewStock::new(OwnerId(1), p.id, "B", "B", 5, dec!(50)).inactive())?;
                Ok(tx.stock_valuation(p.id)?)
            })
            .unwrap();
        assert_eq!(total, dec!(1250));
    }
}
