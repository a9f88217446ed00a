//! Ledger-affecting stock mutations.
//!
//! Every write here passes the lock guard first and reconciles the owning
//! period (and the rest of its chain) after the write commits. A service is
//! bound to one caller; other owners' records and periods look missing.

use crate::config::ReconcileConfig;
use crate::error::{LedgerError, Result};
use crate::guard::LockGuard;
use crate::model::stock::validate_money;
use crate::model::{
    AuthContext, NewStock, OwnerId, PeriodId, StockId, StockRecord, StockUpdate, TimePeriod,
};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::{LedgerStore, LedgerTx};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleReceipt {
    pub stock_id: StockId,
    pub period_id: PeriodId,
    pub quantity: i64,
    pub sales: Decimal,
    pub profit: Decimal,
    pub remaining: i64,
}

pub struct StockService<S> {
    store: S,
    owner: OwnerId,
    config: ReconcileConfig,
}

fn owned_period(period: TimePeriod, owner: OwnerId) -> Result<TimePeriod> {
    if period.owner != owner {
        return Err(LedgerError::not_found("Period", period.id));
    }
    Ok(period)
}

impl<S: LedgerStore> StockService<S> {
    pub fn new(store: S, ctx: &AuthContext) -> Self {
        Self::with_config(store, ctx, &ReconcileConfig::default())
    }

    pub fn with_config(store: S, ctx: &AuthContext, config: &ReconcileConfig) -> Self {
        Self {
            store,
            owner: ctx.owner,
            config: config.clone(),
        }
    }

    pub fn create(&self, new: NewStock) -> Result<StockRecord> {
        if new.owner != self.owner {
            return Err(LedgerError::validation(
                "Product owner does not match the caller",
            ));
        }
        new.validate()?;
        let record = self.store.transaction(|tx| {
            owned_period(LockGuard::require_mutable(tx, new.period_id)?, self.owner)?;
            Ok(tx.insert_stock(&new)?)
        })?;
        log::debug!("created product {} ({}) in period {}", record.sku, record.id, record.period_id);
        self.reconcile_from(record.period_id)?;
        Ok(record)
    }

    /// Apply `update`. Moving a record to another period needs both periods
    /// to be mutable.
    pub fn update(&self, id: StockId, update: StockUpdate) -> Result<StockRecord> {
        let (before, after, earliest) = self.store.transaction(|tx| {
            let located = self.fetch_stock(tx, id)?;
            let target = update.period_id.unwrap_or(located.period_id);
            let periods = LockGuard::require_all_mutable(tx, &[located.period_id, target])?;
            let before = self.refetch_in(tx, &located)?;
            let after = update.apply(&before)?;

            let mut earliest = periods[0].clone();
            if after.period_id != before.period_id {
                let to = owned_period(periods[1].clone(), self.owner)?;
                if to.key() < earliest.key() {
                    earliest = to;
                }
            }

            if !tx.update_stock(&after)? {
                return Err(LedgerError::not_found("Product", id));
            }
            Ok((before, after, earliest.id))
        })?;

        let revalued = before.stock_quantity != after.stock_quantity
            || before.cost_price != after.cost_price;
        if revalued || before.period_id != after.period_id {
            self.reconcile_from(earliest)?;
        }
        Ok(after)
    }

    pub fn delete(&self, id: StockId) -> Result<StockRecord> {
        let removed = self.store.transaction(|tx| {
            let (record, _) = self.lock_stock(tx, id)?;
            if !tx.delete_stock(id)? {
                return Err(LedgerError::not_found("Product", id));
            }
            Ok(record)
        })?;
        log::debug!("deleted product {} ({id})", removed.sku);
        self.reconcile_from(removed.period_id)?;
        Ok(removed)
    }

    /// Sell `quantity` units at `unit_price`: decrement stock and add to the
    /// period's sales and profit totals in one transaction.
    pub fn record_sale(&self, id: StockId, quantity: i64, unit_price: Decimal) -> Result<SaleReceipt> {
        if quantity <= 0 {
            return Err(LedgerError::validation(format!(
                "Sale quantity must be positive (got {quantity})"
            )));
        }
        if unit_price.is_sign_negative() {
            return Err(LedgerError::validation("Unit price cannot be negative"));
        }
        validate_money("Unit price", unit_price)?;

        let receipt = self.store.transaction(|tx| {
            let (mut record, period) = self.lock_stock(tx, id)?;
            if quantity > record.stock_quantity {
                return Err(LedgerError::validation(format!(
                    "Insufficient stock for {}: {} on hand, {quantity} requested",
                    record.sku, record.stock_quantity
                )));
            }

            record.stock_quantity -= quantity;
            tx.update_stock(&record)?;
            if tx.find_ledger(period.id)?.is_none() {
                tx.insert_ledger(period.id, Utc::now())?;
            }

            let units = Decimal::from(quantity);
            let (sales, profit) = units
                .checked_mul(unit_price)
                .zip((unit_price - record.cost_price).checked_mul(units))
                .ok_or_else(|| {
                    LedgerError::validation(format!(
                        "Sale of {quantity} units at {unit_price} overflows"
                    ))
                })?;
            tx.add_sales(period.id, sales, profit, Utc::now())?;

            Ok(SaleReceipt {
                stock_id: id,
                period_id: period.id,
                quantity,
                sales,
                profit,
                remaining: record.stock_quantity,
            })
        })?;

        self.reconcile_from(receipt.period_id)?;
        Ok(receipt)
    }

    fn fetch_stock(&self, tx: &mut dyn LedgerTx, id: StockId) -> Result<StockRecord> {
        match tx.find_stock(id)? {
            Some(record) if record.owner == self.owner => Ok(record),
            _ => Err(LedgerError::not_found("Product", id)),
        }
    }

    /// Re-read `located` after its period was serialised on; a record moved
    /// in the meantime has to be retried.
    fn refetch_in(&self, tx: &mut dyn LedgerTx, located: &StockRecord) -> Result<StockRecord> {
        let current = self.fetch_stock(tx, located.id)?;
        if current.period_id != located.period_id {
            return Err(LedgerError::validation(format!(
                "Product {} moved to another period concurrently; retry",
                located.id
            )));
        }
        Ok(current)
    }

    /// Find a record, pass the guard on its period and re-read it.
    fn lock_stock(&self, tx: &mut dyn LedgerTx, id: StockId) -> Result<(StockRecord, TimePeriod)> {
        let located = self.fetch_stock(tx, id)?;
        let period = LockGuard::require_mutable(tx, located.period_id)?;
        let record = self.refetch_in(tx, &located)?;
        Ok((record, period))
    }

    /// Runs after the stock write committed, so any failure here is partial.
    fn reconcile_from(&self, period: PeriodId) -> Result<ReconcileReport> {
        let reconciler = Reconciler::with_config(&self.store, &self.config);
        match reconciler.walk_from(period) {
            Ok(walk) => walk.run_after(1),
            Err(source) => Err(LedgerError::PartialReconcile {
                committed: 1,
                failed_at: period,
                source: Box::new(source),
            }),
        }
    }
}
