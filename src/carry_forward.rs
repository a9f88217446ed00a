//! Carry-forward of unsold stock into another period.
//!
//! Copies every active record with stock on hand from the source period into
//! the target period as new records with derived SKUs, then seeds the target
//! ledger. The copy and the seed are one transaction; periods after the target
//! are reconciled afterwards, each in its own transaction.

use crate::config::ReconcileConfig;
use crate::error::{LedgerError, Result};
use crate::guard::LockGuard;
use crate::model::stock::SKU_MAX_LEN;
use crate::model::{Balances, NewStock, PeriodId, StockRecord, TimePeriod, YearMonth};
use crate::period;
use crate::reconcile::{reconcile_period, Reconciler};
use crate::store::{LedgerStore, LedgerTx};
use rust_decimal::Decimal;
use serde::Serialize;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// SKU of a record carried into the period `target`.
pub fn carried_sku(original: &str, target: YearMonth) -> String {
    format!("{original}-CF-{}", target.compact())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarriedItem {
    pub original_sku: String,
    pub new_sku: String,
    pub name: String,
    pub quantity: i64,
    pub cost_price: Decimal,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarryForwardOutcome {
    pub count: usize,
    pub total_value: Decimal,
    pub items: Vec<CarriedItem>,
    pub source_name: String,
    pub target_name: String,
    /// Target ledger as written by the carry-forward transaction.
    pub target_balances: Balances,
    /// Later periods reconciled after the copy committed.
    pub reconciled_after: usize,
}

struct Copied {
    outcome: CarryForwardOutcome,
    later: Vec<TimePeriod>,
}

pub struct CarryForward<S> {
    store: S,
    config: ReconcileConfig,
}

impl<S: LedgerStore> CarryForward<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, &ReconcileConfig::default())
    }

    pub fn with_config(store: S, config: &ReconcileConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    /// Carry unsold stock of `source` into `target`.
    ///
    /// Fails without writing anything when the periods are equal, missing,
    /// locked, or when `target` already holds carried-forward records. If the
    /// copy committed but reconciling the later periods failed, the error is a
    /// [`LedgerError::PartialReconcile`] that counts the copy as committed.
    pub fn carry_forward(&self, source: PeriodId, target: PeriodId) -> Result<CarryForwardOutcome> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::carry_forward_span(source.0, target.0).entered();

        if source == target {
            return Err(LedgerError::validation(
                "Source and target periods must be different",
            ));
        }

        let Copied { mut outcome, later } = self
            .store
            .transaction(|tx| copy_into_target(tx, source, target))?;

        #[cfg(feature = "metrics")]
        METRICS.record_carry_forward(outcome.count);
        log::info!(
            "carried {} item(s) worth {} from '{}' to '{}'",
            outcome.count,
            outcome.total_value,
            outcome.source_name,
            outcome.target_name
        );

        let reconciler = Reconciler::with_config(&self.store, &self.config);
        let report = reconciler.walk_over(later).run_after(1)?;
        outcome.reconciled_after = report.len();
        Ok(outcome)
    }
}

fn copy_into_target(tx: &mut dyn LedgerTx, source_id: PeriodId, target_id: PeriodId) -> Result<Copied> {
    LockGuard::serialize_all(tx, &[source_id, target_id])?;
    let source = LockGuard::require_mutable(tx, source_id)?;
    let target = LockGuard::require_mutable(tx, target_id)?;
    if source.owner != target.owner {
        return Err(LedgerError::validation(
            "Source and target periods belong to different owners",
        ));
    }
    if tx.count_carried_into(target_id)? > 0 {
        return Err(LedgerError::DuplicateCarryForward { target: target_id });
    }

    let key = target.key();
    let eligible: Vec<StockRecord> = tx
        .stock_in_period(source_id)?
        .into_iter()
        .filter(StockRecord::is_carryable)
        .collect();

    let mut items = Vec::with_capacity(eligible.len());
    let mut total_value = Decimal::ZERO;
    for record in eligible {
        let new_sku = carried_sku(&record.sku, key);
        if new_sku.chars().count() > SKU_MAX_LEN {
            return Err(LedgerError::validation(format!(
                "Carried SKU '{new_sku}' would be longer than {SKU_MAX_LEN} characters"
            )));
        }
        let value = record.value()?;
        total_value = total_value.checked_add(value).ok_or_else(|| {
            LedgerError::validation("Total carried value overflows")
        })?;
        tx.insert_stock(&NewStock {
            owner: target.owner,
            period_id: target_id,
            sku: new_sku.clone(),
            name: record.name.clone(),
            category_id: record.category_id,
            description: record.description.clone(),
            stock_quantity: record.stock_quantity,
            cost_price: record.cost_price,
            selling_price: record.selling_price,
            min_stock: record.min_stock,
            is_active: true,
            is_carried_forward: true,
            carried_from_period_id: Some(source_id),
        })?;

        items.push(CarriedItem {
            original_sku: record.sku,
            new_sku,
            name: record.name,
            quantity: record.stock_quantity,
            cost_price: record.cost_price,
            value,
        });
    }

    // The predecessor's closing stays authoritative; only a period that starts
    // its chain takes the carried value as opening.
    let seed = match period::predecessor(tx, &target)? {
        Some(_) => None,
        None => Some(total_value),
    };
    let seeded = reconcile_period(tx, target_id, seed)?;

    let mut later = period::chain_from(tx, &target)?;
    later.retain(|p| p.id != target_id);

    Ok(Copied {
        outcome: CarryForwardOutcome {
            count: items.len(),
            total_value,
            items,
            source_name: source.period_name,
            target_name: target.period_name,
            target_balances: seeded.balances,
            reconciled_after: 0,
        },
        later,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OwnerId;
    use crate::period::PeriodStore;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    const OWNER: OwnerId = OwnerId(1);

    struct Fixture {
        store: MemoryStore,
        jan: PeriodId,
        feb: PeriodId,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let (jan, feb) = {
            let periods = PeriodStore::new(&store);
            (
                periods.create(OWNER, 2024, 1).unwrap().id,
                periods.create(OWNER, 2024, 2).unwrap().id,
            )
        };
        store
            .transaction(|tx| {
                tx.insert_stock(&NewStock::new(OWNER, jan, "A", "Alpha", 10, dec!(100)))?;
                tx.insert_stock(&NewStock::new(OWNER, jan, "B", "Beta", 5, dec!(50)))?;
                tx.insert_stock(&NewStock::new(OWNER, jan, "C", "Gamma", 0, dec!(75)))?;
                tx.insert_stock(&NewStock::new(OWNER, jan, "D", "Delta", 3, dec!(20)).inactive())?;
                Ok(())
            })
            .unwrap();
        Fixture { store, jan, feb }
    }

    fn stock(store: &MemoryStore, period: PeriodId) -> Vec<StockRecord> {
        store
            .transaction(|tx| Ok(tx.stock_in_period(period)?))
            .unwrap()
    }

    #[test]
    fn test_carries_only_active_records_with_stock() {
        let f = fixture();
        let outcome = CarryForward::new(&f.store).carry_forward(f.jan, f.feb).unwrap();

        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.total_value, dec!(1250));
        let skus: Vec<_> = outcome.items.iter().map(|i| i.new_sku.as_str()).collect();
        assert_eq!(skus, vec!["A-CF-202402", "B-CF-202402"]);
        assert_eq!(outcome.source_name, "January 2024");
        assert_eq!(outcome.target_name, "February 2024");

        let carried = stock(&f.store, f.feb);
        assert_eq!(carried.len(), 2);
        assert!(carried
            .iter()
            .all(|r| r.is_carried_forward && r.carried_from_period_id == Some(f.jan)));
        assert_eq!(stock(&f.store, f.jan).len(), 4);
    }

    #[test]
    fn test_second_carry_is_rejected_and_leaves_records() {
        let f = fixture();
        let op = CarryForward::new(&f.store);
        op.carry_forward(f.jan, f.feb).unwrap();
        let before = stock(&f.store, f.feb);

        let err = op.carry_forward(f.jan, f.feb).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateCarryForward { .. }));
        assert_eq!(err.to_string(), "Target period already has carried-forward products");
        assert_eq!(stock(&f.store, f.feb), before);
    }

    #[test]
    fn test_same_period_is_invalid() {
        let f = fixture();
        let err = CarryForward::new(&f.store).carry_forward(f.jan, f.jan).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_locked_target_is_refused_before_any_write() {
        let f = fixture();
        PeriodStore::new(&f.store).lock(f.feb).unwrap();
        let err = CarryForward::new(&f.store).carry_forward(f.jan, f.feb).unwrap_err();
        assert!(matches!(err, LedgerError::LockedPeriod { period_id, .. } if period_id == f.feb));
        assert!(stock(&f.store, f.feb).is_empty());
    }

    #[test]
    fn test_failed_insert_rolls_back_everything() {
        let f = fixture();
        let ledger_before = f
            .store
            .transaction(|tx| Ok(tx.find_ledger(f.feb)?))
            .unwrap();

        f.store.fail_stock_insert_after(1);
        let err = CarryForward::new(&f.store).carry_forward(f.jan, f.feb).unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));

        assert!(stock(&f.store, f.feb).is_empty());
        let ledger_after = f
            .store
            .transaction(|tx| Ok(tx.find_ledger(f.feb)?))
            .unwrap();
        assert_eq!(ledger_before, ledger_after);
    }

    #[test]
    fn test_target_without_predecessor_is_seeded() {
        let store = MemoryStore::new();
        let periods = PeriodStore::new(&store);
        let later = periods.create(OWNER, 2024, 6).unwrap().id;
        let first = periods.create(OWNER, 2024, 1).unwrap().id;
        store
            .transaction(|tx| {
                tx.insert_stock(&NewStock::new(OWNER, later, "X", "Xylo", 2, dec!(30)))?;
                Ok(())
            })
            .unwrap();

        let outcome = CarryForward::new(&store).carry_forward(later, first).unwrap();
        assert_eq!(outcome.target_balances.opening, dec!(60));
        assert_eq!(outcome.target_balances.current, dec!(60));
        assert!(outcome.target_balances.is_consistent());
        assert_eq!(outcome.reconciled_after, 1);
    }

    #[test]
    fn test_overlong_carried_sku_is_a_validation_error() {
        let f = fixture();
        let long_sku = "L".repeat(SKU_MAX_LEN - 5);
        f.store
            .transaction(|tx| {
                tx.insert_stock(&NewStock::new(OWNER, f.jan, long_sku.clone(), "Long", 1, dec!(1)))?;
                Ok(())
            })
            .unwrap();

        let err = CarryForward::new(&f.store).carry_forward(f.jan, f.feb).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(err.to_string().contains("longer than 100"));
        assert!(stock(&f.store, f.feb).is_empty());
    }

    #[test]
    fn test_overflowing_total_fails_without_panicking() {
        let f = fixture();
        f.store
            .transaction(|tx| {
                tx.insert_stock(&NewStock::new(OWNER, f.jan, "M", "Max", i64::MAX, dec!(100000000000)))?;
                Ok(())
            })
            .unwrap();

        let err = CarryForward::new(&f.store).carry_forward(f.jan, f.feb).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(stock(&f.store, f.feb).is_empty());
        // no poisoned lock: the store keeps working
        assert_eq!(stock(&f.store, f.jan).len(), 5);
    }

    #[test]
    fn test_carried_sku_format() {
        let key = YearMonth::new(2025, 3).unwrap();
        assert_eq!(carried_sku("TEA-01", key), "TEA-01-CF-202503");
    }
}
