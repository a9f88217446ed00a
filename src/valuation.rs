//! Stock valuation of a period.

use crate::error::Result;
use crate::model::PeriodId;
use crate::store::LedgerTx;
use rust_decimal::Decimal;

/// Total `stock_quantity * cost_price` of every stock record in `period`,
/// carried-forward and inactive records included.
///
/// Takes the caller's transaction so the value is read in the same
/// transaction as the ledger write that depends on it.
pub fn valuation(tx: &mut dyn LedgerTx, period: PeriodId) -> Result<Decimal> {
    Ok(tx.stock_valuation(period)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewPeriod, NewStock, OwnerId, YearMonth};
    use crate::store::{LedgerStore, MemoryStore};
    use rust_decimal_macros::dec;

    #[test]
    fn test_valuation_of_empty_period_is_zero() {
        let store = MemoryStore::new();
        let value = store
            .transaction(|tx| {
                let key = YearMonth::new(2024, 1)?;
                let p = tx.insert_period(&NewPeriod::for_month(OwnerId(1), key)?)?;
                valuation(tx, p.id)
            })
            .unwrap();
        assert_eq!(value, Decimal::ZERO);
    }

    #[test]
    fn test_valuation_counts_carried_records() {
        let store = MemoryStore::new();
        let value = store
            .transaction(|tx| {
                let key = YearMonth::new(2024, 2)?;
                let p = tx.insert_period(&NewPeriod::for_month(OwnerId(1), key)?)?;
                tx.insert_stock(&NewStock::new(OwnerId(1), p.id, "A", "Apples", 3, dec!(2.50)))?;
                let mut carried = NewStock::new(OwnerId(1), p.id, "B-CF-202402", "Bread", 4, dec!(1.25));
                carried.is_carried_forward = true;
                tx.insert_stock(&carried)?;
                valuation(tx, p.id)
            })
            .unwrap();
        assert_eq!(value, dec!(12.50));
    }
}
