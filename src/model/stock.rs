use super::{OwnerId, PeriodId, StockId};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal places kept by the `NUMERIC(19,4)` money columns.
pub const MONEY_SCALE: u32 = 4;

/// Length of the `products.sku` column.
pub const SKU_MAX_LEN: usize = 100;

/// Length of the `products.name` column.
pub const NAME_MAX_LEN: usize = 255;

/// Exclusive upper bound of a `NUMERIC(19,4)` value (15 integer digits).
pub fn money_limit() -> Decimal {
    Decimal::from(1_000_000_000_000_000_i64)
}

/// Product row as the ledger sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub id: StockId,
    pub owner: OwnerId,
    pub period_id: PeriodId,
    pub sku: String,
    pub name: String,
    pub category_id: Option<i64>,
    pub description: Option<String>,
    pub stock_quantity: i64,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub min_stock: i64,
    pub is_active: bool,
    pub is_carried_forward: bool,
    /// Lineage only; the record is owned by `period_id` alone.
    pub carried_from_period_id: Option<PeriodId>,
}

impl StockRecord {
    /// `stock_quantity * cost_price`; fails instead of overflowing.
    pub fn value(&self) -> Result<Decimal> {
        Decimal::from(self.stock_quantity)
            .checked_mul(self.cost_price)
            .ok_or_else(|| {
                LedgerError::validation(format!(
                    "Value of {} ({} units at {}) overflows",
                    self.sku, self.stock_quantity, self.cost_price
                ))
            })
    }

    /// Active with stock on hand.
    pub fn is_carryable(&self) -> bool {
        self.is_active && self.stock_quantity > 0
    }
}

/// Insert payload for a stock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStock {
    pub owner: OwnerId,
    pub period_id: PeriodId,
    pub sku: String,
    pub name: String,
    pub category_id: Option<i64>,
    pub description: Option<String>,
    pub stock_quantity: i64,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub min_stock: i64,
    pub is_active: bool,
    pub is_carried_forward: bool,
    pub carried_from_period_id: Option<PeriodId>,
}

impl NewStock {
    /// A fresh, active record with no lineage.
    pub fn new(
        owner: OwnerId,
        period_id: PeriodId,
        sku: impl Into<String>,
        name: impl Into<String>,
        stock_quantity: i64,
        cost_price: Decimal,
    ) -> Self {
        Self {
            owner,
            period_id,
            sku: sku.into(),
            name: name.into(),
            category_id: None,
            description: None,
            stock_quantity,
            cost_price,
            selling_price: cost_price,
            min_stock: 0,
            is_active: true,
            is_carried_forward: false,
            carried_from_period_id: None,
        }
    }

    pub fn with_selling_price(mut self, price: Decimal) -> Self {
        self.selling_price = price;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.sku, &self.name, self.stock_quantity, self.cost_price, self.selling_price)
    }

    pub(crate) fn into_record(self, id: StockId) -> StockRecord {
        StockRecord {
            id,
            owner: self.owner,
            period_id: self.period_id,
            sku: self.sku,
            name: self.name,
            category_id: self.category_id,
            description: self.description,
            stock_quantity: self.stock_quantity,
            cost_price: self.cost_price,
            selling_price: self.selling_price,
            min_stock: self.min_stock,
            is_active: self.is_active,
            is_carried_forward: self.is_carried_forward,
            carried_from_period_id: self.carried_from_period_id,
        }
    }
}

/// Partial update of a stock record. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub period_id: Option<PeriodId>,
    pub name: Option<String>,
    pub category_id: Option<Option<i64>>,
    pub description: Option<Option<String>>,
    pub stock_quantity: Option<i64>,
    pub cost_price: Option<Decimal>,
    pub selling_price: Option<Decimal>,
    pub min_stock: Option<i64>,
    pub is_active: Option<bool>,
}

impl StockUpdate {
    pub fn quantity(quantity: i64) -> Self {
        Self {
            stock_quantity: Some(quantity),
            ..Self::default()
        }
    }

    pub fn cost(cost: Decimal) -> Self {
        Self {
            cost_price: Some(cost),
            ..Self::default()
        }
    }

    /// Apply onto `record`, returning the updated copy.
    pub fn apply(&self, record: &StockRecord) -> Result<StockRecord> {
        let mut next = record.clone();
        if let Some(period_id) = self.period_id {
            next.period_id = period_id;
        }
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(category_id) = self.category_id {
            next.category_id = category_id;
        }
        if let Some(description) = &self.description {
            next.description = description.clone();
        }
        if let Some(q) = self.stock_quantity {
            next.stock_quantity = q;
        }
        if let Some(c) = self.cost_price {
            next.cost_price = c;
        }
        if let Some(p) = self.selling_price {
            next.selling_price = p;
        }
        if let Some(m) = self.min_stock {
            next.min_stock = m;
        }
        if let Some(a) = self.is_active {
            next.is_active = a;
        }
        validate_fields(&next.sku, &next.name, next.stock_quantity, next.cost_price, next.selling_price)?;
        Ok(next)
    }
}

fn validate_fields(
    sku: &str,
    name: &str,
    quantity: i64,
    cost: Decimal,
    selling: Decimal,
) -> Result<()> {
    if sku.trim().is_empty() {
        return Err(LedgerError::validation("SKU cannot be empty"));
    }
    if sku.chars().count() > SKU_MAX_LEN {
        return Err(LedgerError::validation(format!(
            "SKU '{sku}' is longer than {SKU_MAX_LEN} characters"
        )));
    }
    if name.trim().is_empty() {
        return Err(LedgerError::validation("Product name cannot be empty"));
    }
    if name.chars().count() > NAME_MAX_LEN {
        return Err(LedgerError::validation(format!(
            "Product name is longer than {NAME_MAX_LEN} characters"
        )));
    }
    if quantity < 0 {
        return Err(LedgerError::validation(format!(
            "Stock quantity cannot be negative (got {quantity})"
        )));
    }
    if cost.is_sign_negative() || selling.is_sign_negative() {
        return Err(LedgerError::validation("Prices cannot be negative"));
    }
    for (label, price) in [("Cost price", cost), ("Selling price", selling)] {
        validate_money(label, price)?;
    }
    match Decimal::from(quantity).checked_mul(cost) {
        Some(value) if value < money_limit() => Ok(()),
        _ => Err(LedgerError::validation(format!(
            "Stock value of {quantity} units at {cost} exceeds the storable range"
        ))),
    }
}

/// Non-negative amounts that fit `NUMERIC(19,4)` exactly.
pub(crate) fn validate_money(label: &str, amount: Decimal) -> Result<()> {
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(LedgerError::validation(format!(
            "{label} {amount} has more than {MONEY_SCALE} decimal places"
        )));
    }
    if amount >= money_limit() {
        return Err(LedgerError::validation(format!(
            "{label} {amount} exceeds the storable range"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> StockRecord {
        NewStock::new(OwnerId(1), PeriodId(1), "A-1", "Widget", 10, dec!(100)).into_record(StockId(1))
    }

    #[test]
    fn test_value_is_quantity_times_cost() {
        assert_eq!(record().value().unwrap(), dec!(1000));
    }

    #[test]
    fn test_value_overflow_is_an_error() {
        let mut r = record();
        r.stock_quantity = i64::MAX;
        r.cost_price = dec!(100000000000);
        assert!(matches!(r.value(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_validation_bounds_value_to_storable_range() {
        let huge = NewStock::new(OwnerId(1), PeriodId(1), "H", "Huge", i64::MAX, dec!(100000000000));
        let err = huge.validate().unwrap_err();
        assert!(err.to_string().contains("storable range"));

        let edge = NewStock::new(OwnerId(1), PeriodId(1), "E", "Edge", 1, dec!(999999999999999.9999));
        assert!(edge.validate().is_ok());
        let over = NewStock::new(OwnerId(1), PeriodId(1), "O", "Over", 1, dec!(1000000000000000));
        assert!(over.validate().is_err());
    }

    #[test]
    fn test_prices_beyond_four_decimals_are_rejected() {
        let err = NewStock::new(OwnerId(1), PeriodId(1), "P", "Precise", 1, dec!(1.23456))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("decimal places"));

        // trailing zeros do not count
        assert!(NewStock::new(OwnerId(1), PeriodId(1), "P", "Precise", 1, dec!(1.234500))
            .validate()
            .is_ok());
        let err = StockUpdate::cost(dec!(0.00001)).apply(&record()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_overlong_sku_is_rejected() {
        let sku = "S".repeat(SKU_MAX_LEN + 1);
        let err = NewStock::new(OwnerId(1), PeriodId(1), sku, "Long", 1, dec!(1))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("longer than 100"));
    }

    #[test]
    fn test_update_applies_only_given_fields() {
        let updated = StockUpdate::quantity(4).apply(&record()).unwrap();
        assert_eq!(updated.stock_quantity, 4);
        assert_eq!(updated.cost_price, dec!(100));
        assert_eq!(updated.name, "Widget");
    }

    #[test]
    fn test_update_rejects_negative_quantity() {
        let err = StockUpdate::quantity(-1).apply(&record()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_carryable_requires_active_and_stock() {
        let mut r = record();
        assert!(r.is_carryable());
        r.stock_quantity = 0;
        assert!(!r.is_carryable());
        r.stock_quantity = 3;
        r.is_active = false;
        assert!(!r.is_carryable());
    }
}
