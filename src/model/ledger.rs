use super::{LedgerId, PeriodId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    #[default]
    Active,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LedgerStatus::Active),
            _ => None,
        }
    }
}

/// Balance row of one period (`inventory_periods`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerId,
    pub time_period_id: PeriodId,
    pub opening_balance: Decimal,
    pub current_inventory: Decimal,
    pub closing_balance: Decimal,
    pub total_sales: Decimal,
    pub total_profit: Decimal,
    pub status: LedgerStatus,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every write; writers compare-and-set against it.
    pub version: i64,
}

impl LedgerEntry {
    pub fn balances(&self) -> Balances {
        Balances {
            opening: self.opening_balance,
            current: self.current_inventory,
            closing: self.closing_balance,
        }
    }

    /// `closing == opening + current`
    pub fn is_balanced(&self) -> bool {
        self.balances().is_consistent()
    }
}

/// The three balance fields the reconciler and carry-forward write together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub opening: Decimal,
    pub current: Decimal,
    pub closing: Decimal,
}

impl Balances {
    pub fn compute(opening: Decimal, current: Decimal) -> Result<Self> {
        let closing = opening.checked_add(current).ok_or_else(|| {
            LedgerError::validation(format!("Closing balance {opening} + {current} overflows"))
        })?;
        Ok(Self {
            opening,
            current,
            closing,
        })
    }

    pub fn is_consistent(&self) -> bool {
        self.closing == self.opening + self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_compute_keeps_closing_exact() {
        let b = Balances::compute(dec!(0.10), dec!(0.20)).unwrap();
        assert_eq!(b.closing, dec!(0.30));
        assert!(b.is_consistent());
    }

    #[test]
    fn test_compute_reports_overflow() {
        assert!(Balances::compute(Decimal::MAX, dec!(1)).is_err());
    }

    #[test]
    fn test_status_round_trips_through_text() {
        assert_eq!(LedgerStatus::parse(LedgerStatus::Active.as_str()), Some(LedgerStatus::Active));
        assert_eq!(LedgerStatus::parse("closed"), None);
    }
}
