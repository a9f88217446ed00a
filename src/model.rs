//! Typed rows of the ledger: periods, ledger entries and stock records.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ledger;
pub mod period;
pub mod stock;

pub use ledger::{Balances, LedgerEntry, LedgerStatus};
pub use period::{NewPeriod, TimePeriod, YearMonth};
pub use stock::{NewStock, StockRecord, StockUpdate};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                $name(v)
            }
        }

        impl From<$name> for i64 {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

id_type!(
    /// Primary key of `time_periods`
    PeriodId
);
id_type!(
    /// Primary key of `inventory_periods`
    LedgerId
);
id_type!(
    /// Primary key of `products`
    StockId
);
id_type!(
    /// User that owns a chain of periods and their stock
    OwnerId
);

/// Identity of the caller, supplied by the host application's authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub owner: OwnerId,
}

impl AuthContext {
    pub fn new(owner: impl Into<OwnerId>) -> Self {
        Self {
            owner: owner.into(),
        }
    }
}
