use super::{OwnerId, PeriodId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Month, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chronological key of a period. Field order makes the derived `Ord` sort by
/// year first, then month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub const MIN_YEAR: i32 = 1900;
    pub const MAX_YEAR: i32 = 9999;

    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) {
            return Err(LedgerError::validation(format!(
                "Year {year} is outside {}..={}",
                Self::MIN_YEAR,
                Self::MAX_YEAR
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(LedgerError::validation(format!(
                "Month {month} must be between 1 and 12"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn first_day(&self) -> Result<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .ok_or_else(|| LedgerError::validation(format!("Invalid period {self}")))
    }

    pub fn last_day(&self) -> Result<NaiveDate> {
        let next = self.next();
        NaiveDate::from_ymd_opt(next.year, next.month, 1)
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| LedgerError::validation(format!("Invalid period {self}")))
    }

    pub fn next(&self) -> YearMonth {
        if self.month == 12 {
            YearMonth {
                year: self.year + 1,
                month: 1,
            }
        } else {
            YearMonth {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Display name such as `"February 2024"`.
    pub fn display_name(&self) -> String {
        let month = u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| m.name().to_string())
            .unwrap_or_else(|| format!("Month {}", self.month));
        format!("{month} {}", self.year)
    }

    /// `YYYYMM`, used in carried-forward SKUs.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A calendar month accounting window, one link of an owner's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub id: PeriodId,
    pub owner: OwnerId,
    pub year: i32,
    pub month: u32,
    pub period_name: String,
    pub is_active: bool,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl TimePeriod {
    pub fn key(&self) -> YearMonth {
        YearMonth {
            year: self.year,
            month: self.month,
        }
    }
}

/// Insert payload for a period; built by [`NewPeriod::for_month`] so names and
/// dates always agree with the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPeriod {
    pub owner: OwnerId,
    pub key: YearMonth,
    pub period_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl NewPeriod {
    pub fn for_month(owner: OwnerId, key: YearMonth) -> Result<Self> {
        Ok(Self {
            owner,
            key,
            period_name: key.display_name(),
            start_date: key.first_day()?,
            end_date: key.last_day()?,
        })
    }
}
