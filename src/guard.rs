//! Lock guard for ledger-affecting mutations.
//!
//! Every stock write and every carry-forward asks the guard first. The guard
//! fails closed: a period it cannot resolve is treated as immutable.
//!
//! The guard serialises on the period before reading it, and `PeriodStore::lock`
//! takes the same per-period lock, so a lock cannot commit between the check
//! and the write that depends on it.

use crate::error::{LedgerError, Result};
use crate::model::{PeriodId, TimePeriod};
use crate::store::LedgerTx;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardDecision {
    pub allowed: bool,
    pub reason: String,
}

impl GuardDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

pub struct LockGuard;

impl LockGuard {
    /// Whether stock of `period` may change.
    pub fn can_mutate(tx: &mut dyn LedgerTx, period: PeriodId) -> GuardDecision {
        let resolved = tx.serialize_on(period).and_then(|()| tx.find_period(period));
        match resolved {
            Ok(Some(p)) if p.is_locked => {
                GuardDecision::deny(format!("Period '{}' is locked", p.period_name))
            }
            Ok(Some(_)) => GuardDecision::allow(),
            Ok(None) => GuardDecision::deny(format!("Period {period} not found")),
            Err(e) => {
                log::warn!("lock guard could not resolve period {period}: {e}");
                GuardDecision::deny(format!("Period {period} could not be resolved: {e}"))
            }
        }
    }

    /// Resolve `period` and fail unless it is mutable.
    pub fn require_mutable(tx: &mut dyn LedgerTx, period: PeriodId) -> Result<TimePeriod> {
        tx.serialize_on(period)?;
        Self::check_mutable(tx, period)
    }

    /// [`LockGuard::require_mutable`] for several periods, serialising on them
    /// in ascending id order. Results follow the order of `periods`.
    pub fn require_all_mutable(tx: &mut dyn LedgerTx, periods: &[PeriodId]) -> Result<Vec<TimePeriod>> {
        Self::serialize_all(tx, periods)?;
        periods
            .iter()
            .map(|&period| Self::check_mutable(tx, period))
            .collect()
    }

    /// Serialise on every period, in ascending id order.
    pub fn serialize_all(tx: &mut dyn LedgerTx, periods: &[PeriodId]) -> Result<()> {
        let mut ordered = periods.to_vec();
        ordered.sort();
        ordered.dedup();
        for period in ordered {
            tx.serialize_on(period)?;
        }
        Ok(())
    }

    fn check_mutable(tx: &mut dyn LedgerTx, period: PeriodId) -> Result<TimePeriod> {
        let resolved = tx
            .find_period(period)?
            .ok_or_else(|| LedgerError::not_found("Period", period))?;
        if resolved.is_locked {
            log::debug!("refusing mutation of locked period {period}");
            return Err(LedgerError::LockedPeriod {
                period_id: period,
                name: resolved.period_name,
            });
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewPeriod, OwnerId, YearMonth};
    use crate::store::{LedgerStore, MemoryStore};
    use chrono::Utc;

    fn period(store: &MemoryStore, locked: bool) -> PeriodId {
        store
            .transaction(|tx| {
                let key = YearMonth::new(2024, 1)?;
                let p = tx.insert_period(&NewPeriod::for_month(OwnerId(1), key)?)?;
                if locked {
                    tx.mark_locked(p.id, Utc::now())?;
                }
                Ok(p.id)
            })
            .unwrap()
    }

    #[test]
    fn test_open_period_is_allowed() {
        let store = MemoryStore::new();
        let id = period(&store, false);
        let decision = store
            .transaction(|tx| Ok(LockGuard::can_mutate(tx, id)))
            .unwrap();
        assert!(decision.allowed);
    }

    #[test]
    fn test_locked_period_is_denied_with_reason() {
        let store = MemoryStore::new();
        let id = period(&store, true);
        let decision = store
            .transaction(|tx| Ok(LockGuard::can_mutate(tx, id)))
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.contains("January 2024"));

        let err = store
            .transaction(|tx| LockGuard::require_mutable(tx, id))
            .unwrap_err();
        assert!(matches!(err, LedgerError::LockedPeriod { .. }));
    }

    #[test]
    fn test_lock_committed_while_waiting_is_seen() {
        let store = MemoryStore::new();
        let id = period(&store, false);
        store.lock_on_next_serialize(id);
        let decision = store
            .transaction(|tx| Ok(LockGuard::can_mutate(tx, id)))
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.contains("is locked"));
    }

    #[test]
    fn test_require_all_mutable_checks_every_period() {
        let store = MemoryStore::new();
        let open = period(&store, false);
        let locked = store
            .transaction(|tx| {
                let key = YearMonth::new(2024, 2)?;
                let p = tx.insert_period(&NewPeriod::for_month(OwnerId(1), key)?)?;
                tx.mark_locked(p.id, Utc::now())?;
                Ok(p.id)
            })
            .unwrap();

        let both = store
            .transaction(|tx| LockGuard::require_all_mutable(tx, &[open, open]))
            .unwrap();
        assert_eq!(both.len(), 2);

        let err = store
            .transaction(|tx| LockGuard::require_all_mutable(tx, &[open, locked]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::LockedPeriod { period_id, .. } if period_id == locked));
    }

    #[test]
    fn test_unknown_period_fails_closed() {
        let store = MemoryStore::new();
        let decision = store
            .transaction(|tx| Ok(LockGuard::can_mutate(tx, PeriodId(404))))
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.contains("not found"));
    }
}
