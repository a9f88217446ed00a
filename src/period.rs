//! Period store: the ordered registry of an owner's accounting periods.
//!
//! The chain of an owner is its periods sorted by `(year, month)`. Chains are
//! small (months of history) and always materialised in full.

use crate::error::{LedgerError, Result};
use crate::model::{NewPeriod, OwnerId, PeriodId, TimePeriod, YearMonth};
use crate::store::{LedgerStore, LedgerTx};
use chrono::Utc;

/// Load a period or fail with `NotFound`.
pub fn fetch(tx: &mut dyn LedgerTx, id: PeriodId) -> Result<TimePeriod> {
    tx.find_period(id)?
        .ok_or_else(|| LedgerError::not_found("Period", id))
}

/// Load a period of `owner`. Another owner's period is reported as missing.
pub fn fetch_owned(tx: &mut dyn LedgerTx, owner: OwnerId, id: PeriodId) -> Result<TimePeriod> {
    match tx.find_period(id)? {
        Some(period) if period.owner == owner => Ok(period),
        _ => Err(LedgerError::not_found("Period", id)),
    }
}

/// `period` and every later period of its owner, ascending.
pub fn chain_from(tx: &mut dyn LedgerTx, period: &TimePeriod) -> Result<Vec<TimePeriod>> {
    let start = period.key();
    let mut chain = tx.periods_for_owner(period.owner)?;
    chain.retain(|p| p.key() >= start);
    Ok(chain)
}

/// The period with the largest key strictly before `period`'s.
pub fn predecessor(tx: &mut dyn LedgerTx, period: &TimePeriod) -> Result<Option<TimePeriod>> {
    let key = period.key();
    Ok(tx
        .periods_for_owner(period.owner)?
        .into_iter()
        .filter(|p| p.key() < key)
        .last())
}

/// Insert a period together with its empty ledger entry.
pub(crate) fn create_in(tx: &mut dyn LedgerTx, owner: OwnerId, key: YearMonth) -> Result<TimePeriod> {
    if tx.find_period_by_key(owner, key)?.is_some() {
        return Err(LedgerError::validation(format!(
            "Period {} already exists",
            key.display_name()
        )));
    }
    let period = tx.insert_period(&NewPeriod::for_month(owner, key)?)?;
    tx.insert_ledger(period.id, Utc::now())?;
    log::info!("created period '{}' ({}) for owner {owner}", period.period_name, period.id);
    Ok(period)
}

/// Period operations, each in its own transaction.
pub struct PeriodStore<S> {
    store: S,
}

impl<S: LedgerStore> PeriodStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get_by_period(&self, id: PeriodId) -> Result<TimePeriod> {
        self.store.transaction(|tx| fetch(tx, id))
    }

    pub fn get_chain_from(&self, id: PeriodId) -> Result<Vec<TimePeriod>> {
        self.store.transaction(|tx| {
            let period = fetch(tx, id)?;
            chain_from(tx, &period)
        })
    }

    pub fn get_predecessor(&self, id: PeriodId) -> Result<Option<TimePeriod>> {
        self.store.transaction(|tx| {
            let period = fetch(tx, id)?;
            predecessor(tx, &period)
        })
    }

    /// Lock a period. Locking is one-way; a second lock fails with `AlreadyLocked`.
    ///
    /// Waits for in-flight guarded writes of the period to finish first.
    pub fn lock(&self, id: PeriodId) -> Result<TimePeriod> {
        self.store.transaction(|tx| {
            tx.serialize_on(id)?;
            let period = fetch(tx, id)?;
            let already = LedgerError::AlreadyLocked {
                period_id: id,
                name: period.period_name.clone(),
            };
            if period.is_locked {
                return Err(already);
            }
            // the conditional update catches a lock that raced in after the read
            if !tx.mark_locked(id, Utc::now())? {
                return Err(already);
            }
            log::info!("locked period '{}' ({id})", period.period_name);
            fetch(tx, id)
        })
    }

    /// Make `id` the only active period of its owner.
    pub fn activate(&self, id: PeriodId) -> Result<TimePeriod> {
        self.store.transaction(|tx| {
            let period = fetch(tx, id)?;
            tx.activate_exclusive(period.owner, id)?;
            log::info!("activated period '{}' ({id})", period.period_name);
            fetch(tx, id)
        })
    }

    pub fn create(&self, owner: OwnerId, year: i32, month: u32) -> Result<TimePeriod> {
        let key = YearMonth::new(year, month)?;
        self.store.transaction(|tx| create_in(tx, owner, key))
    }

    /// Return the period for `(year, month)`, creating it when missing.
    pub fn ensure(&self, owner: OwnerId, year: i32, month: u32) -> Result<TimePeriod> {
        let key = YearMonth::new(year, month)?;
        self.store.transaction(|tx| match tx.find_period_by_key(owner, key)? {
            Some(existing) => Ok(existing),
            None => create_in(tx, owner, key),
        })
    }

    pub fn list(&self, owner: OwnerId) -> Result<Vec<TimePeriod>> {
        self.store
            .transaction(|tx| Ok(tx.periods_for_owner(owner)?))
    }
}
