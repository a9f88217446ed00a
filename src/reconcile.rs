//! Cascade reconciliation.
//!
//! After a stock change the ledger of the owning period is recomputed and the
//! new closing balance is pushed forward through every later period. The walk
//! is a [`ChainWalk`]: each [`ChainWalk::step`] reconciles exactly one period in
//! its own transaction, so a failure leaves the committed prefix in place and
//! the rest of the chain untouched. Running [`Reconciler::reconcile_all`]
//! again converges.

use crate::config::ReconcileConfig;
use crate::error::{LedgerError, Result};
use crate::model::{Balances, OwnerId, PeriodId, TimePeriod};
use crate::period;
use crate::store::{LedgerStore, LedgerTx};
use crate::valuation::valuation;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Balances written for one period by one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledPeriod {
    pub period_id: PeriodId,
    pub period_name: String,
    pub balances: Balances,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub periods: Vec<ReconciledPeriod>,
}

impl ReconcileReport {
    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn last_closing(&self) -> Option<Decimal> {
        self.periods.last().map(|p| p.balances.closing)
    }
}

/// Recompute and persist the ledger of one period.
///
/// The opening is the predecessor's committed closing balance, read inside this
/// transaction. A period with no predecessor keeps its stored opening unless
/// `seed` replaces it.
pub(crate) fn reconcile_period(
    tx: &mut dyn LedgerTx,
    period_id: PeriodId,
    seed: Option<Decimal>,
) -> Result<ReconciledPeriod> {
    tx.serialize_on(period_id)?;
    let period = period::fetch(tx, period_id)?;
    let entry = match tx.find_ledger(period_id)? {
        Some(entry) => entry,
        None => tx.insert_ledger(period_id, Utc::now())?,
    };

    let opening = match period::predecessor(tx, &period)? {
        Some(pred) => tx
            .find_ledger(pred.id)?
            .map(|e| e.closing_balance)
            .unwrap_or(Decimal::ZERO),
        None => seed.unwrap_or(entry.opening_balance),
    };
    let current = valuation(tx, period_id)?;
    let balances = Balances::compute(opening, current)?;

    if !tx.write_balances(period_id, entry.version, balances, Utc::now())? {
        return Err(LedgerError::ConcurrencyConflict {
            period_id,
            expected: entry.version,
        });
    }

    log::debug!(
        "reconciled '{}': opening={} current={} closing={}",
        period.period_name,
        balances.opening,
        balances.current,
        balances.closing
    );
    Ok(ReconciledPeriod {
        period_id,
        period_name: period.period_name,
        balances,
    })
}

/// Step-wise walk over a materialised, ascending period chain.
pub struct ChainWalk<'s, S> {
    store: &'s S,
    chain: Vec<TimePeriod>,
    position: usize,
    max_conflict_retries: u32,
    report: ReconcileReport,
    failed: bool,
}

impl<'s, S: LedgerStore> ChainWalk<'s, S> {
    fn new(store: &'s S, chain: Vec<TimePeriod>, max_conflict_retries: u32) -> Self {
        Self {
            store,
            chain,
            position: 0,
            max_conflict_retries,
            report: ReconcileReport::default(),
            failed: false,
        }
    }

    pub fn periods(&self) -> &[TimePeriod] {
        &self.chain
    }

    /// Number of periods committed so far.
    pub fn committed(&self) -> usize {
        self.report.len()
    }

    pub fn is_finished(&self) -> bool {
        self.failed || self.position >= self.chain.len()
    }

    /// Reconcile the next period in one transaction.
    ///
    /// Returns `None` once the chain is exhausted or after the first failure.
    pub fn step(&mut self) -> Option<Result<ReconciledPeriod>> {
        if self.is_finished() {
            return None;
        }
        let period_id = self.chain[self.position].id;
        match self.step_with_retries(period_id) {
            Ok(done) => {
                self.position += 1;
                self.report.periods.push(done.clone());
                Some(Ok(done))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn step_with_retries(&self, period_id: PeriodId) -> Result<ReconciledPeriod> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::reconcile_step_span(period_id.0).entered();

        let mut attempt = 0;
        loop {
            let result = self
                .store
                .transaction(|tx| reconcile_period(tx, period_id, None));
            match result {
                Err(LedgerError::ConcurrencyConflict { expected, .. }) => {
                    #[cfg(feature = "metrics")]
                    METRICS.record_conflict();
                    if attempt >= self.max_conflict_retries {
                        return Err(LedgerError::ConcurrencyConflict {
                            period_id,
                            expected,
                        });
                    }
                    attempt += 1;
                    log::warn!(
                        "ledger of period {period_id} changed under us (version {expected}), retry {attempt}/{}",
                        self.max_conflict_retries
                    );
                }
                other => {
                    #[cfg(feature = "metrics")]
                    {
                        if other.is_ok() {
                            METRICS.record_reconcile_step();
                        }
                    }
                    return other;
                }
            }
        }
    }

    /// Drive the walk to the end.
    ///
    /// A failure after at least one committed period is reported as
    /// [`LedgerError::PartialReconcile`].
    pub fn run(self) -> Result<ReconcileReport> {
        self.run_after(0)
    }

    /// Like [`ChainWalk::run`] for a walk that continues `prefix` transactions
    /// the caller already committed.
    pub(crate) fn run_after(mut self, prefix: usize) -> Result<ReconcileReport> {
        while let Some(step) = self.step() {
            let Err(source) = step else { continue };
            let committed = prefix + self.committed();
            if committed == 0 {
                return Err(source);
            }
            let failed_at = self.chain[self.position].id;
            #[cfg(feature = "metrics")]
            METRICS.record_partial_walk();
            log::error!(
                "reconciliation stopped at period {failed_at} after {committed} committed period(s): {source}"
            );
            return Err(LedgerError::PartialReconcile {
                committed,
                failed_at,
                source: Box::new(source),
            });
        }
        Ok(self.report)
    }
}

impl<S: LedgerStore> Iterator for ChainWalk<'_, S> {
    type Item = Result<ReconciledPeriod>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step()
    }
}

/// Entry point for cascade reconciliation.
pub struct Reconciler<S> {
    store: S,
    max_conflict_retries: u32,
}

impl<S: LedgerStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, &ReconcileConfig::default())
    }

    pub fn with_config(store: S, config: &ReconcileConfig) -> Self {
        Self {
            store,
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    /// Walk starting at `start` and covering every later period of its owner.
    pub fn walk_from(&self, start: PeriodId) -> Result<ChainWalk<'_, S>> {
        let chain = self.store.transaction(|tx| {
            let period = period::fetch(tx, start)?;
            period::chain_from(tx, &period)
        })?;
        Ok(self.walk_over(chain))
    }

    /// Walk over the owner's whole chain.
    pub fn walk_all(&self, owner: OwnerId) -> Result<ChainWalk<'_, S>> {
        let chain = self
            .store
            .transaction(|tx| Ok(tx.periods_for_owner(owner)?))?;
        Ok(self.walk_over(chain))
    }

    pub(crate) fn walk_over(&self, chain: Vec<TimePeriod>) -> ChainWalk<'_, S> {
        ChainWalk::new(&self.store, chain, self.max_conflict_retries)
    }

    pub fn reconcile(&self, start: PeriodId) -> Result<ReconcileReport> {
        log::info!("reconciling from period {start}");
        self.walk_from(start)?.run()
    }

    /// Reconcile every period of `owner`. Safe to run at any time; the final
    /// state does not depend on how often it runs.
    pub fn reconcile_all(&self, owner: OwnerId) -> Result<ReconcileReport> {
        log::info!("reconciling all periods of owner {owner}");
        self.walk_all(owner)?.run()
    }

    /// Reconcile the periods strictly after `period`.
    pub fn reconcile_after(&self, period: PeriodId) -> Result<ReconcileReport> {
        let chain = self.store.transaction(|tx| {
            let anchor = period::fetch(tx, period)?;
            let mut chain = period::chain_from(tx, &anchor)?;
            chain.retain(|p| p.id != anchor.id);
            Ok(chain)
        })?;
        self.walk_over(chain).run()
    }
}
