//! Operation boundary for request handlers.
//!
//! Nothing here returns an error for the ledger operations: every failure is
//! logged and folded into a serialisable result with a specific message.
//!
//! Every operation runs on behalf of an [`AuthContext`]. Periods and ledger
//! entries of other owners are reported as not found.

use crate::carry_forward::{CarriedItem, CarryForward};
use crate::config::ReconcileConfig;
use crate::error::{LedgerError, Result};
use crate::model::{AuthContext, LedgerEntry, LedgerId, OwnerId, PeriodId, TimePeriod};
use crate::period::{self, PeriodStore};
use crate::reconcile::Reconciler;
use crate::stock::StockService;
use crate::store::LedgerStore;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(operation: &str, err: &LedgerError) -> Self {
        log_failure(operation, err);
        Self {
            success: false,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarryForwardResult {
    pub success: bool,
    pub count: usize,
    pub total_value: Decimal,
    pub items: Vec<CarriedItem>,
    pub message: String,
}

fn log_failure(operation: &str, err: &LedgerError) {
    match err {
        LedgerError::Storage(_) | LedgerError::PartialReconcile { .. } => {
            log::error!("{operation} failed: {err}")
        }
        _ => log::warn!("{operation} rejected: {err}"),
    }
}

/// One row of [`LedgerSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodBalance {
    pub period_id: PeriodId,
    pub period_name: String,
    pub is_active: bool,
    pub is_locked: bool,
    pub ledger: Option<LedgerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainViolation {
    MissingLedger {
        period_id: PeriodId,
    },
    /// closing != opening + current
    Unbalanced {
        period_id: PeriodId,
        opening: Decimal,
        current: Decimal,
        closing: Decimal,
    },
    /// opening != predecessor's closing
    Discontinuous {
        period_id: PeriodId,
        opening: Decimal,
        predecessor_closing: Decimal,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainCheck {
    pub violations: Vec<ChainViolation>,
}

impl ChainCheck {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    fn build(rows: &[(TimePeriod, Option<LedgerEntry>)]) -> Self {
        let mut violations = Vec::new();
        let mut previous: Option<&LedgerEntry> = None;
        for (period, ledger) in rows {
            let Some(entry) = ledger else {
                violations.push(ChainViolation::MissingLedger { period_id: period.id });
                previous = None;
                continue;
            };
            if !entry.is_balanced() {
                violations.push(ChainViolation::Unbalanced {
                    period_id: period.id,
                    opening: entry.opening_balance,
                    current: entry.current_inventory,
                    closing: entry.closing_balance,
                });
            }
            if let Some(prev) = previous {
                if entry.opening_balance != prev.closing_balance {
                    violations.push(ChainViolation::Discontinuous {
                        period_id: period.id,
                        opening: entry.opening_balance,
                        predecessor_closing: prev.closing_balance,
                    });
                }
            }
            previous = Some(entry);
        }
        Self { violations }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub periods: Vec<PeriodBalance>,
    pub check: ChainCheck,
}

/// The ledger operations exposed to request handlers.
pub struct LedgerService<S> {
    store: S,
    config: ReconcileConfig,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, &ReconcileConfig::default())
    }

    pub fn with_config(store: S, config: &ReconcileConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn periods(&self) -> PeriodStore<&S> {
        PeriodStore::new(&self.store)
    }

    /// Stock mutations on behalf of `ctx`.
    pub fn stock(&self, ctx: &AuthContext) -> StockService<&S> {
        StockService::with_config(&self.store, ctx, &self.config)
    }

    fn reconciler(&self) -> Reconciler<&S> {
        Reconciler::with_config(&self.store, &self.config)
    }

    /// The period `id` if it belongs to the caller.
    fn owned(&self, ctx: &AuthContext, id: PeriodId) -> Result<TimePeriod> {
        self.store
            .transaction(|tx| period::fetch_owned(tx, ctx.owner, id))
    }

    pub fn create_period(&self, ctx: &AuthContext, year: i32, month: u32) -> Result<TimePeriod> {
        self.periods().create(ctx.owner, year, month)
    }

    /// Reconcile every period of the caller; the recovery path after a partial walk.
    pub fn sync_all(&self, ctx: &AuthContext) -> OperationResult {
        match self.reconciler().reconcile_all(ctx.owner) {
            Ok(report) => OperationResult::ok(format!(
                "Synchronized {} period(s)",
                report.len()
            )),
            Err(e) => OperationResult::failed("sync_all", &e),
        }
    }

    pub fn sync_period(&self, ctx: &AuthContext, period_id: PeriodId) -> OperationResult {
        let run = || -> Result<_> {
            self.owned(ctx, period_id)?;
            self.reconciler().reconcile(period_id)
        };
        match run() {
            Ok(report) => {
                let name = report
                    .periods
                    .first()
                    .map(|p| p.period_name.clone())
                    .unwrap_or_else(|| period_id.to_string());
                OperationResult::ok(format!(
                    "Period '{name}' synchronized; {} period(s) updated",
                    report.len()
                ))
            }
            Err(e) => OperationResult::failed("sync_period", &e),
        }
    }

    /// Reconcile the period owning the ledger entry `ledger_id`.
    pub fn recalculate(&self, ctx: &AuthContext, ledger_id: LedgerId) -> OperationResult {
        let run = || -> Result<Decimal> {
            let entry = self.store.transaction(|tx| {
                let missing = || LedgerError::not_found("Ledger entry", ledger_id);
                let entry = tx.find_ledger_by_id(ledger_id)?.ok_or_else(missing)?;
                period::fetch_owned(tx, ctx.owner, entry.time_period_id).map_err(|_| missing())?;
                Ok(entry)
            })?;
            let report = self.reconciler().reconcile(entry.time_period_id)?;
            Ok(report
                .periods
                .first()
                .map(|p| p.balances.closing)
                .unwrap_or(Decimal::ZERO))
        };
        match run() {
            Ok(closing) => OperationResult::ok(format!(
                "Ledger {ledger_id} recalculated; closing balance {closing}"
            )),
            Err(e) => OperationResult::failed("recalculate", &e),
        }
    }

    pub fn carry_forward(&self, ctx: &AuthContext, source: PeriodId, target: PeriodId) -> CarryForwardResult {
        let run = || -> Result<_> {
            self.owned(ctx, source)?;
            self.owned(ctx, target)?;
            CarryForward::with_config(&self.store, &self.config).carry_forward(source, target)
        };
        match run() {
            Ok(outcome) => CarryForwardResult {
                success: true,
                count: outcome.count,
                total_value: outcome.total_value,
                message: format!(
                    "Carried forward {} product(s) worth {} from {} to {}",
                    outcome.count, outcome.total_value, outcome.source_name, outcome.target_name
                ),
                items: outcome.items,
            },
            Err(e) => {
                log_failure("carry_forward", &e);
                CarryForwardResult {
                    success: false,
                    count: 0,
                    total_value: Decimal::ZERO,
                    items: Vec::new(),
                    message: e.to_string(),
                }
            }
        }
    }

    pub fn lock_period(&self, ctx: &AuthContext, period_id: PeriodId) -> OperationResult {
        let run = || -> Result<_> {
            self.owned(ctx, period_id)?;
            self.periods().lock(period_id)
        };
        match run() {
            Ok(p) => OperationResult::ok(format!("Period '{}' locked", p.period_name)),
            Err(e) => OperationResult::failed("lock_period", &e),
        }
    }

    pub fn activate_period(&self, ctx: &AuthContext, period_id: PeriodId) -> OperationResult {
        let run = || -> Result<_> {
            self.owned(ctx, period_id)?;
            self.periods().activate(period_id)
        };
        match run() {
            Ok(p) => OperationResult::ok(format!("Period '{}' is now active", p.period_name)),
            Err(e) => OperationResult::failed("activate_period", &e),
        }
    }

    /// Every period of the caller with its ledger, plus the chain check.
    pub fn summary(&self, ctx: &AuthContext) -> Result<LedgerSummary> {
        let rows = self.load_chain(ctx.owner)?;
        let check = ChainCheck::build(&rows);
        let periods = rows
            .into_iter()
            .map(|(p, ledger)| PeriodBalance {
                period_id: p.id,
                period_name: p.period_name,
                is_active: p.is_active,
                is_locked: p.is_locked,
                ledger,
            })
            .collect();
        Ok(LedgerSummary { periods, check })
    }

    /// Report every period of the caller that breaks closing = opening + current,
    /// or whose opening differs from its predecessor's closing.
    pub fn verify_chain(&self, ctx: &AuthContext) -> Result<ChainCheck> {
        Ok(ChainCheck::build(&self.load_chain(ctx.owner)?))
    }

    fn load_chain(&self, owner: OwnerId) -> Result<Vec<(TimePeriod, Option<LedgerEntry>)>> {
        self.store.transaction(|tx| {
            let periods = tx.periods_for_owner(owner)?;
            let mut rows = Vec::with_capacity(periods.len());
            for period in periods {
                let ledger = tx.find_ledger(period.id)?;
                rows.push((period, ledger));
            }
            Ok(rows)
        })
    }
}
