//! # stock-ledger
//!
//! Period ledger and carry-forward engine for a small shop back office, on the
//! `may` coroutine runtime and PostgreSQL (`may_postgres`).
//!
//! An owner's accounting periods form a chronological chain. Each period has
//! one ledger entry holding its opening, current-inventory and closing
//! balances. Stock changes are gated by a lock guard and followed by a cascade
//! reconciliation down the chain; unsold stock can be carried forward into a
//! new period in a single transaction.
//!
//! ```no_run
//! use stock_ledger::model::{AuthContext, NewStock, OwnerId};
//! use stock_ledger::service::LedgerService;
//! use stock_ledger::store::MemoryStore;
//! use rust_decimal::Decimal;
//!
//! let service = LedgerService::new(MemoryStore::new());
//! let ctx = AuthContext::new(OwnerId(1));
//! let jan = service.create_period(&ctx, 2024, 1).unwrap();
//! let feb = service.create_period(&ctx, 2024, 2).unwrap();
//! service
//!     .stock(&ctx)
//!     .create(NewStock::new(ctx.owner, jan.id, "TEA-01", "Green tea", 10, Decimal::from(4)))
//!     .unwrap();
//!
//! let result = service.carry_forward(&ctx, jan.id, feb.id);
//! assert!(result.success);
//! ```

pub mod carry_forward;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod guard;
pub mod metrics;
pub mod migration;
pub mod model;
pub mod period;
pub mod reconcile;
pub mod service;
pub mod stock;
pub mod store;
pub mod transaction;
pub mod valuation;

pub use carry_forward::{CarriedItem, CarryForward, CarryForwardOutcome};
pub use config::LedgerConfig;
pub use error::{LedgerError, Result, StoreError};
pub use guard::{GuardDecision, LockGuard};
pub use model::{AuthContext, LedgerId, OwnerId, PeriodId, StockId};
pub use period::PeriodStore;
pub use reconcile::{ChainWalk, ReconcileReport, Reconciler};
pub use service::{CarryForwardResult, LedgerService, OperationResult};
pub use stock::StockService;
pub use store::{LedgerStore, LedgerTx, MemoryStore, PgStore};
