//! End-to-end ledger behaviour against the in-memory store.

use fake::faker::lorem::en::Word;
use fake::Fake;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use stock_ledger::model::{NewStock, StockUpdate};
use stock_ledger::service::ChainViolation;
use stock_ledger::{
    AuthContext, CarryForward, LedgerError, LedgerService, LedgerStore, MemoryStore, OwnerId,
    PeriodId, Reconciler,
};

const OWNER: OwnerId = OwnerId(42);
const CTX: AuthContext = AuthContext { owner: OWNER };

fn ledger_of(service: &LedgerService<MemoryStore>, period: PeriodId) -> (Decimal, Decimal, Decimal) {
    let entry = service
        .store()
        .transaction(|tx| Ok(tx.find_ledger(period)?))
        .unwrap()
        .unwrap();
    (entry.opening_balance, entry.current_inventory, entry.closing_balance)
}

/// January 2024 with A (10 @ 100) and B (5 @ 50).
fn january() -> (LedgerService<MemoryStore>, PeriodId) {
    let service = LedgerService::new(MemoryStore::new());
    let jan = service.create_period(&CTX, 2024, 1).unwrap().id;
    let stock = service.stock(&CTX);
    stock
        .create(NewStock::new(OWNER, jan, "A", "Product A", 10, dec!(100)))
        .unwrap();
    stock
        .create(NewStock::new(OWNER, jan, "B", "Product B", 5, dec!(50)))
        .unwrap();
    (service, jan)
}

#[test]
fn january_reconciles_and_february_opens_with_its_closing() {
    let (service, jan) = january();
    assert!(service.sync_period(&CTX, jan).success);
    assert_eq!(ledger_of(&service, jan), (dec!(0), dec!(1250), dec!(1250)));

    let feb = service.create_period(&CTX, 2024, 2).unwrap().id;
    assert!(service.sync_period(&CTX, feb).success);
    assert_eq!(ledger_of(&service, feb).0, dec!(1250));
}

#[test]
fn carry_forward_january_into_february() {
    let (service, jan) = january();
    let feb = service.create_period(&CTX, 2024, 2).unwrap().id;

    let result = service.carry_forward(&CTX, jan, feb);
    assert!(result.success, "{}", result.message);
    assert_eq!(result.count, 2);
    assert_eq!(result.total_value, dec!(1250));
    assert!(result.items.iter().all(|i| i.new_sku.ends_with("-CF-202402")));

    // February follows January, so its opening is January's closing and the
    // carried stock is its current inventory.
    let (opening, current, closing) = ledger_of(&service, feb);
    assert_eq!(opening, dec!(1250));
    assert_eq!(current, dec!(1250));
    assert_eq!(closing, opening + current);
}

#[test]
fn locked_january_rejects_stock_edits_and_keeps_ledger() {
    let (service, jan) = january();
    let a = service
        .store()
        .transaction(|tx| Ok(tx.stock_in_period(jan)?))
        .unwrap()
        .into_iter()
        .find(|r| r.sku == "A")
        .unwrap();
    assert!(service.lock_period(&CTX, jan).success);
    let before = ledger_of(&service, jan);

    let err = service.stock(&CTX).update(a.id, StockUpdate::quantity(3)).unwrap_err();
    assert!(matches!(err, LedgerError::LockedPeriod { .. }));
    let err = service
        .stock(&CTX)
        .create(NewStock::new(OWNER, jan, "C", "Product C", 1, dec!(1)))
        .unwrap_err();
    assert!(matches!(err, LedgerError::LockedPeriod { .. }));
    assert!(service.stock(&CTX).record_sale(a.id, 1, dec!(120)).is_err());
    assert!(service.stock(&CTX).delete(a.id).is_err());

    assert_eq!(ledger_of(&service, jan), before);
}

#[test]
fn every_reconciled_period_balances_and_chain_is_continuous() {
    let service = LedgerService::new(MemoryStore::new());
    let periods: Vec<_> = [(2023, 11), (2024, 2), (2023, 12), (2024, 1)]
        .iter()
        .map(|&(y, m)| service.create_period(&CTX, y, m).unwrap().id)
        .collect();

    for (i, &period) in periods.iter().enumerate() {
        for n in 0..3 {
            let word: String = Word().fake();
            let qty: i64 = (1..50).fake();
            let cents: i64 = (1..100_000).fake();
            service
                .stock(&CTX)
                .create(NewStock::new(
                    OWNER,
                    period,
                    format!("{word}-{i}-{n}"),
                    word,
                    qty,
                    Decimal::new(cents, 2),
                ))
                .unwrap();
        }
    }

    assert!(service.sync_all(&CTX).success);
    let check = service.verify_chain(&CTX).unwrap();
    assert!(check.is_consistent(), "{:?}", check.violations);

    let summary = service.summary(&CTX).unwrap();
    let names: Vec<_> = summary.periods.iter().map(|p| p.period_name.as_str()).collect();
    assert_eq!(
        names,
        vec!["November 2023", "December 2023", "January 2024", "February 2024"]
    );
}

#[test]
fn reconcile_twice_yields_identical_ledgers() {
    let (service, jan) = january();
    service.create_period(&CTX, 2024, 2).unwrap();
    let reconciler = Reconciler::new(service.store());

    let first = reconciler.reconcile(jan).unwrap();
    let second = reconciler.reconcile(jan).unwrap();
    assert_eq!(first, second);
}

#[test]
fn second_carry_forward_fails_and_keeps_first_records() {
    let (service, jan) = january();
    let feb = service.create_period(&CTX, 2024, 2).unwrap().id;
    assert!(service.carry_forward(&CTX, jan, feb).success);
    let records = |s: &LedgerService<MemoryStore>| {
        s.store()
            .transaction(|tx| Ok(tx.stock_in_period(feb)?))
            .unwrap()
    };
    let after_first = records(&service);

    let err = CarryForward::new(service.store()).carry_forward(jan, feb).unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateCarryForward { .. }));
    assert_eq!(records(&service), after_first);
}

#[test]
fn carried_value_counts_only_active_records_with_stock() {
    let (service, jan) = january();
    let stock = service.stock(&CTX);
    stock
        .create(NewStock::new(OWNER, jan, "Z", "Empty shelf", 0, dec!(999)))
        .unwrap();
    stock
        .create(NewStock::new(OWNER, jan, "X", "Discontinued", 4, dec!(25)).inactive())
        .unwrap();
    let feb = service.create_period(&CTX, 2024, 2).unwrap().id;

    let result = service.carry_forward(&CTX, jan, feb);
    assert_eq!(result.count, 2);
    assert_eq!(result.total_value, dec!(1250));
    let summed: Decimal = result.items.iter().map(|i| i.value).sum();
    assert_eq!(summed, result.total_value);
}

#[test]
fn interrupted_walk_is_reported_partial_and_sync_all_converges() {
    let (service, jan) = january();
    let feb = service.create_period(&CTX, 2024, 2).unwrap().id;
    let mar = service.create_period(&CTX, 2024, 3).unwrap().id;
    service.sync_all(&CTX);

    service
        .store()
        .transaction(|tx| {
            tx.insert_stock(&NewStock::new(OWNER, jan, "N", "New arrival", 2, dec!(10)))?;
            Ok(())
        })
        .unwrap();
    service.store().fail_next_balance_write(mar);

    let result = service.sync_period(&CTX, jan);
    assert!(!result.success);
    assert!(result.message.contains("run sync again"));
    assert_eq!(ledger_of(&service, jan).2, dec!(1270));
    assert_eq!(ledger_of(&service, feb).0, dec!(1270));
    assert_eq!(ledger_of(&service, mar).0, dec!(1250));

    let check = service.verify_chain(&CTX).unwrap();
    assert!(matches!(
        check.violations.as_slice(),
        [ChainViolation::Discontinuous { period_id, .. }] if *period_id == mar
    ));

    assert!(service.sync_all(&CTX).success);
    assert_eq!(ledger_of(&service, mar).0, dec!(1270));
}

#[test]
fn failed_carry_forward_leaves_no_trace() {
    let (service, jan) = january();
    let feb = service.create_period(&CTX, 2024, 2).unwrap().id;
    service.sync_all(&CTX);
    let ledger_before = ledger_of(&service, feb);

    service.store().fail_stock_insert_after(1);
    let result = service.carry_forward(&CTX, jan, feb);
    assert!(!result.success);
    assert!(result.items.is_empty());

    let carried = service
        .store()
        .transaction(|tx| Ok(tx.count_carried_into(feb)?))
        .unwrap();
    assert_eq!(carried, 0);
    assert_eq!(ledger_of(&service, feb), ledger_before);

    assert!(service.carry_forward(&CTX, jan, feb).success);
}

#[test]
fn version_conflicts_are_retried_transparently() {
    let (service, jan) = january();
    service.store().conflict_next_balance_writes(jan, 2);
    let result = service.sync_period(&CTX, jan);
    assert!(result.success, "{}", result.message);
    assert_eq!(ledger_of(&service, jan).2, dec!(1250));
}

#[test]
fn concurrent_stock_writers_leave_a_consistent_chain() {
    let store = Arc::new(MemoryStore::new());
    let service = LedgerService::new(Arc::clone(&store));
    let jan = service.create_period(&CTX, 2024, 1).unwrap().id;
    service.create_period(&CTX, 2024, 2).unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let service = &service;
            scope.spawn(move || {
                for n in 0..5 {
                    service
                        .stock(&CTX)
                        .create(NewStock::new(OWNER, jan, format!("W{worker}-{n}"), "Widget", 1, dec!(2)))
                        .unwrap();
                }
            });
        }
    });

    let check = service.verify_chain(&CTX).unwrap();
    assert!(check.is_consistent(), "{:?}", check.violations);
    let summary = service.summary(&CTX).unwrap();
    let feb = summary.periods[1].ledger.as_ref().unwrap();
    assert_eq!(feb.opening_balance, dec!(40));
}

#[test]
fn activating_a_period_deactivates_the_rest() {
    let (service, jan) = january();
    let feb = service.create_period(&CTX, 2024, 2).unwrap().id;
    assert!(service.activate_period(&CTX, jan).success);
    assert!(service.activate_period(&CTX, feb).success);

    let summary = service.summary(&CTX).unwrap();
    let active: Vec<_> = summary
        .periods
        .iter()
        .filter(|p| p.is_active)
        .map(|p| p.period_id)
        .collect();
    assert_eq!(active, vec![feb]);
}
