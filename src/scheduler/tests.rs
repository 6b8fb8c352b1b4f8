#![cfg(test)]
use std::sync::Arc;

use bytes::Bytes;

use crate::chain::mock::MockDriver;
use crate::chain::{StaticRegistry, TxPresence};
use crate::config::SyncConfig;
use crate::service::store::{MemStore, TxRecord};
use crate::service::SyncService;
use crate::types::{
    Address, FinalityWaterline, NetworkId, SyncKey, TxHash, TxId, TxSnapshot, TxStatus,
};

use super::core::{PumpAction, SchedulerCore};
use super::{ManualClock, SyncScheduler, WalletEvent};

// =========================================================================
// Helpers
// =========================================================================

fn cfg() -> SyncConfig {
    SyncConfig {
        hot_interval_ms: 100,
        background_interval_ms: 1_000,
        scan_interval_ms: 5_000,
        max_concurrency: 2,
        max_resend_count: 3,
    }
}

fn key(n: u64) -> SyncKey {
    SyncKey {
        address: Address(format!("0xaddr{n}")),
        network: NetworkId(1),
    }
}

fn refreshes(actions: &[PumpAction]) -> Vec<SyncKey> {
    actions
        .iter()
        .filter_map(|a| match a {
            PumpAction::Refresh(k) => Some(k.clone()),
            PumpAction::Scan => None,
        })
        .collect()
}

fn make_hot(core: &mut SchedulerCore, n: u64, now: u64) {
    core.handle_event(
        WalletEvent::CurrentAccountChanged {
            address: Address(format!("0xaddr{n}")),
        },
        now,
    );
    core.handle_event(
        WalletEvent::CurrentNetworkChanged {
            network: NetworkId(1),
        },
        now,
    );
}

// =========================================================================
// Core: pump decisions
// =========================================================================

#[test]
fn first_pump_scans_then_respects_the_interval() {
    let mut core = SchedulerCore::new(cfg(), 0);

    assert_eq!(core.pump(0), vec![PumpAction::Scan]);
    // Scan still in flight: nothing new to do.
    assert!(core.pump(10).is_empty());

    core.on_scan_result(vec![], 10);
    assert!(core.pump(4_999).is_empty());
    assert_eq!(core.pump(5_000), vec![PumpAction::Scan]);
}

#[test]
fn scan_discoveries_get_polled() {
    let mut core = SchedulerCore::new(cfg(), 0);
    core.pump(0);
    core.on_scan_result(vec![key(1)], 0);

    assert_eq!(refreshes(&core.pump(0)), vec![key(1)]);
}

#[test]
fn hot_key_dispatches_before_background() {
    let mut core = SchedulerCore::new(
        SyncConfig {
            max_concurrency: 1,
            ..cfg()
        },
        0,
    );
    core.handle_event(WalletEvent::TxCreated { key: key(2) }, 0);
    make_hot(&mut core, 1, 0);

    assert_eq!(refreshes(&core.pump(0)), vec![key(1)]);
}

#[test]
fn concurrency_ceiling_is_global() {
    let mut core = SchedulerCore::new(cfg(), 0);
    for n in 1..=3 {
        core.handle_event(WalletEvent::TxCreated { key: key(n) }, 0);
    }

    let first = refreshes(&core.pump(0));
    assert_eq!(first.len(), 2, "ceiling of 2");

    // A completion frees a slot for the third key.
    core.on_refresh_settled(&first[0], 1);
    let second = refreshes(&core.pump(1));
    assert_eq!(second, vec![key(3)]);
}

#[test]
fn in_flight_key_is_never_dispatched_twice() {
    let mut core = SchedulerCore::new(cfg(), 0);
    core.handle_event(WalletEvent::TxCreated { key: key(1) }, 0);

    assert_eq!(refreshes(&core.pump(0)), vec![key(1)]);
    // Even a fresh tx event cannot double-dispatch it.
    core.handle_event(WalletEvent::TxCreated { key: key(1) }, 1);
    assert!(refreshes(&core.pump(1)).is_empty());

    core.on_refresh_settled(&key(1), 2);
    assert!(
        refreshes(&core.pump(2)).is_empty(),
        "re-armed at the background interval, not immediately"
    );
    assert_eq!(refreshes(&core.pump(1_002)), vec![key(1)]);
}

#[test]
fn background_keys_rotate_round_robin() {
    let mut core = SchedulerCore::new(
        SyncConfig {
            max_concurrency: 1,
            ..cfg()
        },
        0,
    );
    for n in 1..=3 {
        core.handle_event(WalletEvent::TxCreated { key: key(n) }, 0);
    }

    let mut order = Vec::new();
    let mut now = 0;
    for _ in 0..3 {
        let picked = refreshes(&core.pump(now));
        assert_eq!(picked.len(), 1);
        core.on_refresh_settled(&picked[0], now);
        order.push(picked.into_iter().next().unwrap());
        now += 1;
    }

    assert_eq!(order, vec![key(1), key(2), key(3)], "fair rotation");
}

#[test]
fn hot_key_reschedules_on_the_short_interval() {
    let mut core = SchedulerCore::new(cfg(), 0);
    make_hot(&mut core, 1, 0);

    assert_eq!(refreshes(&core.pump(0)), vec![key(1)]);
    core.on_refresh_settled(&key(1), 10);

    assert!(refreshes(&core.pump(109)).is_empty());
    assert_eq!(refreshes(&core.pump(110)), vec![key(1)]);
}

// =========================================================================
// Core: events
// =========================================================================

#[test]
fn account_switch_moves_the_hot_key_and_polls_it_now() {
    let mut core = SchedulerCore::new(cfg(), 0);
    make_hot(&mut core, 1, 0);
    let _ = core.pump(0);
    core.on_refresh_settled(&key(1), 0);

    core.handle_event(
        WalletEvent::CurrentAccountChanged {
            address: Address("0xaddr2".into()),
        },
        50,
    );

    let status = core.snapshot();
    assert_eq!(status.hot, Some(key(2)));
    assert!(
        status.background.contains(&key(1)),
        "previous hot key keeps background service until a scan retires it"
    );
    assert_eq!(refreshes(&core.pump(50)), vec![key(2)], "immediate poll");
}

#[test]
fn tx_created_schedules_its_key_for_the_next_tick() {
    let mut core = SchedulerCore::new(cfg(), 0);
    core.pump(0);
    core.on_scan_result(vec![], 0);

    core.handle_event(WalletEvent::TxCreated { key: key(7) }, 42);
    assert_eq!(refreshes(&core.pump(42)), vec![key(7)]);
}

// =========================================================================
// Core: scan reconciliation
// =========================================================================

#[test]
fn scan_retires_idle_keys_but_never_the_hot_key() {
    let mut core = SchedulerCore::new(cfg(), 0);
    make_hot(&mut core, 1, 0);
    core.handle_event(WalletEvent::TxCreated { key: key(2) }, 0);

    core.pump(0);
    core.on_scan_result(vec![], 5);

    let status = core.snapshot();
    assert_eq!(status.hot, Some(key(1)), "hot key survives an empty scan");
    assert!(
        !status.background.iter().any(|k| *k == key(2)) || status.in_flight > 0,
        "idle background keys are dropped"
    );
}

#[test]
fn scan_does_not_duplicate_known_keys() {
    let mut core = SchedulerCore::new(cfg(), 0);
    core.pump(0);
    core.on_scan_result(vec![key(1)], 0);
    core.on_scan_failed(); // no-op guard
    core.pump(5_000);
    core.on_scan_result(vec![key(1)], 5_000);

    assert_eq!(core.snapshot().background.len(), 1);
}

// =========================================================================
// Core: wakeup planning
// =========================================================================

#[test]
fn no_wakeup_for_due_keys_while_at_the_ceiling() {
    let mut core = SchedulerCore::new(
        SyncConfig {
            max_concurrency: 1,
            ..cfg()
        },
        0,
    );
    core.handle_event(WalletEvent::TxCreated { key: key(1) }, 0);
    core.handle_event(WalletEvent::TxCreated { key: key(2) }, 0);

    let actions = core.pump(0);
    assert_eq!(refreshes(&actions).len(), 1);
    core.on_scan_result(vec![key(1), key(2)], 0);

    // key(2) is due but undispatchable; only the scan deadline remains.
    assert_eq!(core.next_wake_at(), Some(5_000));
}

// =========================================================================
// Shell: end to end over manual time
// =========================================================================

fn pending_record(id: u64, nonce: u64) -> TxRecord {
    TxRecord::new(TxSnapshot {
        id: TxId(id),
        status: TxStatus::Pending,
        nonce: Some(nonce),
        hash: Some(TxHash(format!("0xh{id}"))),
        raw_payload: Some(Bytes::from(vec![id as u8])),
        resend_count: 0,
        created_at_ms: 1_000,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_drives_a_transaction_to_finality() {
    let store = Arc::new(MemStore::new(3));
    let target = SyncKey {
        address: Address("0xaddr1".into()),
        network: NetworkId(1),
    };
    let record = pending_record(1, 5);
    let hash = record.snapshot.hash.clone().unwrap();
    store.insert(&target, record);

    let driver = Arc::new(MockDriver::new());
    driver.set_pending_nonce(6);
    driver.set_presence(&hash, TxPresence::Present);
    driver.set_receipt(&hash, MockDriver::receipt_in_block(20, "0xblock"));
    driver.set_waterline(FinalityWaterline {
        safe: Some(30),
        finalized: Some(25),
    });

    let mut registry = StaticRegistry::new();
    registry.insert(NetworkId(1), driver);

    let service = Arc::new(SyncService::new(store.clone()));
    let clock = Arc::new(ManualClock::new());
    let scheduler = SyncScheduler::new(service, Arc::new(registry), clock.clone(), cfg());

    scheduler.start();

    // The first scan discovers the key and the first refresh settles the
    // transaction; manual time only needs nudging for reschedules.
    let mut finalized = false;
    for _ in 0..200 {
        if store.record(TxId(1)).map(|r| r.snapshot.status) == Some(TxStatus::Finalized) {
            finalized = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        clock.advance(50);
    }
    assert!(finalized, "scheduler never settled the transaction");

    scheduler.stop();

    // Restart after stop rebuilds state without panicking or reusing
    // stale timers.
    scheduler.start();
    scheduler.notify(WalletEvent::TxCreated { key: target });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    scheduler.stop();
}
