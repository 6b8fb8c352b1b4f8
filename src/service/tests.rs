#![cfg(test)]
use std::sync::Arc;

use bytes::Bytes;

use crate::chain::mock::MockDriver;
use crate::chain::{NonceUsedState, TxPresence};
use crate::types::{
    Address, ExecutedStatus, FinalityWaterline, NetworkId, SyncKey, TxHash, TxId, TxSnapshot,
    TxStatus,
};

use super::store::{MemStore, TxRecord};
use super::SyncService;

// =========================================================================
// Helpers
// =========================================================================

fn key() -> SyncKey {
    SyncKey {
        address: Address("0xa11ce".into()),
        network: NetworkId(1),
    }
}

fn other_key() -> SyncKey {
    SyncKey {
        address: Address("0xb0b".into()),
        network: NetworkId(1),
    }
}

fn record(id: u64, status: TxStatus, nonce: Option<u64>) -> TxRecord {
    TxRecord::new(TxSnapshot {
        id: TxId(id),
        status,
        nonce,
        hash: Some(TxHash(format!("0xh{id}"))),
        raw_payload: Some(Bytes::from(vec![id as u8])),
        resend_count: 0,
        created_at_ms: 1_000 + id,
    })
}

fn service_over(store: Arc<MemStore>) -> SyncService<MemStore> {
    SyncService::new(store)
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn refresh_reconciles_only_the_lowest_nonce_group() {
    let store = Arc::new(MemStore::new(3));
    store.insert(&key(), record(1, TxStatus::Pending, Some(5)));
    store.insert(&key(), record(2, TxStatus::Pending, Some(6)));

    let driver = MockDriver::new();
    driver.set_pending_nonce(7);
    driver.set_nonce_state(NonceUsedState::FinalizedUsed);
    // Both hashes would resolve as missing; only nonce 5 may be touched.

    let service = service_over(store.clone());
    let outcome = service.refresh_key(&key(), &driver, 3).await.unwrap();

    assert!(outcome.patches_applied > 0);
    assert_eq!(
        store.record(TxId(1)).unwrap().snapshot.status,
        TxStatus::Replaced
    );
    assert_eq!(
        store.record(TxId(2)).unwrap().snapshot.status,
        TxStatus::Pending,
        "the higher nonce waits for its turn"
    );
}

#[tokio::test]
async fn rows_without_a_nonce_are_skipped() {
    let store = Arc::new(MemStore::new(3));
    store.insert(&key(), record(1, TxStatus::Pending, None));

    let driver = MockDriver::new();
    let service = service_over(store.clone());
    let outcome = service.refresh_key(&key(), &driver, 3).await.unwrap();

    assert_eq!(outcome.patches_applied, 0);
    assert_eq!(driver.sent_count(), 0);
}

#[tokio::test]
async fn refresh_is_a_noop_for_an_idle_address() {
    let store = Arc::new(MemStore::new(3));
    let driver = MockDriver::new();

    let service = service_over(store);
    let outcome = service.refresh_key(&key(), &driver, 3).await.unwrap();

    assert_eq!(outcome.patches_applied, 0);
    assert!(outcome.dominant.is_none());
}

#[tokio::test]
async fn receipt_outcome_lands_in_the_store() {
    let store = Arc::new(MemStore::new(3));
    let row = record(1, TxStatus::Pending, Some(5));
    let hash = row.snapshot.hash.clone().unwrap();
    store.insert(&key(), row);

    let driver = MockDriver::new();
    driver.set_pending_nonce(6);
    driver.set_presence(&hash, TxPresence::Present);
    driver.set_receipt(&hash, MockDriver::receipt_in_block(20, "0xblock"));
    driver.set_waterline(FinalityWaterline {
        safe: Some(25),
        finalized: Some(20),
    });

    let service = service_over(store.clone());
    let outcome = service.refresh_key(&key(), &driver, 3).await.unwrap();
    assert_eq!(outcome.dominant, Some(TxStatus::Finalized));

    let stored = store.record(TxId(1)).unwrap();
    assert_eq!(stored.snapshot.status, TxStatus::Finalized);
    assert_eq!(stored.executed, Some(ExecutedStatus::Succeeded));
    assert!(stored.receipt.is_some());
    assert!(
        stored.snapshot.raw_payload.is_none(),
        "finalized rows drop their payload"
    );
}

#[tokio::test]
async fn scan_reports_active_keys_only() {
    let store = Arc::new(MemStore::new(3));
    store.insert(&key(), record(1, TxStatus::Pending, Some(5)));
    store.insert(&other_key(), record(2, TxStatus::TempReplaced, Some(9)));

    let service = service_over(store.clone());
    let keys = service.scan_active_keys().await.unwrap();

    assert_eq!(keys, vec![key()], "temp-replaced rows do not keep a key hot");

    // A finalized row retires the key entirely.
    store.insert(&other_key(), record(3, TxStatus::Finalized, Some(9)));
    let keys = service.scan_active_keys().await.unwrap();
    assert_eq!(keys, vec![key()]);
}

#[tokio::test]
async fn discarded_rows_with_attempts_left_keep_a_key_active() {
    let store = Arc::new(MemStore::new(3));
    let mut row = record(1, TxStatus::Discarded, Some(5));
    row.snapshot.resend_count = 1;
    store.insert(&key(), row);

    let service = service_over(store.clone());
    assert_eq!(service.scan_active_keys().await.unwrap(), vec![key()]);

    // Exhausted rows do not.
    let mut spent = record(2, TxStatus::Discarded, Some(7));
    spent.snapshot.resend_count = 3;
    store.insert(&other_key(), spent);
    assert_eq!(service.scan_active_keys().await.unwrap(), vec![key()]);
}
