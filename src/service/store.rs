//! Transaction store seam.
//!
//! The real store lives in the host wallet; the core only needs three
//! operations, all batch-shaped. `MemStore` is a reference implementation
//! used by the crate's own tests and handy for embedders' tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::TxPatch;
use crate::error::StoreError;
use crate::types::{ExecutedStatus, Receipt, SyncKey, TxFailure, TxId, TxSnapshot, TxStatus};

#[async_trait]
pub trait TxStore: Send + Sync {
    /// Every transaction for the key still in the core's purview:
    /// unsettled statuses, plus discarded rows that remain
    /// resend-eligible.
    async fn query_unsettled(&self, key: &SyncKey) -> Result<Vec<TxSnapshot>, StoreError>;

    /// Apply all patches as one atomic batch write.
    async fn apply_patches(&self, patches: Vec<TxPatch>) -> Result<(), StoreError>;

    /// Distinct keys holding at least one transaction the scheduler should
    /// keep polling for (unsettled and not temporarily replaced).
    async fn scan_unsettled_keys(&self) -> Result<Vec<SyncKey>, StoreError>;
}

/// Full row shape held by [`MemStore`]: the snapshot the engine sees plus
/// the fields only patches ever touch.
#[derive(Clone, Debug)]
pub struct TxRecord {
    pub snapshot: TxSnapshot,
    pub executed: Option<ExecutedStatus>,
    pub receipt: Option<Receipt>,
    pub executed_at_ms: Option<u64>,
    pub failure: Option<TxFailure>,
    pub temp_replaced_by_sibling: bool,
}

impl TxRecord {
    pub fn new(snapshot: TxSnapshot) -> Self {
        Self {
            snapshot,
            executed: None,
            receipt: None,
            executed_at_ms: None,
            failure: None,
            temp_replaced_by_sibling: false,
        }
    }
}

/// Pure in-memory store. A single lock over the whole table makes the
/// batch write trivially atomic.
#[derive(Default)]
pub struct MemStore {
    max_resend_count: u32,
    rows: Mutex<HashMap<SyncKey, Vec<TxRecord>>>,
}

impl MemStore {
    pub fn new(max_resend_count: u32) -> Self {
        Self {
            max_resend_count,
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: &SyncKey, record: TxRecord) {
        self.rows
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push(record);
    }

    pub fn record(&self, id: TxId) -> Option<TxRecord> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|r| r.snapshot.id == id)
            .cloned()
    }

    fn in_purview(&self, record: &TxRecord) -> bool {
        let snap = &record.snapshot;
        snap.status.is_unsettled()
            || (snap.status == TxStatus::Discarded
                && snap.raw_payload.is_some()
                && snap.resend_count < self.max_resend_count)
    }
}

#[async_trait]
impl TxStore for MemStore {
    async fn query_unsettled(&self, key: &SyncKey) -> Result<Vec<TxSnapshot>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(key)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| self.in_purview(r))
                    .map(|r| r.snapshot.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn apply_patches(&self, patches: Vec<TxPatch>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for patch in patches {
            let record = rows
                .values_mut()
                .flatten()
                .find(|r| r.snapshot.id == patch.id)
                .ok_or_else(|| StoreError(format!("unknown row {}", patch.id)))?;

            let fields = patch.fields;
            // Clears first; explicit sets win.
            if fields.clear_raw_payload {
                record.snapshot.raw_payload = None;
            }
            if fields.clear_execution {
                record.executed = None;
                record.receipt = None;
                record.executed_at_ms = None;
            }
            if fields.clear_failure {
                record.failure = None;
            }
            if let Some(status) = fields.status {
                record.snapshot.status = status;
            }
            if let Some(executed) = fields.executed {
                record.executed = Some(executed);
            }
            if let Some(receipt) = fields.receipt {
                record.receipt = Some(receipt);
            }
            if let Some(ts) = fields.executed_at_ms {
                record.executed_at_ms = Some(ts);
            }
            if let Some(failure) = fields.failure {
                record.failure = Some(failure);
            }
            if let Some(count) = fields.resend_count {
                record.snapshot.resend_count = count;
            }
            if let Some(flag) = fields.temp_replaced_by_sibling {
                record.temp_replaced_by_sibling = flag;
            }
        }
        Ok(())
    }

    async fn scan_unsettled_keys(&self) -> Result<Vec<SyncKey>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut keys: Vec<SyncKey> = rows
            .iter()
            .filter(|(_, records)| {
                records
                    .iter()
                    .any(|r| self.in_purview(r) && r.snapshot.status != TxStatus::TempReplaced)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_by(|a, b| (&a.address, a.network).cmp(&(&b.address, b.network)));
        Ok(keys)
    }
}
