//! Sync service: orchestration around the engine for one key at a time.
//!
//! Loads the address's unsettled transactions, narrows them to the lowest
//! outstanding nonce group, runs the engine, and writes whatever patches
//! come back as one atomic batch. Holds no state of its own between calls.

pub mod store;

#[cfg(test)]
mod tests;

pub use store::{MemStore, TxRecord, TxStore};

use std::sync::Arc;

use crate::chain::ChainDriver;
use crate::engine::{ReconcileEngine, RunOptions};
use crate::error::SyncError;
use crate::types::{SyncKey, TxSnapshot, TxStatus};

/// What one key refresh did, for logs and tests.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub patches_applied: usize,
    pub dominant: Option<TxStatus>,
}

pub struct SyncService<S> {
    store: Arc<S>,
    engine: ReconcileEngine,
}

impl<S: TxStore> SyncService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            engine: ReconcileEngine::new(),
        }
    }

    /// Reconcile the key's lowest outstanding nonce group against the
    /// chain. No-op when the address has nothing unsettled or the run
    /// proposed nothing.
    pub async fn refresh_key(
        &self,
        key: &SyncKey,
        driver: &dyn ChainDriver,
        max_resend_count: u32,
    ) -> Result<RefreshOutcome, SyncError> {
        let rows = self.store.query_unsettled(key).await?;

        // Rows whose nonce the store could not determine cannot be grouped
        // and sit out until it can.
        let known: Vec<TxSnapshot> = rows.into_iter().filter(|s| s.nonce.is_some()).collect();
        let Some(min_nonce) = known.iter().filter_map(|s| s.nonce).min() else {
            return Ok(RefreshOutcome::default());
        };
        let group: Vec<TxSnapshot> = known
            .into_iter()
            .filter(|s| s.nonce == Some(min_nonce))
            .collect();

        log::trace!(
            "[SYNC] {key}: reconciling nonce {min_nonce} ({} txs)",
            group.len()
        );

        let outcome = self
            .engine
            .run(
                &key.address,
                &group,
                driver,
                &RunOptions {
                    resend_requested: true,
                    max_resend_count,
                },
            )
            .await?;

        let patches_applied = outcome.patches.len();
        if patches_applied > 0 {
            log::debug!("[SYNC] {key}: applying {patches_applied} patches");
            self.store.apply_patches(outcome.patches).await?;
        }

        Ok(RefreshOutcome {
            patches_applied,
            dominant: outcome.dominant,
        })
    }

    /// Keys the scheduler should be polling right now.
    pub async fn scan_active_keys(&self) -> Result<Vec<SyncKey>, SyncError> {
        Ok(self.store.scan_unsettled_keys().await?)
    }
}
