//! Reconciliation decision engine.
//!
//! This module is the **Functional Core** of transaction settlement: one
//! run takes a read-only snapshot of a nonce group plus a chain driver and
//! produces a list of field patches.
//!
//! # Architecture guarantees
//! * **No store access**: the engine reads snapshots and returns patches;
//!   writing them is the sync service's job.
//! * **One side effect**: the single conditional rebroadcast of a vanished
//!   transaction goes through the driver; everything else is read-only.
//! * **No partial commits**: any RPC failure aborts the run and the whole
//!   patch set is dropped, so a mid-run failure cannot corrupt the store.

pub mod patch;


pub use patch::{PatchFields, TxPatch};

use std::collections::HashMap;

use crate::chain::{ChainDriver, NonceUsedState, NormalizeInput, TxPresence};
use crate::error::{DriverError, EngineError};
use crate::types::{
    Address, BlockHash, FinalityWaterline, TxFailure, TxFailureKind, TxHash, TxId, TxSnapshot,
    TxStatus,
};

use patch::PatchSet;

/// Per-run knobs, decided by the caller.
#[derive(Clone, Copy, Debug)]
pub struct RunOptions {
    /// Whether a vanished transaction may be rebroadcast this run.
    pub resend_requested: bool,
    /// Rebroadcast attempts allowed per transaction.
    pub max_resend_count: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resend_requested: true,
            max_resend_count: 3,
        }
    }
}

/// What one engine run decided.
#[derive(Debug)]
pub struct RunOutcome {
    pub patches: Vec<TxPatch>,
    /// Most settled status observed across the group. A hint for callers,
    /// not authoritative.
    pub dominant: Option<TxStatus>,
}

/// The settlement state machine. Stateless across runs; everything it
/// knows arrives through the arguments of [`ReconcileEngine::run`].
#[derive(Default)]
pub struct ReconcileEngine;

impl ReconcileEngine {
    pub fn new() -> Self {
        Self
    }

    /// Reconcile one nonce group against the chain.
    ///
    /// `group` must be the transactions sharing the address's lowest
    /// outstanding nonce; evaluating a higher nonce before the lower one
    /// resolves is meaningless, so the service never hands one over.
    pub async fn run(
        &self,
        address: &Address,
        group: &[TxSnapshot],
        driver: &dyn ChainDriver,
        opts: &RunOptions,
    ) -> Result<RunOutcome, EngineError> {
        let Some(group_nonce) = group.iter().filter_map(|s| s.nonce).min() else {
            return Ok(RunOutcome {
                patches: Vec::new(),
                dominant: None,
            });
        };

        let mut run = RunState {
            driver,
            address,
            nonce: group_nonce,
            statuses: group.iter().map(|s| (s.id, s.status)).collect(),
            patches: PatchSet::new(),
            nonce_used: None,
            waterline: None,
            resend_done: false,
        };

        // The single designated resend candidate for the group: latest
        // created_at among transactions that still hold their payload and
        // have attempts left.
        let resend_candidate: Option<TxId> = group
            .iter()
            .filter(|s| s.raw_payload.is_some() && s.resend_count < opts.max_resend_count)
            .max_by_key(|s| (s.created_at_ms, s.id))
            .map(|s| s.id);

        // 1) Promote WAITING transactions whose nonce became reachable;
        //    anything still above the pending nonce sits this run out.
        let pending_nonce = driver.pending_nonce(address).await?;
        log::trace!("[ENGINE] {address} pending nonce = {pending_nonce}");

        let mut candidates: Vec<&TxSnapshot> = Vec::new();
        for snap in group {
            let Some(nonce) = snap.nonce else { continue };
            if snap.status == TxStatus::Waiting {
                if nonce <= pending_nonce {
                    run.patch(
                        snap.id,
                        PatchFields {
                            status: Some(TxStatus::Pending),
                            ..Default::default()
                        },
                    );
                    candidates.push(snap);
                }
            } else {
                candidates.push(snap);
            }
        }

        // 2) Presence probe for every candidate that has been broadcast.
        let probed: Vec<(&TxSnapshot, TxHash)> = candidates
            .iter()
            .filter_map(|s| s.hash.clone().map(|h| (*s, h)))
            .collect();
        let hashes: Vec<TxHash> = probed.iter().map(|(_, h)| h.clone()).collect();
        let presences = if hashes.is_empty() {
            Vec::new()
        } else {
            driver.batch_presence(&hashes).await?
        };
        if presences.len() != hashes.len() {
            return Err(DriverError::malformed(
                "batch_presence",
                format!("{} answers for {} hashes", presences.len(), hashes.len()),
            )
            .into());
        }

        let mut gone: Vec<&TxSnapshot> = Vec::new();
        let mut present: Vec<&TxSnapshot> = Vec::new();
        let mut present_hashes: Vec<TxHash> = Vec::new();
        for ((snap, hash), presence) in probed.iter().zip(&presences) {
            match presence {
                TxPresence::Present => {
                    present.push(*snap);
                    present_hashes.push(hash.clone());
                }
                TxPresence::Missing | TxPresence::SkippedOrReplaced => gone.push(*snap),
            }
        }

        // 3) Vanished transactions: resolve against the nonce counters.
        for snap in gone {
            match run.nonce_used().await? {
                NonceUsedState::FinalizedUsed => run.mark_replaced_by_another(snap.id),
                NonceUsedState::TempUsed => run.mark_temp_replaced(snap.id),
                NonceUsedState::NotUsed => {
                    let is_candidate = opts.resend_requested
                        && !run.resend_done
                        && resend_candidate == Some(snap.id);
                    match snap.raw_payload.as_ref() {
                        Some(raw) if is_candidate => {
                            driver
                                .send_raw_transaction(raw)
                                .await
                                .map_err(EngineError::ResendRejected)?;
                            run.resend_done = true;
                            run.patch(
                                snap.id,
                                PatchFields {
                                    status: Some(TxStatus::Pending),
                                    resend_count: Some(snap.resend_count + 1),
                                    clear_failure: true,
                                    temp_replaced_by_sibling: Some(false),
                                    ..Default::default()
                                },
                            );
                            log::info!(
                                "[ENGINE] resent {} nonce {} (attempt {})",
                                snap.id,
                                group_nonce,
                                snap.resend_count + 1
                            );
                        }
                        _ => {
                            if run.status_of(snap.id) != TxStatus::Discarded {
                                run.patch(
                                    snap.id,
                                    PatchFields {
                                        status: Some(TxStatus::Discarded),
                                        ..Default::default()
                                    },
                                );
                            }
                        }
                    }
                }
            }
        }

        // 4) Present transactions: split on receipt availability.
        let receipts = if present_hashes.is_empty() {
            Vec::new()
        } else {
            driver.batch_receipts(&present_hashes).await?
        };
        if receipts.len() != present_hashes.len() {
            return Err(DriverError::malformed(
                "batch_receipts",
                format!(
                    "{} answers for {} hashes",
                    receipts.len(),
                    present_hashes.len()
                ),
            )
            .into());
        }

        let mut executed: Vec<(&TxSnapshot, crate::chain::RawReceipt)> = Vec::new();
        for (snap, receipt) in present.iter().copied().zip(receipts) {
            match receipt {
                Some(r) => executed.push((snap, r)),
                // Known to the network but not yet executed: the nonce
                // counters decide whether something else is winning.
                None => match run.nonce_used().await? {
                    NonceUsedState::FinalizedUsed => run.mark_replaced_by_another(snap.id),
                    NonceUsedState::TempUsed => run.mark_temp_replaced(snap.id),
                    NonceUsedState::NotUsed => {
                        if run.status_of(snap.id) != TxStatus::Pending {
                            run.patch(
                                snap.id,
                                PatchFields {
                                    status: Some(TxStatus::Pending),
                                    temp_replaced_by_sibling: Some(false),
                                    ..Default::default()
                                },
                            );
                        }
                    }
                },
            }
        }

        // 5) Receipts: classify against the waterline, stamped with the
        //    containing block's time.
        if !executed.is_empty() {
            let waterline = run.waterline().await?;

            let mut blocks: Vec<BlockHash> = Vec::new();
            for (_, receipt) in &executed {
                if let Some(hash) = &receipt.block_hash {
                    if !blocks.contains(hash) {
                        blocks.push(hash.clone());
                    }
                }
            }
            let stamps = if blocks.is_empty() {
                Vec::new()
            } else {
                driver.batch_block_timestamps_ms(&blocks).await?
            };
            let ts_by_block: HashMap<&BlockHash, u64> = blocks
                .iter()
                .zip(stamps)
                .filter_map(|(h, t)| t.map(|t| (h, t)))
                .collect();

            for (snap, receipt) in executed {
                let executed_at_ms = receipt
                    .block_hash
                    .as_ref()
                    .and_then(|h| ts_by_block.get(h).copied())
                    .unwrap_or(0);
                let normalized = driver.normalize_executed(NormalizeInput {
                    receipt,
                    executed_at_ms,
                    waterline,
                });

                // Unchanged status means the store already holds this
                // outcome from an earlier run; a lower one means the
                // node's watermark report is lagging. Settlement never
                // regresses, so both are skipped.
                let current = run.status_of(snap.id);
                if matches!(
                    current,
                    TxStatus::Executed | TxStatus::Confirmed | TxStatus::Finalized
                ) && normalized.status.settle_rank() <= current.settle_rank()
                {
                    continue;
                }

                let mut fields = PatchFields {
                    status: Some(normalized.status),
                    executed: Some(normalized.executed),
                    receipt: Some(normalized.receipt),
                    executed_at_ms: Some(normalized.executed_at_ms),
                    temp_replaced_by_sibling: Some(false),
                    ..Default::default()
                };
                match normalized.error {
                    Some(message) => {
                        fields.failure = Some(TxFailure::new(TxFailureKind::ExecuteFailed, message))
                    }
                    None => fields.clear_failure = true,
                }
                if normalized.status == TxStatus::Finalized {
                    fields.clear_raw_payload = true;
                }
                run.patch(snap.id, fields);
            }
        }

        // 6) Winner-take-all: one finalized transaction settles the whole
        //    nonce group, including members excluded back in step 1.
        let winner = run
            .statuses
            .iter()
            .find(|(_, s)| **s == TxStatus::Finalized)
            .map(|(id, _)| *id);
        if let Some(winner) = winner {
            for snap in group {
                if snap.id == winner {
                    continue;
                }
                let current = run.status_of(snap.id);
                if current == TxStatus::Replaced || current == TxStatus::Finalized {
                    continue;
                }
                run.patch(
                    snap.id,
                    PatchFields {
                        status: Some(TxStatus::Replaced),
                        clear_raw_payload: true,
                        failure: Some(TxFailure::new(
                            TxFailureKind::ReplacedBySibling,
                            "a transaction sharing this nonce finalized",
                        )),
                        ..Default::default()
                    },
                );
            }
            log::debug!("[ENGINE] nonce {group_nonce} settled by {winner}");
        }

        let dominant = run
            .statuses
            .values()
            .copied()
            .max_by_key(|s| s.settle_rank());

        Ok(RunOutcome {
            patches: run.patches.into_patches(),
            dominant,
        })
    }
}

/// Mutable state threaded through one run. The `statuses` map always
/// reflects patches already proposed, so a later step's read of "current
/// status" sees earlier steps' work.
struct RunState<'a> {
    driver: &'a dyn ChainDriver,
    address: &'a Address,
    nonce: u64,
    statuses: HashMap<TxId, TxStatus>,
    patches: PatchSet,
    nonce_used: Option<NonceUsedState>,
    waterline: Option<FinalityWaterline>,
    resend_done: bool,
}

impl RunState<'_> {
    fn patch(&mut self, id: TxId, fields: PatchFields) {
        if let Some(status) = fields.status {
            self.statuses.insert(id, status);
        }
        self.patches.merge(id, fields);
    }

    fn status_of(&self, id: TxId) -> TxStatus {
        self.statuses.get(&id).copied().unwrap_or(TxStatus::Pending)
    }

    /// All members of a group share the nonce, so the used-state is
    /// resolved at most once per run.
    async fn nonce_used(&mut self) -> Result<NonceUsedState, DriverError> {
        if let Some(state) = self.nonce_used {
            return Ok(state);
        }
        let state = self.driver.nonce_used_state(self.address, self.nonce).await?;
        log::trace!("[ENGINE] nonce {} used-state = {state:?}", self.nonce);
        self.nonce_used = Some(state);
        Ok(state)
    }

    /// Fetched at most once per run, never cached across runs.
    async fn waterline(&mut self) -> Result<FinalityWaterline, DriverError> {
        if let Some(waterline) = self.waterline {
            return Ok(waterline);
        }
        let waterline = self.driver.finality_waterline().await?;
        self.waterline = Some(waterline);
        Ok(waterline)
    }

    fn mark_replaced_by_another(&mut self, id: TxId) {
        if self.status_of(id) == TxStatus::Replaced {
            return;
        }
        self.patch(
            id,
            PatchFields {
                status: Some(TxStatus::Replaced),
                clear_raw_payload: true,
                failure: Some(TxFailure::new(
                    TxFailureKind::ReplacedByAnother,
                    "nonce consumed by a different transaction",
                )),
                ..Default::default()
            },
        );
    }

    fn mark_temp_replaced(&mut self, id: TxId) {
        if self.status_of(id) == TxStatus::TempReplaced {
            return;
        }
        self.patch(
            id,
            PatchFields {
                status: Some(TxStatus::TempReplaced),
                clear_execution: true,
                temp_replaced_by_sibling: Some(true),
                ..Default::default()
            },
        );
    }
}
