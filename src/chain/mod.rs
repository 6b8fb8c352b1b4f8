//! Chain driver abstraction.
//!
//! One driver per chain family normalizes heterogeneous RPC semantics into
//! a single vocabulary the engine can reason over: nonce lookups, presence
//! and receipt probing, finality watermarks, and raw-transaction submission.
//!
//! Two families exist and only two:
//! * `evm`: block-number finality via `safe`/`finalized` block tags.
//! * `conflux`: epoch-based finality via a status call.
//!
//! A third family gets added here when one exists, not before.

pub mod conflux;
pub mod evm;
pub mod mock;
pub mod rpc;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::DriverError;
use crate::types::{
    Address, BlockHash, ExecutedStatus, FinalityWaterline, NetworkId, TxHash, TxStatus,
};

/// How the network sees a given (address, nonce) pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NonceUsedState {
    /// No chain activity has claimed the nonce.
    #[default]
    NotUsed,
    /// Some transaction at this nonce is observed but not yet final.
    TempUsed,
    /// A transaction at this nonce has been irreversibly committed.
    FinalizedUsed,
}

/// Whether the network still knows a broadcast transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxPresence {
    Present,
    Missing,
    /// The node recognizes the hash but reports a non-standard outcome
    /// (epoch family only); treated like a replacement.
    SkippedOrReplaced,
}

/// Family-parsed receipt, before finality classification. Field names are
/// already normalized; `raw` keeps the node's verbatim JSON.
#[derive(Clone, Debug)]
pub struct RawReceipt {
    /// Block number (EVM) or epoch number (epoch family). Defaulted to
    /// `None` when the node omitted it.
    pub block_number: Option<u64>,
    pub block_hash: Option<BlockHash>,
    pub gas_used: Option<u64>,
    pub success: bool,
    /// Chain-provided failure text, when the family carries one.
    pub exec_error: Option<String>,
    pub raw: serde_json::Value,
}

/// Input to [`ChainDriver::normalize_executed`].
#[derive(Clone, Debug)]
pub struct NormalizeInput {
    pub receipt: RawReceipt,
    /// Containing-block timestamp in unix millis, 0 when unresolvable.
    pub executed_at_ms: u64,
    pub waterline: FinalityWaterline,
}

/// Result of classifying a receipt against the finality waterline.
#[derive(Clone, Debug)]
pub struct NormalizedExecution {
    /// One of `Executed`, `Confirmed`, `Finalized`.
    pub status: TxStatus,
    pub executed: ExecutedStatus,
    pub receipt: crate::types::Receipt,
    pub executed_at_ms: u64,
    /// Failure text when `executed` is `Failed`.
    pub error: Option<String>,
}

/// Per-family chain adapter consumed by the engine.
///
/// Every async method maps to one (possibly batched) RPC round-trip;
/// failures propagate untranslated so the caller can abandon the whole
/// refresh cycle for the key.
#[async_trait]
pub trait ChainDriver: Send + Sync {
    /// Next nonce the network would accept for the address, mempool
    /// included.
    async fn pending_nonce(&self, address: &Address) -> Result<u64, DriverError>;

    /// Compare `nonce` against the address's latest and finalized nonce
    /// counters.
    async fn nonce_used_state(
        &self,
        address: &Address,
        nonce: u64,
    ) -> Result<NonceUsedState, DriverError>;

    /// Presence of each hash, in input order.
    async fn batch_presence(&self, hashes: &[TxHash]) -> Result<Vec<TxPresence>, DriverError>;

    /// Receipt for each hash (or `None`), in input order.
    async fn batch_receipts(
        &self,
        hashes: &[TxHash],
    ) -> Result<Vec<Option<RawReceipt>>, DriverError>;

    /// Current safe/finalized watermarks. Never cached across engine runs.
    async fn finality_waterline(&self) -> Result<FinalityWaterline, DriverError>;

    /// Unix-millis timestamp of each block, `None` where the node has no
    /// answer, in input order.
    async fn batch_block_timestamps_ms(
        &self,
        block_hashes: &[BlockHash],
    ) -> Result<Vec<Option<u64>>, DriverError>;

    /// Rebroadcast signed wire bytes, returning the network-assigned hash.
    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<TxHash, DriverError>;

    /// Classify an executed receipt into EXECUTED / CONFIRMED / FINALIZED
    /// against the waterline and map the family's success flag.
    fn normalize_executed(&self, input: NormalizeInput) -> NormalizedExecution;
}

/// Waterline classification shared by both families: at or below
/// `finalized` wins over at or below `safe`; otherwise merely executed.
pub(crate) fn classify_by_waterline(block_number: u64, waterline: &FinalityWaterline) -> TxStatus {
    if let Some(finalized) = waterline.finalized {
        if block_number <= finalized {
            return TxStatus::Finalized;
        }
    }
    if let Some(safe) = waterline.safe {
        if block_number <= safe {
            return TxStatus::Confirmed;
        }
    }
    TxStatus::Executed
}

/// Shared tail of `normalize_executed`: both families only differ in how
/// the receipt was parsed, which has already happened by this point.
pub(crate) fn normalize_parsed(input: NormalizeInput, default_err: &str) -> NormalizedExecution {
    let block_number = input.receipt.block_number.unwrap_or(0);
    let status = classify_by_waterline(block_number, &input.waterline);
    let executed = if input.receipt.success {
        ExecutedStatus::Succeeded
    } else {
        ExecutedStatus::Failed
    };
    let error = match executed {
        ExecutedStatus::Succeeded => None,
        ExecutedStatus::Failed => Some(
            input
                .receipt
                .exec_error
                .clone()
                .unwrap_or_else(|| default_err.to_string()),
        ),
    };

    NormalizedExecution {
        status,
        executed,
        receipt: crate::types::Receipt {
            block_number,
            block_hash: input.receipt.block_hash.clone(),
            gas_used: input.receipt.gas_used,
            success: input.receipt.success,
            raw: input.receipt.raw.clone(),
        },
        executed_at_ms: input.executed_at_ms,
        error,
    }
}

/// Resolves a network to its chain driver.
pub trait ChainRegistry: Send + Sync {
    fn driver_for(&self, network: NetworkId) -> Option<Arc<dyn ChainDriver>>;
}

/// Fixed driver table, enough for embedders that configure networks up
/// front.
#[derive(Default)]
pub struct StaticRegistry {
    drivers: std::collections::HashMap<NetworkId, Arc<dyn ChainDriver>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, network: NetworkId, driver: Arc<dyn ChainDriver>) {
        self.drivers.insert(network, driver);
    }
}

impl ChainRegistry for StaticRegistry {
    fn driver_for(&self, network: NetworkId) -> Option<Arc<dyn ChainDriver>> {
        self.drivers.get(&network).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waterline_boundaries_are_inclusive() {
        let wl = FinalityWaterline {
            safe: Some(15),
            finalized: Some(14),
        };

        assert_eq!(classify_by_waterline(14, &wl), TxStatus::Finalized);
        assert_eq!(classify_by_waterline(15, &wl), TxStatus::Confirmed);
        assert_eq!(classify_by_waterline(16, &wl), TxStatus::Executed);
    }

    #[test]
    fn missing_watermarks_degrade_to_executed() {
        let wl = FinalityWaterline::default();
        assert_eq!(classify_by_waterline(1, &wl), TxStatus::Executed);

        let only_safe = FinalityWaterline {
            safe: Some(10),
            finalized: None,
        };
        assert_eq!(classify_by_waterline(9, &only_safe), TxStatus::Confirmed);
    }
}
