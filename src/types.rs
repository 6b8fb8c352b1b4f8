//! Shared domain vocabulary for the reconciliation core.
//!
//! Everything here is plain data: identifiers, lifecycle states, and the
//! chain-reported finality watermarks. No component logic lives in this module.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// On-chain account address, kept in the chain's own string form
/// (`0x…` for both supported families).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a network in the host wallet's registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u64);

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "net#{}", self.0)
    }
}

/// One polling target: an address on a network.
///
/// Ephemeral: derived from the store's active-transaction scan, never
/// persisted by the core itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SyncKey {
    pub address: Address,
    pub network: NetworkId,
}

impl std::fmt::Display for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.address, self.network)
    }
}

/// Opaque store-assigned transaction identity, stable for the
/// transaction's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Transaction hash as the chain reports it (`0x…` hex).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash of the block (or pivot block, for the epoch family) a receipt
/// landed in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub String);

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a tracked transaction.
///
/// Settlement only ever moves forward: `Finalized` and `Replaced` are
/// terminal, `Discarded` is terminal unless the transaction is resent,
/// and `TempReplaced` is the one reversible detour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    /// Broadcast locally but nonce not yet reachable on the network.
    Waiting,
    /// In the network's view (or assumed to be) and awaiting execution.
    Pending,
    /// Executed with a receipt, containing block not yet safe.
    Executed,
    /// Containing block at or below the safe watermark.
    Confirmed,
    /// Containing block at or below the finalized watermark. Terminal.
    Finalized,
    /// Nonce observed as used by something else, not irreversibly.
    TempReplaced,
    /// Nonce irreversibly consumed by a different transaction. Terminal.
    Replaced,
    /// Vanished from the network with the nonce still unclaimed.
    Discarded,
}

impl TxStatus {
    /// True while the transaction is still the core's concern.
    pub fn is_unsettled(self) -> bool {
        matches!(
            self,
            TxStatus::Waiting
                | TxStatus::Pending
                | TxStatus::Executed
                | TxStatus::Confirmed
                | TxStatus::TempReplaced
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Finalized | TxStatus::Replaced)
    }

    /// Coarse settlement progress, used only to pick the dominant status
    /// hint for a run. Not an ordering over correctness.
    pub(crate) fn settle_rank(self) -> u8 {
        match self {
            TxStatus::Finalized => 7,
            TxStatus::Confirmed => 6,
            TxStatus::Executed => 5,
            TxStatus::Pending => 4,
            TxStatus::TempReplaced => 3,
            TxStatus::Replaced => 2,
            TxStatus::Discarded => 1,
            TxStatus::Waiting => 0,
        }
    }
}

/// Outcome of an executed transaction, from the chain's own success flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutedStatus {
    Succeeded,
    Failed,
}

/// Why a transaction ended up in a failed or superseded state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxFailureKind {
    /// Nonce irreversibly consumed by an unrelated transaction.
    ReplacedByAnother,
    /// A sibling sharing this nonce finalized instead.
    ReplacedBySibling,
    /// Executed on chain but the VM reported failure.
    ExecuteFailed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxFailure {
    pub kind: TxFailureKind,
    pub message: String,
}

impl TxFailure {
    pub fn new(kind: TxFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Chain-reported finality watermarks, recomputed on every engine run.
///
/// Block numbers for the EVM family, epoch numbers for the epoch family.
/// A receipt at or below `finalized` is irreversible; at or below `safe`
/// it is confirmed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FinalityWaterline {
    pub safe: Option<u64>,
    pub finalized: Option<u64>,
}

/// Receipt in the core's normalized shape. The family-specific raw JSON is
/// retained verbatim so the store can persist whatever the chain returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Block number (EVM) or epoch number (epoch family) of the
    /// containing block.
    pub block_number: u64,
    pub block_hash: Option<BlockHash>,
    pub gas_used: Option<u64>,
    pub success: bool,
    pub raw: serde_json::Value,
}

/// Read-only view of one stored transaction, handed to the engine.
///
/// Owned by the store; the engine never mutates it, only proposes patches.
#[derive(Clone, Debug)]
pub struct TxSnapshot {
    pub id: TxId,
    pub status: TxStatus,
    /// Sender-account sequence number this transaction claims. Absent when
    /// the store could not determine it; such rows are skipped by the
    /// sync service.
    pub nonce: Option<u64>,
    pub hash: Option<TxHash>,
    /// Signed wire bytes, retained until terminal success so the
    /// transaction can be rebroadcast.
    pub raw_payload: Option<Bytes>,
    pub resend_count: u32,
    /// Creation instant in unix millis. Used only as a tie-breaker when
    /// picking the resend candidate.
    pub created_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsettled_and_terminal_partition() {
        let all = [
            TxStatus::Waiting,
            TxStatus::Pending,
            TxStatus::Executed,
            TxStatus::Confirmed,
            TxStatus::Finalized,
            TxStatus::TempReplaced,
            TxStatus::Replaced,
            TxStatus::Discarded,
        ];

        for s in all {
            assert!(
                !(s.is_unsettled() && s.is_terminal()),
                "{s:?} cannot be both unsettled and terminal"
            );
        }

        assert!(TxStatus::Finalized.is_terminal());
        assert!(TxStatus::Replaced.is_terminal());
        // Discarded is terminal only while no resend happens, so it is
        // reported as neither.
        assert!(!TxStatus::Discarded.is_terminal());
        assert!(!TxStatus::Discarded.is_unsettled());
    }
}
