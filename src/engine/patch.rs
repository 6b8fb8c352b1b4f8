//! Field patches proposed by the engine.
//!
//! The engine never writes state; it returns patches and the sync service
//! applies them as one atomic batch. Multiple patches for the same
//! transaction within a run are merged here, later fields winning.

use std::collections::HashMap;

use crate::types::{ExecutedStatus, Receipt, TxFailure, TxId, TxStatus};

/// Partial overwrite of one stored transaction.
///
/// `Some(_)` fields overwrite, `clear_*` flags null the target fields out.
/// When a merged patch carries both a clear flag and a set for the same
/// field, the clear applies first; the set wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchFields {
    pub status: Option<TxStatus>,
    /// Drop the retained signed payload (terminal success or replacement).
    pub clear_raw_payload: bool,
    pub executed: Option<ExecutedStatus>,
    pub receipt: Option<Receipt>,
    pub executed_at_ms: Option<u64>,
    /// Null out executed/receipt/executed_at, for reversible detours.
    pub clear_execution: bool,
    pub failure: Option<TxFailure>,
    pub clear_failure: bool,
    pub resend_count: Option<u32>,
    pub temp_replaced_by_sibling: Option<bool>,
}

impl PatchFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Later-wins merge of `other` on top of `self`.
    fn absorb(&mut self, other: PatchFields) {
        if other.status.is_some() {
            self.status = other.status;
        }
        self.clear_raw_payload |= other.clear_raw_payload;
        if other.executed.is_some() {
            self.executed = other.executed;
        }
        if other.receipt.is_some() {
            self.receipt = other.receipt;
        }
        if other.executed_at_ms.is_some() {
            self.executed_at_ms = other.executed_at_ms;
        }
        self.clear_execution |= other.clear_execution;
        if other.failure.is_some() {
            self.failure = other.failure;
        }
        self.clear_failure |= other.clear_failure;
        if other.resend_count.is_some() {
            self.resend_count = other.resend_count;
        }
        if other.temp_replaced_by_sibling.is_some() {
            self.temp_replaced_by_sibling = other.temp_replaced_by_sibling;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxPatch {
    pub id: TxId,
    pub fields: PatchFields,
}

/// Per-run patch accumulator. Keeps first-touched order so the returned
/// list is deterministic.
#[derive(Default)]
pub(crate) struct PatchSet {
    order: Vec<TxId>,
    by_id: HashMap<TxId, PatchFields>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, id: TxId, fields: PatchFields) {
        match self.by_id.get_mut(&id) {
            Some(existing) => existing.absorb(fields),
            None => {
                self.order.push(id);
                self.by_id.insert(id, fields);
            }
        }
    }

    pub fn into_patches(mut self) -> Vec<TxPatch> {
        self.order
            .drain(..)
            .filter_map(|id| {
                let fields = self.by_id.remove(&id)?;
                if fields.is_empty() {
                    None
                } else {
                    Some(TxPatch { id, fields })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_fields_win() {
        let mut set = PatchSet::new();
        set.merge(
            TxId(1),
            PatchFields {
                status: Some(TxStatus::Discarded),
                ..Default::default()
            },
        );
        set.merge(
            TxId(1),
            PatchFields {
                status: Some(TxStatus::Replaced),
                clear_raw_payload: true,
                ..Default::default()
            },
        );

        let patches = set.into_patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].fields.status, Some(TxStatus::Replaced));
        assert!(patches[0].fields.clear_raw_payload);
    }

    #[test]
    fn earlier_fields_survive_when_not_overwritten() {
        let mut set = PatchSet::new();
        set.merge(
            TxId(2),
            PatchFields {
                resend_count: Some(1),
                ..Default::default()
            },
        );
        set.merge(
            TxId(2),
            PatchFields {
                status: Some(TxStatus::Pending),
                ..Default::default()
            },
        );

        let patches = set.into_patches();
        assert_eq!(patches[0].fields.resend_count, Some(1));
        assert_eq!(patches[0].fields.status, Some(TxStatus::Pending));
    }

    #[test]
    fn empty_merges_produce_no_patches() {
        let mut set = PatchSet::new();
        set.merge(TxId(3), PatchFields::default());
        assert!(set.into_patches().is_empty());
    }

    #[test]
    fn order_is_first_touched() {
        let mut set = PatchSet::new();
        for id in [TxId(5), TxId(2), TxId(9)] {
            set.merge(
                id,
                PatchFields {
                    status: Some(TxStatus::Pending),
                    ..Default::default()
                },
            );
        }
        set.merge(
            TxId(2),
            PatchFields {
                clear_failure: true,
                ..Default::default()
            },
        );

        let ids: Vec<_> = set.into_patches().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![TxId(5), TxId(2), TxId(9)]);
    }
}
