//! Inbound wallet events the scheduler reacts to.
//!
//! The core consumes these to reprioritize polling; it never emits events
//! of its own. Status changes are observed by callers re-reading the
//! store.

use crate::types::{Address, NetworkId, SyncKey};

#[derive(Clone, Debug)]
pub enum WalletEvent {
    /// The user switched accounts; the high-priority key follows.
    CurrentAccountChanged { address: Address },
    /// The user switched networks; the high-priority key follows.
    CurrentNetworkChanged { network: NetworkId },
    /// A transaction was just broadcast; poll its key next tick.
    TxCreated { key: SyncKey },
}
