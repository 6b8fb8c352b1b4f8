//! Transaction-finality reconciliation core for a multi-chain wallet.
//!
//! Tracks locally-broadcast transactions through the chain's confirmation
//! lifecycle, detects nonce races and replacements, rebroadcasts
//! transactions that silently vanished, and reports settled status
//! (executed / confirmed / finalized) as the chain advances.
//!
//! Four components, leaves first:
//! * [`chain`]: per-family drivers normalizing RPC semantics (EVM block
//!   tags vs. epoch-based finality) behind one vocabulary.
//! * [`engine`]: the pure settlement state machine, nonce-group snapshot
//!   in, field patches out.
//! * [`service`]: store glue that loads the lowest outstanding nonce
//!   group, runs the engine, and writes patches atomically.
//! * [`scheduler`]: decides when and in what order keys are refreshed,
//!   bounded by a global concurrency ceiling.
//!
//! The store, signing, session layers, and raw JSON-RPC framing are the
//! host wallet's business; the core consumes them through the traits in
//! [`service::store`], [`chain::rpc`], and [`scheduler::clock`].

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod types;

pub use chain::{ChainDriver, ChainRegistry, NonceUsedState, StaticRegistry, TxPresence};
pub use config::SyncConfig;
pub use engine::{ReconcileEngine, RunOptions, RunOutcome, TxPatch};
pub use error::{DriverError, EngineError, StoreError, SyncError};
pub use scheduler::{SyncScheduler, WalletEvent};
pub use service::{SyncService, TxStore};
pub use types::{
    Address, FinalityWaterline, NetworkId, SyncKey, TxHash, TxId, TxSnapshot, TxStatus,
};
