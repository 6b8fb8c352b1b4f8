//! Error taxonomy for the reconciliation core.
//!
//! There is no fatal class here: every failure is either absorbed into a
//! "retry on the next poll" outcome by the scheduler, or surfaced to the
//! caller as a rejected operation for one key.

use thiserror::Error;

use crate::types::NetworkId;

/// Failures surfaced by a chain driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The underlying transport could not complete the request
    /// (timeout, connection loss, HTTP failure).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered, but not in a shape the driver recognizes.
    #[error("malformed response for {method}: {detail}")]
    Malformed { method: String, detail: String },
}

impl DriverError {
    pub fn malformed(method: &str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            method: method.to_string(),
            detail: detail.into(),
        }
    }
}

/// Failures out of a single engine run. A mid-run failure discards the
/// whole run's patch set; nothing is partially written.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The network rejected a rebroadcast of the raw payload.
    #[error("resend rejected: {0}")]
    ResendRejected(DriverError),
}

/// Failures from the transaction store.
#[derive(Debug, Error)]
#[error("store failure: {0}")]
pub struct StoreError(pub String);

/// Failures out of a sync-service operation for one key.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("no chain driver registered for {0}")]
    MissingDriver(NetworkId),
}
