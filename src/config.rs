//! Tunables for the sync scheduler and engine.
//!
//! The core has no config-file surface; the embedding wallet constructs a
//! `SyncConfig` and hands it to the scheduler.

/// All intervals are unix-milliseconds deltas against the injected clock.
#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    /// Poll interval for the key the user is actively viewing.
    pub hot_interval_ms: u64,
    /// Poll interval for background keys with pending activity.
    pub background_interval_ms: u64,
    /// How often the store is re-scanned for active keys.
    pub scan_interval_ms: u64,
    /// Global ceiling on concurrently in-flight key refreshes.
    pub max_concurrency: usize,
    /// How many times a vanished transaction may be rebroadcast before it
    /// stays discarded.
    pub max_resend_count: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hot_interval_ms: 4_000,
            background_interval_ms: 30_000,
            scan_interval_ms: 60_000,
            max_concurrency: 4,
            max_resend_count: 3,
        }
    }
}
