//! Scheduling decision core.
//!
//! Pure bookkeeping over virtual time: which key to refresh next, when to
//! rescan the store, how the hot key moves. The async shell in `mod.rs`
//! feeds it the clock and executes what it decides, mirroring the
//! engine/driver split one level up.

use std::collections::HashSet;

use crate::config::SyncConfig;
use crate::types::{Address, NetworkId, SyncKey};

use super::events::WalletEvent;

/// Sentinel for "a refresh is in flight, do not arm a deadline".
const PARKED: u64 = u64::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PumpAction {
    Refresh(SyncKey),
    Scan,
}

/// Diagnostic view of the scheduler's state.
#[derive(Clone, Debug, Default)]
pub struct SchedulerStatus {
    pub hot: Option<SyncKey>,
    pub background: Vec<SyncKey>,
    pub in_flight: usize,
}

#[derive(Debug)]
struct Slot {
    key: SyncKey,
    next_at: u64,
}

pub(crate) struct SchedulerCore {
    cfg: SyncConfig,
    current_address: Option<Address>,
    current_network: Option<NetworkId>,
    hot: Option<Slot>,
    background: Vec<Slot>,
    rr_cursor: usize,
    in_flight: HashSet<SyncKey>,
    scan_in_flight: bool,
    next_scan_at: u64,
}

impl SchedulerCore {
    pub fn new(cfg: SyncConfig, now: u64) -> Self {
        Self {
            cfg,
            current_address: None,
            current_network: None,
            hot: None,
            background: Vec::new(),
            rr_cursor: 0,
            in_flight: HashSet::new(),
            scan_in_flight: false,
            // First scan fires immediately so a fresh start discovers its
            // polling targets without waiting a full interval.
            next_scan_at: now,
        }
    }

    /// Decide everything that can be dispatched right now.
    pub fn pump(&mut self, now: u64) -> Vec<PumpAction> {
        let mut actions = Vec::new();

        if !self.scan_in_flight && now >= self.next_scan_at {
            self.scan_in_flight = true;
            self.next_scan_at = now + self.cfg.scan_interval_ms;
            actions.push(PumpAction::Scan);
        }

        while self.in_flight.len() < self.cfg.max_concurrency {
            let Some(key) = self.pick_due(now) else { break };
            self.in_flight.insert(key.clone());
            actions.push(PumpAction::Refresh(key));
        }

        actions
    }

    /// Hot key first, then round-robin over due background keys. Keys with
    /// a refresh already in flight are never picked twice.
    fn pick_due(&mut self, now: u64) -> Option<SyncKey> {
        if let Some(hot) = &mut self.hot {
            if hot.next_at <= now && !self.in_flight.contains(&hot.key) {
                hot.next_at = PARKED;
                return Some(hot.key.clone());
            }
        }

        let len = self.background.len();
        for step in 0..len {
            let idx = (self.rr_cursor + step) % len;
            if self.background[idx].next_at <= now
                && !self.in_flight.contains(&self.background[idx].key)
            {
                self.rr_cursor = (idx + 1) % len;
                self.background[idx].next_at = PARKED;
                return Some(self.background[idx].key.clone());
            }
        }

        None
    }

    /// A dispatched refresh finished (either way); re-arm its deadline.
    pub fn on_refresh_settled(&mut self, key: &SyncKey, now: u64) {
        self.in_flight.remove(key);

        if let Some(hot) = &mut self.hot {
            if hot.key == *key {
                hot.next_at = now + self.cfg.hot_interval_ms;
                return;
            }
        }
        if let Some(slot) = self.background.iter_mut().find(|s| s.key == *key) {
            slot.next_at = now + self.cfg.background_interval_ms;
        }
        // A key retired by a scan while its refresh was in flight simply
        // has no slot left to re-arm.
    }

    /// Reconcile the background set against a fresh store scan.
    pub fn on_scan_result(&mut self, keys: Vec<SyncKey>, now: u64) {
        self.scan_in_flight = false;

        let in_flight = &self.in_flight;
        self.background
            .retain(|slot| keys.contains(&slot.key) || in_flight.contains(&slot.key));

        for key in keys {
            if self.hot.as_ref().is_some_and(|h| h.key == key) {
                continue;
            }
            if self.background.iter().any(|s| s.key == key) {
                continue;
            }
            log::debug!("[SCHED] tracking {key}");
            self.background.push(Slot { key, next_at: now });
        }
        if self.rr_cursor >= self.background.len() {
            self.rr_cursor = 0;
        }
    }

    pub fn on_scan_failed(&mut self) {
        self.scan_in_flight = false;
    }

    pub fn handle_event(&mut self, event: WalletEvent, now: u64) {
        match event {
            WalletEvent::CurrentAccountChanged { address } => {
                self.current_address = Some(address);
                self.recompute_hot(now);
            }
            WalletEvent::CurrentNetworkChanged { network } => {
                self.current_network = Some(network);
                self.recompute_hot(now);
            }
            WalletEvent::TxCreated { key } => {
                if let Some(hot) = &mut self.hot {
                    if hot.key == key {
                        if hot.next_at != PARKED {
                            hot.next_at = now;
                        }
                        return;
                    }
                }
                match self.background.iter_mut().find(|s| s.key == key) {
                    Some(slot) => {
                        if slot.next_at != PARKED {
                            slot.next_at = now;
                        }
                    }
                    None => self.background.push(Slot { key, next_at: now }),
                }
            }
        }
    }

    /// Rebuild the high-priority key from the current account/network pair
    /// and poll it immediately. The previous hot key keeps getting
    /// background service until a scan retires it.
    fn recompute_hot(&mut self, now: u64) {
        let (Some(address), Some(network)) = (&self.current_address, self.current_network) else {
            return;
        };
        let key = SyncKey {
            address: address.clone(),
            network,
        };

        if let Some(hot) = &mut self.hot {
            if hot.key == key {
                if hot.next_at != PARKED {
                    hot.next_at = now;
                }
                return;
            }
        }

        if let Some(prev) = self.hot.take() {
            if !self.background.iter().any(|s| s.key == prev.key) {
                self.background.push(Slot {
                    key: prev.key,
                    next_at: now + self.cfg.background_interval_ms,
                });
            }
        }
        self.background.retain(|s| s.key != key);
        log::debug!("[SCHED] hot key -> {key}");
        self.hot = Some(Slot { key, next_at: now });
    }

    /// Earliest instant anything becomes due. `None` means only an
    /// in-flight completion can create new work.
    pub fn next_wake_at(&self) -> Option<u64> {
        let mut next: Option<u64> = None;
        let mut consider = |t: u64| {
            if t != PARKED {
                next = Some(next.map_or(t, |n| n.min(t)));
            }
        };

        if !self.scan_in_flight {
            consider(self.next_scan_at);
        }

        // At the ceiling, due keys cannot be dispatched anyway; waking for
        // them would spin until a completion frees a slot.
        if self.in_flight.len() < self.cfg.max_concurrency {
            if let Some(hot) = &self.hot {
                if !self.in_flight.contains(&hot.key) {
                    consider(hot.next_at);
                }
            }
            for slot in &self.background {
                if !self.in_flight.contains(&slot.key) {
                    consider(slot.next_at);
                }
            }
        }

        next
    }

    pub fn snapshot(&self) -> SchedulerStatus {
        SchedulerStatus {
            hot: self.hot.as_ref().map(|s| s.key.clone()),
            background: self.background.iter().map(|s| s.key.clone()).collect(),
            in_flight: self.in_flight.len(),
        }
    }
}
