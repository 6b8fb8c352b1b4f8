//! Sync scheduler.
//!
//! Long-lived coordinator deciding when and in what order keys are
//! refreshed. The decision logic lives in [`core`] and runs to completion
//! synchronously; this module is the **Imperative Shell** around it:
//! 1. Feed the core the clock and inbound wallet events.
//! 2. Execute the refresh/scan actions it emits as tokio tasks.
//! 3. Report completions back so keys get re-armed.
//!
//! Stopping is generation-based, not preemptive: `stop` bumps the
//! generation and aborts the pump loop, but refreshes already in flight
//! run to completion; their completions are discarded when the generation
//! no longer matches. A restart rebuilds all scheduling state from
//! scratch via the periodic store scan.

pub mod clock;
pub mod events;

mod core;

#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, TokioClock};
pub use events::WalletEvent;
pub use self::core::SchedulerStatus;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chain::ChainRegistry;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::service::{SyncService, TxStore};
use crate::types::SyncKey;

use self::core::{PumpAction, SchedulerCore};

/// Sleep used when the core reports nothing scheduled; completions and
/// events interrupt it long before it elapses.
const IDLE_SLEEP_MS: u64 = 60_000;

enum Done {
    Refresh { key: SyncKey, generation: u64 },
    Scan {
        result: Result<Vec<SyncKey>, SyncError>,
        generation: u64,
    },
}

struct Running {
    cmd_tx: mpsc::UnboundedSender<WalletEvent>,
    task: JoinHandle<()>,
}

pub struct SyncScheduler<S, R, C> {
    service: Arc<SyncService<S>>,
    registry: Arc<R>,
    clock: Arc<C>,
    cfg: SyncConfig,
    generation: Arc<AtomicU64>,
    status: Arc<Mutex<SchedulerStatus>>,
    running: Mutex<Option<Running>>,
}

impl<S, R, C> SyncScheduler<S, R, C>
where
    S: TxStore + 'static,
    R: ChainRegistry + 'static,
    C: Clock,
{
    pub fn new(service: Arc<SyncService<S>>, registry: Arc<R>, clock: Arc<C>, cfg: SyncConfig) -> Self {
        Self {
            service,
            registry,
            clock,
            cfg,
            generation: Arc::new(AtomicU64::new(0)),
            status: Arc::new(Mutex::new(SchedulerStatus::default())),
            running: Mutex::new(None),
        }
    }

    /// Spawn the pump loop. Idempotent while already running.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("[SCHED] starting (generation {generation})");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_loop(
            self.service.clone(),
            self.registry.clone(),
            self.clock.clone(),
            self.cfg,
            self.generation.clone(),
            generation,
            cmd_rx,
            self.status.clone(),
        ));

        *running = Some(Running { cmd_tx, task });
    }

    /// Tear down timers and subscriptions immediately. In-flight refreshes
    /// finish on their own; their completions die on the generation check.
    pub fn stop(&self) {
        let mut running = self.running.lock().unwrap();
        if let Some(r) = running.take() {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            log::info!("[SCHED] stopped (generation {generation})");
            r.task.abort();
        }
    }

    /// Hand an inbound wallet event to the pump loop. Dropped while the
    /// scheduler is stopped.
    pub fn notify(&self, event: WalletEvent) {
        if let Some(r) = &*self.running.lock().unwrap() {
            let _ = r.cmd_tx.send(event);
        }
    }

    /// Diagnostic snapshot of the current polling targets.
    pub fn status(&self) -> SchedulerStatus {
        self.status.lock().unwrap().clone()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop<S, R, C>(
    service: Arc<SyncService<S>>,
    registry: Arc<R>,
    clock: Arc<C>,
    cfg: SyncConfig,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    mut cmd_rx: mpsc::UnboundedReceiver<WalletEvent>,
    status: Arc<Mutex<SchedulerStatus>>,
) where
    S: TxStore + 'static,
    R: ChainRegistry + 'static,
    C: Clock,
{
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Done>();
    let mut core = SchedulerCore::new(cfg, clock.now_ms());

    loop {
        let now = clock.now_ms();

        for action in core.pump(now) {
            match action {
                PumpAction::Refresh(key) => match registry.driver_for(key.network) {
                    Some(driver) => {
                        let service = service.clone();
                        let done = done_tx.clone();
                        tokio::spawn(async move {
                            let result = service
                                .refresh_key(&key, driver.as_ref(), cfg.max_resend_count)
                                .await;
                            if let Err(err) = &result {
                                log::warn!("[SCHED] refresh {key} failed: {err}");
                            }
                            let _ = done.send(Done::Refresh {
                                key,
                                generation: my_generation,
                            });
                        });
                    }
                    None => {
                        log::warn!("[SCHED] no driver for {key}, skipping this cycle");
                        core.on_refresh_settled(&key, now);
                    }
                },
                PumpAction::Scan => {
                    let service = service.clone();
                    let done = done_tx.clone();
                    tokio::spawn(async move {
                        let result = service.scan_active_keys().await;
                        let _ = done.send(Done::Scan {
                            result,
                            generation: my_generation,
                        });
                    });
                }
            }
        }

        *status.lock().unwrap() = core.snapshot();

        let sleep_ms = core
            .next_wake_at()
            .map(|t| t.saturating_sub(now))
            .unwrap_or(IDLE_SLEEP_MS);

        tokio::select! {
            maybe_event = cmd_rx.recv() => match maybe_event {
                Some(event) => core.handle_event(event, clock.now_ms()),
                // Sender gone: the scheduler handle stopped us.
                None => break,
            },
            Some(done) = done_rx.recv() => {
                let now = clock.now_ms();
                let current = generation.load(Ordering::SeqCst);
                match done {
                    Done::Refresh { key, generation: done_generation } => {
                        if done_generation == current {
                            core.on_refresh_settled(&key, now);
                        } else {
                            log::trace!("[SCHED] stale completion for {key} discarded");
                        }
                    }
                    Done::Scan { result, generation: done_generation } => {
                        if done_generation != current {
                            continue;
                        }
                        match result {
                            Ok(keys) => core.on_scan_result(keys, now),
                            Err(err) => {
                                log::warn!("[SCHED] key scan failed: {err}");
                                core.on_scan_failed();
                            }
                        }
                    }
                }
            },
            _ = clock.sleep_ms(sleep_ms) => {}
        }
    }
}
