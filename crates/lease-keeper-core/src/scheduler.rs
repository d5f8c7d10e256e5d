//! Background loop driving lease renewal.
//!
//! The scheduler owns one task per client. Every tick interval it asks the
//! [`BatchProcessor`] to renew whatever is due. A stop request lets an
//! in-flight tick finish; no transport call is ever cancelled halfway.
//!
//! ```text
//! Stopped --start()--> Running --stop()--> Draining --(tick done)--> Stopped
//! ```

use crate::processor::{BatchProcessor, TickReport};
use crate::tracker::LeaseTracker;
use lease_keeper_runtime::Timestamp;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;

/// Lifecycle state of the renewal loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    /// Stop requested; waiting for the current tick to finish
    Draining,
}

struct LoopControl {
    state: SchedulerState,
    /// Bumped on every start so a finishing old loop cannot mark a newer one stopped
    generation: u64,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

/// Periodic renewal scheduler
pub struct ExtensionScheduler {
    processor: Arc<BatchProcessor>,
    tracker: Arc<LeaseTracker>,
    tick_interval: Duration,
    error_backoff: Duration,
    control: Arc<Mutex<LoopControl>>,
}

impl ExtensionScheduler {
    pub fn new(
        processor: Arc<BatchProcessor>,
        tracker: Arc<LeaseTracker>,
        tick_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            processor,
            tracker,
            tick_interval,
            error_backoff,
            control: Arc::new(Mutex::new(LoopControl {
                state: SchedulerState::Stopped,
                generation: 0,
                shutdown_tx: None,
                handle: None,
            })),
        }
    }

    pub fn state(&self) -> SchedulerState {
        lock(&self.control).state
    }

    /// Start the renewal loop; `false` if it is already running or draining
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut control = lock(&self.control);
        if control.state != SchedulerState::Stopped {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        control.generation += 1;
        let generation = control.generation;

        let handle = tokio::spawn(run_loop(
            self.processor.clone(),
            self.tick_interval,
            self.error_backoff,
            shutdown_rx,
            self.control.clone(),
            generation,
        ));

        control.state = SchedulerState::Running;
        control.shutdown_tx = Some(shutdown_tx);
        control.handle = Some(handle);

        info!(
            interval_ms = self.tick_interval.as_millis() as u64,
            "Visibility extension scheduler started"
        );
        true
    }

    /// Ask the loop to stop after the current tick; does not wait
    pub fn stop(&self) {
        request_stop(&mut lock(&self.control));
    }

    /// Stop the loop, wait for it to finish and drop every lease
    pub async fn shutdown(&self) {
        // Signal and take the handle under one lock so a concurrent start()
        // cannot slip its own loop in between.
        let (generation, handle) = {
            let mut control = lock(&self.control);
            request_stop(&mut control);
            (control.generation, control.handle.take())
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Visibility extension loop ended abnormally");
            }
        }

        {
            let mut control = lock(&self.control);
            // A loop started while we waited belongs to its own caller.
            if control.generation == generation {
                control.state = SchedulerState::Stopped;
                control.shutdown_tx = None;
            }
        }

        self.tracker.clear();
        info!("Visibility extension scheduler stopped");
    }

    /// Run one tick in the calling task
    pub async fn run_tick(&self, now: Timestamp) -> TickReport {
        self.processor.run_tick(now).await
    }
}

impl std::fmt::Debug for ExtensionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionScheduler")
            .field("state", &self.state())
            .field("tick_interval", &self.tick_interval)
            .field("error_backoff", &self.error_backoff)
            .finish()
    }
}

async fn run_loop(
    processor: Arc<BatchProcessor>,
    tick_interval: Duration,
    error_backoff: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    control: Arc<Mutex<LoopControl>>,
    generation: u64,
) {
    loop {
        if !sleep_unless_stopped(tick_interval, &mut shutdown_rx).await {
            break;
        }

        // Each tick runs in its own task so a panic is contained.
        let tick_processor = processor.clone();
        let tick = tokio::spawn(async move { tick_processor.run_tick(Timestamp::now()).await });

        let failed = match tick.await {
            Ok(report) => {
                if report != TickReport::default() {
                    debug!(
                        renewed = report.renewed,
                        removed = report.removed,
                        skipped = report.skipped,
                        failed_calls = report.failed_calls,
                        "Visibility extension tick complete"
                    );
                }
                report.failed_calls > 0
            }
            Err(e) => {
                error!(error = %e, "Visibility extension tick panicked");
                true
            }
        };

        if failed {
            warn!(
                backoff_ms = error_backoff.as_millis() as u64,
                "Pausing visibility extension after failed tick"
            );
            if !sleep_unless_stopped(error_backoff, &mut shutdown_rx).await {
                break;
            }
        }
    }

    let mut control = lock(&control);
    if control.generation == generation {
        control.state = SchedulerState::Stopped;
        control.shutdown_tx = None;
    }
}

fn request_stop(control: &mut LoopControl) {
    if control.state != SchedulerState::Running {
        return;
    }

    if let Some(shutdown_tx) = control.shutdown_tx.take() {
        // A send error means the loop already exited.
        let _ = shutdown_tx.send(true);
    }
    control.state = SchedulerState::Draining;
    debug!("Visibility extension scheduler draining");
}

/// Sleep for `duration`; `false` if a stop was requested first
async fn sleep_unless_stopped(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }

    tokio::select! {
        () = tokio::time::sleep(duration) => !*shutdown_rx.borrow(),
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
    }
}

fn lock(control: &Mutex<LoopControl>) -> MutexGuard<'_, LoopControl> {
    control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
