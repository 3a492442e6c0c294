//! Single-flight cycle scheduler.
//!
//! Runs one cycle immediately, then one per interval. A tick that fires while
//! a cycle is still running is dropped. Failures are reported through the
//! notifier and scheduling carries on. On shutdown the pending timer is
//! cancelled and an in-flight cycle is allowed to finish. Once shutdown has
//! begun no new cycle starts.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::notify::{format_failure, notify_quietly, Notifier};

/// Shortest allowed interval between cycles
pub const MIN_CYCLE_INTERVAL: Duration = Duration::from_secs(30);

/// How often shutdown checks whether the in-flight cycle has finished
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A unit of work the scheduler drives
#[async_trait]
pub trait CycleRunner: Send + Sync {
    /// Name used in failure notifications
    fn label(&self) -> &str;

    async fn run_cycle(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A cycle was already running, or the scheduler is shutting down
    Skipped,
    Completed,
    Failed,
}

/// Clears the running flag however the cycle ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CycleScheduler {
    runner: Arc<dyn CycleRunner>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    running: AtomicBool,
    shutting_down: AtomicBool,
}

impl CycleScheduler {
    /// `interval` below [`MIN_CYCLE_INTERVAL`] is raised to it
    pub fn new(
        runner: Arc<dyn CycleRunner>,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Self {
        let interval = if interval < MIN_CYCLE_INTERVAL {
            tracing::warn!(
                "Cycle interval {:?} is below the minimum, using {:?}",
                interval,
                MIN_CYCLE_INTERVAL
            );
            MIN_CYCLE_INTERVAL
        } else {
            interval
        };

        Self {
            runner,
            notifier,
            interval,
            running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        if self.shutting_down.load(Ordering::SeqCst) {
            SchedulerState::ShuttingDown
        } else if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Run one cycle unless one is already in flight or shutdown has begun
    pub async fn tick(&self) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Previous cycle still running, skipping tick");
            return TickOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        // drain() sets this before reading `running`, so either it sees our
        // flag and waits, or we see shutdown here and never start
        if self.shutting_down.load(Ordering::SeqCst) {
            tracing::debug!("Shutting down, not starting a new cycle");
            return TickOutcome::Skipped;
        }

        match self.runner.run_cycle().await {
            Ok(()) => TickOutcome::Completed,
            Err(e) => {
                tracing::error!("❌ Cycle failed: {:#}", e);
                let message = format_failure(self.runner.label(), &e);
                notify_quietly(self.notifier.as_ref(), &message).await;
                TickOutcome::Failed
            }
        }
    }

    /// Drive cycles until `shutdown` flips to true (or its sender is dropped)
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏱️  Scheduler started, one cycle every {}s",
            self.interval.as_secs()
        );

        let mut in_flight = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            // The cycle runs in its own task so shutdown is noticed while it is in flight
            let this = Arc::clone(&self);
            let mut cycle = tokio::spawn(async move { this.tick().await });

            tokio::select! {
                joined = &mut cycle => {
                    if let Err(e) = joined {
                        tracing::error!("Cycle task aborted: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    in_flight = Some(cycle);
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.drain().await;

        // The spawned task may not have reached tick() yet; it will skip, but
        // it must be gone before run() returns
        if let Some(cycle) = in_flight {
            if let Err(e) = cycle.await {
                tracing::error!("Cycle task aborted: {}", e);
            }
        }
    }

    /// Stop scheduling and wait for the in-flight cycle, if any
    pub async fn drain(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        if self.running.load(Ordering::SeqCst) {
            tracing::info!("⏳ Waiting for in-flight cycle to finish...");
            while self.running.load(Ordering::SeqCst) {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        }
        tracing::info!("Scheduler stopped");
    }
}
