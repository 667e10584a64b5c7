//! Tick Scheduler
//!
//! Runs each venue engine on its own task at a fixed frequency. Workers share
//! nothing but the shutdown signal; on shutdown every worker finishes its
//! current tick and flushes its ledger once more before exiting.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::engine::VenueEngine;

/// Cloneable trigger shared with the ctrl-c handler
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            tracing::info!("Shutdown requested, finishing current ticks");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Totals for one venue worker over its lifetime
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSummary {
    pub venue: String,
    pub ticks: u64,
    pub entries: usize,
    pub closes: usize,
    pub failed_forced_exits: usize,
    pub errors: usize,
    pub final_flush_ok: bool,
}

pub struct TickScheduler {
    frequency: Duration,
    engines: Vec<VenueEngine>,
    shutdown: ShutdownHandle,
}

impl TickScheduler {
    pub fn new(frequency: Duration) -> Self {
        Self {
            frequency,
            engines: Vec::new(),
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn add_engine(&mut self, engine: VenueEngine) {
        self.engines.push(engine);
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run every engine until shutdown is triggered.
    pub async fn run(self) -> Vec<WorkerSummary> {
        tracing::info!(
            "Starting {} venue worker(s), tick every {:?}",
            self.engines.len(),
            self.frequency
        );

        let handles: Vec<_> = self
            .engines
            .into_iter()
            .map(|engine| {
                let shutdown = self.shutdown.subscribe();
                tokio::spawn(run_worker(engine, self.frequency, shutdown))
            })
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::error!("Venue worker panicked: {}", e),
            }
        }

        tracing::info!("All venue workers stopped");
        summaries
    }
}

async fn run_worker(
    mut engine: VenueEngine,
    frequency: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerSummary {
    let mut summary = WorkerSummary {
        venue: engine.name().to_string(),
        ..WorkerSummary::default()
    };
    let mut interval = tokio::time::interval(frequency);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("[{}] Worker started", summary.venue);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        summary.ticks += 1;
        match engine.tick().await {
            Ok(report) => {
                summary.entries += report.entered.len();
                summary.closes += report.closed.len();
                summary.failed_forced_exits += report.failed_forced_exits.len();
                summary.errors += report.errors;
            }
            Err(e) => {
                summary.errors += 1;
                tracing::error!("[{}] Tick error: {}", summary.venue, e);
            }
        }
    }

    summary.final_flush_ok = match engine.persist() {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("[{}] Final ledger flush failed: {}", summary.venue, e);
            false
        }
    };
    tracing::info!(
        "[{}] Worker stopped after {} tick(s), {} open position(s)",
        summary.venue,
        summary.ticks,
        engine.ledger().open_count()
    );
    summary
}
