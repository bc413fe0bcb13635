//! Background resolution of transactions left indeterminate.

use crate::application::coordinator::{Resolution, TransactionCoordinator};
use crate::domain::transaction::TransactionState;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters for one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub scanned: usize,
    /// Lost the claim to a concurrent worker or the submitting request.
    pub skipped: usize,
    pub committed: usize,
    pub compensated: usize,
    pub unresolved: usize,
    /// Resolution hit an error that another attempt will not fix.
    pub failed: usize,
    pub abandoned: usize,
    pub expired_keys: usize,
}

/// Periodically drives stale `Reserved` transactions to a terminal state.
///
/// Every transaction is claimed by compare-and-set before anything is done
/// with it, so any number of workers can run at once, and a transaction that
/// is already terminal is simply not listed again.
pub struct ReconciliationWorker {
    coordinator: Arc<TransactionCoordinator>,
    interval: Duration,
    staleness: Duration,
    shutdown: Arc<Notify>,
}

/// Returned by [`ReconciliationWorker::start`].
pub struct WorkerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signals the loop and waits for the current pass to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            warn!(error = %e, "reconciliation worker did not stop cleanly");
        }
    }
}

impl ReconciliationWorker {
    pub fn new(coordinator: Arc<TransactionCoordinator>) -> Self {
        let config = coordinator.config();
        Self {
            interval: config.reconciliation_interval,
            staleness: config.reconciliation_staleness,
            coordinator,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run_once(&self) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport {
            expired_keys: self.coordinator.registry().purge_expired(),
            ..Default::default()
        };

        let reserved = self
            .coordinator
            .stale(TransactionState::Reserved, self.staleness)
            .await?;
        debug!(candidates = reserved.len(), "reconciliation scan");
        for txn in reserved {
            report.scanned += 1;
            let Some(claimed) = self.coordinator.claim(&txn).await? else {
                report.skipped += 1;
                continue;
            };
            match self.coordinator.resolve(claimed).await {
                Ok(Resolution::Committed) => report.committed += 1,
                Ok(Resolution::Compensated) => report.compensated += 1,
                Ok(Resolution::Unresolved) => report.unresolved += 1,
                Err(e) if e.is_retryable() => {
                    warn!(txn = %txn.id, error = %e, "reconciliation attempt failed");
                    report.unresolved += 1;
                }
                Err(e) => {
                    error!(txn = %txn.id, error = %e, code = e.reason_code(), "transaction cannot be resolved");
                    report.failed += 1;
                }
            }
        }

        let pending = self
            .coordinator
            .stale(TransactionState::Pending, self.staleness)
            .await?;
        for txn in pending {
            report.scanned += 1;
            let id = txn.id;
            match self.coordinator.abandon(txn).await {
                Ok(result) if result.status == TransactionState::Failed => report.abandoned += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => warn!(txn = %id, error = %e, "could not abandon pending transaction"),
            }
        }

        if report != ReconciliationReport::default() {
            info!(?report, "reconciliation pass finished");
        }
        Ok(report)
    }

    /// Spawns the periodic loop. Ticks missed during a long pass are skipped.
    pub fn start(self) -> WorkerHandle {
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            info!(interval = ?self.interval, "reconciliation worker started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => {
                        info!("reconciliation worker stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = %e, "reconciliation pass failed");
                        }
                    }
                }
            }
        });
        WorkerHandle { shutdown, task }
    }
}
