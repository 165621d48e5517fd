use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, error, info, warn};

use tollgate_core::{Clock, LicenseId};
use tollgate_quota::QuotaLedger;

/// Config for the replenishment scheduler.
#[derive(Debug, Clone)]
pub struct ReplenishmentScheduler {
    /// Time between passes.
    pub tick: Duration,
    /// Upper bound for refilling a single license.
    pub per_license_timeout: Duration,
    /// Upper bound for listing due licenses.
    pub scan_timeout: Duration,
}

impl Default for ReplenishmentScheduler {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            per_license_timeout: Duration::from_secs(5),
            scan_timeout: Duration::from_secs(10),
        }
    }
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub replenished: usize,
    /// Listed as due but gone by the time we refilled it.
    pub vanished: usize,
    /// Errored or timed out; retried next tick.
    pub failed: Vec<LicenseId>,
    /// The due-license scan itself failed; nothing was attempted.
    pub scan_failed: bool,
}

/// Handle for the running scheduler. Dropping it also stops the task.
#[derive(Debug)]
pub struct ReplenishmentSchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl ReplenishmentSchedulerHandle {
    /// Stop the scheduler and wait for the in-flight pass to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "replenishment scheduler task failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }
}

impl ReplenishmentScheduler {
    /// Spawn the scheduler on the current tokio runtime.
    pub fn spawn(
        &self,
        ledger: Arc<dyn QuotaLedger>,
        clock: Arc<dyn Clock>,
    ) -> ReplenishmentSchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cfg = self.clone();
        let join = tokio::spawn(async move { cfg.run(ledger, clock, shutdown_rx).await });

        ReplenishmentSchedulerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }

    async fn run(
        self,
        ledger: Arc<dyn QuotaLedger>,
        clock: Arc<dyn Clock>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(tick_ms = self.tick.as_millis() as u64, "replenishment scheduler started");

        let mut ticker = tokio::time::interval(self.tick);
        // A delayed pass runs once when we wake up; missed ticks are not replayed.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_once(&ledger, clock.as_ref()).await;
                }
            }
        }

        info!("replenishment scheduler stopped");
    }

    /// Run one replenishment pass.
    ///
    /// Every refill in a pass is stamped with the same `now`, so refilling a
    /// license twice within a pass is a no-op.
    pub async fn run_once(&self, ledger: &Arc<dyn QuotaLedger>, clock: &dyn Clock) -> TickReport {
        let now = clock.now();
        let mut report = TickReport::default();

        let due = match timeout(self.scan_timeout, ledger.due_for_replenishment(now)).await {
            Ok(Ok(due)) => due,
            Ok(Err(e)) => {
                error!(error = %e, "failed to list licenses due for replenishment");
                report.scan_failed = true;
                return report;
            }
            Err(_) => {
                error!(timeout_ms = self.scan_timeout.as_millis() as u64, "due-license scan timed out");
                report.scan_failed = true;
                return report;
            }
        };
        report.due = due.len();

        let mut tasks = JoinSet::new();
        for license_id in due {
            let ledger = ledger.clone();
            let limit = self.per_license_timeout;
            tasks.spawn(async move {
                let result = timeout(limit, ledger.replenish(&license_id, now)).await;
                (license_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Ok(Some(_))))) => report.replenished += 1,
                Ok((license_id, Ok(Ok(None)))) => {
                    debug!(license = %license_id, "license disappeared before replenishment");
                    report.vanished += 1;
                }
                Ok((license_id, Ok(Err(e)))) => {
                    warn!(license = %license_id, error = %e, "replenishment failed; will retry next tick");
                    report.failed.push(license_id);
                }
                Ok((license_id, Err(_))) => {
                    warn!(license = %license_id, "replenishment timed out; will retry next tick");
                    report.failed.push(license_id);
                }
                Err(e) => {
                    error!(error = %e, "replenishment task panicked");
                }
            }
        }

        if report.due > 0 || report.scan_failed {
            info!(
                due = report.due,
                replenished = report.replenished,
                failed = report.failed.len(),
                "replenishment pass complete"
            );
        } else {
            debug!("replenishment pass: nothing due");
        }
        report
    }
}
