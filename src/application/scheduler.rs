use super::cancel::CancelToken;
use super::interest::InterestEngine;
use crate::domain::identity::Credential;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

/// Runs the accrual reconciliation sweep on a fixed interval.
///
/// Lives outside the request path: it is started and stopped with the
/// process and only talks to the engine through its public API.
pub struct SweepScheduler {
    engine: Arc<InterestEngine>,
    credential: Credential,
    every: Duration,
}

impl SweepScheduler {
    pub fn new(engine: Arc<InterestEngine>, credential: Credential, every: Duration) -> Self {
        Self {
            engine,
            credential,
            every,
        }
    }

    /// Spawns the loop. The first sweep runs immediately; the task ends when
    /// `cancel` fires and yields the number of sweeps that ran.
    pub fn start(self, cancel: CancelToken) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let mut ticker = interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut runs = 0u64;
            info!(every = ?self.every, "Accrual sweep scheduler started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match self
                            .engine
                            .process_pending_accruals(&self.credential, &cancel)
                            .await
                        {
                            Ok(report) => info!(
                                run = runs + 1,
                                total = report.total,
                                applied = report.success_count,
                                failed = report.failure_count,
                                "Scheduled sweep finished"
                            ),
                            Err(e) => error!(run = runs + 1, error = %e, "Scheduled sweep failed"),
                        }
                        runs += 1;
                    }
                }
            }

            info!(runs, "Accrual sweep scheduler stopped");
            runs
        })
    }
}
