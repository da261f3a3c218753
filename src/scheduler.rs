use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{error::Result, service::RecipeService};

/// Anything the scheduler can ask to rebuild the ranking cache. The
/// production implementation is [`RecipeService::refresh_rankings`]; tests
/// substitute failing or slow refreshers.
pub trait Refresher: Send + Sync + 'static {
    fn refresh(&self) -> Result<()>;
}

impl Refresher for RecipeService {
    fn refresh(&self) -> Result<()> {
        self.refresh_rankings()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed,
    /// A refresh was already running when this one was requested.
    Skipped,
    Failed,
    TimedOut,
}

/// Periodic, non-reentrant cache refresh. Runs once immediately so a cold
/// start never serves an empty cache, then on a fixed cadence. A tick that
/// fires while a refresh is still in flight is skipped, and any failure or
/// timeout leaves the previous cache contents in place (fail-open).
pub struct RefreshScheduler<R: Refresher> {
    refresher: Arc<R>,
    interval: Duration,
    timeout: Duration,
    running: Arc<AtomicBool>,
}

impl<R: Refresher> RefreshScheduler<R> {
    pub fn new(refresher: R, interval: Duration, timeout: Duration) -> Self {
        Self {
            refresher: Arc::new(refresher),
            interval,
            timeout,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately: the startup refresh.
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    /// One refresh attempt, honoring the non-reentrancy guard and timeout.
    pub async fn run_once(&self) -> RefreshOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("ranking refresh still in flight; skipping tick");
            return RefreshOutcome::Skipped;
        }

        let refresher = Arc::clone(&self.refresher);
        let mut work = tokio::task::spawn_blocking(move || refresher.refresh());

        let outcome = match tokio::time::timeout(self.timeout, &mut work).await {
            Ok(Ok(Ok(()))) => {
                info!("ranking refresh tick completed");
                RefreshOutcome::Completed
            }
            Ok(Ok(Err(err))) => {
                // Fail-open: the cache keeps its previous contents.
                error!("ranking refresh failed, keeping stale cache: {err}");
                RefreshOutcome::Failed
            }
            Ok(Err(join_err)) => {
                error!("ranking refresh task panicked, keeping stale cache: {join_err}");
                RefreshOutcome::Failed
            }
            Err(_) => {
                error!(
                    timeout_secs = self.timeout.as_secs(),
                    "ranking refresh timed out, keeping stale cache"
                );
                // A blocking task cannot be cancelled, so the guard stays
                // held until the overrunning refresh actually finishes. No
                // newer refresh can start underneath it, which also means
                // its late writes can never overwrite fresher lists.
                let running = Arc::clone(&self.running);
                tokio::spawn(async move {
                    let _ = work.await;
                    running.store(false, Ordering::Release);
                });
                return RefreshOutcome::TimedOut;
            }
        };

        self.running.store(false, Ordering::Release);
        outcome
    }
}
