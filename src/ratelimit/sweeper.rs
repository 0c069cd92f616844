//! Periodic eviction of stale ledger entries.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::store::{SweepStats, WindowStore};

/// Default time between sweeps, in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: i64 = 300;

/// Prunes entries older than the window from a [`WindowStore`].
///
/// Sweeps are throttled: [`EvictionSweeper::maybe_sweep`] does nothing if the
/// previous sweep ran less than `interval` ago, so it is safe to call on every
/// admission check.
pub struct EvictionSweeper {
    store: Arc<dyn WindowStore>,
    window: Duration,
    interval: Duration,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl EvictionSweeper {
    /// Create a sweeper whose first sweep is due one `interval` after `started_at`.
    pub fn new(
        store: Arc<dyn WindowStore>,
        window: Duration,
        interval: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            window,
            interval,
            last_sweep: Mutex::new(started_at),
        }
    }

    /// Sweep if at least `interval` has passed since the last sweep.
    ///
    /// Returns `None` when throttled or when the sweep failed. Failures are
    /// logged and never propagate.
    pub fn maybe_sweep(&self, now: DateTime<Utc>) -> Option<SweepStats> {
        {
            let mut last = self.last_sweep.lock();
            if now - *last < self.interval {
                return None;
            }
            // Claim this sweep so concurrent callers stay throttled
            *last = now;
        }

        self.sweep(now)
    }

    /// Sweep unconditionally.
    pub fn sweep(&self, now: DateTime<Utc>) -> Option<SweepStats> {
        let cutoff = now - self.window;
        match self.store.sweep(cutoff) {
            Ok(stats) => {
                debug!(
                    entries_removed = stats.entries_removed,
                    endpoints_removed = stats.endpoints_removed,
                    clients_removed = stats.clients_removed,
                    clients_remaining = self.store.client_count(),
                    "Swept window store"
                );
                Some(stats)
            }
            Err(e) => {
                warn!(error = %e, "Window store sweep failed");
                None
            }
        }
    }

    /// Run the sweeper on a timer until the returned handle is shut down.
    pub fn spawn(self: Arc<Self>, clock: Arc<dyn Clock>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self
            .interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS as u64));

        let task = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Eviction sweeper started");
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.maybe_sweep(clock.now());
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Eviction sweeper stopped");
        });

        SweeperHandle { shutdown_tx, task }
    }
}

impl std::fmt::Debug for EvictionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionSweeper")
            .field("window", &self.window)
            .field("interval", &self.interval)
            .field("last_sweep", &*self.last_sweep.lock())
            .finish()
    }
}

/// Handle to a running background sweeper.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Eviction sweeper task ended abnormally");
        }
    }
}
