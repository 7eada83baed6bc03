//! Renewal scheduler - runs the lifecycle sweep on a fixed cadence

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::SubscriptionError;
use crate::manager::{SubscriptionLifecycleManager, SweepReport};

/// Sweep cadence comes from the manager's `renew_interval`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

pub struct SubscriptionScheduler {
    config: SchedulerConfig,
    renew_interval: Duration,
    manager: Arc<SubscriptionLifecycleManager>,
    shutdown_tx: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionScheduler {
    /// The manager's renew interval must be strictly shorter than its expiration period,
    /// otherwise subscriptions expire between sweeps.
    pub fn new(config: SchedulerConfig, manager: Arc<SubscriptionLifecycleManager>) -> Result<Self, SubscriptionError> {
        let renew_interval = manager.config().renew_interval;
        let expiration_period = manager.config().expiration_period;
        if renew_interval.is_zero() || renew_interval >= expiration_period {
            return Err(SubscriptionError::Config(format!(
                "renew interval ({:?}) must be non-zero and shorter than the subscription lifetime ({:?})",
                renew_interval, expiration_period
            )));
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            renew_interval,
            manager,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            handle: parking_lot::Mutex::new(None),
        })
    }

    /// Spawn the background sweep loop. The first sweep runs one interval after start;
    /// onboarding leaves every tracked subscription with more than one interval of life,
    /// renewing reused ones that are about to expire.
    pub fn start(&self) {
        if !self.config.enabled {
            info!("Subscription renewal scheduler is disabled");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Subscription renewal scheduler already running");
            return;
        }

        self.shutdown_tx.send_replace(false);

        info!(
            renew_interval_secs = self.renew_interval.as_secs(),
            expiration_secs = self.manager.config().expiration_period.as_secs(),
            "Starting subscription renewal scheduler"
        );

        let manager = self.manager.clone();
        let running = self.running.clone();
        let renew_interval = self.renew_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(renew_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        debug!("Running scheduled renewal sweep");
                        let report = {
                            let stop_rx = shutdown_rx.clone();
                            manager.renew_all_until(|| *stop_rx.borrow()).await
                        };
                        metrics::counter!("subscriptions.sweeps_total").increment(1);
                        if report.lost > 0 {
                            error!(lost = report.lost, "Sweep lost subscriptions that could not be recreated");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            info!("Subscription renewal scheduler stopped");
        });

        *self.handle.lock() = Some(handle);
    }

    /// Signal shutdown and wait for the loop to exit. A sweep in progress stops before its
    /// next entry; the remote call already in flight completes.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Renewal scheduler task ended abnormally");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one sweep immediately, outside the timer
    pub async fn run_once(&self) -> SweepReport {
        self.manager.renew_all().await
    }

    pub fn renew_interval(&self) -> Duration {
        self.renew_interval
    }
}
