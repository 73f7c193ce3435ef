//! Timer trigger: keep the gateway running and the backup fresh.
//!
//! Every tick runs the bootstrap sequence (a no-op while the gateway
//! listens). Every `sync_every` ticks with a live gateway, local state is
//! synced to the backup store.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::coordinator::{Coordinator, Outcome};
use crate::health;
use crate::sync::sync_to_backup;

/// Watch loop settings.
#[derive(Debug, Clone, Copy)]
pub struct WatchConfig {
    pub interval: Duration,
    /// Sync after this many ticks with a live gateway. Zero disables sync.
    pub sync_every: u32,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub outcome: Option<Outcome>,
    pub synced: bool,
}

/// Tick state carried between iterations.
#[derive(Debug, Default)]
pub struct Watcher {
    live_ticks: u32,
    consecutive_failures: u32,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one iteration.
    pub async fn tick(&mut self, coordinator: &Coordinator, settings: &WatchConfig) -> TickReport {
        let outcome = match coordinator.ensure_running().await {
            Ok(outcome) => {
                self.consecutive_failures = 0;
                if let Outcome::Started { pid } = outcome {
                    info!(pid, "gateway was down and has been started");
                }
                Some(outcome)
            }
            Err(e) if e.is_lock_contention() => {
                debug!(error = %e, "another bootstrap is in progress");
                None
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures <= 3 {
                    warn!(error = %e, consecutive_failures = self.consecutive_failures, "bootstrap failed");
                } else {
                    error!(error = %e, consecutive_failures = self.consecutive_failures, "bootstrap failed repeatedly");
                }
                None
            }
        };

        let config = coordinator.config();
        let alive = health::probe(config.port, config.probe_timeout).await.is_listening();
        if !alive || settings.sync_every == 0 {
            return TickReport { outcome, synced: false };
        }

        self.live_ticks += 1;
        if self.live_ticks < settings.sync_every {
            return TickReport { outcome, synced: false };
        }
        self.live_ticks = 0;

        let synced = match sync_to_backup(config).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, reason = e.reason_code(), "backup sync failed");
                false
            }
        };
        TickReport { outcome, synced }
    }
}

/// Run the watch loop until shutdown.
pub async fn run(coordinator: &Coordinator, settings: WatchConfig, mut shutdown: watch::Receiver<bool>) {
    info!(
        interval_secs = settings.interval.as_secs(),
        sync_every = settings.sync_every,
        "starting watch loop"
    );

    let mut watcher = Watcher::new();
    let mut timer = tokio::time::interval(settings.interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                watcher.tick(coordinator, &settings).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("watch loop shutting down");
                    break;
                }
            }
        }
    }
}
