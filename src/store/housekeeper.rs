//! Periodic purge of completed records.
//!
//! The housekeeper runs as a background task next to the publisher loop. On
//! every tick it deletes records that finished (QoS 0 published, confirmed,
//! dropped) more than `purge_age` ago. A failed sweep is logged and retried
//! on the next tick; the loop ends when the shutdown signal fires or the
//! store is closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::engine::MessageStore;
use crate::config::HousekeeperSettings;
use crate::utils::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct Housekeeper {
    store: Arc<MessageStore>,
    interval: Duration,
    purge_age: Duration,
}

impl Housekeeper {
    pub fn new(store: Arc<MessageStore>, interval: Duration, purge_age: Duration) -> Self {
        Self {
            store,
            interval,
            purge_age,
        }
    }

    pub fn from_settings(store: Arc<MessageStore>, settings: &HousekeeperSettings) -> Self {
        Self::new(
            store,
            Duration::from_secs(settings.interval_secs),
            Duration::from_secs(settings.purge_age_secs),
        )
    }

    /// One purge pass, run on the blocking pool since it does disk I/O.
    pub async fn sweep(&self) -> Result<usize> {
        let store = Arc::clone(&self.store);
        let purge_age = self.purge_age;
        tokio::task::spawn_blocking(move || store.delete_stale_messages(purge_age)).await?
    }

    /// Sweep every `interval` until `shutdown` turns `true` or its sender is
    /// dropped. The first sweep happens immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            store = self.store.name(),
            interval_secs = self.interval.as_secs(),
            purge_age_secs = self.purge_age.as_secs(),
            "housekeeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(purged) => debug!(store = self.store.name(), purged, "housekeeper sweep done"),
                        Err(StoreError::Closed(_)) => {
                            info!(store = self.store.name(), "store closed, housekeeper exiting");
                            return;
                        }
                        Err(e) => error!(store = self.store.name(), "housekeeper sweep failed: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(store = self.store.name(), "housekeeper stopped");
    }

    /// Spawn [`Housekeeper::run`] on the current runtime. Send `true` on the
    /// returned sender to stop it.
    pub fn spawn(self) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(rx));
        (handle, tx)
    }
}
