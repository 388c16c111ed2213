//! Sweeper loop and its supervision handle.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

use crate::config::SweeperConfig;
use crate::rules::{RuleStore, StoreError};

/// Shortest pause between two sweeps.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically deletes rules whose expiry lies in the past.
#[derive(Clone)]
pub struct ExpiredRuleSweeper {
    store: Arc<dyn RuleStore>,
    interval: Duration,
}

impl ExpiredRuleSweeper {
    /// Intervals below one second are raised to one second.
    pub fn new(store: Arc<dyn RuleStore>, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn from_config(store: Arc<dyn RuleStore>, config: &SweeperConfig) -> Self {
        Self::new(store, config.interval())
    }

    /// Delete every rule with an expiry strictly before now.
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let deleted = self.store.delete_expired(now).await?;
        info!(deleted, "Expired rule sweep finished");
        Ok(deleted)
    }

    /// Sweep until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A failed sweep is logged and the loop carries on with the next tick.
    /// Shutdown only interrupts the sleep between sweeps; a sweep that has
    /// started always runs to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Expired rule sweeper started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Expired rule sweep failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    debug!("Sweeper received shutdown signal");
                    break;
                }
            }
        }

        info!("Expired rule sweeper stopped");
    }

    /// Start the loop on the runtime and return a handle that stops it.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running sweeper.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the sweeper to stop and wait for it, letting an in-flight
    /// sweep finish first.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        // The receiver is gone only if the task already exited.
        let _ = self.shutdown.send(true);
        self.task.await
    }
}
