//! Background acknowledgment polling.
//!
//! A delivery whose transport never calls back stays in `SENT` until the
//! poller finds an acknowledgment, so the poller runs for the lifetime of
//! the process.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::TransmissionManager;

/// Acknowledgment poller configuration.
#[derive(Debug, Clone)]
pub struct AcknowledgmentPollerConfig {
    /// Whether the poller runs at all.
    pub enabled: bool,
    /// Time between polling passes.
    pub polling_interval: Duration,
}

impl Default for AcknowledgmentPollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            polling_interval: Duration::from_secs(5),
        }
    }
}

/// Periodically calls [`TransmissionManager::check_pending_acknowledgments`].
pub struct AcknowledgmentPoller {
    config: AcknowledgmentPollerConfig,
    manager: TransmissionManager,
    poller_id: Uuid,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AcknowledgmentPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcknowledgmentPoller")
            .field("poller_id", &self.poller_id)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl AcknowledgmentPoller {
    /// Creates a stopped poller.
    pub fn new(config: AcknowledgmentPollerConfig, manager: TransmissionManager) -> Self {
        Self {
            config,
            manager,
            poller_id: Uuid::new_v4(),
            shutdown: None,
            handle: None,
        }
    }

    /// Starts the polling loop on the current Tokio runtime.
    ///
    /// Does nothing when disabled or already running.
    pub fn start(&mut self) {
        if !self.config.enabled {
            info!(poller_id = %self.poller_id, "Acknowledgment polling disabled");
            return;
        }
        if self.handle.is_some() {
            warn!(poller_id = %self.poller_id, "Acknowledgment poller already running");
            return;
        }

        info!(
            poller_id = %self.poller_id,
            interval_ms = self.config.polling_interval.as_millis() as u64,
            "Starting acknowledgment poller"
        );

        let (tx, mut rx) = watch::channel(false);
        let manager = self.manager.clone();
        let period = self.config.polling_interval;
        let poller_id = self.poller_id;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            debug!(poller_id = %poller_id, "Acknowledgment poller shutting down");
                            return;
                        }
                        continue;
                    }
                }

                match manager.check_pending_acknowledgments().await {
                    Ok(acknowledged) if !acknowledged.is_empty() => {
                        debug!(
                            poller_id = %poller_id,
                            acknowledged = acknowledged.len(),
                            "Acknowledgment polling cycle completed"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(poller_id = %poller_id, error = %e, "Acknowledgment polling cycle failed");
                    }
                }
            }
        });

        self.shutdown = Some(tx);
        self.handle = Some(handle);
    }

    /// Signals the loop to stop and waits for it to finish its current pass.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            info!(poller_id = %self.poller_id, "Stopping acknowledgment poller");
            if let Err(e) = handle.await {
                error!(poller_id = %self.poller_id, error = %e, "Acknowledgment poller task failed");
            }
        }
    }

    /// Whether the loop is running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Active configuration.
    pub fn config(&self) -> &AcknowledgmentPollerConfig {
        &self.config
    }
}
