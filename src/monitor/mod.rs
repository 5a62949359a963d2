//! Periodic polling of the OS connection table.
//!
//! Each tick is one batch: a fresh owner cache, one snapshot from the
//! [`ConnectionTableProvider`], one reconcile.


use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::ConnectionRegistry;
use crate::CycleReport;
use crate::MonitorConfig;
use crate::RawConnection;
use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionTableProvider: Send + Sync + 'static {
    /// Enumerate the current connection table.
    ///
    /// # Errors
    /// [`crate::Error::Provider`] when the table cannot be read. The cycle is
    /// skipped; nothing is retired on the strength of a failed enumeration.
    async fn snapshot(&self) -> Result<Vec<RawConnection>>;
}

/// Drives a [`ConnectionRegistry`] from a [`ConnectionTableProvider`].
pub struct Monitor {
    registry: ConnectionRegistry,
    provider: Arc<dyn ConnectionTableProvider>,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(
        registry: ConnectionRegistry,
        provider: Arc<dyn ConnectionTableProvider>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            provider,
            config,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> ConnectionRegistry {
        self.registry
    }

    /// Run one batch now.
    ///
    /// # Errors
    /// The provider's error; the registry is left untouched.
    pub async fn poll_once(&mut self) -> Result<CycleReport> {
        let snapshot = self.provider.snapshot().await?;
        let owners = self.registry.begin_batch();
        let report = self.registry.reconcile(&snapshot, &owners);
        trace!(cycle = report.cycle, entries = snapshot.len(), "batch reconciled");
        Ok(report)
    }

    /// Poll every `poll_interval_ms` until `cancel` fires.
    pub async fn run(
        &mut self,
        cancel: CancellationToken,
    ) {
        let mut interval = self.interval();
        info!(poll_interval_ms = self.config.poll_interval_ms, "connection monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("connection monitor shutting down");
                    return;
                }

                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "connection table unavailable; cycle skipped");
                    }
                }
            }
        }
    }

    /// Missed ticks are delayed rather than fired in a burst.
    fn interval(&self) -> Interval {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("poll_interval_ms: {}", self.config.poll_interval_ms);
        interval
    }
}
