//! Explicit hand-off of registry events onto a consumer's runtime.
//!
//! ```text
//! reconcile()/resolver task ─> ChangeNotifier::publish() ─> broadcast
//!                                                            │
//!                            EventDispatcher task (consumer runtime)
//!                                                            └─> EventSink::deliver()
//! ```
//!
//! Producers never call consumer code directly; the dispatcher task runs on
//! whatever runtime handle the consumer supplies.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ChangeNotifier;
use super::RegistryEvent;
use crate::metrics::DROPPED_EVENTS;

/// Consumer end of a dispatcher.
pub trait EventSink: Send + 'static {
    fn deliver(
        &mut self,
        event: RegistryEvent,
    );
}

impl<F> EventSink for F
where
    F: FnMut(RegistryEvent) + Send + 'static,
{
    fn deliver(
        &mut self,
        event: RegistryEvent,
    ) {
        self(event)
    }
}

/// Spawns dispatcher tasks.
pub struct EventDispatcher;

/// Handle of a running dispatcher task
pub struct EventDispatcherHandle {
    task: JoinHandle<()>,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventDispatcher {
    /// Subscribe to `notifier` now and forward every event to `sink` from a
    /// task spawned on `runtime`, until `cancel` fires or the channel closes.
    pub fn spawn<S: EventSink>(
        notifier: &ChangeNotifier,
        runtime: &Handle,
        mut sink: S,
        cancel: CancellationToken,
    ) -> EventDispatcherHandle {
        let mut rx = notifier.subscribe();
        let delivered = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));

        let task = {
            let delivered = delivered.clone();
            let dropped = dropped.clone();
            runtime.spawn(async move {
                debug!("event dispatcher started");
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("event dispatcher shutting down");
                            break;
                        }
                        received = rx.recv() => match received {
                            Ok(event) => {
                                sink.deliver(event);
                                delivered.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "event dispatcher lagged; oldest events dropped");
                                dropped.fetch_add(skipped, Ordering::Relaxed);
                                DROPPED_EVENTS.inc_by(skipped);
                            }
                            Err(RecvError::Closed) => {
                                debug!("notifier closed");
                                break;
                            }
                        }
                    }
                }
            })
        };

        EventDispatcherHandle {
            task,
            delivered,
            dropped,
        }
    }
}

impl EventDispatcherHandle {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to stop (after cancellation).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("event dispatcher task failed: {:?}", e);
        }
    }
}
