//! Prometheus counters for the reconciliation cycle and the resolvers.
//!
//! Counters are process-wide and registered in [`struct@REGISTRY`] on first use of
//! [`register_custom_metrics`] or [`render`].

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;

use crate::Error;
use crate::Result;


lazy_static! {
    pub static ref RECONCILE_CYCLES: IntCounter =
        IntCounter::new("connwatch_reconcile_cycles", "Reconciliation cycles run")
            .expect("metric can not be created");

    pub static ref RECORDS_CREATED: IntCounter =
        IntCounter::new("connwatch_records_created", "Connection records created")
            .expect("metric can not be created");

    pub static ref RECORDS_REMOVED: IntCounter =
        IntCounter::new("connwatch_records_removed", "Connection records removed after the grace interval")
            .expect("metric can not be created");

    pub static ref IDENTITY_COLLISIONS: IntCounter = IntCounter::new(
        "connwatch_identity_collisions",
        "Snapshot entries dropped because an earlier entry had the same identity key"
    )
    .expect("metric can not be created");

    pub static ref REJECTED_ENTRIES: IntCounter =
        IntCounter::new("connwatch_rejected_entries", "Malformed snapshot entries skipped")
            .expect("metric can not be created");

    pub static ref OWNER_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("connwatch_owner_lookups", "External process metadata lookups by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref HOSTNAME_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("connwatch_hostname_lookups", "External reverse lookups by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref DISCARDED_COMPLETIONS: IntCounter = IntCounter::new(
        "connwatch_discarded_completions",
        "Resolution completions that arrived after their record was removed"
    )
    .expect("metric can not be created");

    pub static ref DROPPED_EVENTS: IntCounter = IntCounter::new(
        "connwatch_dropped_events",
        "Registry events a lagging dispatcher never delivered"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Register every counter with [`struct@REGISTRY`]. Safe to call repeatedly.
pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(RECONCILE_CYCLES.clone()),
            Box::new(RECORDS_CREATED.clone()),
            Box::new(RECORDS_REMOVED.clone()),
            Box::new(IDENTITY_COLLISIONS.clone()),
            Box::new(REJECTED_ENTRIES.clone()),
            Box::new(OWNER_LOOKUPS.clone()),
            Box::new(HOSTNAME_LOOKUPS.clone()),
            Box::new(DISCARDED_COMPLETIONS.clone()),
            Box::new(DROPPED_EVENTS.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!("collector can not be registered: {}", e);
            }
        }
    });
}

/// Text exposition of all counters.
pub fn render() -> Result<String> {
    register_custom_metrics();

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::Metrics(e.to_string()))
}
