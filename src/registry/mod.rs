//! Snapshot reconciliation and record lifecycle.
//!
//! ```text
//!   snapshot ──> reconcile() ──┬─> create   New            ──> owner + hostname lookups
//!                              ├─> update   New -> Active  (remote fields, last_seen)
//!                              └─> retire   Active -> Dying -> Dead -> removed
//! ```
//!
//! [`ConnectionRegistry::reconcile`] is the only writer of the key index and
//! of identity, lifecycle and remote fields. Resolver tasks write owner and
//! hostname fields through the shared [`RecordStore`] and never see a record
//! that has already been removed.

mod store;

pub(crate) use store::*;


use std::collections::HashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::connection::Endpoints;
use crate::metrics::IDENTITY_COLLISIONS;
use crate::metrics::RECONCILE_CYCLES;
use crate::metrics::RECORDS_CREATED;
use crate::metrics::RECORDS_REMOVED;
use crate::metrics::REJECTED_ENTRIES;
use crate::ChangeNotifier;
use crate::ConnectionKey;
use crate::ConnectionRecord;
use crate::Error;
use crate::HostnameCache;
use crate::HostnameLookup;
use crate::HostnameSink;
use crate::IconHandle;
use crate::LifecycleChange;
use crate::LifecycleState;
use crate::OwnerCache;
use crate::RawConnection;
use crate::RecordField;
use crate::RecordId;
use crate::RegistryConfig;
use crate::RegistryEvent;
use crate::ResolverConfig;
use crate::ResolverSet;
use crate::Result;
use crate::TcpState;
use crate::SYSTEM_ICON_KEY;
use crate::SYSTEM_OWNER;
use crate::SYSTEM_PID;
use crate::UNKNOWN_ICON_KEY;
use crate::UNKNOWN_OWNER;

/// What one [`ConnectionRegistry::reconcile`] call did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    /// Lifecycle and field events raised by the cycle itself, in emission
    /// order. Enrichment completions are only published on the notifier.
    pub events: Vec<RegistryEvent>,
    pub created: usize,
    /// Matched records with at least one changed field besides `last_seen`
    pub updated: usize,
    /// Records that left the live set this cycle
    pub retired: usize,
    pub removed: usize,
    /// Entries dropped because an earlier entry had the same key
    pub collisions: usize,
    /// Entries skipped because they could not be parsed
    pub rejected: usize,
}

impl CycleReport {
    pub fn lifecycle_changes(&self) -> impl Iterator<Item = &LifecycleChange> {
        self.events.iter().filter_map(RegistryEvent::as_lifecycle)
    }

    pub fn field_changes(&self) -> impl Iterator<Item = &crate::FieldChange> {
        self.events.iter().filter_map(RegistryEvent::as_field)
    }
}

/// Owns every connection record and reconciles snapshots against them.
pub struct ConnectionRegistry {
    resolvers: ResolverSet,
    config: RegistryConfig,
    store: Arc<RecordStore>,
    hostnames: HostnameCache,

    /// Live (New/Active) records by key
    index: HashMap<ConnectionKey, RecordId>,
    /// Dying and Dead records, oldest first
    retiring: Vec<RecordId>,

    next_id: u64,
    cycle: u64,

    runtime: Handle,
    resolutions: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry. Resolution tasks are spawned on the tokio
    /// runtime current at construction time.
    ///
    /// # Errors
    /// [`Error::Runtime`] when called outside a tokio runtime.
    pub fn new(
        resolvers: ResolverSet,
        config: RegistryConfig,
        resolver_config: ResolverConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        let store = Arc::new(RecordStore::new(ChangeNotifier::new(config.event_buffer_size)));
        let sink: Arc<dyn HostnameSink> = store.clone();
        let hostnames = HostnameCache::new(resolvers.hostname.clone(), sink, runtime.clone(), &resolver_config);

        Ok(Self {
            resolvers,
            config,
            store,
            hostnames,
            index: HashMap::new(),
            retiring: Vec::new(),
            next_id: 1,
            cycle: 0,
            runtime,
            resolutions: Mutex::new(Vec::new()),
        })
    }

    /// Start a polling batch. The returned cache is valid for the snapshots
    /// of this batch only; drop it before calling `begin_batch` again.
    pub fn begin_batch(&self) -> OwnerCache {
        OwnerCache::new(self.resolvers.process.clone())
    }

    /// Diff `snapshot` against the registered records.
    ///
    /// Never awaits and never fails: malformed entries and duplicate keys are
    /// logged, counted in the report and skipped.
    pub fn reconcile(
        &mut self,
        snapshot: &[RawConnection],
        owners: &OwnerCache,
    ) -> CycleReport {
        self.cycle += 1;
        let cycle = self.cycle;
        let now = SystemTime::now();
        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };

        // Records that were already retiring move first, so a record that
        // goes absent this cycle does not advance twice.
        self.advance_retiring(cycle, &mut report);

        let mut seen = HashSet::with_capacity(snapshot.len());
        for raw in snapshot {
            let endpoints = match Endpoints::parse(raw) {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    warn!(pid = raw.pid, error = %e, "skipping malformed connection entry");
                    REJECTED_ENTRIES.inc();
                    report.rejected += 1;
                    continue;
                }
            };
            let key = ConnectionKey::from_parts(raw, &endpoints);
            if !seen.insert(key.clone()) {
                warn!(%key, "duplicate connection key in snapshot; keeping the first entry");
                IDENTITY_COLLISIONS.inc();
                report.collisions += 1;
                continue;
            }

            match self.index.get(&key).copied() {
                Some(id) => self.update_record(id, raw, &endpoints, now, &mut report),
                None => self.create_record(key, raw, &endpoints, owners, &mut report),
            }
        }

        let absent: Vec<(ConnectionKey, RecordId)> = self
            .index
            .iter()
            .filter(|(key, _)| !seen.contains(*key))
            .map(|(key, id)| (key.clone(), *id))
            .collect();
        for (key, id) in absent {
            self.index.remove(&key);
            self.begin_retirement(id, &mut report);
        }

        self.resolutions.lock().retain(|handle| !handle.is_finished());
        RECONCILE_CYCLES.inc();
        debug!(
            cycle,
            created = report.created,
            updated = report.updated,
            retired = report.retired,
            removed = report.removed,
            collisions = report.collisions,
            rejected = report.rejected,
            "reconcile cycle finished"
        );
        report
    }

    //-----------------------------------------------------------
    // Queries

    pub fn get(
        &self,
        id: RecordId,
    ) -> Option<ConnectionRecord> {
        self.store.get(id)
    }

    /// Live record currently matched by `key`.
    pub fn find(
        &self,
        key: &ConnectionKey,
    ) -> Option<ConnectionRecord> {
        self.index.get(key).and_then(|id| self.store.get(*id))
    }

    /// Every registered record, retiring ones included, in creation order.
    pub fn records(&self) -> Vec<ConnectionRecord> {
        self.store.snapshot()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// Number of New and Active records.
    pub fn live_len(&self) -> usize {
        self.index.len()
    }

    /// Number of completed reconcile calls.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        self.store.notifier()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.store.notifier().subscribe()
    }

    pub fn hostnames(&self) -> &HostnameCache {
        &self.hostnames
    }

    /// Wait until every resolution scheduled so far has completed.
    pub async fn wait_for_resolutions(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.resolutions.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!("resolution task failed: {:?}", e);
                }
            }
        }
    }

    //-----------------------------------------------------------
    // Reconciliation steps

    fn create_record(
        &mut self,
        key: ConnectionKey,
        raw: &RawConnection,
        endpoints: &Endpoints,
        owners: &OwnerCache,
        report: &mut CycleReport,
    ) {
        let id = RecordId(self.next_id);
        self.next_id += 1;

        let (owner, icon) = self.owner_display(raw);
        let record = ConnectionRecord::new(id, key.clone(), raw, endpoints, report.cycle, owner, icon);
        self.store.insert(record);
        self.index.insert(key.clone(), id);

        debug!(%id, %key, "connection record created");
        RECORDS_CREATED.inc();
        report.created += 1;
        self.emit(
            report,
            RegistryEvent::Lifecycle(LifecycleChange {
                id,
                key,
                from: None,
                to: Some(LifecycleState::New),
            }),
        );

        // The record is registered before any lookup starts, so every
        // completion finds it.
        self.schedule_owner(id, raw.pid, owners);
        self.schedule_hostname(endpoints.local);
        if let Some(remote) = endpoints.remote {
            self.schedule_hostname(remote);
        }
    }

    fn update_record(
        &mut self,
        id: RecordId,
        raw: &RawConnection,
        endpoints: &Endpoints,
        now: SystemTime,
        report: &mut CycleReport,
    ) {
        let cycle = report.cycle;
        let Some((key, writes, promoted, local_changed, remote_changed)) = self.store.update(id, |record| {
            let mut writes = Vec::new();
            // a notation switch (IPv4-mapped <-> plain) keeps the key but
            // changes the reported address, whose hostname is resolved again
            let local_write = record.set_local_address(endpoints.local);
            let local_changed = local_write.is_some();
            writes.extend(local_write);
            if local_changed {
                writes.extend(record.set_local_host_name(""));
            }
            let remote_write = record.set_remote_address(endpoints.remote);
            let remote_changed = remote_write.is_some();
            writes.extend(remote_write);
            if remote_changed {
                writes.extend(record.set_remote_host_name(""));
            }
            writes.extend(record.set_remote_port(raw.remote_port));
            writes.extend(record.set_tcp_state(raw.state_code.and_then(TcpState::from_code)));
            writes.extend(record.set_access(raw.access_denied, raw.last_error.clone()));
            writes.extend(record.touch(now, cycle));

            let promoted = record.is_new() && record.transition(LifecycleState::Active, cycle).is_ok();
            (record.key().clone(), writes, promoted, local_changed, remote_changed)
        }) else {
            warn!(%id, "indexed record missing from the store");
            return;
        };

        if writes.iter().any(|(field, _)| *field != RecordField::LastSeen) {
            report.updated += 1;
            trace!(%id, changed = writes.len(), "connection record updated");
        }
        let events = self.store.publish_writes(id, &key, writes);
        report.events.extend(events);

        if promoted {
            debug!(%id, "New -> Active");
            self.emit(
                report,
                RegistryEvent::Lifecycle(LifecycleChange {
                    id,
                    key,
                    from: Some(LifecycleState::New),
                    to: Some(LifecycleState::Active),
                }),
            );
        }

        if local_changed {
            self.schedule_hostname(endpoints.local);
        }
        if remote_changed {
            if let Some(remote) = endpoints.remote {
                self.schedule_hostname(remote);
            }
        }
    }

    /// A live record went missing: Active -> Dying, or New -> Active -> Dying.
    fn begin_retirement(
        &mut self,
        id: RecordId,
        report: &mut CycleReport,
    ) {
        let is_new = self.store.get(id).is_some_and(|r| r.is_new());
        if is_new {
            self.step(id, LifecycleState::Active, report);
        }
        if self.step(id, LifecycleState::Dying, report) {
            self.retiring.push(id);
            report.retired += 1;
        }
    }

    /// Dying -> Dead, and removal of Dead records whose grace interval elapsed.
    fn advance_retiring(
        &mut self,
        cycle: u64,
        report: &mut CycleReport,
    ) {
        let grace = self.config.grace_cycles.max(1);
        let mut still_retiring = Vec::with_capacity(self.retiring.len());

        for id in std::mem::take(&mut self.retiring) {
            let Some(record) = self.store.get(id) else {
                continue;
            };
            match (record.state(), record.dead_since_cycle()) {
                (LifecycleState::Dying, _) => {
                    if self.step(id, LifecycleState::Dead, report) {
                        still_retiring.push(id);
                    }
                }
                (LifecycleState::Dead, Some(since)) if cycle.saturating_sub(since) >= grace => {
                    self.remove(id, report);
                }
                _ => still_retiring.push(id),
            }
        }

        self.retiring = still_retiring;
    }

    fn remove(
        &mut self,
        id: RecordId,
        report: &mut CycleReport,
    ) {
        let Some(record) = self.store.remove(id) else {
            return;
        };
        debug!(%id, key = %record.key(), "connection record removed");
        RECORDS_REMOVED.inc();
        report.removed += 1;
        self.emit(
            report,
            RegistryEvent::Lifecycle(LifecycleChange {
                id,
                key: record.key().clone(),
                from: Some(record.state()),
                to: None,
            }),
        );
    }

    /// Apply one lifecycle transition and emit it. Returns false if the
    /// record is gone or the transition is not allowed.
    fn step(
        &mut self,
        id: RecordId,
        to: LifecycleState,
        report: &mut CycleReport,
    ) -> bool {
        let cycle = report.cycle;
        let outcome = self
            .store
            .update(id, |record| record.transition(to, cycle).map(|from| (from, record.key().clone())));
        match outcome {
            Some(Ok((from, key))) => {
                debug!(%id, %from, %to, cycle, "lifecycle transition");
                self.emit(
                    report,
                    RegistryEvent::Lifecycle(LifecycleChange {
                        id,
                        key,
                        from: Some(from),
                        to: Some(to),
                    }),
                );
                true
            }
            Some(Err(e)) => {
                warn!(%id, error = %e, "lifecycle transition rejected");
                false
            }
            None => false,
        }
    }

    fn emit(
        &self,
        report: &mut CycleReport,
        event: RegistryEvent,
    ) {
        self.store.notifier().publish(event.clone());
        report.events.push(event);
    }

    //-----------------------------------------------------------
    // Enrichment

    /// Owner label and icon, fixed at creation.
    fn owner_display(
        &self,
        raw: &RawConnection,
    ) -> (String, Option<IconHandle>) {
        if let Some(module) = &raw.owner_module {
            return (module.module_name.clone(), module.icon.clone());
        }
        if raw.pid == SYSTEM_PID {
            (
                SYSTEM_OWNER.to_string(),
                Some(self.resolvers.icons.icon(SYSTEM_ICON_KEY, true)),
            )
        } else {
            (
                UNKNOWN_OWNER.to_string(),
                Some(self.resolvers.icons.icon(UNKNOWN_ICON_KEY, true)),
            )
        }
    }

    fn schedule_owner(
        &self,
        id: RecordId,
        pid: u32,
        owners: &OwnerCache,
    ) {
        if let Some(owner) = owners.peek(pid) {
            trace!(%id, pid, "owner known in this batch");
            self.store.apply_owner(id, &owner);
            return;
        }

        let lookup = owners.lookup(pid);
        let store = self.store.clone();
        let handle = self.runtime.spawn(async move {
            let owner = lookup.await;
            store.apply_owner(id, &owner);
        });
        self.resolutions.lock().push(handle);
    }

    fn schedule_hostname(
        &self,
        addr: IpAddr,
    ) {
        match self.hostnames.request(addr) {
            HostnameLookup::Cached(name) => {
                self.store.apply_hostname(addr, &name);
            }
            HostnameLookup::InFlight => {}
            HostnameLookup::Scheduled(handle) => self.resolutions.lock().push(handle),
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("cycle", &self.cycle)
            .field("records", &self.store.len())
            .field("live", &self.index.len())
            .field("retiring", &self.retiring.len())
            .finish()
    }
}
