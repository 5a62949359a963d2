use std::net::IpAddr;

use dashmap::DashMap;
use tracing::trace;

use crate::connection::FieldWrite;
use crate::metrics::DISCARDED_COMPLETIONS;
use crate::ChangeNotifier;
use crate::ConnectionKey;
use crate::ConnectionRecord;
use crate::FieldChange;
use crate::HostnameSink;
use crate::OwnerInfo;
use crate::RecordId;
use crate::RegistryEvent;

/// Registered records, shared between the reconciliation cycle and the
/// background resolvers.
///
/// Presence in the store is what "still registered" means: resolver writes
/// look the record up first and are dropped when it is gone.
#[derive(Debug)]
pub(crate) struct RecordStore {
    records: DashMap<RecordId, ConnectionRecord>,
    notifier: ChangeNotifier,
}

impl RecordStore {
    pub(crate) fn new(notifier: ChangeNotifier) -> Self {
        Self {
            records: DashMap::new(),
            notifier,
        }
    }

    pub(crate) fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub(crate) fn insert(
        &self,
        record: ConnectionRecord,
    ) {
        self.records.insert(record.id(), record);
    }

    pub(crate) fn remove(
        &self,
        id: RecordId,
    ) -> Option<ConnectionRecord> {
        self.records.remove(&id).map(|(_, record)| record)
    }

    pub(crate) fn get(
        &self,
        id: RecordId,
    ) -> Option<ConnectionRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Run `f` against the record while holding its shard lock.
    pub(crate) fn update<R>(
        &self,
        id: RecordId,
        f: impl FnOnce(&mut ConnectionRecord) -> R,
    ) -> Option<R> {
        self.records.get_mut(&id).map(|mut r| f(r.value_mut()))
    }

    /// All records in creation order.
    pub(crate) fn snapshot(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id());
        records
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Write a resolved owner. Returns false, and writes nothing, when the
    /// record was removed before the lookup completed.
    pub(crate) fn apply_owner(
        &self,
        id: RecordId,
        owner: &OwnerInfo,
    ) -> bool {
        let Some((key, writes)) = self.update(id, |record| (record.key().clone(), record.apply_owner(owner))) else {
            trace!(%id, "owner resolved for a removed record; discarded");
            DISCARDED_COMPLETIONS.inc();
            return false;
        };
        self.publish_writes(id, &key, writes);
        true
    }

    pub(crate) fn publish_writes(
        &self,
        id: RecordId,
        key: &ConnectionKey,
        writes: Vec<FieldWrite>,
    ) -> Vec<RegistryEvent> {
        let events: Vec<RegistryEvent> = writes
            .into_iter()
            .map(|(field, value)| {
                RegistryEvent::Field(FieldChange {
                    id,
                    key: key.clone(),
                    field,
                    value,
                })
            })
            .collect();
        self.notifier.publish_all(events.iter().cloned());
        events
    }
}

impl HostnameSink for RecordStore {
    fn apply_hostname(
        &self,
        addr: IpAddr,
        name: &str,
    ) -> usize {
        let mut holders = 0;
        let mut changed = Vec::new();
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            let mut writes = Vec::new();
            if record.local_address() == addr {
                holders += 1;
                writes.extend(record.set_local_host_name(name));
            }
            if record.remote_address() == Some(addr) {
                holders += 1;
                writes.extend(record.set_remote_host_name(name));
            }
            if !writes.is_empty() {
                changed.push((record.id(), record.key().clone(), writes));
            }
        }

        if holders == 0 {
            trace!(%addr, "no registered record holds the resolved address");
            DISCARDED_COMPLETIONS.inc();
        }
        // shard locks are released before publishing
        let updated = changed.len();
        for (id, key, writes) in changed {
            self.publish_writes(id, &key, writes);
        }
        updated
    }
}
