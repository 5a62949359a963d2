use connwatch::LifecycleState;
use connwatch::RecordField;
use connwatch::RegistryEvent;
use connwatch::TcpState;

use crate::common::entry;
use crate::common::setup;

#[tokio::test]
async fn test_five_cycle_scenario() {
    let (mut registry, processes, hostnames) = setup();
    let mut rx = registry.subscribe();

    // cycle 1: first sighting
    let batch = registry.begin_batch();
    let report = registry.reconcile(&[entry(TcpState::Established)], &batch);
    drop(batch);
    assert_eq!(report.created, 1);
    let a = registry.records().remove(0);
    assert_eq!(a.state(), LifecycleState::New);
    assert_eq!(a.tcp_state(), Some(TcpState::Established));

    registry.wait_for_resolutions().await;
    let resolved = registry.get(a.id()).unwrap();
    assert_eq!(resolved.remote_host_name(), "example.com");
    assert_eq!(
        resolved.group_key(),
        Some("chrome.exe (C:\\Program Files\\chrome.exe) - [4]")
    );
    assert_eq!(processes.calls.lock().len(), 1);
    assert_eq!(
        hostnames
            .calls
            .lock()
            .iter()
            .filter(|addr| **addr == "93.184.216.34".parse::<std::net::IpAddr>().unwrap())
            .count(),
        1
    );

    // cycle 2: CLOSE_WAIT
    let batch = registry.begin_batch();
    let report = registry.reconcile(&[entry(TcpState::CloseWait)], &batch);
    drop(batch);
    let state_changes: Vec<_> = report
        .field_changes()
        .filter(|c| c.field == RecordField::TcpState)
        .collect();
    assert_eq!(state_changes.len(), 1);
    let a2 = registry.get(a.id()).unwrap();
    assert_eq!(a2.tcp_state(), Some(TcpState::CloseWait));
    assert!(a2.last_seen() > a.last_seen());

    // cycles 3-5: absent
    let mut states = Vec::new();
    for _ in 3..=5 {
        let batch = registry.begin_batch();
        registry.reconcile(&[], &batch);
        states.push(registry.get(a.id()).map(|r| r.state()));
    }
    assert_eq!(
        states,
        vec![Some(LifecycleState::Dying), Some(LifecycleState::Dead), None]
    );
    assert!(registry.is_empty());

    let lifecycle: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|e| match e {
            RegistryEvent::Lifecycle(change) => Some((change.from, change.to)),
            RegistryEvent::Field(_) => None,
        })
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            (None, Some(LifecycleState::New)),
            (Some(LifecycleState::New), Some(LifecycleState::Active)),
            (Some(LifecycleState::Active), Some(LifecycleState::Dying)),
            (Some(LifecycleState::Dying), Some(LifecycleState::Dead)),
            (Some(LifecycleState::Dead), None),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_records_share_hostname_lookup() {
    let (mut registry, _processes, hostnames) = setup();

    let mut snapshot = vec![entry(TcpState::Established)];
    snapshot.extend((0..8).map(|i| {
        connwatch::RawConnection::new(1000 + i, connwatch::Protocol::Tcp, "10.0.0.5", 51000 + i as u16)
            .with_remote("93.184.216.34", 443)
            .with_state_code(TcpState::Established.code())
    }));

    let batch = registry.begin_batch();
    registry.reconcile(&snapshot, &batch);
    registry.wait_for_resolutions().await;

    let remote: std::net::IpAddr = "93.184.216.34".parse().unwrap();
    assert_eq!(hostnames.calls.lock().iter().filter(|a| **a == remote).count(), 1);
    assert!(registry.records().iter().all(|r| r.remote_host_name() == "example.com"));
    // unknown pids resolve to the sentinel owner
    assert!(registry
        .records()
        .iter()
        .filter(|r| r.pid() != 4)
        .all(|r| r.process_name() == Some(connwatch::UNRESOLVED_PROCESS_NAME)));
}
