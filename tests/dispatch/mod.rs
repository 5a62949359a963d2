use std::time::Duration;

use connwatch::EventDispatcher;
use connwatch::RegistryEvent;
use connwatch::TcpState;
use tokio_util::sync::CancellationToken;

use crate::common::entry;
use crate::common::setup;

/// Events raised on the reconcile thread and by resolver tasks are handed
/// to a consumer running on its own runtime.
#[test]
fn test_events_are_handed_to_consumer_runtime() {
    let producer = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let consumer = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

    let (tx, rx) = std::sync::mpsc::channel::<(String, RegistryEvent)>();
    let cancel = CancellationToken::new();

    producer.block_on(async {
        let (mut registry, _, _) = setup();
        let handle = EventDispatcher::spawn(
            registry.notifier(),
            consumer.handle(),
            move |event: RegistryEvent| {
                let thread = std::thread::current().name().unwrap_or_default().to_string();
                let _ = tx.send((thread, event));
            },
            cancel.clone(),
        );

        let batch = registry.begin_batch();
        registry.reconcile(&[entry(TcpState::Established)], &batch);
        registry.wait_for_resolutions().await;
        drop(batch);

        // drive the consumer runtime from a dedicated thread
        let consumer_thread = std::thread::Builder::new()
            .name("consumer".to_string())
            .spawn(move || {
                consumer.block_on(async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    cancel.cancel();
                    handle.join().await;
                })
            })
            .unwrap();
        consumer_thread.join().unwrap();
    });

    let delivered: Vec<(String, RegistryEvent)> = rx.try_iter().collect();
    assert!(!delivered.is_empty());
    assert!(delivered.iter().all(|(thread, _)| thread == "consumer"));
    assert!(delivered
        .iter()
        .any(|(_, e)| e.as_lifecycle().is_some_and(|c| c.is_creation())));
    assert!(delivered
        .iter()
        .any(|(_, e)| e.as_field().is_some_and(|c| c.field == connwatch::RecordField::RemoteHostName)));
}
