use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_utils::settle;
use crate::test_utils::FakeProcessResolver;
use crate::Error;
use crate::ResolutionError;

fn cache(resolver: &FakeProcessResolver) -> OwnerCache {
    OwnerCache::new(Arc::new(resolver.clone()))
}

#[tokio::test]
async fn test_system_pid_never_calls_resolver() {
    let mut resolver = MockProcessResolver::new();
    resolver.expect_process_info().times(0);
    let cache = OwnerCache::new(Arc::new(resolver));

    assert_eq!(cache.resolve_owner(0).await, OwnerInfo::system());
    assert_eq!(cache.peek(0), Some(OwnerInfo::system()));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_resolves_once_per_pid() {
    let resolver = FakeProcessResolver::new(&[(100, "chrome.exe", "C:\\chrome.exe")]);
    let cache = cache(&resolver);

    let owners = join_all((0..5).map(|_| cache.resolve_owner(100))).await;

    assert!(owners.iter().all(|o| *o == OwnerInfo::new("chrome.exe", "C:\\chrome.exe")));
    assert_eq!(resolver.call_count(), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_call() {
    let gate = CancellationToken::new();
    let resolver = FakeProcessResolver::new(&[(7, "svc.exe", "C:\\svc.exe")]).gated(gate.clone());
    let cache = cache(&resolver);

    let first = tokio::spawn(cache.lookup(7));
    let second = tokio::spawn(cache.lookup(7));
    settle().await;
    assert!(cache.peek(7).is_none());

    gate.cancel();
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    assert_eq!(first, second);
    assert_eq!(resolver.calls_for(7), 1);
    assert_eq!(cache.peek(7), Some(OwnerInfo::new("svc.exe", "C:\\svc.exe")));
}

#[tokio::test]
async fn test_failure_is_cached_as_sentinel() {
    let resolver = FakeProcessResolver::new(&[]);
    let cache = cache(&resolver);

    let owner = cache.resolve_owner(4242).await;
    let again = cache.resolve_owner(4242).await;

    assert!(owner.is_unresolved());
    assert_eq!(owner.process_name, crate::UNRESOLVED_PROCESS_NAME);
    assert_eq!(owner.executable_path, crate::UNRESOLVED_PROCESS_PATH);
    assert_eq!(again, owner);
    assert_eq!(resolver.call_count(), 1);
}

#[tokio::test]
async fn test_missing_fields_become_unknown() {
    let mut resolver = MockProcessResolver::new();
    resolver.expect_process_info().times(1).returning(|_| {
        Ok(ProcessInfo {
            name: Some("init".to_string()),
            path: None,
        })
    });
    let cache = OwnerCache::new(Arc::new(resolver));

    let owner = cache.resolve_owner(1).await;

    assert_eq!(owner, OwnerInfo::new("init", crate::UNKNOWN_OWNER));
    assert!(!owner.is_unresolved());
}

#[tokio::test]
async fn test_mock_error_yields_sentinel() {
    let mut resolver = MockProcessResolver::new();
    resolver.expect_process_info().times(1).returning(|pid| {
        Err(Error::Resolution(ResolutionError::ProcessLookup {
            pid,
            reason: "access denied".to_string(),
        }))
    });
    let cache = OwnerCache::new(Arc::new(resolver));

    assert_eq!(cache.resolve_owner(9).await, OwnerInfo::unresolved());
}

#[tokio::test]
async fn test_clear_forces_new_lookup() {
    let resolver = FakeProcessResolver::new(&[(100, "a.exe", "C:\\a.exe")]);
    let cache = cache(&resolver);

    cache.resolve_owner(100).await;
    cache.clear();
    assert!(cache.is_empty());
    cache.resolve_owner(100).await;

    assert_eq!(resolver.calls_for(100), 2);
}

#[tokio::test]
async fn test_fresh_cache_per_batch() {
    let resolver = FakeProcessResolver::new(&[(100, "a.exe", "C:\\a.exe"), (200, "b.exe", "C:\\b.exe")]);

    for _batch in 0..3 {
        let cache = cache(&resolver);
        for pid in [100, 200, 100, 200, 100] {
            cache.resolve_owner(pid).await;
        }
    }

    assert_eq!(resolver.calls_for(100), 3);
    assert_eq!(resolver.calls_for(200), 3);
}
