mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tickwatch::events::EventKind;
use tickwatch::model::Priority;
use tickwatch::snapshot::{Snapshot, SnapshotCoordinator, SnapshotListener};

use support::{drain_events, task, utc, FakeTaskService, TimeHarness};

#[derive(Default)]
struct CountingListener {
    calls: AtomicUsize,
    changed: AtomicUsize,
}

#[async_trait]
impl SnapshotListener for CountingListener {
    async fn on_snapshot(&self, _snapshot: Arc<Snapshot>, changed: bool) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if changed {
            self.changed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn coordinator(service: &Arc<FakeTaskService>, harness: &TimeHarness) -> SnapshotCoordinator {
    SnapshotCoordinator::new(service.clone(), harness.clock.clone(), harness.events.clone())
}

#[tokio::test]
async fn version_bumps_only_when_content_changes() {
    let harness = TimeHarness::new(utc(2026, 1, 10, 12, 0));
    let service = FakeTaskService::new(vec![task(1, "dishes", Some(utc(2026, 1, 10, 18, 0)))]);
    let coordinator = coordinator(&service, &harness);
    let mut events = harness.events.subscribe();

    let first = coordinator.poll().await;
    assert_eq!(first.version(), 1);
    assert_eq!(first.len(), 1);

    let same = coordinator.poll().await;
    assert_eq!(same.version(), 1);
    assert!(Arc::ptr_eq(&first, &same));

    let mut renamed = task(1, "dishes and pans", Some(utc(2026, 1, 10, 18, 0)));
    renamed.priority = Priority::High;
    service.set_tasks(vec![renamed]);
    let changed = coordinator.poll().await;
    assert_eq!(changed.version(), 2);
    assert_eq!(coordinator.current().version(), 2);

    assert_eq!(drain_events(&mut events, EventKind::SnapshotChanged).len(), 2);
}

#[tokio::test]
async fn id_set_change_bumps_version() {
    let harness = TimeHarness::new(utc(2026, 1, 10, 12, 0));
    let service = FakeTaskService::new(vec![task(1, "a", None)]);
    let coordinator = coordinator(&service, &harness);
    coordinator.poll().await;

    service.set_tasks(vec![task(1, "a", None), task(2, "b", None)]);
    let snapshot = coordinator.poll().await;
    assert_eq!(snapshot.version(), 2);
    assert!(snapshot.get(2).is_some());

    service.set_tasks(vec![task(2, "b", None)]);
    let snapshot = coordinator.poll().await;
    assert_eq!(snapshot.version(), 3);
    assert!(snapshot.get(1).is_none());
}

#[tokio::test]
async fn fetch_failure_keeps_previous_snapshot_and_skips_listeners() {
    let harness = TimeHarness::new(utc(2026, 1, 10, 12, 0));
    let service = FakeTaskService::new(vec![task(1, "a", None)]);
    let coordinator = coordinator(&service, &harness);
    let listener = Arc::new(CountingListener::default());
    coordinator.add_listener(listener.clone());

    coordinator.poll().await;
    assert_eq!(listener.calls.load(Ordering::SeqCst), 1);

    service.fail_fetch(true);
    let kept = coordinator.poll().await;
    assert_eq!(kept.version(), 1);
    assert_eq!(kept.len(), 1);
    assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    assert!(coordinator.try_poll().await.is_err());

    service.fail_fetch(false);
    coordinator.poll().await;
    assert_eq!(listener.calls.load(Ordering::SeqCst), 2);
    assert_eq!(listener.changed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn subscribers_see_only_new_versions() {
    let harness = TimeHarness::new(utc(2026, 1, 10, 12, 0));
    let service = FakeTaskService::new(vec![task(1, "a", None)]);
    let coordinator = coordinator(&service, &harness);
    let mut receiver = coordinator.subscribe();

    coordinator.poll().await;
    assert!(receiver.has_changed().expect("open"));
    assert_eq!(receiver.borrow_and_update().version(), 1);

    coordinator.poll().await;
    assert!(!receiver.has_changed().expect("open"));
}
