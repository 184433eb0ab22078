mod support;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tickwatch::classifier::{AssigneeFilter, BucketKind, BucketSpec, TimeBucketClassifier};
use tickwatch::events::EventKind;
use tickwatch::model::{Priority, Task};
use tickwatch::notifications::{NotificationScheduler, NOTIFIED_KEY, REMINDED_KEY, REMINDER_INTERVAL_SECS};
use tickwatch::notifier::InterruptionLevel;
use tickwatch::snapshot::SnapshotCoordinator;
use tickwatch::store::{JsonFileStore, MemoryStore, PersistentStore};

use support::{
    assigned, drain_events, ny, ny_at, task, FakeTaskService, RecordingNotifier, TimeHarness,
};

struct Fixture {
    harness: TimeHarness,
    service: Arc<FakeTaskService>,
    notifier: Arc<RecordingNotifier>,
    coordinator: Arc<SnapshotCoordinator>,
    notifications: Arc<NotificationScheduler>,
    _classifiers: Vec<Arc<TimeBucketClassifier>>,
}

impl Fixture {
    fn new(now: DateTime<Utc>, tasks: Vec<Task>, store: Arc<dyn PersistentStore>) -> Self {
        Self::build(now, tasks, store, true)
    }

    fn build(
        now: DateTime<Utc>,
        tasks: Vec<Task>,
        store: Arc<dyn PersistentStore>,
        enabled: bool,
    ) -> Self {
        let harness = TimeHarness::new(now);
        let service = FakeTaskService::new(tasks);
        let notifier = RecordingNotifier::new();
        let coordinator = Arc::new(SnapshotCoordinator::new(
            service.clone(),
            harness.clock.clone(),
            harness.events.clone(),
        ));
        let channels = HashMap::from([(5, "ch-5".to_string()), (6, "ch-6".to_string())]);
        let notifications = NotificationScheduler::new(
            enabled,
            channels,
            ny(),
            harness.clock.clone(),
            harness.scheduler.clone(),
            harness.dispatch.clone(),
            notifier.clone(),
            store,
            harness.events.clone(),
            coordinator.subscribe(),
        );

        let filters = [
            AssigneeFilter::Any,
            AssigneeFilter::Unassigned,
            AssigneeFilter::Member(5),
            AssigneeFilter::Member(6),
        ];
        let classifiers = filters
            .into_iter()
            .map(|filter| {
                let classifier = TimeBucketClassifier::new(
                    BucketSpec::new(BucketKind::PastDue, filter, ny()),
                    coordinator.subscribe(),
                    harness.clock.clone(),
                    harness.scheduler.clone(),
                    harness.dispatch.clone(),
                    harness.events.clone(),
                );
                classifier.add_listener(notifications.clone());
                coordinator.add_listener(classifier.clone());
                classifier
            })
            .collect();

        Self {
            harness,
            service,
            notifier,
            coordinator,
            notifications,
            _classifiers: classifiers,
        }
    }

    /// Poll, then wait for the notification work it handed off.
    async fn poll(&self) {
        self.coordinator.poll().await;
        self.harness.settle().await;
    }
}

fn overdue_for_five() -> Task {
    let mut task = assigned(task(1, "water plants", Some(ny_at(2026, 1, 10, 8, 0))), 5);
    task.priority = Priority::High;
    task
}

#[tokio::test]
async fn notifies_once_per_due_instant() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let fx = Fixture::new(now, vec![overdue_for_five()], Arc::new(MemoryStore::new()));
    let mut events = fx.harness.events.subscribe();

    fx.poll().await;
    fx.poll().await;

    let sent = fx.notifier.sent();
    assert_eq!(sent.len(), 1);
    let (channel, payload) = &sent[0];
    assert_eq!(channel, "ch-5");
    assert_eq!(payload.title, "Past Due: water plants");
    assert_eq!(payload.message, "Was due Sat Jan 10 at 8:00 AM");
    assert_eq!(payload.tag, "tickwatch-task-1");
    assert_eq!(payload.interruption_level, InterruptionLevel::Critical);
    assert_eq!(payload.actions.len(), 3);

    assert!(fx.notifications.is_notified(1, ny_at(2026, 1, 10, 8, 0)).await);
    assert_eq!(drain_events(&mut events, EventKind::NotificationSent).len(), 1);
}

#[tokio::test]
async fn changed_due_instant_notifies_again() {
    let now = ny_at(2026, 1, 10, 12, 0);
    let fx = Fixture::new(now, vec![overdue_for_five()], Arc::new(MemoryStore::new()));
    fx.poll().await;

    let mut moved = overdue_for_five();
    moved.due_at = Some(ny_at(2026, 1, 10, 11, 0));
    fx.service.set_tasks(vec![moved]);
    fx.poll().await;

    assert_eq!(fx.notifier.sent().len(), 2);
    assert!(fx.notifications.is_notified(1, ny_at(2026, 1, 10, 11, 0)).await);
    assert!(!fx.notifications.is_notified(1, ny_at(2026, 1, 10, 8, 0)).await);
}

#[tokio::test]
async fn unassigned_task_fans_out_to_every_channel() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let nobody = task(2, "recycling", Some(ny_at(2026, 1, 9, 20, 0)));
    let fx = Fixture::new(now, vec![nobody], Arc::new(MemoryStore::new()));

    fx.poll().await;
    assert_eq!(fx.notifier.channels(), vec!["ch-5".to_string(), "ch-6".to_string()]);
}

#[tokio::test]
async fn assignee_without_channel_gets_nothing() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let other = assigned(task(3, "garage", Some(ny_at(2026, 1, 9, 20, 0))), 9);
    let fx = Fixture::new(now, vec![other], Arc::new(MemoryStore::new()));

    fx.poll().await;
    assert!(fx.notifier.sent().is_empty());
}

#[tokio::test]
async fn reminders_repeat_daily_until_the_task_leaves_past_due() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let fx = Fixture::new(now, vec![overdue_for_five()], Arc::new(MemoryStore::new()));
    let mut events = fx.harness.events.subscribe();
    fx.poll().await;

    let first = now + Duration::seconds(REMINDER_INTERVAL_SECS);
    assert_eq!(fx.notifications.pending_reminders().await, vec![(1, first)]);

    fx.harness.advance_to(first).await;
    assert_eq!(
        fx.notifier.titles(),
        vec![
            "Past Due: water plants".to_string(),
            "Reminder: Past Due: water plants".to_string(),
        ]
    );
    assert_eq!(drain_events(&mut events, EventKind::ReminderSent).len(), 1);
    let second = first + Duration::seconds(REMINDER_INTERVAL_SECS);
    assert_eq!(fx.notifications.pending_reminders().await, vec![(1, second)]);

    // Completed: the service moves the due date into the future.
    let mut done = overdue_for_five();
    done.due_at = Some(ny_at(2026, 1, 20, 8, 0));
    fx.service.set_tasks(vec![done]);
    fx.poll().await;
    assert!(fx.notifications.pending_reminders().await.is_empty());

    fx.harness.advance_to(second).await;
    assert_eq!(fx.notifier.sent().len(), 2);
}

#[tokio::test]
async fn failed_send_is_retried_on_next_poll() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let fx = Fixture::new(now, vec![overdue_for_five()], Arc::new(MemoryStore::new()));
    fx.notifier.fail_channel("ch-5", true);

    fx.poll().await;
    assert!(fx.notifier.sent().is_empty());
    assert!(fx.notifications.pending_reminders().await.is_empty());

    fx.notifier.fail_channel("ch-5", false);
    fx.poll().await;
    assert_eq!(fx.notifier.sent().len(), 1);
}

#[tokio::test]
async fn records_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    let now = ny_at(2026, 1, 10, 9, 0);

    let first = Fixture::new(now, vec![overdue_for_five()], Arc::new(JsonFileStore::new(&path)));
    first.poll().await;
    assert_eq!(first.notifier.sent().len(), 1);

    let saved = JsonFileStore::new(&path).load(NOTIFIED_KEY).await.expect("load");
    assert_eq!(
        saved.get("1").map(String::as_str),
        Some(ny_at(2026, 1, 10, 8, 0).to_rfc3339().as_str())
    );

    let restarted = Fixture::new(
        now + Duration::hours(1),
        vec![overdue_for_five()],
        Arc::new(JsonFileStore::new(&path)),
    );
    restarted.poll().await;
    assert!(restarted.notifier.sent().is_empty());
}

#[tokio::test]
async fn reminder_chain_resumes_after_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    let now = ny_at(2026, 1, 10, 9, 0);

    let first = Fixture::new(now, vec![overdue_for_five()], Arc::new(JsonFileStore::new(&path)));
    first.poll().await;
    let reminded = JsonFileStore::new(&path).load(REMINDED_KEY).await.expect("load");
    assert_eq!(
        reminded.get("1").map(String::as_str),
        Some(now.to_rfc3339().as_str())
    );
    drop(first);

    let restarted = Fixture::new(
        now + Duration::hours(1),
        vec![overdue_for_five()],
        Arc::new(JsonFileStore::new(&path)),
    );
    restarted.notifications.restore().await;
    restarted.poll().await;

    let due = now + Duration::seconds(REMINDER_INTERVAL_SECS);
    assert_eq!(restarted.notifications.pending_reminders().await, vec![(1, due)]);
    restarted.harness.advance_to(due).await;
    assert_eq!(
        restarted.notifier.titles(),
        vec!["Reminder: Past Due: water plants".to_string()]
    );
}

#[tokio::test]
async fn overdue_reminder_after_a_long_outage_fires_on_the_next_tick() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    let now = ny_at(2026, 1, 10, 9, 0);

    let first = Fixture::new(now, vec![overdue_for_five()], Arc::new(JsonFileStore::new(&path)));
    first.poll().await;
    drop(first);

    let later = now + Duration::days(3);
    let restarted = Fixture::new(later, vec![overdue_for_five()], Arc::new(JsonFileStore::new(&path)));
    restarted.poll().await;
    assert_eq!(restarted.notifications.pending_reminders().await, vec![(1, later)]);
    restarted.harness.advance_to(later).await;
    assert_eq!(restarted.notifier.sent().len(), 1);
}

#[tokio::test]
async fn slow_notifier_does_not_hold_up_the_poll() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let tasks = (1..=3)
        .map(|id| assigned(task(id, "chore", Some(ny_at(2026, 1, 10, 8, 0))), 5))
        .collect();
    let fx = Fixture::new(now, tasks, Arc::new(MemoryStore::new()));
    fx.notifier.set_delay(std::time::Duration::from_millis(500));

    let started = std::time::Instant::now();
    fx.coordinator.poll().await;
    assert!(started.elapsed() < std::time::Duration::from_millis(400));
    assert!(fx.notifier.sent().is_empty());

    // A second poll while the sends are still in flight does not duplicate them.
    fx.coordinator.poll().await;
    fx.harness.settle().await;
    assert_eq!(fx.notifier.sent().len(), 3);
    for id in 1..=3 {
        assert!(fx.notifications.is_notified(id, ny_at(2026, 1, 10, 8, 0)).await);
    }
}

#[tokio::test]
async fn reminder_follows_the_task_to_its_new_assignee() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let nobody = task(2, "recycling", Some(ny_at(2026, 1, 9, 20, 0)));
    let fx = Fixture::new(now, vec![nobody.clone()], Arc::new(MemoryStore::new()));
    fx.poll().await;
    assert_eq!(fx.notifier.channels(), vec!["ch-5".to_string(), "ch-6".to_string()]);

    fx.service.set_tasks(vec![assigned(nobody, 6)]);
    fx.poll().await;
    assert_eq!(fx.notifier.sent().len(), 2);

    let due = now + Duration::seconds(REMINDER_INTERVAL_SECS);
    assert_eq!(fx.notifications.pending_reminders().await, vec![(2, due)]);
    fx.harness.advance_to(due).await;
    let channels = fx.notifier.channels();
    assert_eq!(channels.len(), 3);
    assert_eq!(channels[2], "ch-6");
    assert_eq!(
        fx.notifications.pending_reminders().await,
        vec![(2, due + Duration::seconds(REMINDER_INTERVAL_SECS))]
    );
}

#[tokio::test]
async fn disabled_scheduler_sends_nothing() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let fx = Fixture::build(now, vec![overdue_for_five()], Arc::new(MemoryStore::new()), false);
    fx.poll().await;
    assert!(fx.notifier.sent().is_empty());
}
