mod support;

use std::sync::Arc;

use tickwatch::classifier::{AssigneeFilter, BucketKind};
use tickwatch::config::Config;
use tickwatch::model::FrequencyKind;
use tickwatch::runtime::{classifier_specs, Collaborators, Runtime};
use tickwatch::store::MemoryStore;

use support::{
    assigned, member, ny, ny_at, recurring, task, FakeTaskService, RecordingNotifier, TimeHarness,
};

fn config() -> Config {
    let mut config = Config::default();
    config.timezone = "America/New_York".to_string();
    config.automation.auto_complete_past_due_recurrent = true;
    config.notifications.notify_on_past_due = true;
    config
        .notifications
        .assignee_channels
        .insert("5".to_string(), "ch-5".to_string());
    config
}

fn build(harness: &TimeHarness, service: &Arc<FakeTaskService>, notifier: &Arc<RecordingNotifier>) -> Runtime {
    Runtime::new(
        &config(),
        Collaborators {
            service: service.clone(),
            notifier: notifier.clone(),
            store: Arc::new(MemoryStore::new()),
            clock: harness.clock.clone(),
            scheduler: harness.scheduler.clone(),
        },
        harness.events.clone(),
        harness.dispatch.clone(),
    )
    .expect("runtime")
}

#[test]
fn specs_cover_every_bucket_for_each_scope() {
    let mut inactive = member(6);
    inactive.is_active = false;
    let specs = classifier_specs(ny(), Default::default(), 7, &[member(5), inactive, member(5)], &[]);
    assert_eq!(specs.len(), 3 * BucketKind::ALL.len());
    assert!(specs
        .iter()
        .any(|spec| spec.kind == BucketKind::Evening && spec.filter == AssigneeFilter::Member(5)));
    assert!(!specs.iter().any(|spec| spec.filter == AssigneeFilter::Member(6)));
}

#[test]
fn channel_members_are_scoped_without_discovery() {
    let specs = classifier_specs(ny(), Default::default(), 7, &[], &[9, 5]);
    assert_eq!(specs.len(), 4 * BucketKind::ALL.len());
    let members: Vec<_> = specs
        .iter()
        .filter(|spec| spec.kind == BucketKind::PastDue)
        .map(|spec| spec.filter)
        .collect();
    assert_eq!(
        members,
        vec![
            AssigneeFilter::Any,
            AssigneeFilter::Unassigned,
            AssigneeFilter::Member(5),
            AssigneeFilter::Member(9),
        ]
    );
}

#[tokio::test]
async fn start_wires_buckets_notifications_and_auto_completion() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let harness = TimeHarness::new(now);
    let service = FakeTaskService::new(vec![
        assigned(task(1, "water plants", Some(ny_at(2026, 1, 9, 20, 0))), 5),
        recurring(task(2, "feed cat", Some(ny_at(2026, 1, 9, 8, 0))), FrequencyKind::Daily, 1),
        task(3, "someday", None),
    ]);
    service.set_members(vec![member(5)]);
    let notifier = RecordingNotifier::new();
    let runtime = build(&harness, &service, &notifier);

    runtime.start().await;
    harness.settle().await;
    assert_eq!(runtime.classifiers().len(), 3 * BucketKind::ALL.len());
    assert_eq!(runtime.coordinator().current().version(), 1);

    let mine = runtime
        .classifier(BucketKind::PastDue, AssigneeFilter::Member(5))
        .expect("member classifier");
    assert_eq!(mine.members().iter().map(|t| t.id).collect::<Vec<_>>(), vec![1]);
    let someday = runtime
        .classifier(BucketKind::NoDueDate, AssigneeFilter::Any)
        .expect("no-due classifier");
    assert_eq!(someday.members().len(), 1);

    // Task 2 is unassigned and member 5 is the only channel.
    assert_eq!(notifier.channels(), vec!["ch-5".to_string(), "ch-5".to_string()]);
    assert_eq!(runtime.autocomplete().pending().len(), 1);

    runtime.shutdown().await;
    assert!(harness.scheduler.pending().is_empty());
}

#[tokio::test]
async fn no_members_keeps_shared_and_channel_buckets() {
    let harness = TimeHarness::new(ny_at(2026, 1, 10, 9, 0));
    let service = FakeTaskService::new(Vec::new());
    let notifier = RecordingNotifier::new();
    let runtime = build(&harness, &service, &notifier);

    runtime.start().await;
    assert_eq!(runtime.classifiers().len(), 3 * BucketKind::ALL.len());
    assert!(runtime
        .classifier(BucketKind::PastDue, AssigneeFilter::Member(5))
        .is_some());
}

#[tokio::test]
async fn failed_member_listing_still_notifies_configured_channels() {
    let harness = TimeHarness::new(ny_at(2026, 1, 10, 9, 0));
    let service = FakeTaskService::new(vec![assigned(
        task(1, "water plants", Some(ny_at(2026, 1, 9, 20, 0))),
        5,
    )]);
    service.set_members(vec![member(5), member(8)]);
    service.fail_members(true);
    let notifier = RecordingNotifier::new();
    let runtime = build(&harness, &service, &notifier);

    runtime.start().await;
    harness.settle().await;
    assert_eq!(runtime.classifiers().len(), 3 * BucketKind::ALL.len());
    assert_eq!(notifier.channels(), vec!["ch-5".to_string()]);

    assert!(!runtime.discover_members().await);
    service.fail_members(false);
    assert!(runtime.discover_members().await);
    assert_eq!(runtime.classifiers().len(), 4 * BucketKind::ALL.len());
    assert!(runtime
        .classifier(BucketKind::NoDueDate, AssigneeFilter::Member(8))
        .is_some());
}

#[tokio::test]
async fn new_assignee_in_a_snapshot_gets_buckets() {
    let now = ny_at(2026, 1, 10, 9, 0);
    let harness = TimeHarness::new(now);
    let service = FakeTaskService::new(vec![task(1, "dishes", Some(ny_at(2026, 1, 9, 20, 0)))]);
    let mut inactive = member(4);
    inactive.is_active = false;
    service.set_members(vec![member(5), inactive]);
    let notifier = RecordingNotifier::new();
    let runtime = build(&harness, &service, &notifier);
    runtime.start().await;
    assert!(runtime
        .classifier(BucketKind::PastDue, AssigneeFilter::Member(7))
        .is_none());

    service.set_tasks(vec![
        assigned(task(1, "dishes", Some(ny_at(2026, 1, 9, 20, 0))), 7),
        assigned(task(2, "old chore", None), 4),
    ]);
    runtime.poll().await;

    let theirs = runtime
        .classifier(BucketKind::PastDue, AssigneeFilter::Member(7))
        .expect("classifier for new assignee");
    assert_eq!(theirs.members().iter().map(|t| t.id).collect::<Vec<_>>(), vec![1]);
    assert_eq!(runtime.classifiers().len(), 4 * BucketKind::ALL.len());
}

#[tokio::test]
async fn requested_polls_run_until_shutdown() {
    let harness = TimeHarness::new(ny_at(2026, 1, 10, 9, 0));
    let service = FakeTaskService::new(vec![task(1, "a", None)]);
    let notifier = RecordingNotifier::new();
    let runtime = build(&harness, &service, &notifier);
    runtime.start().await;
    assert_eq!(service.fetches(), 1);

    let poll = runtime.poll_handle();
    runtime
        .run_until(async move {
            poll.request();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        })
        .await;
    assert_eq!(service.fetches(), 2);
    assert!(harness.scheduler.pending().is_empty());
}

#[test]
fn invalid_timezone_is_rejected() {
    let harness = TimeHarness::new(ny_at(2026, 1, 10, 9, 0));
    let mut config = config();
    config.timezone = "Mars/Olympus".to_string();
    let result = Runtime::new(
        &config,
        Collaborators {
            service: FakeTaskService::new(Vec::new()),
            notifier: RecordingNotifier::new(),
            store: Arc::new(MemoryStore::new()),
            clock: harness.clock.clone(),
            scheduler: harness.scheduler.clone(),
        },
        harness.events.clone(),
        harness.dispatch.clone(),
    );
    assert!(matches!(result, Err(tickwatch::Error::UnknownTimezone(_))));
}
