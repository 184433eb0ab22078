//! Wiring of the long-running service.
//!
//! One snapshot coordinator feeds a set of classifiers and the
//! auto-completion scheduler; PastDue classifiers for members and the
//! unassigned scope feed the notification scheduler.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono_tz::Tz;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::actions::ActionRouter;
use crate::autocomplete::AutoCompletionScheduler;
use crate::calendar::DayCutoffs;
use crate::classifier::{AssigneeFilter, BucketKind, BucketSpec, RefreshReason, TimeBucketClassifier};
use crate::clock::Clock;
use crate::completion::CompletionCoordinator;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::model::{Member, MemberId};
use crate::notifications::NotificationScheduler;
use crate::notifier::Notifier;
use crate::scheduler::{Dispatch, Scheduler};
use crate::service::TaskService;
use crate::snapshot::{PollHandle, SnapshotCoordinator};
use crate::store::PersistentStore;

/// External collaborators the runtime is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub service: Arc<dyn TaskService>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn PersistentStore>,
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Every bucket for every scope: all tasks, unassigned, then each active
/// member and each member with a notification channel.
pub fn classifier_specs(
    tz: Tz,
    cutoffs: DayCutoffs,
    upcoming_days: u32,
    members: &[Member],
    channel_members: &[MemberId],
) -> Vec<BucketSpec> {
    let mut member_ids: Vec<MemberId> = members
        .iter()
        .filter(|member| member.is_active)
        .map(|member| member.user_id)
        .chain(channel_members.iter().copied())
        .collect();
    member_ids.sort_unstable();
    member_ids.dedup();

    [AssigneeFilter::Any, AssigneeFilter::Unassigned]
        .into_iter()
        .chain(member_ids.into_iter().map(AssigneeFilter::Member))
        .flat_map(|filter| scope_specs(tz, cutoffs, upcoming_days, filter))
        .collect()
}

fn scope_specs(
    tz: Tz,
    cutoffs: DayCutoffs,
    upcoming_days: u32,
    filter: AssigneeFilter,
) -> impl Iterator<Item = BucketSpec> {
    BucketKind::ALL.into_iter().map(move |kind| {
        BucketSpec::new(kind, filter, tz)
            .with_cutoffs(cutoffs)
            .with_upcoming_days(upcoming_days)
    })
}

pub struct Runtime {
    tz: Tz,
    cutoffs: DayCutoffs,
    upcoming_days: u32,
    refresh_interval: Duration,
    collaborators: Collaborators,
    dispatch: Dispatch,
    events: EventBus,
    poll: PollHandle,
    coordinator: Arc<SnapshotCoordinator>,
    completion: Arc<CompletionCoordinator>,
    autocomplete: Arc<AutoCompletionScheduler>,
    notifications: Arc<NotificationScheduler>,
    actions: Arc<ActionRouter>,
    classifiers: RwLock<Vec<Arc<TimeBucketClassifier>>>,
    /// Members reported inactive; their ids never get a scope of their own.
    inactive: RwLock<HashSet<MemberId>>,
    discovered: AtomicBool,
}

impl Runtime {
    /// Build every component. Fails fast on an invalid timezone or config.
    pub fn new(
        config: &Config,
        collaborators: Collaborators,
        events: EventBus,
        dispatch: Dispatch,
    ) -> Result<Self> {
        config.validate()?;
        let tz = config.tz()?;
        let cutoffs = config.cutoffs()?;
        let channels: HashMap<MemberId, String> = config.assignee_channels()?;
        let poll = PollHandle::new();

        let coordinator = Arc::new(SnapshotCoordinator::new(
            collaborators.service.clone(),
            collaborators.clock.clone(),
            events.clone(),
        ));
        let completion = Arc::new(CompletionCoordinator::new(
            collaborators.service.clone(),
            collaborators.clock.clone(),
            events.clone(),
        ));
        let autocomplete = AutoCompletionScheduler::new(
            config.automation.auto_complete_past_due_recurrent,
            tz,
            collaborators.clock.clone(),
            collaborators.scheduler.clone(),
            dispatch.clone(),
            completion.clone(),
            poll.clone(),
            events.clone(),
        );
        let notifications = NotificationScheduler::new(
            config.notifications.notify_on_past_due,
            channels,
            tz,
            collaborators.clock.clone(),
            collaborators.scheduler.clone(),
            dispatch.clone(),
            collaborators.notifier.clone(),
            collaborators.store.clone(),
            events.clone(),
            coordinator.subscribe(),
        );
        let actions = Arc::new(ActionRouter::new(
            collaborators.service.clone(),
            completion.clone(),
            Some(notifications.clone()),
            collaborators.clock.clone(),
            poll.clone(),
        ));
        coordinator.add_listener(autocomplete.clone());

        Ok(Self {
            tz,
            cutoffs,
            upcoming_days: config.upcoming_days_window,
            refresh_interval: config.refresh_interval(),
            collaborators,
            dispatch,
            events,
            poll,
            coordinator,
            completion,
            autocomplete,
            notifications,
            actions,
            classifiers: RwLock::new(Vec::new()),
            inactive: RwLock::new(HashSet::new()),
            discovered: AtomicBool::new(false),
        })
    }

    pub fn coordinator(&self) -> &Arc<SnapshotCoordinator> {
        &self.coordinator
    }

    pub fn completion(&self) -> &Arc<CompletionCoordinator> {
        &self.completion
    }

    pub fn autocomplete(&self) -> &Arc<AutoCompletionScheduler> {
        &self.autocomplete
    }

    pub fn notifications(&self) -> &Arc<NotificationScheduler> {
        &self.notifications
    }

    pub fn actions(&self) -> &Arc<ActionRouter> {
        &self.actions
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn poll_handle(&self) -> PollHandle {
        self.poll.clone()
    }

    pub fn classifiers(&self) -> Vec<Arc<TimeBucketClassifier>> {
        self.classifiers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn classifier(&self, kind: BucketKind, filter: AssigneeFilter) -> Option<Arc<TimeBucketClassifier>> {
        self.classifiers()
            .into_iter()
            .find(|classifier| classifier.spec().kind == kind && classifier.spec().filter == filter)
    }

    /// Discover members, build the classifier set, and run the first poll.
    pub async fn start(&self) {
        self.notifications.restore().await;
        let members = self.list_members().await.unwrap_or_default();
        let specs = classifier_specs(
            self.tz,
            self.cutoffs,
            self.upcoming_days,
            &members,
            &self.notifications.channel_members(),
        );
        let built: Vec<_> = specs.into_iter().map(|spec| self.build_classifier(spec)).collect();
        info!(classifiers = built.len(), members = members.len(), "runtime started");
        *self.classifiers.write().unwrap_or_else(|e| e.into_inner()) = built;

        self.poll().await;
    }

    /// Retry member discovery after a failed attempt. Returns whether the
    /// member list is now known.
    pub async fn discover_members(&self) -> bool {
        if self.discovered.load(Ordering::SeqCst) {
            return true;
        }
        let Some(members) = self.list_members().await else {
            return false;
        };
        let mut ids: Vec<MemberId> = members
            .iter()
            .filter(|member| member.is_active)
            .map(|member| member.user_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        if self.add_member_scopes(&ids).await > 0 {
            info!(members = members.len(), "member discovery succeeded");
        }
        true
    }

    /// Poll the service, then give any assignee seen for the first time a
    /// scope of their own.
    pub async fn poll(&self) {
        self.coordinator.poll().await;

        let snapshot = self.coordinator.current();
        let (scoped, inactive) = (self.scoped_members(), self.inactive_members());
        let mut unseen: Vec<MemberId> = snapshot
            .tasks()
            .filter_map(|task| task.assigned_to)
            .filter(|id| !scoped.contains(id) && !inactive.contains(id))
            .collect();
        unseen.sort_unstable();
        unseen.dedup();
        if unseen.is_empty() {
            return;
        }
        info!(members = ?unseen, "new assignees found in snapshot");
        self.add_member_scopes(&unseen).await;
    }

    async fn list_members(&self) -> Option<Vec<Member>> {
        match self.collaborators.service.get_members().await {
            Ok(members) => {
                self.discovered.store(true, Ordering::SeqCst);
                let inactive = members
                    .iter()
                    .filter(|member| !member.is_active)
                    .map(|member| member.user_id);
                self.inactive
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend(inactive);
                Some(members)
            }
            Err(err) => {
                warn!(error = %err, "could not list members, will retry on the next tick");
                None
            }
        }
    }

    fn scoped_members(&self) -> HashSet<MemberId> {
        self.classifiers()
            .iter()
            .filter_map(|classifier| match classifier.spec().filter {
                AssigneeFilter::Member(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn inactive_members(&self) -> HashSet<MemberId> {
        self.inactive
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Build and evaluate every bucket for the members not yet scoped.
    /// Returns how many scopes were added.
    async fn add_member_scopes(&self, ids: &[MemberId]) -> usize {
        let scoped = self.scoped_members();
        let fresh: Vec<MemberId> = ids.iter().copied().filter(|id| !scoped.contains(id)).collect();
        let built: Vec<_> = fresh
            .iter()
            .flat_map(|id| {
                scope_specs(self.tz, self.cutoffs, self.upcoming_days, AssigneeFilter::Member(*id))
            })
            .map(|spec| self.build_classifier(spec))
            .collect();
        self.classifiers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .extend(built.iter().cloned());
        for classifier in built {
            classifier.refresh(RefreshReason::Snapshot).await;
        }
        fresh.len()
    }

    fn build_classifier(&self, spec: BucketSpec) -> Arc<TimeBucketClassifier> {
        let classifier = TimeBucketClassifier::new(
            spec,
            self.coordinator.subscribe(),
            self.collaborators.clock.clone(),
            self.collaborators.scheduler.clone(),
            self.dispatch.clone(),
            self.events.clone(),
        );
        if spec.kind == BucketKind::PastDue && spec.filter != AssigneeFilter::Any {
            classifier.add_listener(self.notifications.clone());
        }
        self.coordinator.add_listener(classifier.clone());
        classifier
    }

    /// Poll on the refresh interval and on request until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; start() already polled.
        ticker.tick().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.discover_members().await;
                    self.poll().await;
                }
                _ = self.poll.requested() => {
                    self.poll().await;
                }
            }
        }
        self.shutdown().await;
    }

    /// Re-evaluate every classifier against the current snapshot.
    pub async fn refresh_all(&self) {
        for classifier in self.classifiers() {
            classifier.refresh(RefreshReason::Snapshot).await;
        }
    }

    /// Cancel every pending wake-up.
    pub async fn shutdown(&self) {
        for classifier in self.classifiers() {
            classifier.shutdown().await;
        }
        self.autocomplete.shutdown();
        self.notifications.shutdown().await;
        info!("runtime stopped");
    }
}
