//! Deadline reminder loop.
//!
//! Every tick scans open tasks with a deadline, works out which reminders
//! each member (creator and assignees) is owed, emails them, and writes
//! the updated reminder records back to the task in one update. Ticks
//! run back to back on a single task, so a scan never overlaps the next.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::mailer::Mailer;
use crate::models::Task;
use crate::reminders::{due_reminders, mark_sent};
use crate::store::{StoreResult, TaskFilter, TaskPatch, TaskStore, UpdateOutcome, UserDirectory};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub tasks_scanned: usize,
    pub emails_sent: usize,
    pub failures: usize,
    pub purged: usize,
}

pub struct ReminderScheduler {
    tasks: Arc<dyn TaskStore>,
    users: Arc<dyn UserDirectory>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ReminderScheduler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        users: Arc<dyn UserDirectory>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tasks,
            users,
            mailer,
            clock,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run forever on the configured cadence. A tick that overruns makes
    /// the loop skip the ticks it missed instead of bursting.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "reminder scheduler started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let s = self.tick().await;
                info!(
                    scanned = s.tasks_scanned,
                    sent = s.emails_sent,
                    failures = s.failures,
                    purged = s.purged,
                    "reminder tick finished"
                );
            }
        })
    }

    /// One full pass. Failures are counted and logged, never propagated.
    pub async fn tick(&self) -> TickSummary {
        let now = self.clock.now();
        let mut summary = TickSummary::default();

        match self.tasks.purge_expired(now).await {
            Ok(n) => summary.purged = n,
            Err(e) => {
                error!(error = %e, "retention purge failed");
                summary.failures += 1;
            }
        }

        let tasks = match self.tasks.find_tasks(&TaskFilter::open_with_deadline()).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "could not load tasks for reminders");
                summary.failures += 1;
                return summary;
            }
        };

        for task in &tasks {
            summary.tasks_scanned += 1;
            if let Err(e) = self.process_task(task, now, &mut summary).await {
                warn!(task = %task.id, error = %e, "reminder pass failed for task");
                summary.failures += 1;
            }
        }

        summary
    }

    async fn process_task(
        &self,
        task: &Task,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) -> StoreResult<()> {
        let Some(deadline) = task.deadline else {
            return Ok(());
        };

        let recipients = task.recipients();
        let users = self.users.find_users(&recipients).await?;

        let mut reminders = task.reminders.clone();
        let mut changed = false;

        for user_id in &recipients {
            let Some(user) = users.iter().find(|u| u.id == *user_id) else {
                warn!(task = %task.id, user = %user_id, "reminder recipient not found");
                continue;
            };

            let record = reminders.entry(user.id).or_default();
            for kind in due_reminders(record, task.created_at, deadline, now) {
                let content = kind.content(&task.name, deadline);
                match self.mailer.send(&user.email, kind.subject(), &content).await {
                    Ok(()) => {
                        info!(task = %task.name, to = %user.email, subject = kind.subject(), "reminder sent");
                        mark_sent(record, kind, now);
                        changed = true;
                        summary.emails_sent += 1;
                    }
                    // left unmarked so the next tick retries it
                    Err(e) => {
                        warn!(task = %task.id, to = %user.email, error = %e, "reminder email failed");
                        summary.failures += 1;
                    }
                }
            }
        }

        if !changed {
            return Ok(());
        }

        let patch = TaskPatch::new().require_open().reminders(reminders);
        match self.tasks.update_task(task.id, patch).await? {
            UpdateOutcome::Applied(_) => {}
            UpdateOutcome::NotFound => debug!(task = %task.id, "task removed during reminder pass"),
            UpdateOutcome::PreconditionFailed => {
                debug!(task = %task.id, "task completed during reminder pass")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone};
    use uuid::Uuid;

    use super::*;
    use crate::clock::ManualClock;
    use crate::mailer::RecordingMailer;
    use crate::models::{Role, TaskStatus, User};
    use crate::store::{JsonStore, StoreError};

    struct Harness {
        store: Arc<JsonStore>,
        mailer: Arc<RecordingMailer>,
        clock: Arc<ManualClock>,
        scheduler: ReminderScheduler,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    fn harness() -> Harness {
        let store = Arc::new(JsonStore::in_memory());
        let mailer = Arc::new(RecordingMailer::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let scheduler =
            ReminderScheduler::new(store.clone(), store.clone(), mailer.clone(), clock.clone());
        Harness {
            store,
            mailer,
            clock,
            scheduler,
        }
    }

    async fn add_user(store: &JsonStore, email: &str) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
            password_hash: String::new(),
            role: Role::User,
            tenant: None,
            created_at: t0(),
        };
        let id = user.id;
        store.write(|db| db.users.push(user)).await.unwrap();
        id
    }

    async fn add_task(store: &JsonStore, creator: Uuid, assignees: Vec<Uuid>, deadline_mins: i64) -> Uuid {
        let mut task = Task::new(creator, "Ship release".into(), None, assignees, t0());
        task.deadline = Some(t0() + ChronoDuration::minutes(deadline_mins));
        store.insert_task(task).await.unwrap().id
    }

    #[tokio::test]
    async fn two_hour_deadline_walkthrough() {
        let h = harness();
        let alice = add_user(&h.store, "alice@example.com").await;
        let task_id = add_task(&h.store, alice, vec![], 120).await;

        h.clock.set(t0() + ChronoDuration::minutes(61));
        h.scheduler.tick().await;
        let sent = h.mailer.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "1 Hour Remaining");
        let task = h.store.find_task(task_id).await.unwrap().unwrap();
        assert!(task.reminders[&alice].sent_1hr);

        h.clock.set(t0() + ChronoDuration::minutes(91));
        h.scheduler.tick().await;
        let sent = h.mailer.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "30 Minutes Remaining");

        h.clock.set(t0() + ChronoDuration::minutes(121));
        h.scheduler.tick().await;
        let sent = h.mailer.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Task Deadline Missed");
        let task = h.store.find_task(task_id).await.unwrap().unwrap();
        assert!(task.reminders[&alice].sent_missed);

        for m in [122, 180, 600] {
            h.clock.set(t0() + ChronoDuration::minutes(m));
            h.scheduler.tick().await;
        }
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn every_member_gets_their_own_email() {
        let h = harness();
        let creator = add_user(&h.store, "creator@example.com").await;
        let a = add_user(&h.store, "a@example.com").await;
        let b = add_user(&h.store, "b@example.com").await;
        let task_id = add_task(&h.store, creator, vec![a, b], 45).await;

        let s = h.scheduler.tick().await;
        assert_eq!(s.tasks_scanned, 1);
        assert_eq!(s.emails_sent, 3);

        let mut to: Vec<_> = h.mailer.sent().into_iter().map(|m| m.to).collect();
        to.sort();
        assert_eq!(to, vec!["a@example.com", "b@example.com", "creator@example.com"]);

        let task = h.store.find_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.reminders.len(), 3);
        assert!(task.reminders.values().all(|r| r.sent_1hr && !r.sent_30min));
    }

    #[tokio::test]
    async fn failed_send_is_isolated_and_retried() {
        let h = harness();
        let good = add_user(&h.store, "good@example.com").await;
        let bad = add_user(&h.store, "bad@example.com").await;
        let bad_task = add_task(&h.store, bad, vec![], -5).await;
        add_task(&h.store, good, vec![], -5).await;
        h.mailer.fail_for("bad@example.com");

        let s = h.scheduler.tick().await;
        assert_eq!(s.tasks_scanned, 2);
        assert_eq!(s.emails_sent, 1);
        assert_eq!(s.failures, 1);
        let t = h.store.find_task(bad_task).await.unwrap().unwrap();
        assert!(!t.reminders.get(&bad).is_some_and(|r| r.sent_missed));

        h.mailer.take();
        h.mailer.heal();
        let s = h.scheduler.tick().await;
        assert_eq!(s.emails_sent, 1);
        assert_eq!(h.mailer.sent()[0].to, "bad@example.com");
    }

    // Directory that errors whenever a lookup includes `broken`
    struct BrokenLookup {
        inner: Arc<JsonStore>,
        broken: Uuid,
    }

    #[async_trait::async_trait]
    impl UserDirectory for BrokenLookup {
        async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
            self.inner.find_user(id).await
        }
        async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
            if ids.contains(&self.broken) {
                return Err(StoreError::Io(std::io::Error::other("corrupt user record")));
            }
            self.inner.find_users(ids).await
        }
    }

    #[tokio::test]
    async fn storage_error_on_one_task_does_not_stop_the_sweep() {
        let h = harness();
        let ok = add_user(&h.store, "ok@example.com").await;
        let broken = add_user(&h.store, "broken@example.com").await;
        let broken_task = add_task(&h.store, broken, vec![], -5).await;
        add_task(&h.store, ok, vec![], -5).await;

        let users = Arc::new(BrokenLookup {
            inner: h.store.clone(),
            broken,
        });
        let scheduler = ReminderScheduler::new(h.store.clone(), users, h.mailer.clone(), h.clock.clone());

        let s = scheduler.tick().await;
        assert_eq!(s.tasks_scanned, 2);
        assert_eq!(s.emails_sent, 1);
        assert_eq!(s.failures, 1);

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ok@example.com");
        let t = h.store.find_task(broken_task).await.unwrap().unwrap();
        assert!(t.reminders.is_empty());
    }

    #[tokio::test]
    async fn skips_completed_and_unknown_users() {
        let h = harness();
        let alice = add_user(&h.store, "alice@example.com").await;
        let ghost = Uuid::new_v4();
        add_task(&h.store, alice, vec![ghost], -1).await;

        let mut done = Task::new(alice, "Done already".into(), None, vec![], t0());
        done.deadline = Some(t0());
        done.status = TaskStatus::Completed;
        h.store.insert_task(done).await.unwrap();

        let s = h.scheduler.tick().await;
        assert_eq!(s.tasks_scanned, 1);
        assert_eq!(s.emails_sent, 1);
        assert_eq!(h.mailer.sent()[0].to, "alice@example.com");
    }

    #[tokio::test]
    async fn tick_purges_expired_tasks() {
        let h = harness();
        let alice = add_user(&h.store, "alice@example.com").await;
        let mut old = Task::new(alice, "Archived".into(), None, vec![], t0());
        old.status = TaskStatus::Completed;
        old.delete_at = Some(t0() - ChronoDuration::days(1));
        let old_id = h.store.insert_task(old).await.unwrap().id;

        let s = h.scheduler.tick().await;
        assert_eq!(s.purged, 1);
        assert!(h.store.find_task(old_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn spawned_loop_sends_once_across_ticks() {
        let h = harness();
        let alice = add_user(&h.store, "alice@example.com").await;
        add_task(&h.store, alice, vec![], -10).await;

        let handle = h.scheduler.with_interval(Duration::from_millis(10)).spawn();
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.abort();

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Task Deadline Missed");
    }
}
