/*
Task lifecycle.
pending -> in-progress <-> paused -> completed

Every transition is a single conditional TaskPatch, so a concurrent
request against the same task either sees our write or is rejected
and re-evaluated. Completed tasks are frozen.
*/

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::mailer::{EmailContent, Mailer, escape_html};
use crate::models::{Role, Task, TaskStatus};
use crate::store::{TaskPatch, TaskStore, UpdateOutcome, UserDirectory};

pub const RETENTION_DAYS: i64 = 45;

// Re-reads allowed when a concurrent writer beat us to the task
const MAX_ATTEMPTS: usize = 5;

/// Authenticated caller of a lifecycle action.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Request payload, tagged by `action`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TaskAction {
    Create {
        name: String,
        detail: Option<String>,
        #[serde(default)]
        assigned_users: Vec<Uuid>,
        deadline: Option<String>,
    },
    Start {
        task_id: Uuid,
        start_date: Option<String>,
    },
    Stop {
        task_id: Uuid,
    },
    Complete {
        task_id: Uuid,
        end_date: Option<String>,
    },
    SetDeadline {
        task_id: Uuid,
        deadline: Option<String>,
        assigned_users: Option<Vec<Uuid>>,
    },
}

impl TaskAction {
    pub fn parse(value: serde_json::Value) -> AppResult<Self> {
        serde_json::from_value(value).map_err(|e| AppError::validation(format!("invalid action: {e}")))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub name: String,
    pub detail: Option<String>,
    pub assigned_users: Vec<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339, a zone-less `YYYY-MM-DDTHH:MM[:SS]` (read as UTC),
/// or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(field: &str, raw: &str) -> AppResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(AppError::validation(format!("invalid {field}: {raw}")))
}

fn parse_optional(field: &str, raw: Option<String>) -> AppResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(|s| parse_timestamp(field, s)).transpose()
}

// Negative when the clock stepped back; never let that shrink total_time
fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_milliseconds().max(0)
}

pub struct LifecycleManager {
    tasks: Arc<dyn TaskStore>,
    users: Arc<dyn UserDirectory>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
}

impl LifecycleManager {
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
        }
    }

    /// Validate and run one action on behalf of `actor`.
    pub async fn apply(&self, actor: &Actor, action: TaskAction) -> AppResult<Task> {
        match action {
            TaskAction::Create {
                name,
                detail,
                assigned_users,
                deadline,
            } => {
                let deadline = parse_optional("deadline", deadline)?;
                self.create(
                    actor.user_id,
                    NewTask {
                        name,
                        detail,
                        assigned_users,
                        deadline,
                    },
                )
                .await
            }
            TaskAction::Start {
                task_id,
                start_date,
            } => {
                let start_date = parse_optional("start_date", start_date)?;
                self.authorize(actor, task_id).await?;
                self.start(task_id, start_date).await
            }
            TaskAction::Stop { task_id } => {
                self.authorize(actor, task_id).await?;
                self.stop(task_id).await
            }
            TaskAction::Complete { task_id, end_date } => {
                let end_date = parse_optional("end_date", end_date)?;
                self.authorize(actor, task_id).await?;
                self.complete(task_id, end_date).await
            }
            TaskAction::SetDeadline {
                task_id,
                deadline,
                assigned_users,
            } => {
                let Some(deadline) = parse_optional("deadline", deadline)? else {
                    return Err(AppError::validation("Deadline date required"));
                };
                self.authorize(actor, task_id).await?;
                self.set_deadline(task_id, deadline, assigned_users).await
            }
        }
    }

    pub async fn create(&self, creator: Uuid, new: NewTask) -> AppResult<Task> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("task name is required"));
        }
        self.check_users(&new.assigned_users).await?;

        let mut task = Task::new(
            creator,
            name.to_string(),
            new.detail.filter(|d| !d.trim().is_empty()),
            new.assigned_users,
            self.clock.now(),
        );
        // deadline goes in with the insert so a create is one write
        task.deadline = new.deadline;
        let task = self.tasks.insert_task(task).await?;
        info!(task = %task.id, creator = %creator, "task created");

        if task.deadline.is_some() {
            self.notify_deadline(&task, false).await;
        }
        Ok(task)
    }

    pub async fn start(&self, task_id: Uuid, start_date: Option<DateTime<Utc>>) -> AppResult<Task> {
        self.load_open(task_id).await?;
        let now = self.clock.now();

        let patch = TaskPatch::new()
            .require_open()
            .status(TaskStatus::InProgress)
            .last_start(Some(now))
            .start_date_if_unset(start_date.unwrap_or(now));
        let task = self.commit(task_id, patch).await?;
        debug!(task = %task_id, "timer started");
        Ok(task)
    }

    /// Pause a running timer. Stopping a task that is not running returns
    /// it unchanged.
    pub async fn stop(&self, task_id: Uuid) -> AppResult<Task> {
        for _ in 0..MAX_ATTEMPTS {
            let task = self.load_open(task_id).await?;
            let Some(started) = task.last_start else {
                return Ok(task);
            };

            let now = self.clock.now();
            let patch = TaskPatch::new()
                .require_open()
                .expect_last_start(Some(started))
                .log_time(now.date_naive(), elapsed_ms(started, now))
                .last_start(None)
                .status(TaskStatus::Paused);

            match self.tasks.update_task(task_id, patch).await? {
                UpdateOutcome::Applied(task) => {
                    debug!(task = %task_id, total_ms = task.total_time, "timer stopped");
                    return Ok(task);
                }
                UpdateOutcome::NotFound => return Err(AppError::not_found("task", task_id)),
                UpdateOutcome::PreconditionFailed => continue,
            }
        }
        Err(AppError::Conflict("task is being modified concurrently".into()))
    }

    pub async fn complete(&self, task_id: Uuid, end_date: Option<DateTime<Utc>>) -> AppResult<Task> {
        for _ in 0..MAX_ATTEMPTS {
            let task = self.load_open(task_id).await?;
            let now = self.clock.now();
            let end = end_date.unwrap_or(now);

            let mut patch = TaskPatch::new()
                .require_open()
                .expect_last_start(task.last_start)
                .status(TaskStatus::Completed)
                .last_start(None)
                .end_date(end)
                .delete_at(end + Duration::days(RETENTION_DAYS));
            if let Some(started) = task.last_start {
                patch = patch.log_time(now.date_naive(), elapsed_ms(started, now));
            }

            match self.tasks.update_task(task_id, patch).await? {
                UpdateOutcome::Applied(task) => {
                    info!(task = %task_id, total_ms = task.total_time, "task completed");
                    return Ok(task);
                }
                UpdateOutcome::NotFound => return Err(AppError::not_found("task", task_id)),
                UpdateOutcome::PreconditionFailed => continue,
            }
        }
        Err(AppError::Conflict("task is being modified concurrently".into()))
    }

    pub async fn set_deadline(
        &self,
        task_id: Uuid,
        deadline: DateTime<Utc>,
        assigned_users: Option<Vec<Uuid>>,
    ) -> AppResult<Task> {
        let previous = self.load_open(task_id).await?;

        let mut patch = TaskPatch::new().require_open().deadline(deadline);
        if let Some(ids) = assigned_users.filter(|ids| !ids.is_empty()) {
            self.check_users(&ids).await?;
            patch = patch.assigned_users(ids);
        }
        let task = self.commit(task_id, patch).await?;
        info!(task = %task_id, deadline = %deadline, "deadline set");

        self.notify_deadline(&task, previous.deadline.is_some()).await;
        Ok(task)
    }

    async fn notify_deadline(&self, task: &Task, is_update: bool) {
        let Some(deadline) = task.deadline else {
            return;
        };
        let users = match self.users.find_users(&task.recipients()).await {
            Ok(users) => users,
            Err(e) => {
                warn!(task = %task.id, error = %e, "could not load deadline recipients");
                return;
            }
        };

        let name = escape_html(&task.name);
        let when = deadline.format("%Y-%m-%d %H:%M UTC");
        let (subject, message) = if is_update {
            (
                "Task Deadline Updated",
                format!("The deadline for task <strong>{name}</strong> has been changed to <strong>{when}</strong>."),
            )
        } else {
            (
                "Task Deadline Set",
                format!("A deadline of <strong>{when}</strong> has been set for task <strong>{name}</strong>."),
            )
        };
        let content = EmailContent::new(subject, message);

        for user in &users {
            if let Err(e) = self.mailer.send(&user.email, subject, &content).await {
                warn!(task = %task.id, to = %user.email, error = %e, "deadline notification failed");
            }
        }
    }

    /// Non-admins may only act on tasks they created or were assigned.
    async fn authorize(&self, actor: &Actor, task_id: Uuid) -> AppResult<()> {
        if actor.is_admin() {
            return Ok(());
        }
        match self.tasks.find_task(task_id).await? {
            Some(t) if t.is_member(actor.user_id) => Ok(()),
            _ => Err(AppError::not_found("task", task_id)),
        }
    }

    async fn load_open(&self, task_id: Uuid) -> AppResult<Task> {
        let task = self
            .tasks
            .find_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("task", task_id))?;
        if task.is_completed() {
            return Err(AppError::invalid_state("task is already completed"));
        }
        Ok(task)
    }

    async fn commit(&self, task_id: Uuid, patch: TaskPatch) -> AppResult<Task> {
        match self.tasks.update_task(task_id, patch).await? {
            UpdateOutcome::Applied(task) => Ok(task),
            UpdateOutcome::NotFound => Err(AppError::not_found("task", task_id)),
            UpdateOutcome::PreconditionFailed => {
                Err(AppError::invalid_state("task is already completed"))
            }
        }
    }

    async fn check_users(&self, ids: &[Uuid]) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let found = self.users.find_users(ids).await?;
        match ids.iter().find(|id| !found.iter().any(|u| u.id == **id)) {
            Some(missing) => Err(AppError::validation(format!("unknown user: {missing}"))),
            None => Ok(()),
        }
    }
}
