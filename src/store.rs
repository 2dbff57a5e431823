// --------------------------------------------------
// JSON document store.
//
// All collections live in one file. Writes are applied to a copy
// under a single lock, persisted (write tmp + rename), and only then
// become visible, so a failed write leaves nothing half-applied.
// --------------------------------------------------

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Billing, BillingId, Lead, ReminderRecord, Task, TaskStatus, User};

pub const DB_PATH: &str = "data/db.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store data is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Db {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub leads: Vec<Lead>,
    #[serde(default)]
    pub billing: Vec<Billing>,
    #[serde(default)]
    pub billing_ids: Vec<BillingId>,
}

/// Field-scoped, conditional update of a single task.
///
/// Only the fields that were set are touched. The preconditions are
/// checked against the stored task inside the same write, which makes
/// "read, compute, write back" safe against a concurrent writer.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    require_open: bool,
    expect_last_start: Option<Option<DateTime<Utc>>>,
    status: Option<TaskStatus>,
    last_start: Option<Option<DateTime<Utc>>>,
    start_date_if_unset: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    delete_at: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
    assigned_users: Option<Vec<Uuid>>,
    log_time: Option<(NaiveDate, i64)>,
    reminders: Option<BTreeMap<Uuid, ReminderRecord>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `PreconditionFailed` if the task is already completed.
    pub fn require_open(mut self) -> Self {
        self.require_open = true;
        self
    }

    /// Fail with `PreconditionFailed` unless `last_start` still equals `v`.
    pub fn expect_last_start(mut self, v: Option<DateTime<Utc>>) -> Self {
        self.expect_last_start = Some(v);
        self
    }

    pub fn status(mut self, s: TaskStatus) -> Self {
        self.status = Some(s);
        self
    }

    pub fn last_start(mut self, v: Option<DateTime<Utc>>) -> Self {
        self.last_start = Some(v);
        self
    }

    pub fn start_date_if_unset(mut self, t: DateTime<Utc>) -> Self {
        self.start_date_if_unset = Some(t);
        self
    }

    pub fn end_date(mut self, t: DateTime<Utc>) -> Self {
        self.end_date = Some(t);
        self
    }

    pub fn delete_at(mut self, t: DateTime<Utc>) -> Self {
        self.delete_at = Some(t);
        self
    }

    pub fn deadline(mut self, t: DateTime<Utc>) -> Self {
        self.deadline = Some(t);
        self
    }

    pub fn assigned_users(mut self, ids: Vec<Uuid>) -> Self {
        self.assigned_users = Some(ids);
        self
    }

    /// Increment `total_time` and the daily log entry for `date` together.
    pub fn log_time(mut self, date: NaiveDate, ms: i64) -> Self {
        self.log_time = Some((date, ms));
        self
    }

    pub fn reminders(mut self, map: BTreeMap<Uuid, ReminderRecord>) -> Self {
        self.reminders = Some(map);
        self
    }

    /// Returns false (and leaves `task` untouched) if a precondition fails.
    pub fn apply(&self, task: &mut Task) -> bool {
        if self.require_open && task.is_completed() {
            return false;
        }
        if let Some(expected) = self.expect_last_start {
            if task.last_start != expected {
                return false;
            }
        }

        if let Some((date, ms)) = self.log_time {
            task.log_time(date, ms);
        }
        if let Some(s) = self.status {
            task.status = s;
        }
        if let Some(v) = self.last_start {
            task.last_start = v;
        }
        if let Some(t) = self.start_date_if_unset {
            task.start_date.get_or_insert(t);
        }
        if let Some(t) = self.end_date {
            task.end_date = Some(t);
        }
        if let Some(t) = self.delete_at {
            task.delete_at = Some(t);
        }
        if let Some(t) = self.deadline {
            task.deadline = Some(t);
        }
        if let Some(ids) = &self.assigned_users {
            task.assigned_users = ids.clone();
        }
        if let Some(map) = &self.reminders {
            task.reminders = map.clone();
        }
        true
    }
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Applied(Task),
    NotFound,
    PreconditionFailed,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Creator or assignee.
    pub member: Option<Uuid>,
    /// Case-insensitive substring of the name.
    pub search: Option<String>,
    /// Start or end date inside the range.
    pub touched_between: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Started at or after the first bound and ended at or before the second.
    pub within: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Not completed and has a deadline.
    pub open_with_deadline: bool,
}

impl TaskFilter {
    pub fn open_with_deadline() -> Self {
        Self {
            open_with_deadline: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, t: &Task) -> bool {
        if let Some(user) = self.member {
            if !t.is_member(user) {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            if !t.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some((from, to)) = self.touched_between {
            let inside = |d: Option<DateTime<Utc>>| d.is_some_and(|d| d >= from && d <= to);
            if !inside(t.start_date) && !inside(t.end_date) {
                return false;
            }
        }
        if let Some((from, to)) = self.within {
            let started = t.start_date.is_some_and(|d| d >= from);
            let ended = t.end_date.is_some_and(|d| d <= to);
            if !(started && ended) {
                return false;
            }
        }
        if self.open_with_deadline && (t.is_completed() || t.deadline.is_none()) {
            return false;
        }
        true
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: Task) -> StoreResult<Task>;
    async fn find_task(&self, id: Uuid) -> StoreResult<Option<Task>>;
    /// Newest first.
    async fn find_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>>;
    async fn update_task(&self, id: Uuid, patch: TaskPatch) -> StoreResult<UpdateOutcome>;
    async fn delete_task(&self, id: Uuid) -> StoreResult<bool>;
    /// Drop tasks whose retention window has passed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>>;
}

pub struct JsonStore {
    path: Option<PathBuf>,
    db: Mutex<Db>,
}

impl JsonStore {
    /// Load the store from `path`, starting empty if the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let db = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Db::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            db: Mutex::new(db),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            db: Mutex::new(Db::default()),
        }
    }

    pub async fn read<R>(&self, f: impl FnOnce(&Db) -> R) -> R {
        let db = self.db.lock().await;
        f(&db)
    }

    pub async fn write<R>(&self, f: impl FnOnce(&mut Db) -> R) -> StoreResult<R> {
        let mut db = self.db.lock().await;
        let mut next = db.clone();
        let out = f(&mut next);
        if let Some(path) = &self.path {
            save_db(path, &next).await?;
        }
        *db = next;
        Ok(out)
    }
}

async fn save_db(path: &Path, db: &Db) -> StoreResult<()> {
    let tmp_path = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(db)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(&tmp_path, text).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl TaskStore for JsonStore {
    async fn insert_task(&self, task: Task) -> StoreResult<Task> {
        self.write(|db| {
            db.tasks.push(task.clone());
            task
        })
        .await
    }

    async fn find_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(self
            .read(|db| db.tasks.iter().find(|t| t.id == id).cloned())
            .await)
    }

    async fn find_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .read(|db| db.tasks.iter().filter(|t| filter.matches(t)).cloned().collect())
            .await;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn update_task(&self, id: Uuid, patch: TaskPatch) -> StoreResult<UpdateOutcome> {
        self.write(|db| {
            let Some(t) = db.tasks.iter_mut().find(|t| t.id == id) else {
                return UpdateOutcome::NotFound;
            };
            if patch.apply(t) {
                UpdateOutcome::Applied(t.clone())
            } else {
                UpdateOutcome::PreconditionFailed
            }
        })
        .await
    }

    async fn delete_task(&self, id: Uuid) -> StoreResult<bool> {
        self.write(|db| {
            let before = db.tasks.len();
            db.tasks.retain(|t| t.id != id);
            db.tasks.len() != before
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let expired = self
            .read(|db| db.tasks.iter().any(|t| t.delete_at.is_some_and(|d| d <= now)))
            .await;
        if !expired {
            return Ok(0);
        }
        self.write(|db| {
            let before = db.tasks.len();
            db.tasks.retain(|t| !t.delete_at.is_some_and(|d| d <= now));
            before - db.tasks.len()
        })
        .await
    }
}

#[async_trait]
impl UserDirectory for JsonStore {
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self
            .read(|db| db.users.iter().find(|u| u.id == id).cloned())
            .await)
    }

    async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        Ok(self
            .read(|db| {
                db.users
                    .iter()
                    .filter(|u| ids.contains(&u.id))
                    .cloned()
                    .collect()
            })
            .await)
    }
}
