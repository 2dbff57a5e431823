use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
}

// Time spent on a task during one calendar day (UTC)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyLog {
    pub date: NaiveDate,
    pub time_spent: i64, // ms
}

// Which deadline notifications one user has already received for a task
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderRecord {
    #[serde(default)]
    pub sent_1hr: bool,
    #[serde(default)]
    pub sent_30min: bool,
    #[serde(default)]
    pub sent_missed: bool,
    #[serde(default)]
    pub sent_reminders_count: u32,
    #[serde(default)]
    pub last_reminder: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid, // creator
    #[serde(default)]
    pub assigned_users: Vec<Uuid>,
    pub name: String,
    pub detail: Option<String>,
    pub status: TaskStatus,
    pub total_time: i64, // ms
    pub last_start: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub daily_logs: Vec<DailyLog>,
    pub created_at: DateTime<Utc>,
    pub delete_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminders: BTreeMap<Uuid, ReminderRecord>,
}

impl Task {
    pub fn new(
        creator: Uuid,
        name: String,
        detail: Option<String>,
        assigned_users: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: creator,
            assigned_users,
            name,
            detail,
            status: TaskStatus::Pending,
            total_time: 0,
            last_start: None,
            start_date: None,
            end_date: None,
            deadline: None,
            daily_logs: Vec::new(),
            created_at: now,
            delete_at: None,
            reminders: BTreeMap::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_member(&self, user: Uuid) -> bool {
        self.user_id == user || self.assigned_users.contains(&user)
    }

    /// Creator first, then assignees, without duplicates.
    pub fn recipients(&self) -> Vec<Uuid> {
        let mut ids = vec![self.user_id];
        for id in &self.assigned_users {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }

    /// Add `ms` to the running total and to the log entry for `date`.
    ///
    /// Entries stay sorted by date and each date appears at most once.
    pub fn log_time(&mut self, date: NaiveDate, ms: i64) {
        self.total_time += ms;
        match self.daily_logs.binary_search_by(|l| l.date.cmp(&date)) {
            Ok(i) => self.daily_logs[i].time_spent += ms,
            Err(i) => self.daily_logs.insert(
                i,
                DailyLog {
                    date,
                    time_spent: ms,
                },
            ),
        }
    }

    pub fn logged_on(&self, date: NaiveDate) -> i64 {
        self.daily_logs
            .iter()
            .find(|l| l.date == date)
            .map(|l| l.time_spent)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    #[serde(default)]
    pub tenant: Option<String>,
    pub created_at: DateTime<Utc>,
}

// What the API exposes about a user (never the hash)
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    Contacted,
    Interested,
    Accepted,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub tenant: Option<String>,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub next_follow_up: Option<DateTime<Utc>>,
    pub status: LeadStatus,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Billing {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_name: String,
    pub billing_id: String,
    pub total_hours: f64,
    pub status: BillingStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingId {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn log_time_merges_same_day() {
        let mut t = Task::new(Uuid::new_v4(), "write report".into(), None, vec![], Utc::now());
        t.log_time(day(4), 1_000);
        t.log_time(day(4), 2_500);

        assert_eq!(t.total_time, 3_500);
        assert_eq!(t.daily_logs.len(), 1);
        assert_eq!(t.logged_on(day(4)), 3_500);
    }

    #[test]
    fn log_time_keeps_dates_ordered() {
        let mut t = Task::new(Uuid::new_v4(), "write report".into(), None, vec![], Utc::now());
        t.log_time(day(9), 10);
        t.log_time(day(2), 20);
        t.log_time(day(5), 30);

        let dates: Vec<_> = t.daily_logs.iter().map(|l| l.date).collect();
        assert_eq!(dates, vec![day(2), day(5), day(9)]);
        assert_eq!(t.logged_on(day(3)), 0);
    }

    #[test]
    fn recipients_dedupes_creator() {
        let creator = Uuid::new_v4();
        let other = Uuid::new_v4();
        let t = Task::new(creator, "x".into(), None, vec![other, creator, other], Utc::now());
        assert_eq!(t.recipients(), vec![creator, other]);
        assert!(t.is_member(other));
        assert!(!t.is_member(Uuid::new_v4()));
    }

    #[test]
    fn status_wire_names() {
        let s = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(s, "\"in-progress\"");
        let b: BillingStatus = serde_json::from_str("\"inprogress\"").unwrap();
        assert_eq!(b, BillingStatus::InProgress);
    }
}
