/*
Admin time-log report.
Per-user totals for one calendar day, combining the stored daily log
entries with time from timers that are still running.
*/

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Task, TaskStatus};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserLogRow {
    pub user_id: Uuid,
    pub user: String,
    pub total_ms: i64,
    pub formatted_time: String,
    pub task_count: usize,
    pub in_progress_today: bool,
}

// "3h 5m 12s"
pub fn format_duration(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{h}h {m}m {s}s")
}

/// Time a running timer has accumulated on `date`, if it was started that day.
fn live_ms(task: &Task, date: NaiveDate, now: DateTime<Utc>) -> i64 {
    match task.last_start {
        Some(started) if task.status == TaskStatus::InProgress && started.date_naive() == date => {
            (now - started).num_milliseconds().max(0)
        }
        _ => 0,
    }
}

/// Rows sorted by total time (desc), then user name.
pub fn daily_time_log(
    tasks: &[Task],
    names: &HashMap<Uuid, String>,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Vec<UserLogRow> {
    let mut rows: HashMap<Uuid, UserLogRow> = HashMap::new();

    for task in tasks {
        let live = live_ms(task, date, now);
        let total = task.logged_on(date) + live;
        if total <= 0 {
            continue;
        }

        let row = rows.entry(task.user_id).or_insert_with(|| UserLogRow {
            user_id: task.user_id,
            user: names
                .get(&task.user_id)
                .cloned()
                .unwrap_or_else(|| task.user_id.to_string()),
            total_ms: 0,
            formatted_time: String::new(),
            task_count: 0,
            in_progress_today: false,
        });
        row.total_ms += total;
        row.task_count += 1;
        row.in_progress_today |= live > 0;
    }

    let mut rows: Vec<UserLogRow> = rows
        .into_values()
        .map(|mut r| {
            r.formatted_time = format_duration(r.total_ms);
            r
        })
        .collect();
    rows.sort_by(|a, b| b.total_ms.cmp(&a.total_ms).then_with(|| a.user.cmp(&b.user)));
    rows
}
