// --------------------------------------------------
// Handles API endpoints for a user's own tasks.
//
// Responsibilities:
// - List tasks the caller created or was assigned
// - Run lifecycle actions (create / start / stop / complete / set-deadline)
// -------------------------------------------------

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::TaskAction;
use crate::models::Task;
use crate::state::AppState;
use crate::store::{TaskFilter, TaskStore};

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    pub search: Option<String>,
    pub start_date: Option<String>, // "YYYY-MM-DD"
    pub end_date: Option<String>,   // "YYYY-MM-DD", inclusive
}

#[derive(Debug, Serialize)]
pub struct TasksResponse {
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub task: Task,
}

fn parse_day(field: &str, raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::validation(format!("invalid {field}: {raw}")))
}

/// Whole-day range: start of the first day through the last millisecond of the second.
pub fn day_range(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    (
        start.and_time(NaiveTime::MIN).and_utc(),
        end.and_time(end_of_day).and_utc(),
    )
}

// -----------------------------
// GET /api/tasks
// Tasks where the caller is creator or assignee, newest first
// -----------------------------
pub async fn get_tasks(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(q): Query<TasksQuery>,
) -> AppResult<impl IntoResponse> {
    let mut filter = TaskFilter {
        member: Some(claims.sub),
        search: q.search.filter(|s| !s.trim().is_empty()),
        ..TaskFilter::default()
    };

    if let (Some(start), Some(end)) = (&q.start_date, &q.end_date) {
        let start = parse_day("start_date", start)?;
        let end = parse_day("end_date", end)?;
        filter.touched_between = Some(day_range(start, end));
    }

    let tasks = state.store.find_tasks(&filter).await?;
    Ok(Json(TasksResponse { tasks }))
}

// -----------------------------
// POST /api/tasks
// Body: {"action": "...", ...}; returns the task after the action
// -----------------------------
pub async fn post_action(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(body): Json<serde_json::Value>,
) -> AppResult<impl IntoResponse> {
    let action = TaskAction::parse(body)?;
    let task = state.lifecycle.apply(&claims.actor(), action).await?;
    Ok(Json(TaskResponse { task }))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn day_range_is_inclusive() {
        let d = NaiveDate::from_ymd_opt(2025, 2, 10).unwrap();
        let (from, to) = day_range(d, d);
        assert_eq!(from, Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap());
        assert_eq!(to.to_rfc3339(), "2025-02-10T23:59:59.999+00:00");
    }

    #[test]
    fn bad_day_is_validation_error() {
        assert!(matches!(parse_day("start_date", "10/02/2025"), Err(AppError::Validation(_))));
    }
}
