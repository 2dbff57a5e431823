// --------------------------------------------------
// Admin task endpoints.
//
// Responsibilities:
// - List every task with its creator's name
// - Create and assign tasks to users
// - Delete tasks
// - Per-user daily time report
// -------------------------------------------------

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::{NewTask, parse_timestamp};
use crate::models::Task;
use crate::report::{self, UserLogRow};
use crate::state::AppState;
use crate::store::{TaskFilter, TaskStore};

#[derive(Debug, Deserialize)]
pub struct AdminTasksQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskWithUser {
    #[serde(flatten)]
    pub task: Task,
    pub user_name: String,
}

async fn user_names(state: &AppState) -> HashMap<Uuid, String> {
    state
        .store
        .read(|db| {
            db.users
                .iter()
                .map(|u| {
                    let label = if u.name.is_empty() { u.email.clone() } else { u.name.clone() };
                    (u.id, label)
                })
                .collect()
        })
        .await
}

// -----------------------------
// GET /api/admin/tasks
// All tasks, newest first; `start`/`end` keep tasks started and ended inside the range
// -----------------------------
pub async fn get_tasks(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(q): Query<AdminTasksQuery>,
) -> AppResult<impl IntoResponse> {
    let mut filter = TaskFilter::default();
    if let (Some(start), Some(end)) = (&q.start, &q.end) {
        filter.within = Some((parse_timestamp("start", start)?, parse_timestamp("end", end)?));
    }

    let tasks = state.store.find_tasks(&filter).await?;
    let names = user_names(&state).await;

    let tasks: Vec<TaskWithUser> = tasks
        .into_iter()
        .map(|task| {
            let user_name = names
                .get(&task.user_id)
                .cloned()
                .unwrap_or_else(|| task.user_id.to_string());
            TaskWithUser { task, user_name }
        })
        .collect();

    Ok(Json(json!({ "tasks": tasks })))
}

#[derive(Debug, Deserialize)]
pub struct AssignTaskInput {
    pub name: String,
    pub detail: Option<String>,
    #[serde(default)]
    pub assigned_users: Vec<Uuid>,
    pub deadline: Option<String>,
}

// -----------------------------
// POST /api/admin/tasks
// Creates a task owned by the admin and assigned to the given users
// -----------------------------
pub async fn create_task(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    Json(input): Json<AssignTaskInput>,
) -> AppResult<impl IntoResponse> {
    let deadline = input
        .deadline
        .as_deref()
        .map(|d| parse_timestamp("deadline", d))
        .transpose()?;

    let task = state
        .lifecycle
        .create(
            claims.sub,
            NewTask {
                name: input.name,
                detail: input.detail,
                assigned_users: input.assigned_users,
                deadline,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "task": task }))))
}

// -----------------------------
// DELETE /api/admin/tasks/:id
// -----------------------------
pub async fn delete_task(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    if !state.store.delete_task(id).await? {
        return Err(AppError::not_found("task", id));
    }
    info!(task = %id, by = %claims.sub, "task deleted");
    Ok(Json(json!({ "message": "Task deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct TimeLogQuery {
    pub date: String, // "YYYY-MM-DD"
}

#[derive(Debug, Serialize)]
pub struct TimeLogResponse {
    pub date: NaiveDate,
    pub rows: Vec<UserLogRow>,
}

// -----------------------------
// GET /api/admin/time-log?date=YYYY-MM-DD
// -----------------------------
pub async fn get_time_log(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(q): Query<TimeLogQuery>,
) -> AppResult<impl IntoResponse> {
    let date = NaiveDate::parse_from_str(q.date.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::validation("invalid date"))?;

    let tasks = state.store.find_tasks(&TaskFilter::default()).await?;
    let names = user_names(&state).await;
    let rows = report::daily_time_log(&tasks, &names, date, state.clock.now());

    Ok(Json(TimeLogResponse { date, rows }))
}
