// --------------------------------------------------
// Billing records and billing ids.
//
// Responsibilities:
// - Create / list / update-status of billing records
// - Create / list named billing ids
// -------------------------------------------------

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser};
use crate::error::{AppError, AppResult};
use crate::models::{Billing, BillingId, BillingStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBillingInput {
    pub user_id: Option<Uuid>, // defaults to the caller
    pub task_name: String,
    pub billing_id: String,
    pub total_hours: Option<f64>,
    pub status: Option<BillingStatus>,
}

// -----------------------------
// POST /api/billing
// -----------------------------
pub async fn create_billing(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(input): Json<CreateBillingInput>,
) -> AppResult<impl IntoResponse> {
    let (Some(total_hours), Some(status)) = (input.total_hours, input.status) else {
        return Err(AppError::validation(
            "user_id, task_name, billing_id, total_hours, and status are required",
        ));
    };
    if input.task_name.trim().is_empty() || input.billing_id.trim().is_empty() {
        return Err(AppError::validation(
            "user_id, task_name, billing_id, total_hours, and status are required",
        ));
    }
    if !total_hours.is_finite() || total_hours < 0.0 {
        return Err(AppError::validation("total_hours must be a non-negative number"));
    }

    let record = Billing {
        id: Uuid::new_v4(),
        user_id: input.user_id.unwrap_or(claims.sub),
        task_name: input.task_name.trim().to_string(),
        billing_id: input.billing_id.trim().to_string(),
        total_hours,
        status,
        created_at: state.clock.now(),
    };
    let id = record.id;
    state.store.write(|db| db.billing.push(record)).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Billing created", "billing_id": id })),
    ))
}

#[derive(Debug, Serialize)]
pub struct BillingRow {
    pub id: Uuid,
    pub task_name: String,
    pub billing_id: String,
    pub total_hours: f64,
    pub status: BillingStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

// -----------------------------
// GET /api/billing
// Newest first; records whose user no longer exists are left out
// -----------------------------
pub async fn get_billing(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> AppResult<impl IntoResponse> {
    let mut rows: Vec<BillingRow> = state
        .store
        .read(|db| {
            db.billing
                .iter()
                .filter_map(|b| {
                    let user = db.users.iter().find(|u| u.id == b.user_id)?;
                    Some(BillingRow {
                        id: b.id,
                        task_name: b.task_name.clone(),
                        billing_id: b.billing_id.clone(),
                        total_hours: b.total_hours,
                        status: b.status,
                        created_at: b.created_at,
                        created_by: user.name.clone(),
                    })
                })
                .collect()
        })
        .await;
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(json!({ "billing": rows })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBillingInput {
    pub billing_id: Uuid,
    pub status: BillingStatus,
}

// -----------------------------
// PUT /api/billing
// Updates the status of one record
// -----------------------------
pub async fn update_billing(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Json(input): Json<UpdateBillingInput>,
) -> AppResult<impl IntoResponse> {
    let found = state
        .store
        .write(|db| match db.billing.iter_mut().find(|b| b.id == input.billing_id) {
            Some(b) => {
                b.status = input.status;
                true
            }
            None => false,
        })
        .await?;

    if !found {
        return Err(AppError::not_found("billing", input.billing_id));
    }
    Ok(Json(json!({ "message": "Status updated" })))
}

#[derive(Debug, Deserialize)]
pub struct CreateBillingIdInput {
    pub name: String,
}

// -----------------------------
// POST /api/admin/billing-ids
// -----------------------------
pub async fn create_billing_id(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Json(input): Json<CreateBillingIdInput>,
) -> AppResult<impl IntoResponse> {
    let name = input.name.trim().to_string();
    if name.chars().count() < 3 {
        return Err(AppError::validation("Billing name is required (min 3 chars)"));
    }

    let entry = BillingId {
        id: Uuid::new_v4(),
        name,
        created_at: state.clock.now(),
    };
    let id = entry.id;
    let inserted = state
        .store
        .write(|db| {
            if db.billing_ids.iter().any(|b| b.name == entry.name) {
                return false;
            }
            db.billing_ids.push(entry);
            true
        })
        .await?;

    if !inserted {
        return Err(AppError::Conflict("Billing name already exists".into()));
    }
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Billing created successfully", "billing_id": id })),
    ))
}

// -----------------------------
// GET /api/admin/billing-ids
// -----------------------------
pub async fn get_billing_ids(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> AppResult<impl IntoResponse> {
    let mut ids: Vec<BillingId> = state.store.read(|db| db.billing_ids.clone()).await;
    ids.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(json!({ "billing_ids": ids })))
}
