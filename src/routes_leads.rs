// --------------------------------------------------
// Sales leads, scoped to the admin's tenant.
//
// Responsibilities:
// - Create or update a lead by name
// - List and delete leads
// -------------------------------------------------

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::parse_timestamp;
use crate::models::{Lead, LeadStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LeadInput {
    pub name: String,
    pub status: Option<LeadStatus>,
    pub start_date: Option<String>,
    pub next_follow_up: Option<String>,
    pub price: Option<f64>,
}

enum Upsert {
    Created(Uuid),
    Updated,
    MissingStartDate,
}

// -----------------------------
// POST /api/admin/leads
// Updates the lead with this name if it exists, otherwise creates it
// -----------------------------
pub async fn upsert_lead(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    Json(input): Json<LeadInput>,
) -> AppResult<Response> {
    let name = input.name.trim().to_string();
    let Some(status) = input.status.filter(|_| !name.is_empty()) else {
        return Err(AppError::validation("Missing required fields"));
    };
    let next_follow_up = input
        .next_follow_up
        .as_deref()
        .map(|d| parse_timestamp("next_follow_up", d))
        .transpose()?;
    let start_date = input
        .start_date
        .as_deref()
        .map(|d| parse_timestamp("start_date", d))
        .transpose()?;

    let tenant = claims.tenant;
    let now = state.clock.now();

    let outcome = state
        .store
        .write(|db| {
            if let Some(lead) = db
                .leads
                .iter_mut()
                .find(|l| l.tenant == tenant && l.name == name)
            {
                lead.status = status;
                lead.updated_at = now;
                if next_follow_up.is_some() {
                    lead.next_follow_up = next_follow_up;
                }
                if let Some(price) = input.price {
                    lead.price = price;
                }
                return Upsert::Updated;
            }

            let Some(start_date) = start_date else {
                return Upsert::MissingStartDate;
            };
            let lead = Lead {
                id: Uuid::new_v4(),
                tenant: tenant.clone(),
                name: name.clone(),
                start_date,
                next_follow_up,
                status,
                price: input.price.unwrap_or(0.0),
                created_at: now,
                updated_at: now,
            };
            let id = lead.id;
            db.leads.push(lead);
            Upsert::Created(id)
        })
        .await?;

    match outcome {
        Upsert::Updated => {
            Ok(Json(json!({ "message": "Lead updated successfully" })).into_response())
        }
        Upsert::Created(id) => Ok((
            StatusCode::CREATED,
            Json(json!({ "message": "Lead created successfully", "lead_id": id })),
        )
            .into_response()),
        Upsert::MissingStartDate => Err(AppError::validation(
            "start_date is required when creating a new lead",
        )),
    }
}

// -----------------------------
// GET /api/admin/leads
// -----------------------------
pub async fn get_leads(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
) -> AppResult<impl IntoResponse> {
    let mut leads: Vec<Lead> = state
        .store
        .read(|db| {
            db.leads
                .iter()
                .filter(|l| l.tenant == claims.tenant)
                .cloned()
                .collect()
        })
        .await;
    leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(json!({ "leads": leads })))
}

// -----------------------------
// DELETE /api/admin/leads/:id
// -----------------------------
pub async fn delete_lead(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let removed = state
        .store
        .write(|db| {
            let before = db.leads.len();
            db.leads.retain(|l| !(l.id == id && l.tenant == claims.tenant));
            db.leads.len() != before
        })
        .await?;

    if !removed {
        return Err(AppError::not_found("lead", id));
    }
    Ok(Json(json!({ "message": "Lead deleted" })))
}
