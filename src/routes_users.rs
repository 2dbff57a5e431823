// --------------------------------------------------
// User accounts and login.
//
// Responsibilities:
// - Exchange email + password for a bearer token
// - Create users (admin only) and list them
// - Seed the first admin account at startup
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
use tracing::info;
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser, hash_password, verify_password};
use crate::config::AdminSeed;
use crate::error::{AppError, AppResult};
use crate::models::{PublicUser, Role, User};
use crate::state::AppState;
use crate::store::JsonStore;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Insert `user` unless the email is taken. Returns false on a duplicate.
async fn insert_user(store: &JsonStore, user: User) -> AppResult<bool> {
    let inserted = store
        .write(|db| {
            if db.users.iter().any(|u| u.email == user.email) {
                return false;
            }
            db.users.push(user);
            true
        })
        .await?;
    Ok(inserted)
}

/// Create the configured admin account if no user has that email yet.
pub async fn seed_admin(store: &JsonStore, seed: &AdminSeed, now: DateTime<Utc>) -> AppResult<bool> {
    let email = normalize_email(&seed.email);
    let exists = store
        .read(|db| db.users.iter().any(|u| u.email == email))
        .await;
    if exists {
        return Ok(false);
    }

    let user = User {
        id: Uuid::new_v4(),
        name: seed.name.clone(),
        email,
        password_hash: hash_password(&seed.password)?,
        role: Role::Admin,
        tenant: None,
        created_at: now,
    };
    insert_user(store, user).await
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub role: Role,
    pub id: Uuid,
}

// -----------------------------
// POST /api/auth/login
// -----------------------------
pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> AppResult<impl IntoResponse> {
    if input.email.trim().is_empty() || input.password.is_empty() {
        return Err(AppError::validation("Email and password are required"));
    }

    let email = normalize_email(&input.email);
    let user = state
        .store
        .read(|db| db.users.iter().find(|u| u.email == email).cloned())
        .await;

    // same answer for unknown email and wrong password
    let Some(user) = user.filter(|u| verify_password(&input.password, &u.password_hash)) else {
        return Err(AppError::Unauthorized("Invalid email or password".into()));
    };

    let token = state.auth.issue(&user)?;
    info!(user = %user.id, "login");
    Ok(Json(LoginResponse {
        token,
        role: user.role,
        id: user.id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserInput {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub tenant: Option<String>,
}

// -----------------------------
// POST /api/users
// Admin only
// -----------------------------
pub async fn create_user(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Json(input): Json<CreateUserInput>,
) -> AppResult<impl IntoResponse> {
    let email = normalize_email(&input.email);
    if input.name.trim().is_empty() || input.password.is_empty() || !email.contains('@') {
        return Err(AppError::validation("Name, email, password, and role are required"));
    }

    let user = User {
        id: Uuid::new_v4(),
        name: input.name.trim().to_string(),
        email,
        password_hash: hash_password(&input.password)?,
        role: input.role,
        tenant: input.tenant.filter(|t| !t.trim().is_empty()),
        created_at: state.clock.now(),
    };
    let public = PublicUser::from(&user);

    if !insert_user(&state.store, user).await? {
        return Err(AppError::Conflict("Email already in use".into()));
    }

    info!(user = %public.id, role = ?public.role, "user created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created", "user": public })),
    ))
}

// -----------------------------
// GET /api/users
// -----------------------------
pub async fn get_users(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> AppResult<impl IntoResponse> {
    let users: Vec<PublicUser> = state
        .store
        .read(|db| db.users.iter().map(PublicUser::from).collect())
        .await;
    Ok(Json(json!({ "users": users })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> AdminSeed {
        AdminSeed {
            name: "Admin".into(),
            email: " Admin@Example.com ".into(),
            password: "Admin@123".into(),
        }
    }

    #[tokio::test]
    async fn seed_admin_runs_once() {
        let store = JsonStore::in_memory();
        assert!(seed_admin(&store, &seed(), Utc::now()).await.unwrap());
        assert!(!seed_admin(&store, &seed(), Utc::now()).await.unwrap());

        let users = store.read(|db| db.users.clone()).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "admin@example.com");
        assert_eq!(users[0].role, Role::Admin);
        assert!(verify_password("Admin@123", &users[0].password_hash));
    }
}
