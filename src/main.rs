// Define data modules
mod auth;       // Password hashing, bearer tokens, caller extractors
mod clock;      // "now" provider
mod config;     // Settings from environment / .env
mod error;      // AppError and its HTTP mapping
mod lifecycle;  // Task state machine (start / stop / complete / deadline)
mod mailer;     // Outbound email
mod models;     // Data structures (Task, User, Lead, Billing, etc.)
mod reminders;  // Deadline reminder rules
mod report;     // Admin daily time report
mod scheduler;  // Background reminder loop
mod state;      // Shared handler state
mod store;      // Persistent storage (data/db.json)
mod routes_admin;   // HTTP handlers for admin task APIs
mod routes_billing; // HTTP handlers for billing APIs
mod routes_leads;   // HTTP handlers for lead APIs
mod routes_tasks;   // HTTP handlers for a user's own tasks
mod routes_users;   // HTTP handlers for login and users

use std::sync::Arc;

// Import axum routing utilities and Router
use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::Authenticator;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::mailer::{LogMailer, Mailer, RelayMailer};
use crate::scheduler::ReminderScheduler;
use crate::state::AppState;
use crate::store::JsonStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("timetrack=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

fn api_router(state: AppState) -> Router {
    Router::new()
        // auth & users
        .route("/auth/login", post(routes_users::login))
        .route("/users", get(routes_users::get_users).post(routes_users::create_user))
        // tasks
        .route("/tasks", get(routes_tasks::get_tasks).post(routes_tasks::post_action))
        // admin
        .route("/admin/tasks", get(routes_admin::get_tasks).post(routes_admin::create_task))
        .route("/admin/tasks/:id", delete(routes_admin::delete_task))
        .route("/admin/time-log", get(routes_admin::get_time_log))
        .route("/admin/leads", get(routes_leads::get_leads).post(routes_leads::upsert_lead))
        .route("/admin/leads/:id", delete(routes_leads::delete_lead))
        .route(
            "/admin/billing-ids",
            get(routes_billing::get_billing_ids).post(routes_billing::create_billing_id),
        )
        // billing
        .route(
            "/billing",
            get(routes_billing::get_billing)
                .post(routes_billing::create_billing)
                .put(routes_billing::update_billing),
        )
        .with_state(state)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let store = Arc::new(JsonStore::open(config.data_path.clone()).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mailer: Arc<dyn Mailer> = match &config.mail_relay_url {
        Some(url) => Arc::new(RelayMailer::new(
            url.as_str(),
            config.mail_from.as_str(),
            clock.clone(),
        )),
        None => {
            warn!("MAIL_RELAY_URL not set, emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    if let Some(seed) = &config.admin {
        if routes_users::seed_admin(&store, seed, clock.now()).await? {
            info!(email = %seed.email, "admin account created");
        }
    }

    ReminderScheduler::new(store.clone(), store.clone(), mailer.clone(), clock.clone())
        .with_interval(config.reminder_interval)
        .spawn();

    let auth = Arc::new(Authenticator::new(
        &config.jwt_secret,
        config.token_ttl_hours,
        clock.clone(),
    ));
    let state = AppState::new(store, mailer, clock, auth);

    let app = Router::new()
        .nest("/api", api_router(state))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(TraceLayer::new_for_http());

    // Print the link to the server
    println!("  Server running at http://{}", config.bind_addr);
    println!("  Static files: http://{}/", config.bind_addr);
    println!("  API base:     http://{}/api", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}
