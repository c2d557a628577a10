//! HTTP API and event WebSocket for the desk dashboard.

mod error;
mod scheduler;
mod settings;
mod sla;
mod stats;
mod surveys;
mod team;
mod tickets;
mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;

pub use error::ApiError;

use crate::pipeline::{Desk, Scheduler};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub desk: Arc<Desk>,
    pub scheduler: Arc<Scheduler>,
}

/// Build the full router: `/health`, `/ws` and everything under `/api`.
pub fn router(desk: Arc<Desk>, scheduler: Arc<Scheduler>) -> Router {
    let state = AppState { desk, scheduler };

    let api = Router::new()
        // Tickets
        .route("/tickets", get(tickets::list))
        .route("/tickets/fetch", post(tickets::fetch))
        .route("/tickets/process-all", post(tickets::process_all))
        .route("/tickets/bulk-approve", post(tickets::bulk_approve))
        .route("/tickets/bulk-reject", post(tickets::bulk_reject))
        .route("/tickets/bulk-send", post(tickets::bulk_send))
        .route("/tickets/{id}", get(tickets::detail))
        .route("/tickets/{id}/history", get(tickets::history))
        .route("/tickets/{id}/process", post(tickets::process))
        .route("/tickets/{id}/draft", put(tickets::update_draft))
        .route("/tickets/{id}/approve", post(tickets::approve))
        .route("/tickets/{id}/reject", post(tickets::reject))
        .route("/tickets/{id}/send", post(tickets::send))
        .route("/tickets/{id}/assign", put(tickets::assign))
        .route("/tickets/{id}/escalate", put(tickets::escalate))
        // SLA
        .route("/sla/summary", get(sla::summary))
        .route("/sla/queue", get(sla::queue))
        .route("/sla/refresh", post(sla::refresh))
        // Settings
        .route("/settings", get(settings::all))
        .route("/settings/sla", get(settings::get_sla).put(settings::put_sla))
        .route("/settings/notifications", put(settings::put_notifications))
        .route("/settings/auto-responder", put(settings::put_auto_responder))
        // Scheduler
        .route("/scheduler/status", get(scheduler::status))
        .route("/scheduler/start", post(scheduler::start))
        .route("/scheduler/stop", post(scheduler::stop))
        .route("/scheduler/interval", put(scheduler::set_interval))
        // Team
        .route("/team", get(team::list).post(team::create))
        // Surveys
        .route("/surveys", get(surveys::list).post(surveys::create))
        .route("/surveys/stats", get(surveys::stats))
        .route("/surveys/{id}", delete(surveys::remove))
        .route("/surveys/{id}/send", post(surveys::send))
        .route(
            "/surveys/token/{token}",
            get(surveys::by_token).post(surveys::submit),
        )
        // Stats
        .route("/stats/summary", get(stats::summary))
        .route("/stats/analytics", get(stats::analytics))
        .route("/stats/trends", get(stats::trends))
        .route("/stats/performance", get(stats::performance));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "support-desk"
    }))
}
