//! Ticket endpoints: listing, the AI pipeline and the approval gate.

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::error::TicketError;
use crate::tickets::model::{Ticket, TicketDetail, TicketFilter};

const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    category: Option<String>,
    urgency: Option<String>,
    search: Option<String>,
    sla_breached: Option<bool>,
    assigned_to: Option<String>,
}

fn parse_opt<T: std::str::FromStr<Err = String>>(value: Option<String>) -> ApiResult<Option<T>> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.parse::<T>().map_err(ApiError::BadRequest))
        .transpose()
}

impl ListQuery {
    fn into_filter(self) -> ApiResult<TicketFilter> {
        Ok(TicketFilter {
            status: parse_opt(self.status)?,
            category: parse_opt(self.category)?,
            urgency: parse_opt(self.urgency)?,
            search: self.search.filter(|s| !s.trim().is_empty()),
            sla_breached: self.sla_breached,
            assigned_to: parse_opt(self.assigned_to)?,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Ticket>>> {
    let filter = query.into_filter()?;
    Ok(Json(state.desk.db().list_tickets(&filter).await?))
}

async fn load(state: &AppState, id: i64) -> ApiResult<Ticket> {
    Ok(state
        .desk
        .db()
        .get_ticket(id)
        .await?
        .ok_or(TicketError::NotFound { id })?)
}

pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TicketDetail>> {
    let ticket = load(&state, id).await?;
    let messages = state.desk.db().ticket_messages(id).await?;
    Ok(Json(TicketDetail { ticket, messages }))
}

/// Earlier tickets from the same customer.
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Ticket>>> {
    let ticket = load(&state, id).await?;
    let history = state
        .desk
        .db()
        .customer_history(&ticket.sender_email, Some(id), HISTORY_LIMIT)
        .await?;
    Ok(Json(history))
}

// ── Pipeline ────────────────────────────────────────────────────────────

pub async fn fetch(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.desk.fetch_emails().await?;
    Ok(Json(report))
}

pub async fn process(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(state.desk.process_ticket(id).await?))
}

pub async fn process_all(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.desk.process_unprocessed().await?;
    Ok(Json(report))
}

// ── Approval gate ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DraftBody {
    draft_response: String,
}

pub async fn update_draft(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<DraftBody>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(state.desk.update_draft(id, &body.draft_response).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ActorQuery {
    approved_by: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<Json<Ticket>> {
    let ticket = state.desk.approve(id, actor.approved_by.as_deref()).await?;
    info!(ticket_id = id, by = ?ticket.approved_by, "Approved via API");
    Ok(Json(ticket))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(state.desk.reject(id, actor.approved_by.as_deref()).await?))
}

pub async fn send(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Ticket>> {
    Ok(Json(state.desk.send(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct BulkBody {
    ticket_ids: Vec<i64>,
    approved_by: Option<String>,
}

fn count(n: usize) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "count": n }))
}

pub async fn bulk_approve(
    State(state): State<AppState>,
    Json(body): Json<BulkBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let n = state
        .desk
        .bulk_approve(&body.ticket_ids, body.approved_by.as_deref())
        .await?;
    Ok(count(n))
}

pub async fn bulk_reject(
    State(state): State<AppState>,
    Json(body): Json<BulkBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let n = state
        .desk
        .bulk_reject(&body.ticket_ids, body.approved_by.as_deref())
        .await?;
    Ok(count(n))
}

pub async fn bulk_send(
    State(state): State<AppState>,
    Json(body): Json<BulkBody>,
) -> Json<serde_json::Value> {
    count(state.desk.bulk_send(&body.ticket_ids).await)
}

// ── Ownership ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    member_id: Option<i64>,
}

pub async fn assign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AssignBody>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(state.desk.assign(id, body.member_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct EscalateBody {
    escalated: bool,
}

pub async fn escalate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<EscalateBody>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(state.desk.escalate(id, body.escalated).await?))
}
