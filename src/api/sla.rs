use axum::{
    Json,
    extract::{Query, State},
};
use chrono::Utc;
use serde::Deserialize;

use super::AppState;
use super::error::ApiResult;
use crate::sla::{self, QueueEntry, SlaRefresh, SlaSummary};

pub async fn summary(State(state): State<AppState>) -> ApiResult<Json<SlaSummary>> {
    Ok(Json(sla::sla_summary(state.desk.db(), Utc::now()).await?))
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    limit: Option<usize>,
}

pub async fn queue(
    State(state): State<AppState>,
    Query(q): Query<QueueQuery>,
) -> ApiResult<Json<Vec<QueueEntry>>> {
    Ok(Json(
        sla::priority_queue(state.desk.db(), q.limit, Utc::now()).await?,
    ))
}

/// Recompute every open ticket and alert on fresh breaches.
pub async fn refresh(State(state): State<AppState>) -> ApiResult<Json<SlaRefresh>> {
    Ok(Json(state.desk.refresh_sla().await?))
}
