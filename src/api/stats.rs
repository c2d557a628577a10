use axum::{
    Json,
    extract::{Query, State},
};
use chrono::Utc;
use serde::Deserialize;

use super::AppState;
use super::error::ApiResult;
use crate::analytics::{self, Analytics, Performance, StatusSummary, Trends};

pub async fn summary(State(state): State<AppState>) -> ApiResult<Json<StatusSummary>> {
    Ok(Json(analytics::status_summary(state.desk.db()).await?))
}

pub async fn analytics(State(state): State<AppState>) -> ApiResult<Json<Analytics>> {
    Ok(Json(analytics::analytics(state.desk.db()).await?))
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    days: Option<u32>,
}

pub async fn trends(
    State(state): State<AppState>,
    Query(q): Query<TrendsQuery>,
) -> ApiResult<Json<Trends>> {
    Ok(Json(
        analytics::volume_trends(state.desk.db(), q.days, Utc::now()).await?,
    ))
}

pub async fn performance(State(state): State<AppState>) -> ApiResult<Json<Performance>> {
    Ok(Json(
        analytics::performance_metrics(state.desk.db(), Utc::now()).await?,
    ))
}
