use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use super::AppState;
use super::error::ApiResult;
use crate::pipeline::SchedulerStatus;

pub async fn status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

#[derive(Debug, Deserialize)]
pub struct StartQuery {
    interval_minutes: Option<u64>,
}

pub async fn start(
    State(state): State<AppState>,
    Query(q): Query<StartQuery>,
) -> ApiResult<Json<SchedulerStatus>> {
    Ok(Json(state.scheduler.start(q.interval_minutes).await?))
}

pub async fn stop(State(state): State<AppState>) -> ApiResult<Json<SchedulerStatus>> {
    Ok(Json(state.scheduler.stop().await?))
}

#[derive(Debug, Deserialize)]
pub struct IntervalBody {
    minutes: u64,
}

/// Clamped to 1..=60 minutes.
pub async fn set_interval(
    State(state): State<AppState>,
    Json(body): Json<IntervalBody>,
) -> ApiResult<Json<SchedulerStatus>> {
    Ok(Json(state.scheduler.set_interval(body.minutes).await?))
}
