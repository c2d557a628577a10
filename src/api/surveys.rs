//! Satisfaction surveys. The `token` routes are the customer-facing side.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;

use super::AppState;
use super::error::ApiResult;
use crate::surveys::{self, Survey, SurveyCreated, SurveyLookup, SurveyStats};

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Survey>>> {
    Ok(Json(state.desk.db().list_surveys().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    ticket_id: i64,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> ApiResult<Json<SurveyCreated>> {
    Ok(Json(surveys::create_survey(state.desk.db(), body.ticket_id).await?))
}

pub async fn send(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Survey>> {
    Ok(Json(surveys::mark_sent(state.desk.db(), id, Utc::now()).await?))
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    surveys::delete(state.desk.db(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<SurveyStats>> {
    Ok(Json(surveys::stats(state.desk.db()).await?))
}

pub async fn by_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<SurveyLookup>> {
    Ok(Json(surveys::lookup(state.desk.db(), &token).await?))
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    rating: i64,
    feedback: Option<String>,
}

pub async fn submit(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<Json<Survey>> {
    let survey = surveys::submit(
        state.desk.db(),
        &token,
        body.rating,
        body.feedback.as_deref(),
        Utc::now(),
    )
    .await?;
    Ok(Json(survey))
}
