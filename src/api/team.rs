use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use super::AppState;
use super::error::ApiResult;
use crate::team::{self, NewTeamMember, TeamMember};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    active_only: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<TeamMember>>> {
    Ok(Json(state.desk.db().list_team_members(q.active_only).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(member): Json<NewTeamMember>,
) -> ApiResult<(StatusCode, Json<TeamMember>)> {
    let created = team::add_member(state.desk.db(), member).await?;
    Ok((StatusCode::CREATED, Json(created)))
}
