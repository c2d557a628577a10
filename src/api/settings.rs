//! Runtime settings: SLA hours, staff notifications and the auto-responder.

use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::settings::{self, DeskSettings, SlaHours, keys};

pub async fn all(State(state): State<AppState>) -> ApiResult<Json<DeskSettings>> {
    Ok(Json(DeskSettings::load(state.desk.db()).await?))
}

pub async fn get_sla(State(state): State<AppState>) -> ApiResult<Json<SlaHours>> {
    Ok(Json(settings::sla_hours(state.desk.db()).await?))
}

/// Non-positive hours are ignored. Open tickets pick up the new deadlines on
/// the next refresh.
pub async fn put_sla(
    State(state): State<AppState>,
    Json(hours): Json<SlaHours>,
) -> ApiResult<Json<SlaHours>> {
    let saved = settings::save_sla_hours(state.desk.db(), hours).await?;
    state.desk.refresh_sla().await?;
    info!(high = saved.high, medium = saved.medium, low = saved.low, "SLA hours updated");
    Ok(Json(saved))
}

#[derive(Debug, Deserialize)]
pub struct NotificationsBody {
    enabled: Option<bool>,
    urgent_only: Option<bool>,
    recipients: Option<String>,
}

pub async fn put_notifications(
    State(state): State<AppState>,
    Json(body): Json<NotificationsBody>,
) -> ApiResult<Json<DeskSettings>> {
    let db = state.desk.db();
    if let Some(enabled) = body.enabled {
        db.set_setting(keys::NOTIFY_ENABLED, bool_str(enabled)).await?;
    }
    if let Some(urgent_only) = body.urgent_only {
        db.set_setting(keys::NOTIFY_URGENT_ONLY, bool_str(urgent_only))
            .await?;
    }
    if let Some(recipients) = body.recipients {
        db.set_setting(keys::NOTIFY_RECIPIENTS, recipients.trim())
            .await?;
    }
    Ok(Json(DeskSettings::load(db).await?))
}

#[derive(Debug, Deserialize)]
pub struct AutoResponderBody {
    enabled: Option<bool>,
    template: Option<String>,
}

pub async fn put_auto_responder(
    State(state): State<AppState>,
    Json(body): Json<AutoResponderBody>,
) -> ApiResult<Json<DeskSettings>> {
    let db = state.desk.db();
    if let Some(enabled) = body.enabled {
        db.set_setting(keys::AUTO_RESPONDER_ENABLED, bool_str(enabled))
            .await?;
    }
    if let Some(template) = body.template {
        if template.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "auto-responder template cannot be empty".to_string(),
            ));
        }
        db.set_setting(keys::AUTO_RESPONDER_TEMPLATE, &template).await?;
    }
    Ok(Json(DeskSettings::load(db).await?))
}

fn bool_str(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}
