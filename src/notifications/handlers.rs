use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    db::Notification,
    error::AppError,
    http::auth::{parse_id, AuthUser, CronCaller},
    AppState,
};

use super::generator::GenerationReport;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 200;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<u32>,
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let notifications = state
        .db
        .list_notifications(&user.id, params.unread_only, limit, Utc::now())
        .await?;
    Ok(Json(notifications))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub count: u64,
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<UnreadCount>, AppError> {
    let count = state.db.unread_notification_count(&user.id, Utc::now()).await?;
    Ok(Json(UnreadCount { count }))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    if state.db.mark_notification_read(&user.id, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("notification"))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedRead {
    pub updated: usize,
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<MarkedRead>, AppError> {
    let updated = state.db.mark_all_notifications_read(&user.id).await?;
    Ok(Json(MarkedRead { updated }))
}

pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    if state.db.delete_notification(&user.id, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("notification"))
    }
}

/// Externally triggered generation run, gated by the cron secret.
pub async fn run_generation(
    State(state): State<Arc<AppState>>,
    _cron: CronCaller,
) -> Result<Json<GenerationReport>, AppError> {
    log::info!("notification run triggered via cron endpoint");
    let report = state.generator.generate_all(Utc::now()).await;
    Ok(Json(report))
}
