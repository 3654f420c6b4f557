use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    db::{NewPour, Pour, PourSession, PourSessionDetail, RecordedPour},
    error::AppError,
    http::auth::{parse_id, AuthUser},
    AppState,
};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Page {
    fn bounds(&self) -> (u32, u32) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        (limit, self.offset.unwrap_or(0))
    }
}

pub async fn list_pours(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    page: Result<Query<Page>, QueryRejection>,
) -> Result<Json<Vec<Pour>>, AppError> {
    let Query(page) = page?;
    let (limit, offset) = page.bounds();
    Ok(Json(state.db.list_pours(&user.id, limit, offset).await?))
}

pub async fn record_pour(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<NewPour>, JsonRejection>,
) -> Result<(StatusCode, Json<RecordedPour>), AppError> {
    let Json(mut input) = payload?;
    input.user_bottle_id = parse_id(&input.user_bottle_id)?;

    let gap = state.config.session_window().gap;
    let recorded = state.db.record_pour(&user.id, input, gap, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

pub async fn delete_pour(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    if state.db.delete_pour(&user.id, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("pour"))
    }
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    page: Result<Query<Page>, QueryRejection>,
) -> Result<Json<Vec<PourSession>>, AppError> {
    let Query(page) = page?;
    let (limit, offset) = page.bounds();
    Ok(Json(state.db.list_pour_sessions(&user.id, limit, offset).await?))
}

/// The open session, or `null` once the gap has elapsed.
pub async fn current_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Option<PourSessionDetail>>, AppError> {
    let gap = state.config.session_window().gap;
    Ok(Json(state.db.current_pour_session(&user.id, Utc::now(), gap).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_are_clamped() {
        assert_eq!(Page::default().bounds(), (DEFAULT_PAGE_SIZE, 0));
        let page = Page {
            limit: Some(10_000),
            offset: Some(20),
        };
        assert_eq!(page.bounds(), (MAX_PAGE_SIZE, 20));
        let page = Page {
            limit: Some(0),
            offset: None,
        };
        assert_eq!(page.bounds().0, 1);
    }
}
