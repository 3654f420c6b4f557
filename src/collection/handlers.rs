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
use serde::{Deserialize, Serialize};

use crate::{
    db::{AddToCollection, CollectionItem, MasterBottle, NewMasterBottle, UserBottleUpdate},
    error::AppError,
    http::auth::{parse_id, AuthUser},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

pub async fn search_bottles(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<MasterBottle>>, AppError> {
    let Query(params) = params?;
    let bottles = state.db.search_master_bottles(params.q).await?;
    Ok(Json(bottles))
}

pub async fn create_bottle(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<NewMasterBottle>, JsonRejection>,
) -> Result<(StatusCode, Json<MasterBottle>), AppError> {
    let Json(input) = payload?;
    let bottle = state.db.create_master_bottle(&user.id, input).await?;
    Ok((StatusCode::CREATED, Json(bottle)))
}

pub async fn get_bottle(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MasterBottle>, AppError> {
    let id = parse_id(&id)?;
    let bottle = state
        .db
        .get_master_bottle(&id)
        .await?
        .ok_or(AppError::NotFound("bottle"))?;
    Ok(Json(bottle))
}

pub async fn bottle_by_barcode(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    Path(code): Path<String>,
) -> Result<Json<MasterBottle>, AppError> {
    let bottle = state
        .db
        .find_by_barcode(&code)
        .await?
        .ok_or(AppError::NotFound("bottle"))?;
    Ok(Json(bottle))
}

pub async fn list_collection(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<CollectionItem>>, AppError> {
    Ok(Json(state.db.list_collection(&user.id).await?))
}

pub async fn add_to_collection(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<AddToCollection>, JsonRejection>,
) -> Result<(StatusCode, Json<CollectionItem>), AppError> {
    let Json(mut input) = payload?;
    if let Some(master_id) = input.master_bottle_id.take() {
        input.master_bottle_id = Some(parse_id(&master_id)?);
    }
    let item = state.db.add_to_collection(&user.id, input).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cleared {
    pub removed: usize,
}

pub async fn clear_collection(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Cleared>, AppError> {
    let removed = state.db.clear_collection(&user.id).await?;
    log::info!("user {} cleared {removed} bottles from their collection", user.id);
    Ok(Json(Cleared { removed }))
}

pub async fn get_collection_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CollectionItem>, AppError> {
    let id = parse_id(&id)?;
    let item = state
        .db
        .get_collection_item(&user.id, &id)
        .await?
        .ok_or(AppError::NotFound("bottle"))?;
    Ok(Json(item))
}

pub async fn update_collection_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UserBottleUpdate>, JsonRejection>,
) -> Result<Json<CollectionItem>, AppError> {
    let id = parse_id(&id)?;
    let Json(update) = payload?;
    Ok(Json(state.db.update_user_bottle(&user.id, &id, update).await?))
}

pub async fn remove_collection_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    if state.db.remove_from_collection(&user.id, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("bottle"))
    }
}

pub async fn labels_pending(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<CollectionItem>>, AppError> {
    Ok(Json(state.db.bottles_needing_labels(&user.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PrintedLabels {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelsMarked {
    pub updated: usize,
}

pub async fn mark_labels_printed(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<PrintedLabels>, JsonRejection>,
) -> Result<Json<LabelsMarked>, AppError> {
    let Json(printed) = payload?;
    let ids = printed
        .ids
        .iter()
        .map(|id| parse_id(id))
        .collect::<Result<Vec<_>, _>>()?;
    let updated = state.db.mark_labels_printed(&user.id, ids, Utc::now()).await?;
    Ok(Json(LabelsMarked { updated }))
}
