use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    db::{Friend, Friendship, IncomingRequest, ProfileUpdate, PublicProfile, User},
    error::AppError,
    http::auth::{parse_id, AuthUser},
    notifications::rules::friend_accepted_draft,
    AppState,
};

pub async fn get_profile(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<User>, AppError> {
    let Json(update) = payload?;
    Ok(Json(state.db.update_profile(&user.id, update).await?))
}

/// Hidden profiles answer 404 so their existence is not revealed.
pub async fn public_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(viewer): AuthUser,
    Path(username): Path<String>,
) -> Result<Json<PublicProfile>, AppError> {
    let profile = state
        .db
        .public_profile(&viewer.id, &username)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(profile))
}

pub async fn list_friends(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Friend>>, AppError> {
    Ok(Json(state.db.list_friends(&user.id).await?))
}

pub async fn remove_friend(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(friend_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let friend_id = parse_id(&friend_id)?;
    if state.db.remove_friend(&user.id, &friend_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("friend"))
    }
}

pub async fn incoming_requests(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<IncomingRequest>>, AppError> {
    Ok(Json(state.db.incoming_friend_requests(&user.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct FriendRequestBody {
    pub username: String,
}

pub async fn send_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    payload: Result<Json<FriendRequestBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Friendship>), AppError> {
    let Json(body) = payload?;
    let friendship = state.db.send_friend_request(&user.id, &body.username).await?;
    Ok((StatusCode::CREATED, Json(friendship)))
}

pub async fn accept_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Friendship>, AppError> {
    let id = parse_id(&id)?;
    let friendship = state.db.respond_to_friend_request(&user.id, &id, true).await?;

    let draft = friend_accepted_draft(&friendship.requester_id, &user, &friendship.id, Utc::now());
    if let Err(err) = state.db.insert_notification_if_new(draft, Utc::now()).await {
        log::warn!(
            "failed to notify {} of accepted request {}: {err:?}",
            friendship.requester_id,
            friendship.id
        );
    }

    Ok(Json(friendship))
}

pub async fn decline_request(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Friendship>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.db.respond_to_friend_request(&user.id, &id, false).await?))
}
