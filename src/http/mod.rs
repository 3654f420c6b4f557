pub mod auth;

use std::{sync::Arc, time::Duration};

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{collection, notifications, pours, social, AppState};

pub fn build_router(state: Arc<AppState>) -> Router {
    let allow_origin = match state.config.cors_origin.clone() {
        Some(origin) => AllowOrigin::exact(origin),
        None => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/api/health", get(health))
        .merge(profile_routes())
        .merge(catalogue_routes())
        .merge(collection_routes())
        .merge(pour_routes())
        .merge(notification_routes())
        .merge(friend_routes())
        .route(
            "/api/cron/notifications",
            get(notifications::handlers::run_generation)
                .post(notifications::handlers::run_generation),
        )
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn profile_routes() -> Router<Arc<AppState>> {
    use social::handlers::{get_profile, public_profile, update_profile};

    Router::new()
        .route("/api/profile", get(get_profile).patch(update_profile))
        .route("/api/users/{username}", get(public_profile))
}

fn catalogue_routes() -> Router<Arc<AppState>> {
    use collection::handlers::{bottle_by_barcode, create_bottle, get_bottle, search_bottles};

    Router::new()
        .route("/api/bottles", get(search_bottles).post(create_bottle))
        .route("/api/bottles/{id}", get(get_bottle))
        .route("/api/bottles/barcode/{code}", get(bottle_by_barcode))
}

fn collection_routes() -> Router<Arc<AppState>> {
    use collection::handlers::*;

    Router::new()
        .route(
            "/api/collection",
            get(list_collection).post(add_to_collection).delete(clear_collection),
        )
        .route("/api/collection/labels", get(labels_pending))
        .route("/api/collection/labels/printed", post(mark_labels_printed))
        .route(
            "/api/collection/{id}",
            get(get_collection_item)
                .patch(update_collection_item)
                .delete(remove_collection_item),
        )
}

fn pour_routes() -> Router<Arc<AppState>> {
    use pours::handlers::{current_session, delete_pour, list_pours, list_sessions, record_pour};

    Router::new()
        .route("/api/pours", get(list_pours).post(record_pour))
        .route("/api/pours/sessions", get(list_sessions))
        .route("/api/pours/sessions/current", get(current_session))
        .route("/api/pours/{id}", delete(delete_pour))
}

fn notification_routes() -> Router<Arc<AppState>> {
    use notifications::handlers::{
        delete_notification, list_notifications, mark_all_read, mark_read, unread_count,
    };

    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/read-all", post(mark_all_read))
        .route("/api/notifications/{id}", delete(delete_notification))
        .route("/api/notifications/{id}/read", post(mark_read))
}

fn friend_routes() -> Router<Arc<AppState>> {
    use social::handlers::{
        accept_request, decline_request, incoming_requests, list_friends, remove_friend,
        send_request,
    };

    Router::new()
        .route("/api/friends", get(list_friends))
        .route("/api/friends/requests", get(incoming_requests).post(send_request))
        .route("/api/friends/requests/{id}/accept", post(accept_request))
        .route("/api/friends/requests/{id}/decline", post(decline_request))
        .route("/api/friends/{user_id}", delete(remove_friend))
}
