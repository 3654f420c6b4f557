use std::net::SocketAddr;

use dramlog_lib::{build_router, AppState, Config, Database};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const CRON_SECRET: &str = "cron-test-secret";

struct TestServer {
    addr: SocketAddr,
    db: Database,
    _dir: TempDir,
}

async fn spawn_server() -> TestServer {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("api.sqlite3");
    let db_path_str = db_path.to_string_lossy().to_string();

    let config = Config::from_lookup(move |key| match key {
        "DRAMLOG_DATABASE_PATH" => Some(db_path_str.clone()),
        "DRAMLOG_CRON_SECRET" => Some(CRON_SECRET.to_string()),
        "DRAMLOG_SCHEDULER_INTERVAL_SECS" => Some("0".to_string()),
        _ => None,
    })
    .expect("config");
    let db = Database::new(db_path).expect("database");
    let state = AppState::new(db.clone(), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, build_router(state))
            .await
            .expect("serve");
    });

    TestServer {
        addr,
        db,
        _dir: dir,
    }
}

async fn user_with_token(db: &Database, username: &str) -> (String, String) {
    let user = db.create_user(username, None).await.expect("create user");
    let token = db
        .issue_auth_token(&user.id, chrono::Duration::hours(1))
        .await
        .expect("token");
    (user.id, token)
}

async fn send_raw(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (u16, Value) {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if let Some(token) = token {
        req.push_str(&format!("Authorization: Bearer {token}\r\n"));
    }
    let payload = body.map(|b| b.to_string()).unwrap_or_default();
    if !payload.is_empty() {
        req.push_str("Content-Type: application/json\r\n");
    }
    req.push_str(&format!("Content-Length: {}\r\n\r\n{payload}", payload.len()));
    stream
        .write_all(req.as_bytes())
        .await
        .expect("write request");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("http response must have separator");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("http status");
    let body = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
    };
    (status, body)
}

async fn add_bottle(addr: SocketAddr, token: &str, name: &str) -> String {
    let (status, body) = send_raw(
        addr,
        "POST",
        "/api/collection",
        Some(token),
        Some(json!({ "bottle": { "name": name, "volumeMl": 700 } })),
    )
    .await;
    assert_eq!(status, 201, "{body}");
    body["id"].as_str().expect("bottle id").to_string()
}

#[tokio::test]
async fn health_is_public_and_api_requires_a_session() {
    let server = spawn_server().await;

    let (status, body) = send_raw(server.addr, "GET", "/api/health", None, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = send_raw(server.addr, "GET", "/api/collection", None, None).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = send_raw(server.addr, "GET", "/api/collection", Some("bogus"), None).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn malformed_ids_and_payloads_are_bad_requests() {
    let server = spawn_server().await;
    let (_, token) = user_with_token(&server.db, "malformed").await;

    let (status, body) =
        send_raw(server.addr, "GET", "/api/collection/not-a-uuid", Some(&token), None).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("not-a-uuid"));

    let (status, _) = send_raw(
        server.addr,
        "POST",
        "/api/pours",
        Some(&token),
        Some(json!({ "amountMl": "lots" })),
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn pour_times_the_store_cannot_hold_are_bad_requests() {
    let server = spawn_server().await;
    let (_, token) = user_with_token(&server.db, "timetraveller").await;
    let bottle_id = add_bottle(server.addr, &token, "Port Charlotte 10").await;

    for poured_at in ["+10000-01-01T00:00:00Z", "2999-01-01T00:00:00Z"] {
        let (status, body) = send_raw(
            server.addr,
            "POST",
            "/api/pours",
            Some(&token),
            Some(json!({ "userBottleId": bottle_id, "amountMl": 30, "pouredAt": poured_at })),
        )
        .await;
        assert_eq!(status, 400, "{poured_at}: {body}");
    }

    let (_, pours) = send_raw(server.addr, "GET", "/api/pours", Some(&token), None).await;
    assert!(pours.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn pours_are_grouped_into_a_session() {
    let server = spawn_server().await;
    let (_, token) = user_with_token(&server.db, "sipper").await;
    let bottle_id = add_bottle(server.addr, &token, "Springbank 10").await;

    let mut session_ids = Vec::new();
    for _ in 0..2 {
        let (status, body) = send_raw(
            server.addr,
            "POST",
            "/api/pours",
            Some(&token),
            Some(json!({ "userBottleId": bottle_id, "amountMl": 30 })),
        )
        .await;
        assert_eq!(status, 201, "{body}");
        session_ids.push(body["session"]["id"].as_str().unwrap().to_string());
    }
    assert_eq!(session_ids[0], session_ids[1]);

    let (status, current) =
        send_raw(server.addr, "GET", "/api/pours/sessions/current", Some(&token), None).await;
    assert_eq!(status, 200);
    assert_eq!(current["totalMl"], 60);
    assert_eq!(current["entries"].as_array().unwrap().len(), 2);

    let (_, item) = send_raw(
        server.addr,
        "GET",
        &format!("/api/collection/{bottle_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(item["remainingMl"], 640);
    assert_eq!(item["status"], "open");
}

#[tokio::test]
async fn foreign_resources_answer_not_found() {
    let server = spawn_server().await;
    let (_, owner_token) = user_with_token(&server.db, "owner").await;
    let (_, other_token) = user_with_token(&server.db, "intruder").await;
    let bottle_id = add_bottle(server.addr, &owner_token, "Highland Park 12").await;

    let path = format!("/api/collection/{bottle_id}");
    let (status, _) = send_raw(server.addr, "DELETE", &path, Some(&other_token), None).await;
    assert_eq!(status, 404);

    let (status, _) = send_raw(server.addr, "DELETE", &path, Some(&owner_token), None).await;
    assert_eq!(status, 204);
}

#[tokio::test]
async fn cron_endpoint_checks_secret_and_reports() {
    let server = spawn_server().await;
    let (_, token) = user_with_token(&server.db, "cronuser").await;
    add_bottle(server.addr, &token, "Glenfarclas 15").await;

    let (status, _) = send_raw(server.addr, "POST", "/api/cron/notifications", None, None).await;
    assert_eq!(status, 401);

    let (status, _) =
        send_raw(server.addr, "POST", "/api/cron/notifications", Some("wrong"), None).await;
    assert_eq!(status, 401);

    let (status, report) =
        send_raw(server.addr, "POST", "/api/cron/notifications", Some(CRON_SECRET), None).await;
    assert_eq!(status, 200, "{report}");
    assert_eq!(report["usersProcessed"], 1);
    assert_eq!(report["created"], 2);

    let (status, report) =
        send_raw(server.addr, "GET", "/api/cron/notifications", Some(CRON_SECRET), None).await;
    assert_eq!(status, 200);
    assert_eq!(report["created"], 0);
    assert_eq!(report["duplicates"], 2);

    let (_, count) =
        send_raw(server.addr, "GET", "/api/notifications/unread-count", Some(&token), None).await;
    assert_eq!(count["count"], 2);
}

#[tokio::test]
async fn notifications_can_only_be_deleted_by_their_owner() {
    let server = spawn_server().await;
    let (_, owner_token) = user_with_token(&server.db, "reader").await;
    let (_, other_token) = user_with_token(&server.db, "snoop").await;
    add_bottle(server.addr, &owner_token, "Bunnahabhain 12").await;
    send_raw(server.addr, "POST", "/api/cron/notifications", Some(CRON_SECRET), None).await;

    let (_, list) =
        send_raw(server.addr, "GET", "/api/notifications", Some(&owner_token), None).await;
    let id = list[0]["id"].as_str().unwrap().to_string();
    let path = format!("/api/notifications/{id}");

    let (status, _) = send_raw(server.addr, "DELETE", &path, Some(&other_token), None).await;
    assert_eq!(status, 404);

    let (status, _) = send_raw(server.addr, "DELETE", &path, Some(&owner_token), None).await;
    assert_eq!(status, 204);

    let (_, list) = send_raw(
        server.addr,
        "GET",
        "/api/notifications?unreadOnly=true",
        Some(&owner_token),
        None,
    )
    .await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn clearing_a_collection_keeps_the_catalogue() {
    let server = spawn_server().await;
    let (_, token) = user_with_token(&server.db, "minimalist").await;
    let bottle_id = add_bottle(server.addr, &token, "Kilchoman Machir Bay").await;

    let (_, item) = send_raw(
        server.addr,
        "GET",
        &format!("/api/collection/{bottle_id}"),
        Some(&token),
        None,
    )
    .await;
    let master_id = item["masterBottleId"].as_str().unwrap().to_string();

    let (status, cleared) =
        send_raw(server.addr, "DELETE", "/api/collection", Some(&token), None).await;
    assert_eq!(status, 200);
    assert_eq!(cleared["removed"], 1);

    let (status, bottle) = send_raw(
        server.addr,
        "GET",
        &format!("/api/bottles/{master_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(bottle["name"], "Kilchoman Machir Bay");
}

#[tokio::test]
async fn accepted_friend_request_notifies_the_requester() {
    let server = spawn_server().await;
    let (_, alice_token) = user_with_token(&server.db, "alice").await;
    let (_, bob_token) = user_with_token(&server.db, "bob").await;

    let (status, request) = send_raw(
        server.addr,
        "POST",
        "/api/friends/requests",
        Some(&alice_token),
        Some(json!({ "username": "bob" })),
    )
    .await;
    assert_eq!(status, 201);
    let request_id = request["id"].as_str().unwrap().to_string();

    let (status, _) = send_raw(
        server.addr,
        "POST",
        "/api/friends/requests",
        Some(&alice_token),
        Some(json!({ "username": "bob" })),
    )
    .await;
    assert_eq!(status, 409);

    let (status, accepted) = send_raw(
        server.addr,
        "POST",
        &format!("/api/friends/requests/{request_id}/accept"),
        Some(&bob_token),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(accepted["status"], "accepted");

    let (_, notes) =
        send_raw(server.addr, "GET", "/api/notifications", Some(&alice_token), None).await;
    assert_eq!(notes[0]["type"], "friend_accepted");

    let (_, friends) = send_raw(server.addr, "GET", "/api/friends", Some(&bob_token), None).await;
    assert_eq!(friends[0]["username"], "alice");
}
