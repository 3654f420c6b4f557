use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    error::StoreError,
    helpers::{format_datetime, parse_datetime, to_u64},
    models::{ProfileUpdate, PublicProfile, User},
};

use super::collection::query_collection;

const USER_COLUMNS: &str = "id, username, display_name, is_public, created_at, updated_at";

fn row_to_user(row: &Row) -> Result<User> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        is_public: row.get("is_public")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

pub(super) fn find_user(conn: &Connection, user_id: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
    let mut rows = stmt.query(params![user_id])?;
    let found = match rows.next()? {
        Some(row) => Some(row_to_user(row)?),
        None => None,
    };
    Ok(found)
}

fn find_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 COLLATE NOCASE"
    ))?;
    let mut rows = stmt.query(params![username])?;
    let found = match rows.next()? {
        Some(row) => Some(row_to_user(row)?),
        None => None,
    };
    Ok(found)
}

pub(super) fn are_friends(conn: &Connection, a: &str, b: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM friendships
             WHERE status = 'accepted'
               AND ((requester_id = ?1 AND addressee_id = ?2)
                 OR (requester_id = ?2 AND addressee_id = ?1))",
            params![a, b],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn validate_username(username: &str) -> Result<()> {
    let valid = (3..=32).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !valid {
        bail!(StoreError::Invalid(
            "username must be 3-32 characters of letters, digits, '_', '-' or '.'".into()
        ));
    }
    Ok(())
}

impl Database {
    /// Registers a user. Account creation itself belongs to the identity provider;
    /// this mirrors its user record locally.
    pub async fn create_user(&self, username: &str, display_name: Option<String>) -> Result<User> {
        let username = username.trim().to_string();
        self.execute(move |conn| {
            validate_username(&username)?;
            if find_user_by_username(conn, &username)?.is_some() {
                bail!(StoreError::Conflict(format!("username '{username}' is taken")));
            }

            let now = Utc::now();
            let user = User {
                id: Uuid::new_v4().to_string(),
                username,
                display_name,
                is_public: false,
                created_at: now,
                updated_at: now,
            };

            conn.execute(
                "INSERT INTO users (id, username, display_name, is_public, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    user.username,
                    user.display_name,
                    user.is_public,
                    format_datetime(&user.created_at),
                    format_datetime(&user.updated_at),
                ],
            )?;
            Ok(user)
        })
        .await
    }

    pub async fn list_user_ids(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM users ORDER BY created_at ASC")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<User> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut user = find_user(conn, &user_id)?.ok_or(StoreError::NotFound("user"))?;

            if let Some(display_name) = update.display_name {
                let trimmed = display_name.trim();
                user.display_name = (!trimmed.is_empty()).then(|| trimmed.to_string());
            }
            if let Some(is_public) = update.is_public {
                user.is_public = is_public;
            }
            user.updated_at = Utc::now();

            conn.execute(
                "UPDATE users SET display_name = ?1, is_public = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    user.display_name,
                    user.is_public,
                    format_datetime(&user.updated_at),
                    user.id,
                ],
            )?;
            Ok(user)
        })
        .await
    }

    /// Profile of `username` as seen by `viewer_id`; hidden unless public, self or friend.
    pub async fn public_profile(
        &self,
        viewer_id: &str,
        username: &str,
    ) -> Result<Option<PublicProfile>> {
        let viewer_id = viewer_id.to_string();
        let username = username.to_string();
        self.execute(move |conn| {
            let Some(owner) = find_user_by_username(conn, &username)? else {
                return Ok(None);
            };

            let is_friend = are_friends(conn, &viewer_id, &owner.id)?;
            if !(owner.is_public || is_friend || owner.id == viewer_id) {
                return Ok(None);
            }

            let bottles = query_collection(conn, &owner.id)?;
            let pour_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pours WHERE user_id = ?1",
                params![owner.id],
                |row| row.get(0),
            )?;

            Ok(Some(PublicProfile {
                username: owner.username,
                display_name: owner.display_name,
                member_since: owner.created_at,
                is_friend,
                bottle_count: bottles.len() as u64,
                pour_count: to_u64(pour_count, "pour_count")?,
                bottles,
            }))
        })
        .await
    }

    /// Stores a bearer token for `user_id`. Called by the identity provider integration.
    pub async fn issue_auth_token(&self, user_id: &str, ttl: Duration) -> Result<String> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let now = Utc::now();
            let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
            conn.execute(
                "INSERT INTO auth_sessions (token, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    token,
                    user_id,
                    format_datetime(&now),
                    format_datetime(&(now + ttl)),
                ],
            )?;
            Ok(token)
        })
        .await
    }

    pub async fn user_for_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        let token = token.to_string();
        self.execute(move |conn| {
            let user_id: Option<String> = conn
                .query_row(
                    "SELECT user_id FROM auth_sessions WHERE token = ?1 AND expires_at > ?2",
                    params![token, format_datetime(&now)],
                    |row| row.get(0),
                )
                .optional()?;

            match user_id {
                Some(user_id) => find_user(conn, &user_id),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn revoke_auth_token(&self, token: &str) -> Result<bool> {
        let token = token.to_string();
        self.execute(move |conn| {
            let removed =
                conn.execute("DELETE FROM auth_sessions WHERE token = ?1", params![token])?;
            Ok(removed > 0)
        })
        .await
    }
}
