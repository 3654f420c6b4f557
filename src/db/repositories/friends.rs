use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    error::StoreError,
    helpers::{format_datetime, parse_datetime, parse_optional_datetime},
    models::{Friend, Friendship, FriendshipStatus, IncomingRequest},
};

fn row_to_friendship(row: &Row) -> Result<Friendship> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let responded_at: Option<String> = row.get("responded_at")?;

    Ok(Friendship {
        id: row.get("id")?,
        requester_id: row.get("requester_id")?,
        addressee_id: row.get("addressee_id")?,
        status: FriendshipStatus::parse(&status)?,
        created_at: parse_datetime(&created_at, "created_at")?,
        responded_at: parse_optional_datetime(responded_at, "responded_at")?,
    })
}

fn find_friendship(conn: &Connection, id: &str) -> Result<Option<Friendship>> {
    let mut stmt = conn.prepare(
        "SELECT id, requester_id, addressee_id, status, created_at, responded_at
         FROM friendships WHERE id = ?1",
    )?;
    let mut rows = stmt.query(params![id])?;
    let found = match rows.next()? {
        Some(row) => Some(row_to_friendship(row)?),
        None => None,
    };
    Ok(found)
}

/// Any friendship row between the two users, in either direction.
fn find_between(conn: &Connection, a: &str, b: &str) -> Result<Option<Friendship>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM friendships
             WHERE (requester_id = ?1 AND addressee_id = ?2)
                OR (requester_id = ?2 AND addressee_id = ?1)
             ORDER BY created_at DESC
             LIMIT 1",
            params![a, b],
            |row| row.get(0),
        )
        .optional()?;

    match id {
        Some(id) => find_friendship(conn, &id),
        None => Ok(None),
    }
}

pub(super) fn query_incoming(conn: &Connection, user_id: &str) -> Result<Vec<IncomingRequest>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.requester_id, f.created_at, u.username, u.display_name
         FROM friendships f
         JOIN users u ON u.id = f.requester_id
         WHERE f.addressee_id = ?1 AND f.status = 'pending'
         ORDER BY f.created_at ASC",
    )?;
    let mut rows = stmt.query(params![user_id])?;
    let mut requests = Vec::new();
    while let Some(row) = rows.next()? {
        let created_at: String = row.get("created_at")?;
        requests.push(IncomingRequest {
            id: row.get("id")?,
            requester_id: row.get("requester_id")?,
            requester_username: row.get("username")?,
            requester_display_name: row.get("display_name")?,
            created_at: parse_datetime(&created_at, "created_at")?,
        });
    }
    Ok(requests)
}

impl Database {
    /// Sends a friend request to `username`. A declined request may be re-sent.
    pub async fn send_friend_request(
        &self,
        requester_id: &str,
        username: &str,
    ) -> Result<Friendship> {
        let requester_id = requester_id.to_string();
        let username = username.trim().to_string();
        self.execute(move |conn| {
            let addressee_id: String = conn
                .query_row(
                    "SELECT id FROM users WHERE username = ?1 COLLATE NOCASE",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotFound("user"))?;

            if addressee_id == requester_id {
                bail!(StoreError::Invalid("cannot befriend yourself".into()));
            }

            let tx = conn.transaction()?;
            if let Some(existing) = find_between(&tx, &requester_id, &addressee_id)? {
                match existing.status {
                    FriendshipStatus::Accepted => {
                        bail!(StoreError::Conflict("already friends".into()))
                    }
                    FriendshipStatus::Pending => {
                        bail!(StoreError::Conflict("a friend request is already pending".into()))
                    }
                    FriendshipStatus::Declined => {
                        tx.execute("DELETE FROM friendships WHERE id = ?1", params![existing.id])?;
                    }
                }
            }

            let friendship = Friendship {
                id: Uuid::new_v4().to_string(),
                requester_id,
                addressee_id,
                status: FriendshipStatus::Pending,
                created_at: Utc::now(),
                responded_at: None,
            };
            tx.execute(
                "INSERT INTO friendships
                     (id, requester_id, addressee_id, status, created_at, responded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                params![
                    friendship.id,
                    friendship.requester_id,
                    friendship.addressee_id,
                    friendship.status.as_str(),
                    format_datetime(&friendship.created_at),
                ],
            )?;
            tx.commit()?;
            Ok(friendship)
        })
        .await
    }

    pub async fn incoming_friend_requests(&self, user_id: &str) -> Result<Vec<IncomingRequest>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| query_incoming(conn, &user_id)).await
    }

    /// Accepts or declines a pending request addressed to `user_id`.
    pub async fn respond_to_friend_request(
        &self,
        user_id: &str,
        request_id: &str,
        accept: bool,
    ) -> Result<Friendship> {
        let user_id = user_id.to_string();
        let request_id = request_id.to_string();
        self.execute(move |conn| {
            let mut friendship = find_friendship(conn, &request_id)?
                .filter(|f| f.addressee_id == user_id)
                .ok_or(StoreError::NotFound("friend request"))?;

            if friendship.status != FriendshipStatus::Pending {
                bail!(StoreError::Conflict("friend request was already answered".into()));
            }

            friendship.status = if accept {
                FriendshipStatus::Accepted
            } else {
                FriendshipStatus::Declined
            };
            let responded_at = Utc::now();
            friendship.responded_at = Some(responded_at);

            conn.execute(
                "UPDATE friendships SET status = ?1, responded_at = ?2 WHERE id = ?3",
                params![
                    friendship.status.as_str(),
                    format_datetime(&responded_at),
                    friendship.id,
                ],
            )?;
            Ok(friendship)
        })
        .await
    }

    pub async fn list_friends(&self, user_id: &str) -> Result<Vec<Friend>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.display_name, f.responded_at, f.created_at
                 FROM friendships f
                 JOIN users u ON u.id = CASE
                     WHEN f.requester_id = ?1 THEN f.addressee_id
                     ELSE f.requester_id
                 END
                 WHERE f.status = 'accepted' AND (f.requester_id = ?1 OR f.addressee_id = ?1)
                 ORDER BY u.username COLLATE NOCASE ASC",
            )?;
            let mut rows = stmt.query(params![user_id])?;
            let mut friends = Vec::new();
            while let Some(row) = rows.next()? {
                let responded_at: Option<String> = row.get("responded_at")?;
                let created_at: String = row.get("created_at")?;
                let since = match responded_at {
                    Some(raw) => parse_datetime(&raw, "responded_at")?,
                    None => parse_datetime(&created_at, "created_at")?,
                };
                friends.push(Friend {
                    user_id: row.get("id")?,
                    username: row.get("username")?,
                    display_name: row.get("display_name")?,
                    since,
                });
            }
            Ok(friends)
        })
        .await
    }

    /// Ends an accepted friendship from either side. Returns false if none existed.
    pub async fn remove_friend(&self, user_id: &str, friend_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        let friend_id = friend_id.to_string();
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM friendships
                 WHERE status = 'accepted'
                   AND ((requester_id = ?1 AND addressee_id = ?2)
                     OR (requester_id = ?2 AND addressee_id = ?1))",
                params![user_id, friend_id],
            )?;
            Ok(removed > 0)
        })
        .await
    }
}
