//! Read-only per-user aggregates consumed by the notification rules.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    connection::Database,
    error::StoreError,
    helpers::{format_datetime, parse_optional_datetime, to_u64},
    models::{CollectionItem, IncomingRequest, User},
};

use super::{collection::query_collection, friends::query_incoming, users::find_user};

/// Pour activity over the trailing seven days.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklyStats {
    pub pour_count: u32,
    pub total_ml: u32,
    pub session_count: u32,
    pub distinct_bottles: u32,
    /// Most poured bottle by volume.
    pub favourite: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserSnapshot {
    pub user: User,
    pub collection: Vec<CollectionItem>,
    pub total_pours: u64,
    pub last_pour_at: Option<DateTime<Utc>>,
    pub weekly: WeeklyStats,
    pub pending_requests: Vec<IncomingRequest>,
}

impl Database {
    pub async fn load_user_snapshot(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UserSnapshot> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let user = find_user(conn, &user_id)?.ok_or(StoreError::NotFound("user"))?;
            let collection = query_collection(conn, &user_id)?;
            let pending_requests = query_incoming(conn, &user_id)?;

            let (total_pours, last_pour_at): (i64, Option<String>) = conn.query_row(
                "SELECT COUNT(*), MAX(poured_at) FROM pours WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let week_start = format_datetime(&(now - Duration::days(7)));
            let (pour_count, total_ml, session_count, distinct_bottles): (u32, u32, u32, u32) = conn
                .query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(amount_ml), 0),
                            COUNT(DISTINCT session_id),
                            COUNT(DISTINCT bottle_name)
                     FROM pours
                     WHERE user_id = ?1 AND poured_at > ?2",
                    params![user_id, week_start],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;

            let favourite: Option<String> = conn
                .query_row(
                    "SELECT bottle_name FROM pours
                     WHERE user_id = ?1 AND poured_at > ?2
                     GROUP BY bottle_name
                     ORDER BY SUM(amount_ml) DESC, bottle_name ASC
                     LIMIT 1",
                    params![user_id, week_start],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(UserSnapshot {
                user,
                collection,
                total_pours: to_u64(total_pours, "total_pours")?,
                last_pour_at: parse_optional_datetime(last_pour_at, "last_pour_at")?,
                weekly: WeeklyStats {
                    pour_count,
                    total_ml,
                    session_count,
                    distinct_bottles,
                    favourite,
                },
                pending_requests,
            })
        })
        .await
    }
}
