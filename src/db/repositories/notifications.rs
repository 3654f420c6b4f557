use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{
        format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime,
        parse_optional_json, to_u64,
    },
    models::{
        InsertOutcome, Notification, NotificationDraft, NotificationPriority, NotificationType,
    },
};

const NOTIFICATION_COLUMNS: &str = "id, user_id, type, priority, title, message, data, \
                                    entity_key, read, created_at, expires_at, action_url";

fn row_to_notification(row: &Row) -> Result<Notification> {
    let notification_type: String = row.get("type")?;
    let priority: String = row.get("priority")?;
    let data: Option<String> = row.get("data")?;
    let created_at: String = row.get("created_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;

    Ok(Notification {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        notification_type: NotificationType::parse(&notification_type)?,
        priority: NotificationPriority::parse(&priority)?,
        title: row.get("title")?,
        message: row.get("message")?,
        data: parse_optional_json(data, "data")?,
        entity_key: row.get("entity_key")?,
        read: row.get("read")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        expires_at: parse_optional_datetime(expires_at, "expires_at")?,
        action_url: row.get("action_url")?,
    })
}

/// True when the draft must be dropped: still cooling down, or an unexpired copy exists.
fn is_duplicate(conn: &Connection, draft: &NotificationDraft, now: DateTime<Utc>) -> Result<bool> {
    let last_fired: Option<String> = conn
        .query_row(
            "SELECT last_fired_at FROM notification_ledger
             WHERE user_id = ?1 AND type = ?2 AND entity_key = ?3",
            params![
                draft.user_id,
                draft.notification_type.as_str(),
                draft.entity_key
            ],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(raw) = last_fired {
        let last_fired_at = parse_datetime(&raw, "last_fired_at")?;
        if !draft.cooldown.allows(last_fired_at, now) {
            return Ok(true);
        }
    }

    let live: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM notifications
             WHERE user_id = ?1 AND type = ?2 AND entity_key = ?3
               AND (expires_at IS NULL OR expires_at > ?4)
             LIMIT 1",
            params![
                draft.user_id,
                draft.notification_type.as_str(),
                draft.entity_key,
                format_datetime(&now),
            ],
            |row| row.get(0),
        )
        .optional()?;

    Ok(live.is_some())
}

impl Database {
    /// Persists `draft` unless it duplicates a notification inside its cooldown.
    /// The ledger outlives the notification row, so deleting one does not re-arm it.
    pub async fn insert_notification_if_new(
        &self,
        draft: NotificationDraft,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            if is_duplicate(&tx, &draft, now)? {
                return Ok(InsertOutcome::Duplicate);
            }

            let notification = Notification {
                id: Uuid::new_v4().to_string(),
                user_id: draft.user_id,
                notification_type: draft.notification_type,
                priority: draft.priority,
                title: draft.title,
                message: draft.message,
                data: draft.data,
                entity_key: draft.entity_key,
                read: false,
                created_at: now,
                expires_at: draft.expires_at,
                action_url: draft.action_url,
            };

            let data = notification
                .data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            tx.execute(
                "INSERT INTO notifications (id, user_id, type, priority, title, message, data,
                                            entity_key, read, created_at, expires_at, action_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11)",
                params![
                    notification.id,
                    notification.user_id,
                    notification.notification_type.as_str(),
                    notification.priority.as_str(),
                    notification.title,
                    notification.message,
                    data,
                    notification.entity_key,
                    format_datetime(&notification.created_at),
                    format_optional_datetime(notification.expires_at.as_ref()),
                    notification.action_url,
                ],
            )?;

            tx.execute(
                "INSERT INTO notification_ledger (user_id, type, entity_key, last_fired_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, type, entity_key)
                 DO UPDATE SET last_fired_at = excluded.last_fired_at",
                params![
                    notification.user_id,
                    notification.notification_type.as_str(),
                    notification.entity_key,
                    format_datetime(&now),
                ],
            )?;

            tx.commit()?;
            Ok(InsertOutcome::Created(notification))
        })
        .await
    }

    /// Unexpired notifications, newest first.
    pub async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1
                   AND (expires_at IS NULL OR expires_at > ?2)
                   AND (?3 = 0 OR read = 0)
                 ORDER BY created_at DESC
                 LIMIT ?4"
            ))?;
            let mut rows = stmt.query(params![user_id, format_datetime(&now), unread_only, limit])?;
            let mut notifications = Vec::new();
            while let Some(row) = rows.next()? {
                notifications.push(row_to_notification(row)?);
            }
            Ok(notifications)
        })
        .await
    }

    pub async fn unread_notification_count(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications
                 WHERE user_id = ?1 AND read = 0
                   AND (expires_at IS NULL OR expires_at > ?2)",
                params![user_id, format_datetime(&now)],
                |row| row.get(0),
            )?;
            to_u64(count, "unread count")
        })
        .await
    }

    pub async fn mark_notification_read(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> Result<bool> {
        let user_id = user_id.to_string();
        let notification_id = notification_id.to_string();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                params![notification_id, user_id],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                params![user_id],
            )?;
            Ok(updated)
        })
        .await
    }

    /// Deletes the notification only when `user_id` owns it.
    pub async fn delete_notification(&self, user_id: &str, notification_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        let notification_id = notification_id.to_string();
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                params![notification_id, user_id],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    pub async fn purge_expired_notifications(&self, now: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![format_datetime(&now)],
            )?;
            Ok(removed)
        })
        .await
    }
}
