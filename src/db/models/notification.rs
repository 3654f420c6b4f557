//! Notification models and the draft type produced by generator rules.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    LowStock,
    InactivityReminder,
    WeeklyInsight,
    Achievement,
    FriendRequest,
    FriendAccepted,
    LabelReminder,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::LowStock => "low_stock",
            NotificationType::InactivityReminder => "inactivity_reminder",
            NotificationType::WeeklyInsight => "weekly_insight",
            NotificationType::Achievement => "achievement",
            NotificationType::FriendRequest => "friend_request",
            NotificationType::FriendAccepted => "friend_accepted",
            NotificationType::LabelReminder => "label_reminder",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "low_stock" => Ok(NotificationType::LowStock),
            "inactivity_reminder" => Ok(NotificationType::InactivityReminder),
            "weekly_insight" => Ok(NotificationType::WeeklyInsight),
            "achievement" => Ok(NotificationType::Achievement),
            "friend_request" => Ok(NotificationType::FriendRequest),
            "friend_accepted" => Ok(NotificationType::FriendAccepted),
            "label_reminder" => Ok(NotificationType::LabelReminder),
            other => Err(anyhow!("unknown notification type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Medium => "medium",
            NotificationPriority::High => "high",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "low" => Ok(NotificationPriority::Low),
            "medium" => Ok(NotificationPriority::Medium),
            "high" => Ok(NotificationPriority::High),
            other => Err(anyhow!("unknown notification priority '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    pub data: Option<Value>,
    pub entity_key: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub action_url: Option<String>,
}

/// Minimum spacing between two notifications for the same (user, type, entity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    /// Fires at most once per entity, ever.
    Once,
    Window(Duration),
}

impl Cooldown {
    pub fn allows(&self, last_fired_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Cooldown::Once => false,
            Cooldown::Window(window) => now - last_fired_at >= *window,
        }
    }
}

/// A notification a rule wants to emit; persisted only if not a duplicate.
#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub user_id: String,
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    pub data: Option<Value>,
    pub entity_key: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub action_url: Option<String>,
    pub cooldown: Cooldown,
}

#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(Notification),
    Duplicate,
}

impl InsertOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, InsertOutcome::Created(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_window_is_inclusive_at_boundary() {
        let fired = Utc::now();
        let cooldown = Cooldown::Window(Duration::days(7));

        assert!(!cooldown.allows(fired, fired + Duration::days(6)));
        assert!(cooldown.allows(fired, fired + Duration::days(7)));
        assert!(!Cooldown::Once.allows(fired, fired + Duration::days(3650)));
    }

    #[test]
    fn type_serializes_as_snake_case() {
        let json = serde_json::to_string(&NotificationType::InactivityReminder).unwrap();
        assert_eq!(json, "\"inactivity_reminder\"");
        assert_eq!(
            NotificationType::parse("inactivity_reminder").unwrap(),
            NotificationType::InactivityReminder
        );
    }
}
