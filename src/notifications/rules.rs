//! Notification rules. Each rule inspects one user's snapshot and proposes drafts;
//! the store decides whether a draft is a duplicate.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde_json::json;

use crate::db::{
    BottleStatus, Cooldown, NotificationDraft, NotificationPriority, NotificationType, User,
    UserSnapshot,
};

pub const MILESTONES: [u64; 5] = [1, 10, 25, 50, 100];

/// Thresholds shared by the built-in rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleSettings {
    /// An open bottle at or below this share of its volume counts as low.
    pub low_stock_ratio: f64,
    pub inactivity_days: i64,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            low_stock_ratio: 0.2,
            inactivity_days: 14,
        }
    }
}

pub trait NotificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, snapshot: &UserSnapshot, now: DateTime<Utc>)
        -> Result<Vec<NotificationDraft>>;
}

struct DraftKind {
    notification_type: NotificationType,
    priority: NotificationPriority,
    entity_key: String,
    cooldown: Cooldown,
    expires_in: Option<Duration>,
}

fn draft(
    user_id: &str,
    kind: DraftKind,
    title: String,
    message: String,
    data: Option<serde_json::Value>,
    action_url: Option<&str>,
    now: DateTime<Utc>,
) -> NotificationDraft {
    NotificationDraft {
        user_id: user_id.to_string(),
        notification_type: kind.notification_type,
        priority: kind.priority,
        title,
        message,
        data,
        entity_key: kind.entity_key,
        expires_at: kind.expires_in.map(|ttl| now + ttl),
        action_url: action_url.map(str::to_string),
        cooldown: kind.cooldown,
    }
}

pub struct LowStockRule {
    pub threshold_ratio: f64,
}

impl NotificationRule for LowStockRule {
    fn name(&self) -> &'static str {
        "low_stock"
    }

    fn evaluate(
        &self,
        snapshot: &UserSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDraft>> {
        let drafts = snapshot
            .collection
            .iter()
            .filter(|item| item.bottle.status == BottleStatus::Open && item.bottle.remaining_ml > 0)
            .filter(|item| item.fill_ratio() <= self.threshold_ratio)
            .map(|item| {
                draft(
                    &snapshot.user.id,
                    DraftKind {
                        notification_type: NotificationType::LowStock,
                        priority: NotificationPriority::Medium,
                        entity_key: item.bottle.id.clone(),
                        cooldown: Cooldown::Window(Duration::days(7)),
                        expires_in: Some(Duration::days(7)),
                    },
                    format!("{} is running low", item.master.name),
                    format!(
                        "Only {}ml left of {}ml. Time to restock or savour the last drams.",
                        item.bottle.remaining_ml, item.master.volume_ml
                    ),
                    Some(json!({
                        "userBottleId": item.bottle.id,
                        "remainingMl": item.bottle.remaining_ml,
                        "volumeMl": item.master.volume_ml,
                    })),
                    Some("/collection"),
                    now,
                )
            })
            .collect();
        Ok(drafts)
    }
}

pub struct InactivityRule {
    pub after: Duration,
}

impl NotificationRule for InactivityRule {
    fn name(&self) -> &'static str {
        "inactivity_reminder"
    }

    fn evaluate(
        &self,
        snapshot: &UserSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDraft>> {
        let Some(last_pour_at) = snapshot.last_pour_at else {
            return Ok(Vec::new());
        };
        if now - last_pour_at <= self.after {
            return Ok(Vec::new());
        }

        let days = (now - last_pour_at).num_days();
        Ok(vec![draft(
            &snapshot.user.id,
            DraftKind {
                notification_type: NotificationType::InactivityReminder,
                priority: NotificationPriority::Low,
                entity_key: "inactive".into(),
                cooldown: Cooldown::Window(self.after),
                expires_in: Some(Duration::days(3)),
            },
            "Your shelf misses you".into(),
            format!("It has been {days} days since your last pour."),
            Some(json!({ "daysSinceLastPour": days })),
            Some("/pours"),
            now,
        )])
    }
}

pub struct WeeklyInsightRule;

impl NotificationRule for WeeklyInsightRule {
    fn name(&self) -> &'static str {
        "weekly_insight"
    }

    fn evaluate(
        &self,
        snapshot: &UserSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDraft>> {
        let weekly = &snapshot.weekly;
        if weekly.pour_count == 0 {
            return Ok(Vec::new());
        }

        let week = now.iso_week();
        let mut message = format!(
            "{} pours ({}ml) across {} sessions this week.",
            weekly.pour_count, weekly.total_ml, weekly.session_count
        );
        if let Some(favourite) = &weekly.favourite {
            message.push_str(&format!(" Most poured: {favourite}."));
        }

        Ok(vec![draft(
            &snapshot.user.id,
            DraftKind {
                notification_type: NotificationType::WeeklyInsight,
                priority: NotificationPriority::Low,
                entity_key: format!("{}-W{:02}", week.year(), week.week()),
                cooldown: Cooldown::Window(Duration::days(6)),
                expires_in: Some(Duration::days(7)),
            },
            "Your week in drams".into(),
            message,
            Some(json!({
                "pourCount": weekly.pour_count,
                "totalMl": weekly.total_ml,
                "sessionCount": weekly.session_count,
                "distinctBottles": weekly.distinct_bottles,
                "favourite": weekly.favourite,
            })),
            Some("/pours/sessions"),
            now,
        )])
    }
}

pub struct AchievementRule;

fn highest_milestone(count: u64) -> Option<u64> {
    MILESTONES.iter().copied().filter(|m| *m <= count).max()
}

impl NotificationRule for AchievementRule {
    fn name(&self) -> &'static str {
        "achievement"
    }

    fn evaluate(
        &self,
        snapshot: &UserSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDraft>> {
        let mut drafts = Vec::new();
        let kind = |key: String| DraftKind {
            notification_type: NotificationType::Achievement,
            priority: NotificationPriority::High,
            entity_key: key,
            cooldown: Cooldown::Once,
            expires_in: None,
        };

        if let Some(milestone) = highest_milestone(snapshot.collection.len() as u64) {
            let title = if milestone == 1 {
                "First bottle catalogued".to_string()
            } else {
                format!("{milestone} bottles in the collection")
            };
            drafts.push(draft(
                &snapshot.user.id,
                kind(format!("collection:{milestone}")),
                title,
                format!("Your collection reached {milestone} bottles."),
                Some(json!({ "kind": "collection", "milestone": milestone })),
                Some("/collection"),
                now,
            ));
        }

        if let Some(milestone) = highest_milestone(snapshot.total_pours) {
            let title = if milestone == 1 {
                "First pour logged".to_string()
            } else {
                format!("{milestone} pours logged")
            };
            drafts.push(draft(
                &snapshot.user.id,
                kind(format!("pours:{milestone}")),
                title,
                format!("You have logged {milestone} pours. Sláinte!"),
                Some(json!({ "kind": "pours", "milestone": milestone })),
                Some("/pours"),
                now,
            ));
        }

        Ok(drafts)
    }
}

pub struct FriendRequestRule;

impl NotificationRule for FriendRequestRule {
    fn name(&self) -> &'static str {
        "friend_request"
    }

    fn evaluate(
        &self,
        snapshot: &UserSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDraft>> {
        let drafts = snapshot
            .pending_requests
            .iter()
            .map(|request| {
                let who = request
                    .requester_display_name
                    .clone()
                    .unwrap_or_else(|| request.requester_username.clone());
                draft(
                    &snapshot.user.id,
                    DraftKind {
                        notification_type: NotificationType::FriendRequest,
                        priority: NotificationPriority::High,
                        entity_key: request.id.clone(),
                        cooldown: Cooldown::Once,
                        expires_in: Some(Duration::days(30)),
                    },
                    "New friend request".into(),
                    format!("{who} wants to share drams with you."),
                    Some(json!({
                        "requestId": request.id,
                        "requesterUsername": request.requester_username,
                    })),
                    Some("/friends/requests"),
                    now,
                )
            })
            .collect();
        Ok(drafts)
    }
}

pub struct LabelReminderRule;

impl NotificationRule for LabelReminderRule {
    fn name(&self) -> &'static str {
        "label_reminder"
    }

    fn evaluate(
        &self,
        snapshot: &UserSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDraft>> {
        let pending: Vec<&str> = snapshot
            .collection
            .iter()
            .filter(|item| item.bottle.needs_label())
            .map(|item| item.bottle.id.as_str())
            .collect();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let count = pending.len();
        let noun = if count == 1 { "bottle needs" } else { "bottles need" };
        Ok(vec![draft(
            &snapshot.user.id,
            DraftKind {
                notification_type: NotificationType::LabelReminder,
                priority: NotificationPriority::Low,
                entity_key: "labels".into(),
                cooldown: Cooldown::Window(Duration::days(7)),
                expires_in: Some(Duration::days(7)),
            },
            "Labels to print".into(),
            format!("{count} {noun} a label."),
            Some(json!({ "count": count, "userBottleIds": pending })),
            Some("/collection/labels"),
            now,
        )])
    }
}

/// Sent to the requester when their friend request is accepted.
pub fn friend_accepted_draft(
    requester_id: &str,
    accepter: &User,
    friendship_id: &str,
    now: DateTime<Utc>,
) -> NotificationDraft {
    let who = accepter
        .display_name
        .clone()
        .unwrap_or_else(|| accepter.username.clone());
    draft(
        requester_id,
        DraftKind {
            notification_type: NotificationType::FriendAccepted,
            priority: NotificationPriority::Medium,
            entity_key: friendship_id.to_string(),
            cooldown: Cooldown::Once,
            expires_in: Some(Duration::days(30)),
        },
        "Friend request accepted".into(),
        format!("{who} accepted your friend request."),
        Some(json!({ "friendId": accepter.id, "username": accepter.username })),
        Some(&format!("/users/{}", accepter.username)),
        now,
    )
}

pub fn default_rules(settings: RuleSettings) -> Vec<Box<dyn NotificationRule>> {
    vec![
        Box::new(LowStockRule {
            threshold_ratio: settings.low_stock_ratio,
        }),
        Box::new(InactivityRule {
            after: Duration::days(settings.inactivity_days),
        }),
        Box::new(WeeklyInsightRule),
        Box::new(AchievementRule),
        Box::new(FriendRequestRule),
        Box::new(LabelReminderRule),
    ]
}
