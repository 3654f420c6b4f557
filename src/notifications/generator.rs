use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{Database, InsertOutcome, UserSnapshot};

use super::rules::NotificationRule;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationFailure {
    pub user_id: Option<String>,
    pub rule: Option<&'static str>,
    pub error: String,
}

/// Outcome of one pass over every user and rule.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub users_processed: usize,
    pub created: usize,
    pub duplicates: usize,
    pub expired_purged: usize,
    pub sessions_closed: usize,
    pub failures: Vec<GenerationFailure>,
}

impl GenerationReport {
    fn record_failure(
        &mut self,
        user_id: Option<&str>,
        rule: Option<&'static str>,
        err: &anyhow::Error,
    ) {
        self.failures.push(GenerationFailure {
            user_id: user_id.map(str::to_string),
            rule,
            error: format!("{err:#}"),
        });
    }
}

#[derive(Clone)]
pub struct NotificationGenerator {
    db: Database,
    rules: Arc<Vec<Box<dyn NotificationRule>>>,
    session_gap: Duration,
}

impl NotificationGenerator {
    pub fn new(db: Database, rules: Vec<Box<dyn NotificationRule>>, session_gap: Duration) -> Self {
        Self {
            db,
            rules: Arc::new(rules),
            session_gap,
        }
    }

    pub async fn generate_all(&self, now: DateTime<Utc>) -> GenerationReport {
        let mut report = GenerationReport::default();

        match self.db.list_user_ids().await {
            Ok(user_ids) => {
                for user_id in user_ids {
                    self.generate_for_user(&user_id, now, &mut report).await;
                    report.users_processed += 1;
                }
            }
            Err(err) => {
                log_error!("notification run could not list users: {err:?}");
                report.record_failure(None, None, &err);
            }
        }

        match self.db.purge_expired_notifications(now).await {
            Ok(purged) => report.expired_purged = purged,
            Err(err) => {
                log_error!("failed to purge expired notifications: {err:?}");
                report.record_failure(None, None, &err);
            }
        }

        match self.db.close_stale_sessions(now, self.session_gap).await {
            Ok(closed) => report.sessions_closed = closed,
            Err(err) => {
                log_error!("failed to close stale pour sessions: {err:?}");
                report.record_failure(None, None, &err);
            }
        }

        log_info!(
            "notification run: {} users, {} created, {} duplicates, {} failures",
            report.users_processed,
            report.created,
            report.duplicates,
            report.failures.len()
        );
        report
    }

    async fn generate_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        report: &mut GenerationReport,
    ) {
        let snapshot = match self
            .db
            .load_user_snapshot(user_id, now)
            .await
            .with_context(|| format!("failed to load snapshot for user {user_id}"))
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log_error!("{err:?}");
                report.record_failure(Some(user_id), None, &err);
                return;
            }
        };

        for rule in self.rules.iter() {
            if let Err(err) = self.apply_rule(rule.as_ref(), &snapshot, now, report).await {
                log_warn!("rule {} failed for user {user_id}: {err:?}", rule.name());
                report.record_failure(Some(user_id), Some(rule.name()), &err);
            }
        }
    }

    async fn apply_rule(
        &self,
        rule: &dyn NotificationRule,
        snapshot: &UserSnapshot,
        now: DateTime<Utc>,
        report: &mut GenerationReport,
    ) -> Result<()> {
        let drafts = rule.evaluate(snapshot, now)?;
        for draft in drafts {
            match self.db.insert_notification_if_new(draft, now).await? {
                InsertOutcome::Created(_) => report.created += 1,
                InsertOutcome::Duplicate => report.duplicates += 1,
            }
        }
        Ok(())
    }
}
