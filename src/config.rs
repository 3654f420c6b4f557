use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr};

use anyhow::{bail, Context, Result};
use axum::http::HeaderValue;
use log::{info, warn};

use crate::{notifications::rules::RuleSettings, pours::window::SessionWindowConfig};

const MAX_SESSION_GAP_MINUTES: i64 = 24 * 60;
const MAX_INACTIVITY_DAYS: i64 = 365;

/// Runtime settings, read from `DRAMLOG_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    /// Shared secret for the cron endpoint; `None` disables the endpoint.
    pub cron_secret: Option<String>,
    /// Allowed browser origin; any origin when unset.
    pub cors_origin: Option<HeaderValue>,
    pub session_gap_minutes: i64,
    /// Seconds between scheduled notification runs; 0 turns the scheduler off.
    pub scheduler_interval_secs: u64,
    pub low_stock_ratio: f64,
    pub inactivity_days: i64,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            host: try_load(&lookup, "DRAMLOG_HOST", "0.0.0.0")?,
            port: try_load(&lookup, "DRAMLOG_PORT", "8080")?,
            database_path: try_load(&lookup, "DRAMLOG_DATABASE_PATH", "dramlog.sqlite3")?,
            cron_secret: read_secret(&lookup, "DRAMLOG_CRON_SECRET")?,
            cors_origin: lookup("DRAMLOG_CORS_ORIGIN")
                .filter(|origin| !origin.trim().is_empty())
                .map(|origin| HeaderValue::from_str(origin.trim()))
                .transpose()
                .context("invalid DRAMLOG_CORS_ORIGIN")?,
            session_gap_minutes: try_load(&lookup, "DRAMLOG_SESSION_GAP_MINUTES", "30")?,
            scheduler_interval_secs: try_load(&lookup, "DRAMLOG_SCHEDULER_INTERVAL_SECS", "3600")?,
            low_stock_ratio: try_load(&lookup, "DRAMLOG_LOW_STOCK_RATIO", "0.2")?,
            inactivity_days: try_load(&lookup, "DRAMLOG_INACTIVITY_DAYS", "14")?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_SESSION_GAP_MINUTES).contains(&self.session_gap_minutes) {
            bail!("DRAMLOG_SESSION_GAP_MINUTES must be between 1 and {MAX_SESSION_GAP_MINUTES}");
        }
        if !(self.low_stock_ratio > 0.0 && self.low_stock_ratio < 1.0) {
            bail!("DRAMLOG_LOW_STOCK_RATIO must be between 0 and 1");
        }
        if !(1..=MAX_INACTIVITY_DAYS).contains(&self.inactivity_days) {
            bail!("DRAMLOG_INACTIVITY_DAYS must be between 1 and {MAX_INACTIVITY_DAYS}");
        }
        if matches!(&self.cron_secret, Some(secret) if secret.is_empty()) {
            bail!("DRAMLOG_CRON_SECRET must not be empty");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_window(&self) -> SessionWindowConfig {
        SessionWindowConfig::from_minutes(self.session_gap_minutes)
    }

    pub fn rule_settings(&self) -> RuleSettings {
        RuleSettings {
            low_stock_ratio: self.low_stock_ratio,
            inactivity_days: self.inactivity_days,
        }
    }
}

fn try_load<F, T>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.trim().parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow::anyhow!("invalid {key} value '{raw}': {e}")
    })
}

/// Reads `KEY` directly, or the file named by `KEY_FILE` (docker secrets).
fn read_secret<F>(lookup: &F, key: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        return Ok(Some(value.trim().to_string()));
    }

    let file_key = format!("{key}_FILE");
    match lookup(&file_key) {
        Some(path) => read_to_string(&path)
            .map(|s| Some(s.trim().to_string()))
            .with_context(|| format!("failed to read {key} from {path}")),
        None => {
            warn!("{key} not set; the cron endpoint is disabled");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.database_path, PathBuf::from("dramlog.sqlite3"));
        assert_eq!(config.cron_secret, None);
        assert_eq!(config.session_gap_minutes, 30);
        assert_eq!(config.rule_settings(), RuleSettings::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("DRAMLOG_PORT", "9000"),
            ("DRAMLOG_CRON_SECRET", " s3cret \n"),
            ("DRAMLOG_SESSION_GAP_MINUTES", "45"),
            ("DRAMLOG_SCHEDULER_INTERVAL_SECS", "0"),
            ("DRAMLOG_CORS_ORIGIN", " "),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.cors_origin, None);
        assert_eq!(config.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.session_window().gap, chrono::Duration::minutes(45));
        assert_eq!(config.scheduler_interval_secs, 0);
    }

    #[test]
    fn secret_can_come_from_a_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cron_secret");
        std::fs::write(&path, "from-file\n").unwrap();

        let path = path.to_string_lossy().to_string();
        let lookup = lookup_from(&[("DRAMLOG_CRON_SECRET_FILE", path.as_str())]);
        let config = Config::from_lookup(lookup).unwrap();
        assert_eq!(config.cron_secret.as_deref(), Some("from-file"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_lookup(lookup_from(&[("DRAMLOG_PORT", "eighty")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DRAMLOG_LOW_STOCK_RATIO", "1.5")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DRAMLOG_SESSION_GAP_MINUTES", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DRAMLOG_INACTIVITY_DAYS", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DRAMLOG_CRON_SECRET", "  ")])).is_err());
        let origin = lookup_from(&[("DRAMLOG_CORS_ORIGIN", "bad\norigin")]);
        assert!(Config::from_lookup(origin).is_err());
    }

    #[test]
    fn windows_are_capped() {
        let longest = Config::from_lookup(lookup_from(&[
            ("DRAMLOG_SESSION_GAP_MINUTES", "1440"),
            ("DRAMLOG_INACTIVITY_DAYS", "365"),
        ]))
        .unwrap();
        assert_eq!(longest.session_window().gap, chrono::Duration::hours(24));
        assert_eq!(longest.rule_settings().inactivity_days, 365);

        let huge = i64::MAX.to_string();
        let gap = lookup_from(&[("DRAMLOG_SESSION_GAP_MINUTES", huge.as_str())]);
        assert!(Config::from_lookup(gap).is_err());
        let inactivity = Config::from_lookup(lookup_from(&[("DRAMLOG_INACTIVITY_DAYS", "366")]));
        assert!(inactivity.is_err());
    }
}
