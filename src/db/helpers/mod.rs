use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_optional_datetime(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(format_datetime)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_optional_json(
    value: Option<String>,
    field: &str,
) -> Result<Option<serde_json::Value>> {
    value
        .map(|raw| {
            serde_json::from_str(&raw).with_context(|| format!("failed to parse {field} as JSON"))
        })
        .transpose()
}

/// Escapes `%`, `_` and `\` so user input can sit inside a `LIKE ... ESCAPE '\'` pattern.
pub fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("lagavulin"), "%lagavulin%");
        assert_eq!(like_pattern("100%_proof"), "%100\\%\\_proof%");
    }

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let earlier = DateTime::parse_from_rfc3339("2024-05-01T20:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = earlier + chrono::Duration::milliseconds(1500);

        let a = format_datetime(&earlier);
        let b = format_datetime(&later);
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_datetime(&b, "later").unwrap(), later);
    }

    #[test]
    fn parse_datetime_reports_field() {
        let err = parse_datetime("yesterday", "poured_at").unwrap_err();
        assert!(err.to_string().contains("poured_at"));
    }
}
