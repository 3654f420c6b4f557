//! Session windowing: decides which session a pour belongs to.

use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_GAP_MINUTES: i64 = 30;

/// Tunable inactivity gap between pours of the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindowConfig {
    pub gap: Duration,
}

impl Default for SessionWindowConfig {
    fn default() -> Self {
        Self::from_minutes(DEFAULT_GAP_MINUTES)
    }
}

impl SessionWindowConfig {
    pub fn from_minutes(minutes: i64) -> Self {
        Self {
            gap: Duration::minutes(minutes),
        }
    }
}

/// The user's currently open session as seen by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenWindow {
    pub session_id: String,
    pub last_pour_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Join { session_id: String },
    /// Start a new session, closing `close` first when present.
    Open { close: Option<String> },
}

/// True when `poured_at` lies within `gap` of `last_pour_at`, in either direction.
pub fn within_gap(last_pour_at: DateTime<Utc>, poured_at: DateTime<Utc>, gap: Duration) -> bool {
    let delta = poured_at - last_pour_at;
    delta <= gap && delta >= -gap
}

/// An open session goes stale once `now` is strictly beyond the gap from its last pour.
pub fn is_stale(last_pour_at: DateTime<Utc>, now: DateTime<Utc>, gap: Duration) -> bool {
    now - last_pour_at > gap
}

pub fn place_pour(open: Option<&OpenWindow>, poured_at: DateTime<Utc>, gap: Duration) -> Placement {
    match open {
        Some(window) if within_gap(window.last_pour_at, poured_at, gap) => Placement::Join {
            session_id: window.session_id.clone(),
        },
        Some(window) => Placement::Open {
            close: Some(window.session_id.clone()),
        },
        None => Placement::Open { close: None },
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, hour, minute, 0).unwrap()
    }

    fn window(last: DateTime<Utc>) -> OpenWindow {
        OpenWindow {
            session_id: "s1".into(),
            last_pour_at: last,
        }
    }

    #[test]
    fn first_pour_opens_session() {
        let gap = SessionWindowConfig::default().gap;
        assert_eq!(place_pour(None, at(20, 0), gap), Placement::Open { close: None });
    }

    #[test]
    fn pours_inside_gap_join_open_session() {
        let gap = SessionWindowConfig::default().gap;
        let open = window(at(20, 10));

        assert_eq!(
            place_pour(Some(&open), at(20, 39), gap),
            Placement::Join { session_id: "s1".into() }
        );
        // exactly on the boundary still joins
        assert_eq!(
            place_pour(Some(&open), at(20, 40), gap),
            Placement::Join { session_id: "s1".into() }
        );
    }

    #[test]
    fn pour_beyond_gap_rotates_session() {
        let gap = SessionWindowConfig::default().gap;
        let open = window(at(20, 10));

        assert_eq!(
            place_pour(Some(&open), at(20, 41), gap),
            Placement::Open { close: Some("s1".into()) }
        );
    }

    #[test]
    fn backdated_pour_within_gap_joins() {
        let gap = SessionWindowConfig::default().gap;
        let open = window(at(20, 10));

        assert!(matches!(
            place_pour(Some(&open), at(19, 45), gap),
            Placement::Join { .. }
        ));
        assert!(matches!(
            place_pour(Some(&open), at(19, 30), gap),
            Placement::Open { close: Some(_) }
        ));
    }

    #[test]
    fn staleness_is_strict() {
        let gap = SessionWindowConfig::from_minutes(15).gap;
        assert!(!is_stale(at(21, 0), at(21, 15), gap));
        assert!(is_stale(at(21, 0), at(21, 16), gap));
    }
}
