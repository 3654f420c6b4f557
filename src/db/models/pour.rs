//! Pour and pour session models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserBottle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pour {
    pub id: String,
    pub user_id: String,
    /// Cleared when the bottle leaves the collection; `bottle_name` keeps the history readable.
    pub user_bottle_id: Option<String>,
    pub bottle_name: String,
    pub session_id: String,
    pub amount_ml: u32,
    pub poured_at: DateTime<Utc>,
    pub rating: Option<u8>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPour {
    pub user_bottle_id: String,
    pub amount_ml: u32,
    pub poured_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub notes: Option<String>,
}

/// Pours clustered in time. `ended_at == None` means the session is open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PourSession {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_pour_at: DateTime<Utc>,
    pub pour_count: u32,
    pub total_ml: u32,
    /// Pour ids ordered by `poured_at`.
    pub pours: Vec<String>,
}

impl PourSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PourSessionDetail {
    #[serde(flatten)]
    pub session: PourSession,
    pub entries: Vec<Pour>,
}

/// Result of `POST /api/pours`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedPour {
    pub pour: Pour,
    pub session: PourSession,
    pub bottle: UserBottle,
}
