//! User and profile models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CollectionItem;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub is_public: Option<bool>,
}

/// What another user sees at `/api/users/{username}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub username: String,
    pub display_name: Option<String>,
    pub member_since: DateTime<Utc>,
    pub is_friend: bool,
    pub bottle_count: u64,
    pub pour_count: u64,
    pub bottles: Vec<CollectionItem>,
}
