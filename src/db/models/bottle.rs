//! Catalogue (`MasterBottle`) and collection (`UserBottle`) models.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VOLUME_ML: u32 = 700;

/// Shared catalogue entry. Collection operations never delete these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MasterBottle {
    pub id: String,
    pub name: String,
    pub distillery: Option<String>,
    pub category: Option<String>,
    pub region: Option<String>,
    pub age_years: Option<u32>,
    pub abv: Option<f64>,
    pub volume_ml: u32,
    pub barcode: Option<String>,
    pub image_url: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMasterBottle {
    pub name: String,
    pub distillery: Option<String>,
    pub category: Option<String>,
    pub region: Option<String>,
    pub age_years: Option<u32>,
    pub abv: Option<f64>,
    pub volume_ml: Option<u32>,
    pub barcode: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BottleStatus {
    Sealed,
    Open,
    Finished,
}

impl BottleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BottleStatus::Sealed => "sealed",
            BottleStatus::Open => "open",
            BottleStatus::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "sealed" => Ok(BottleStatus::Sealed),
            "open" => Ok(BottleStatus::Open),
            "finished" => Ok(BottleStatus::Finished),
            other => Err(anyhow!("unknown bottle status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserBottle {
    pub id: String,
    pub user_id: String,
    pub master_bottle_id: String,
    pub status: BottleStatus,
    pub remaining_ml: u32,
    pub purchase_price: Option<f64>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub notes: Option<String>,
    pub last_label_printed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserBottle {
    /// A label is due when none was printed since the bottle entered the collection.
    pub fn needs_label(&self) -> bool {
        match self.last_label_printed_at {
            Some(printed_at) => printed_at < self.created_at,
            None => true,
        }
    }

    /// Apply a pour of `amount_ml`, returning the new remaining volume.
    pub fn apply_pour(&mut self, amount_ml: u32, now: DateTime<Utc>) -> u32 {
        self.remaining_ml = self.remaining_ml.saturating_sub(amount_ml);
        self.status = if self.remaining_ml == 0 {
            BottleStatus::Finished
        } else {
            BottleStatus::Open
        };
        self.updated_at = now;
        self.remaining_ml
    }
}

/// A collection bottle joined with its catalogue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionItem {
    #[serde(flatten)]
    pub bottle: UserBottle,
    pub master: MasterBottle,
}

impl CollectionItem {
    pub fn fill_ratio(&self) -> f64 {
        if self.master.volume_ml == 0 {
            return 0.0;
        }
        f64::from(self.bottle.remaining_ml) / f64::from(self.master.volume_ml)
    }
}

/// Body of `POST /api/collection`: either an existing catalogue id or a new catalogue entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCollection {
    pub master_bottle_id: Option<String>,
    pub bottle: Option<NewMasterBottle>,
    pub status: Option<BottleStatus>,
    pub remaining_ml: Option<u32>,
    pub purchase_price: Option<f64>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBottleUpdate {
    pub status: Option<BottleStatus>,
    pub remaining_ml: Option<u32>,
    pub purchase_price: Option<f64>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn bottle(remaining_ml: u32) -> UserBottle {
        let now = Utc::now();
        UserBottle {
            id: "b1".into(),
            user_id: "u1".into(),
            master_bottle_id: "m1".into(),
            status: BottleStatus::Sealed,
            remaining_ml,
            purchase_price: None,
            purchased_at: None,
            rating: None,
            notes: None,
            last_label_printed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn needs_label_until_printed_after_creation() {
        let mut b = bottle(700);
        assert!(b.needs_label());

        b.last_label_printed_at = Some(b.created_at - Duration::days(1));
        assert!(b.needs_label());

        b.last_label_printed_at = Some(b.created_at + Duration::minutes(5));
        assert!(!b.needs_label());
    }

    #[test]
    fn pour_opens_then_finishes_bottle() {
        let mut b = bottle(50);
        let now = Utc::now();

        assert_eq!(b.apply_pour(30, now), 20);
        assert_eq!(b.status, BottleStatus::Open);

        assert_eq!(b.apply_pour(45, now), 0);
        assert_eq!(b.status, BottleStatus::Finished);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [BottleStatus::Sealed, BottleStatus::Open, BottleStatus::Finished] {
            assert_eq!(BottleStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(BottleStatus::parse("empty").is_err());
    }
}
