use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    error::StoreError,
    helpers::{format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime},
    models::{
        AddToCollection, BottleStatus, CollectionItem, MasterBottle, UserBottle, UserBottleUpdate,
    },
};

use super::bottles::{find_master_bottle, insert_master_bottle};

const COLLECTION_SELECT: &str = "
    SELECT ub.id, ub.user_id, ub.master_bottle_id, ub.status, ub.remaining_ml,
           ub.purchase_price, ub.purchased_at, ub.rating, ub.notes,
           ub.last_label_printed_at, ub.created_at, ub.updated_at,
           mb.name AS m_name, mb.distillery AS m_distillery, mb.category AS m_category,
           mb.region AS m_region, mb.age_years AS m_age_years, mb.abv AS m_abv,
           mb.volume_ml AS m_volume_ml, mb.barcode AS m_barcode, mb.image_url AS m_image_url,
           mb.created_by AS m_created_by, mb.created_at AS m_created_at
    FROM user_bottles ub
    JOIN master_bottles mb ON mb.id = ub.master_bottle_id";

fn row_to_collection_item(row: &Row) -> Result<CollectionItem> {
    let status: String = row.get("status")?;
    let purchased_at: Option<String> = row.get("purchased_at")?;
    let printed_at: Option<String> = row.get("last_label_printed_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let master_created_at: String = row.get("m_created_at")?;
    let master_bottle_id: String = row.get("master_bottle_id")?;

    Ok(CollectionItem {
        bottle: UserBottle {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            master_bottle_id: master_bottle_id.clone(),
            status: BottleStatus::parse(&status)?,
            remaining_ml: row.get("remaining_ml")?,
            purchase_price: row.get("purchase_price")?,
            purchased_at: parse_optional_datetime(purchased_at, "purchased_at")?,
            rating: row.get("rating")?,
            notes: row.get("notes")?,
            last_label_printed_at: parse_optional_datetime(printed_at, "last_label_printed_at")?,
            created_at: parse_datetime(&created_at, "created_at")?,
            updated_at: parse_datetime(&updated_at, "updated_at")?,
        },
        master: MasterBottle {
            id: master_bottle_id,
            name: row.get("m_name")?,
            distillery: row.get("m_distillery")?,
            category: row.get("m_category")?,
            region: row.get("m_region")?,
            age_years: row.get("m_age_years")?,
            abv: row.get("m_abv")?,
            volume_ml: row.get("m_volume_ml")?,
            barcode: row.get("m_barcode")?,
            image_url: row.get("m_image_url")?,
            created_by: row.get("m_created_by")?,
            created_at: parse_datetime(&master_created_at, "master created_at")?,
        },
    })
}

pub(super) fn query_collection(conn: &Connection, user_id: &str) -> Result<Vec<CollectionItem>> {
    let mut stmt = conn.prepare(&format!(
        "{COLLECTION_SELECT} WHERE ub.user_id = ?1 ORDER BY ub.created_at DESC"
    ))?;
    let mut rows = stmt.query(params![user_id])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(row_to_collection_item(row)?);
    }
    Ok(items)
}

/// Loads a bottle only if `user_id` owns it.
pub(super) fn find_owned_item(
    conn: &Connection,
    user_id: &str,
    user_bottle_id: &str,
) -> Result<Option<CollectionItem>> {
    let mut stmt = conn.prepare(&format!(
        "{COLLECTION_SELECT} WHERE ub.id = ?1 AND ub.user_id = ?2"
    ))?;
    let mut rows = stmt.query(params![user_bottle_id, user_id])?;
    let found = match rows.next()? {
        Some(row) => Some(row_to_collection_item(row)?),
        None => None,
    };
    Ok(found)
}

pub(super) fn write_user_bottle(conn: &Connection, bottle: &UserBottle) -> Result<()> {
    conn.execute(
        "UPDATE user_bottles
         SET status = ?1,
             remaining_ml = ?2,
             purchase_price = ?3,
             purchased_at = ?4,
             rating = ?5,
             notes = ?6,
             last_label_printed_at = ?7,
             updated_at = ?8
         WHERE id = ?9",
        params![
            bottle.status.as_str(),
            bottle.remaining_ml,
            bottle.purchase_price,
            format_optional_datetime(bottle.purchased_at.as_ref()),
            bottle.rating,
            bottle.notes,
            format_optional_datetime(bottle.last_label_printed_at.as_ref()),
            format_datetime(&bottle.updated_at),
            bottle.id,
        ],
    )?;
    Ok(())
}

pub(super) fn validate_rating(rating: Option<u8>) -> Result<()> {
    if let Some(value) = rating {
        if !(1..=5).contains(&value) {
            bail!(StoreError::Invalid("rating must be between 1 and 5".into()));
        }
    }
    Ok(())
}

impl Database {
    pub async fn list_collection(&self, user_id: &str) -> Result<Vec<CollectionItem>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| query_collection(conn, &user_id)).await
    }

    pub async fn get_collection_item(
        &self,
        user_id: &str,
        user_bottle_id: &str,
    ) -> Result<Option<CollectionItem>> {
        let user_id = user_id.to_string();
        let user_bottle_id = user_bottle_id.to_string();
        self.execute(move |conn| find_owned_item(conn, &user_id, &user_bottle_id))
            .await
    }

    /// Adds a bottle to the caller's collection, creating the catalogue entry when one is
    /// supplied inline.
    pub async fn add_to_collection(
        &self,
        user_id: &str,
        input: AddToCollection,
    ) -> Result<CollectionItem> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            validate_rating(input.rating)?;
            let tx = conn.transaction()?;

            let master = match (input.master_bottle_id, input.bottle) {
                (Some(id), _) => {
                    find_master_bottle(&tx, &id)?.ok_or(StoreError::NotFound("bottle"))?
                }
                (None, Some(new_bottle)) => {
                    insert_master_bottle(&tx, new_bottle, Some(user_id.as_str()))?
                }
                (None, None) => bail!(StoreError::Invalid(
                    "either masterBottleId or bottle is required".into()
                )),
            };

            let remaining_ml = input.remaining_ml.unwrap_or(master.volume_ml);
            if remaining_ml > master.volume_ml {
                bail!(StoreError::Invalid(format!(
                    "remainingMl cannot exceed bottle volume of {}ml",
                    master.volume_ml
                )));
            }
            let status = input.status.unwrap_or(if remaining_ml == master.volume_ml {
                BottleStatus::Sealed
            } else {
                BottleStatus::Open
            });

            let now = Utc::now();
            let bottle = UserBottle {
                id: Uuid::new_v4().to_string(),
                user_id,
                master_bottle_id: master.id.clone(),
                status,
                remaining_ml,
                purchase_price: input.purchase_price,
                purchased_at: input.purchased_at,
                rating: input.rating,
                notes: input.notes,
                last_label_printed_at: None,
                created_at: now,
                updated_at: now,
            };

            tx.execute(
                "INSERT INTO user_bottles (id, user_id, master_bottle_id, status, remaining_ml,
                                           purchase_price, purchased_at, rating, notes,
                                           last_label_printed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?11)",
                params![
                    bottle.id,
                    bottle.user_id,
                    bottle.master_bottle_id,
                    bottle.status.as_str(),
                    bottle.remaining_ml,
                    bottle.purchase_price,
                    format_optional_datetime(bottle.purchased_at.as_ref()),
                    bottle.rating,
                    bottle.notes,
                    format_datetime(&bottle.created_at),
                    format_datetime(&bottle.updated_at),
                ],
            )?;
            tx.commit()?;

            Ok(CollectionItem { bottle, master })
        })
        .await
    }

    pub async fn update_user_bottle(
        &self,
        user_id: &str,
        user_bottle_id: &str,
        update: UserBottleUpdate,
    ) -> Result<CollectionItem> {
        let user_id = user_id.to_string();
        let user_bottle_id = user_bottle_id.to_string();
        self.execute(move |conn| {
            validate_rating(update.rating)?;
            let mut item = find_owned_item(conn, &user_id, &user_bottle_id)?
                .ok_or(StoreError::NotFound("bottle"))?;

            if let Some(remaining_ml) = update.remaining_ml {
                if remaining_ml > item.master.volume_ml {
                    bail!(StoreError::Invalid(format!(
                        "remainingMl cannot exceed bottle volume of {}ml",
                        item.master.volume_ml
                    )));
                }
                item.bottle.remaining_ml = remaining_ml;
            }
            if let Some(status) = update.status {
                item.bottle.status = status;
            }
            if update.purchase_price.is_some() {
                item.bottle.purchase_price = update.purchase_price;
            }
            if update.purchased_at.is_some() {
                item.bottle.purchased_at = update.purchased_at;
            }
            if update.rating.is_some() {
                item.bottle.rating = update.rating;
            }
            if let Some(notes) = update.notes {
                item.bottle.notes = (!notes.trim().is_empty()).then_some(notes);
            }
            item.bottle.updated_at = Utc::now();

            write_user_bottle(conn, &item.bottle)?;
            Ok(item)
        })
        .await
    }

    /// Removes one owned bottle. Returns false when nothing owned matched.
    pub async fn remove_from_collection(
        &self,
        user_id: &str,
        user_bottle_id: &str,
    ) -> Result<bool> {
        let user_id = user_id.to_string();
        let user_bottle_id = user_bottle_id.to_string();
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM user_bottles WHERE id = ?1 AND user_id = ?2",
                params![user_bottle_id, user_id],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Deletes every collection bottle of `user_id`; catalogue entries stay.
    pub async fn clear_collection(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM user_bottles WHERE user_id = ?1",
                params![user_id],
            )?;
            Ok(removed)
        })
        .await
    }

    pub async fn bottles_needing_labels(&self, user_id: &str) -> Result<Vec<CollectionItem>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{COLLECTION_SELECT}
                 WHERE ub.user_id = ?1
                   AND (ub.last_label_printed_at IS NULL
                        OR ub.last_label_printed_at < ub.created_at)
                 ORDER BY ub.created_at ASC"
            ))?;
            let mut rows = stmt.query(params![user_id])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_collection_item(row)?);
            }
            Ok(items)
        })
        .await
    }

    /// Stamps `printed_at` on the listed bottles the caller owns; returns how many were updated.
    pub async fn mark_labels_printed(
        &self,
        user_id: &str,
        user_bottle_ids: Vec<String>,
        printed_at: DateTime<Utc>,
    ) -> Result<usize> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let stamp = format_datetime(&printed_at);
            let mut updated = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE user_bottles
                     SET last_label_printed_at = ?1, updated_at = ?1
                     WHERE id = ?2 AND user_id = ?3",
                )?;
                for id in &user_bottle_ids {
                    updated += stmt.execute(params![stamp, id, user_id])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
        .await
    }
}
