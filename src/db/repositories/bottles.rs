use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    error::StoreError,
    helpers::{format_datetime, like_pattern, parse_datetime},
    models::{MasterBottle, NewMasterBottle, DEFAULT_VOLUME_ML},
};

const MASTER_COLUMNS: &str = "id, name, distillery, category, region, age_years, abv, volume_ml, \
                              barcode, image_url, created_by, created_at";

const SEARCH_LIMIT: u32 = 50;

fn row_to_master_bottle(row: &Row) -> Result<MasterBottle> {
    let created_at: String = row.get("created_at")?;

    Ok(MasterBottle {
        id: row.get("id")?,
        name: row.get("name")?,
        distillery: row.get("distillery")?,
        category: row.get("category")?,
        region: row.get("region")?,
        age_years: row.get("age_years")?,
        abv: row.get("abv")?,
        volume_ml: row.get("volume_ml")?,
        barcode: row.get("barcode")?,
        image_url: row.get("image_url")?,
        created_by: row.get("created_by")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

fn query_one(conn: &Connection, clause: &str, value: &str) -> Result<Option<MasterBottle>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MASTER_COLUMNS} FROM master_bottles WHERE {clause} = ?1"
    ))?;
    let mut rows = stmt.query(params![value])?;
    let found = match rows.next()? {
        Some(row) => Some(row_to_master_bottle(row)?),
        None => None,
    };
    Ok(found)
}

pub(super) fn find_master_bottle(conn: &Connection, id: &str) -> Result<Option<MasterBottle>> {
    query_one(conn, "id", id)
}

fn normalize_barcode(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Inserts a catalogue entry inside an existing task; shared with add-to-collection.
pub(super) fn insert_master_bottle(
    conn: &Connection,
    input: NewMasterBottle,
    created_by: Option<&str>,
) -> Result<MasterBottle> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        bail!(StoreError::Invalid("bottle name is required".into()));
    }
    if let Some(abv) = input.abv {
        if !(0.0..=100.0).contains(&abv) {
            bail!(StoreError::Invalid("abv must be between 0 and 100".into()));
        }
    }
    let volume_ml = input.volume_ml.unwrap_or(DEFAULT_VOLUME_ML);
    if volume_ml == 0 {
        bail!(StoreError::Invalid("volumeMl must be greater than zero".into()));
    }

    let barcode = input.barcode.as_deref().and_then(normalize_barcode);
    if let Some(code) = &barcode {
        if query_one(conn, "barcode", code)?.is_some() {
            bail!(StoreError::Conflict(format!("barcode {code} is already catalogued")));
        }
    }

    let bottle = MasterBottle {
        id: Uuid::new_v4().to_string(),
        name,
        distillery: input.distillery,
        category: input.category,
        region: input.region,
        age_years: input.age_years,
        abv: input.abv,
        volume_ml,
        barcode,
        image_url: input.image_url,
        created_by: created_by.map(str::to_string),
        created_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO master_bottles (id, name, distillery, category, region, age_years, abv,
                                     volume_ml, barcode, image_url, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            bottle.id,
            bottle.name,
            bottle.distillery,
            bottle.category,
            bottle.region,
            bottle.age_years,
            bottle.abv,
            bottle.volume_ml,
            bottle.barcode,
            bottle.image_url,
            bottle.created_by,
            format_datetime(&bottle.created_at),
        ],
    )?;

    Ok(bottle)
}

impl Database {
    pub async fn create_master_bottle(
        &self,
        created_by: &str,
        input: NewMasterBottle,
    ) -> Result<MasterBottle> {
        let created_by = created_by.to_string();
        self.execute(move |conn| {
            insert_master_bottle(conn, input, Some(created_by.as_str()))
        })
        .await
    }

    pub async fn get_master_bottle(&self, id: &str) -> Result<Option<MasterBottle>> {
        let id = id.to_string();
        self.execute(move |conn| find_master_bottle(conn, &id)).await
    }

    pub async fn find_by_barcode(&self, barcode: &str) -> Result<Option<MasterBottle>> {
        let barcode = normalize_barcode(barcode);
        self.execute(move |conn| match barcode {
            Some(code) => query_one(conn, "barcode", &code),
            None => Ok(None),
        })
        .await
    }

    /// Case-insensitive search over name and distillery; empty query lists the newest entries.
    pub async fn search_master_bottles(&self, query: Option<String>) -> Result<Vec<MasterBottle>> {
        self.execute(move |conn| {
            let query = query.map(|q| q.trim().to_string()).filter(|q| !q.is_empty());
            let mut bottles = Vec::new();

            match query {
                Some(q) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MASTER_COLUMNS} FROM master_bottles
                         WHERE name LIKE ?1 ESCAPE '\\' OR distillery LIKE ?1 ESCAPE '\\'
                         ORDER BY name COLLATE NOCASE ASC
                         LIMIT ?2"
                    ))?;
                    let mut rows = stmt.query(params![like_pattern(&q), SEARCH_LIMIT])?;
                    while let Some(row) = rows.next()? {
                        bottles.push(row_to_master_bottle(row)?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MASTER_COLUMNS} FROM master_bottles
                         ORDER BY created_at DESC
                         LIMIT ?1"
                    ))?;
                    let mut rows = stmt.query(params![SEARCH_LIMIT])?;
                    while let Some(row) = rows.next()? {
                        bottles.push(row_to_master_bottle(row)?);
                    }
                }
            }

            Ok(bottles)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn barcode_lookup_and_conflict() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("bottles.sqlite3")).unwrap();
        let user = db.create_user("cataloguer", None).await.unwrap();

        let created = db
            .create_master_bottle(
                &user.id,
                NewMasterBottle {
                    name: "Lagavulin 16".into(),
                    distillery: Some("Lagavulin".into()),
                    barcode: Some("5000281 005409".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(created.volume_ml, DEFAULT_VOLUME_ML);
        assert_eq!(created.barcode.as_deref(), Some("5000281005409"));

        let found = db.find_by_barcode("5000281005409").await.unwrap();
        assert_eq!(found.map(|b| b.id), Some(created.id));

        let err = db
            .create_master_bottle(
                &user.id,
                NewMasterBottle {
                    name: "Imposter".into(),
                    barcode: Some("5000281005409".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn search_matches_name_or_distillery() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("bottles.sqlite3")).unwrap();
        let user = db.create_user("cataloguer", None).await.unwrap();

        for (name, distillery) in [
            ("Uigeadail", "Ardbeg"),
            ("Corryvreckan", "Ardbeg"),
            ("12 Year Old", "Glenfiddich"),
        ] {
            db.create_master_bottle(
                &user.id,
                NewMasterBottle {
                    name: name.into(),
                    distillery: Some(distillery.into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        let ardbeg = db.search_master_bottles(Some("ardbeg".into())).await.unwrap();
        assert_eq!(ardbeg.len(), 2);
        assert_eq!(ardbeg[0].name, "Corryvreckan");

        let all = db.search_master_bottles(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let none = db.search_master_bottles(Some("100%".into())).await.unwrap();
        assert!(none.is_empty());
    }
}
