use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::{
    db::{
        connection::Database,
        error::StoreError,
        helpers::{format_datetime, parse_datetime, parse_optional_datetime},
        models::{
            BottleStatus, NewPour, Pour, PourSession, PourSessionDetail, RecordedPour,
        },
    },
    pours::window::{is_stale, place_pour, OpenWindow, Placement},
};

use super::collection::{find_owned_item, validate_rating, write_user_bottle};

const POUR_COLUMNS: &str = "id, user_id, user_bottle_id, bottle_name, session_id, amount_ml, \
                            poured_at, rating, notes, created_at";

const SESSION_COLUMNS: &str =
    "id, user_id, started_at, ended_at, last_pour_at, pour_count, total_ml";

fn row_to_pour(row: &Row) -> Result<Pour> {
    let poured_at: String = row.get("poured_at")?;
    let created_at: String = row.get("created_at")?;

    Ok(Pour {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        user_bottle_id: row.get("user_bottle_id")?,
        bottle_name: row.get("bottle_name")?,
        session_id: row.get("session_id")?,
        amount_ml: row.get("amount_ml")?,
        poured_at: parse_datetime(&poured_at, "poured_at")?,
        rating: row.get("rating")?,
        notes: row.get("notes")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

/// Session row without its pour ids; `attach_pours` fills them in.
fn row_to_session(row: &Row) -> Result<PourSession> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let last_pour_at: String = row.get("last_pour_at")?;

    Ok(PourSession {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        last_pour_at: parse_datetime(&last_pour_at, "last_pour_at")?,
        pour_count: row.get("pour_count")?,
        total_ml: row.get("total_ml")?,
        pours: Vec::new(),
    })
}

fn session_pours(conn: &Connection, session_id: &str) -> Result<Vec<Pour>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POUR_COLUMNS} FROM pours WHERE session_id = ?1
         ORDER BY poured_at ASC, created_at ASC"
    ))?;
    let mut rows = stmt.query(params![session_id])?;
    let mut pours = Vec::new();
    while let Some(row) = rows.next()? {
        pours.push(row_to_pour(row)?);
    }
    Ok(pours)
}

fn find_owned_pour(conn: &Connection, user_id: &str, pour_id: &str) -> Result<Option<Pour>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POUR_COLUMNS} FROM pours WHERE id = ?1 AND user_id = ?2"
    ))?;
    let mut rows = stmt.query(params![pour_id, user_id])?;
    let found = match rows.next()? {
        Some(row) => Some(row_to_pour(row)?),
        None => None,
    };
    Ok(found)
}

fn attach_pours(conn: &Connection, mut session: PourSession) -> Result<PourSession> {
    session.pours = session_pours(conn, &session.id)?
        .into_iter()
        .map(|pour| pour.id)
        .collect();
    Ok(session)
}

fn load_session(conn: &Connection, session_id: &str) -> Result<PourSession> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM pour_sessions WHERE id = ?1"
    ))?;
    let mut rows = stmt.query(params![session_id])?;
    let session = match rows.next()? {
        Some(row) => row_to_session(row)?,
        None => bail!(StoreError::NotFound("pour session")),
    };
    attach_pours(conn, session)
}

fn open_window(conn: &Connection, user_id: &str) -> Result<Option<OpenWindow>> {
    let row = conn
        .query_row(
            "SELECT id, last_pour_at FROM pour_sessions
             WHERE user_id = ?1 AND ended_at IS NULL",
            params![user_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    row.map(|(session_id, last_pour_at)| {
        Ok(OpenWindow {
            session_id,
            last_pour_at: parse_datetime(&last_pour_at, "last_pour_at")?,
        })
    })
    .transpose()
}

/// How far ahead of the server clock a client-supplied `pouredAt` may be.
const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

/// Rejects timestamps the store cannot round-trip and pours from the future.
fn check_poured_at(poured_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if !(0..=9999).contains(&poured_at.year()) {
        bail!(StoreError::Invalid("pouredAt must fall between years 0 and 9999".into()));
    }
    if poured_at > now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES) {
        bail!(StoreError::Invalid("pouredAt cannot be in the future".into()));
    }
    Ok(())
}

/// Finds or opens the session a pour at `poured_at` belongs to. Must run inside a transaction.
fn resolve_session_in(
    conn: &Connection,
    user_id: &str,
    poured_at: DateTime<Utc>,
    gap: Duration,
    now: DateTime<Utc>,
) -> Result<String> {
    let open = open_window(conn, user_id)?;

    match place_pour(open.as_ref(), poured_at, gap) {
        Placement::Join { session_id } => Ok(session_id),
        Placement::Open { close } => {
            if let Some(stale_id) = close {
                conn.execute(
                    "UPDATE pour_sessions SET ended_at = last_pour_at, updated_at = ?1
                     WHERE id = ?2",
                    params![format_datetime(&now), stale_id],
                )?;
            }

            let session_id = Uuid::new_v4().to_string();
            let stamp = format_datetime(&poured_at);
            conn.execute(
                "INSERT INTO pour_sessions (id, user_id, started_at, ended_at, last_pour_at,
                                            pour_count, total_ml, created_at, updated_at)
                 VALUES (?1, ?2, ?3, NULL, ?3, 0, 0, ?4, ?4)",
                params![session_id, user_id, stamp, format_datetime(&now)],
            )?;
            Ok(session_id)
        }
    }
}

/// Recomputes counters and bounds from the session's pours.
fn refresh_session(conn: &Connection, session_id: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE pour_sessions
         SET pour_count = (SELECT COUNT(*) FROM pours WHERE session_id = ?1),
             total_ml = (SELECT COALESCE(SUM(amount_ml), 0) FROM pours WHERE session_id = ?1),
             started_at = COALESCE(
                 (SELECT MIN(poured_at) FROM pours WHERE session_id = ?1), started_at),
             last_pour_at = COALESCE(
                 (SELECT MAX(poured_at) FROM pours WHERE session_id = ?1), last_pour_at),
             ended_at = CASE
                 WHEN ended_at IS NULL THEN NULL
                 ELSE COALESCE((SELECT MAX(poured_at) FROM pours WHERE session_id = ?1), ended_at)
             END,
             updated_at = ?2
         WHERE id = ?1",
        params![session_id, format_datetime(&now)],
    )?;
    Ok(())
}

impl Database {
    /// Returns the id of the session a pour at `poured_at` belongs to, opening one if needed.
    pub async fn resolve_pour_session(
        &self,
        user_id: &str,
        poured_at: DateTime<Utc>,
        gap: Duration,
    ) -> Result<String> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let now = Utc::now();
            check_poured_at(poured_at, now)?;
            let tx = conn.transaction()?;
            let session_id = resolve_session_in(&tx, &user_id, poured_at, gap, now)?;
            tx.commit()?;
            Ok(session_id)
        })
        .await
    }

    pub async fn record_pour(
        &self,
        user_id: &str,
        input: NewPour,
        gap: Duration,
        now: DateTime<Utc>,
    ) -> Result<RecordedPour> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            if input.amount_ml == 0 {
                bail!(StoreError::Invalid("amountMl must be greater than zero".into()));
            }
            validate_rating(input.rating)?;
            let poured_at = input.poured_at.unwrap_or(now);
            check_poured_at(poured_at, now)?;

            let tx = conn.transaction()?;
            let item = find_owned_item(&tx, &user_id, &input.user_bottle_id)?
                .ok_or(StoreError::NotFound("bottle"))?;
            if item.bottle.status == BottleStatus::Finished {
                bail!(StoreError::Conflict(format!(
                    "{} is already finished",
                    item.master.name
                )));
            }

            let session_id = resolve_session_in(&tx, &user_id, poured_at, gap, now)?;

            let pour = Pour {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.clone(),
                user_bottle_id: Some(item.bottle.id.clone()),
                bottle_name: item.master.name.clone(),
                session_id: session_id.clone(),
                amount_ml: input.amount_ml,
                poured_at,
                rating: input.rating,
                notes: input.notes,
                created_at: now,
            };

            tx.execute(
                "INSERT INTO pours (id, user_id, user_bottle_id, bottle_name, session_id,
                                    amount_ml, poured_at, rating, notes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    pour.id,
                    pour.user_id,
                    pour.user_bottle_id,
                    pour.bottle_name,
                    pour.session_id,
                    pour.amount_ml,
                    format_datetime(&pour.poured_at),
                    pour.rating,
                    pour.notes,
                    format_datetime(&pour.created_at),
                ],
            )?;
            refresh_session(&tx, &session_id, now)?;

            let mut bottle = item.bottle;
            bottle.apply_pour(pour.amount_ml, now);
            write_user_bottle(&tx, &bottle)?;

            let session = load_session(&tx, &session_id)?;
            tx.commit()?;

            Ok(RecordedPour {
                pour,
                session,
                bottle,
            })
        })
        .await
    }

    pub async fn list_pours(&self, user_id: &str, limit: u32, offset: u32) -> Result<Vec<Pour>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POUR_COLUMNS} FROM pours
                 WHERE user_id = ?1
                 ORDER BY poured_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let mut rows = stmt.query(params![user_id, limit, offset])?;
            let mut pours = Vec::new();
            while let Some(row) = rows.next()? {
                pours.push(row_to_pour(row)?);
            }
            Ok(pours)
        })
        .await
    }

    /// Deletes an owned pour, returning its volume to the bottle if the bottle still exists.
    /// A session left without pours is removed. Returns false when nothing owned matched.
    pub async fn delete_pour(&self, user_id: &str, pour_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        let pour_id = pour_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let Some(pour) = find_owned_pour(&tx, &user_id, &pour_id)? else {
                return Ok(false);
            };

            let now = Utc::now();
            tx.execute("DELETE FROM pours WHERE id = ?1", params![pour.id])?;

            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM pours WHERE session_id = ?1",
                params![pour.session_id],
                |row| row.get(0),
            )?;
            if remaining == 0 {
                tx.execute(
                    "DELETE FROM pour_sessions WHERE id = ?1",
                    params![pour.session_id],
                )?;
            } else {
                refresh_session(&tx, &pour.session_id, now)?;
            }

            if let Some(bottle_id) = &pour.user_bottle_id {
                if let Some(mut item) = find_owned_item(&tx, &user_id, bottle_id)? {
                    item.bottle.remaining_ml = item
                        .bottle
                        .remaining_ml
                        .saturating_add(pour.amount_ml)
                        .min(item.master.volume_ml);
                    if item.bottle.status == BottleStatus::Finished && item.bottle.remaining_ml > 0
                    {
                        item.bottle.status = BottleStatus::Open;
                    }
                    item.bottle.updated_at = now;
                    write_user_bottle(&tx, &item.bottle)?;
                }
            }

            tx.commit()?;
            Ok(true)
        })
        .await
    }

    pub async fn list_pour_sessions(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PourSession>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM pour_sessions
                 WHERE user_id = ?1
                 ORDER BY started_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let mut rows = stmt.query(params![user_id, limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            sessions
                .into_iter()
                .map(|session| attach_pours(conn, session))
                .collect()
        })
        .await
    }

    /// The open session, if its last pour is still within `gap` of `now`.
    pub async fn current_pour_session(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        gap: Duration,
    ) -> Result<Option<PourSessionDetail>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let Some(window) = open_window(conn, &user_id)? else {
                return Ok(None);
            };
            if is_stale(window.last_pour_at, now, gap) {
                return Ok(None);
            }

            let session = load_session(conn, &window.session_id)?;
            let entries = session_pours(conn, &session.id)?;
            Ok(Some(PourSessionDetail { session, entries }))
        })
        .await
    }

    /// Closes every open session whose last pour is more than `gap` before `now`.
    pub async fn close_stale_sessions(&self, now: DateTime<Utc>, gap: Duration) -> Result<usize> {
        self.execute(move |conn| {
            let cutoff = format_datetime(&(now - gap));
            let closed = conn.execute(
                "UPDATE pour_sessions
                 SET ended_at = last_pour_at, updated_at = ?1
                 WHERE ended_at IS NULL AND last_pour_at < ?2",
                params![format_datetime(&now), cutoff],
            )?;
            Ok(closed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::db::models::{AddToCollection, NewMasterBottle};

    const GAP_MINUTES: i64 = 30;

    fn gap() -> Duration {
        Duration::minutes(GAP_MINUTES)
    }

    fn evening(minute_offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 20, 0, 0).unwrap() + Duration::minutes(minute_offset)
    }

    async fn setup() -> (tempfile::TempDir, Database, String, String) {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("pours.sqlite3")).unwrap();
        let user = db.create_user("pourer", None).await.unwrap();
        let item = db
            .add_to_collection(
                &user.id,
                AddToCollection {
                    bottle: Some(NewMasterBottle {
                        name: "Caol Ila 12".into(),
                        volume_ml: Some(700),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (dir, db, user.id, item.bottle.id)
    }

    fn pour(bottle_id: &str, at: DateTime<Utc>) -> NewPour {
        NewPour {
            user_bottle_id: bottle_id.to_string(),
            amount_ml: 30,
            poured_at: Some(at),
            rating: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn pours_within_gap_share_a_session() {
        let (_dir, db, user_id, bottle_id) = setup().await;

        let first = db
            .record_pour(&user_id, pour(&bottle_id, evening(0)), gap(), evening(0))
            .await
            .unwrap();
        let second = db
            .record_pour(&user_id, pour(&bottle_id, evening(25)), gap(), evening(25))
            .await
            .unwrap();
        let third = db
            .record_pour(&user_id, pour(&bottle_id, evening(50)), gap(), evening(50))
            .await
            .unwrap();

        assert_eq!(first.session.id, second.session.id);
        assert_eq!(second.session.id, third.session.id);
        assert_eq!(third.session.pour_count, 3);
        assert_eq!(third.session.total_ml, 90);
        assert_eq!(third.session.started_at, evening(0));
        assert_eq!(third.session.last_pour_at, evening(50));
        assert_eq!(
            third.session.pours,
            vec![first.pour.id, second.pour.id, third.pour.id]
        );
        assert_eq!(third.bottle.remaining_ml, 610);
        assert_eq!(third.bottle.status, BottleStatus::Open);
    }

    #[tokio::test]
    async fn pour_after_gap_closes_old_session() {
        let (_dir, db, user_id, bottle_id) = setup().await;

        let first = db
            .record_pour(&user_id, pour(&bottle_id, evening(0)), gap(), evening(0))
            .await
            .unwrap();
        let late = db
            .record_pour(&user_id, pour(&bottle_id, evening(31)), gap(), evening(31))
            .await
            .unwrap();
        assert_ne!(first.session.id, late.session.id);
        assert!(late.session.is_open());

        let sessions = db.list_pour_sessions(&user_id, 10, 0).await.unwrap();
        assert_eq!(sessions.len(), 2);
        let open: Vec<_> = sessions.iter().filter(|s| s.is_open()).collect();
        assert_eq!(open.len(), 1);

        let closed = sessions.iter().find(|s| s.id == first.session.id).unwrap();
        assert_eq!(closed.ended_at, Some(evening(0)));
    }

    #[tokio::test]
    async fn stale_sessions_are_closed_and_hidden() {
        let (_dir, db, user_id, bottle_id) = setup().await;
        db.record_pour(&user_id, pour(&bottle_id, evening(0)), gap(), evening(0))
            .await
            .unwrap();

        let current = db
            .current_pour_session(&user_id, evening(10), gap())
            .await
            .unwrap();
        assert_eq!(current.map(|d| d.entries.len()), Some(1));

        assert!(db
            .current_pour_session(&user_id, evening(45), gap())
            .await
            .unwrap()
            .is_none());

        assert_eq!(db.close_stale_sessions(evening(45), gap()).await.unwrap(), 1);
        assert_eq!(db.close_stale_sessions(evening(45), gap()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resolver_reuses_open_session() {
        let (_dir, db, user_id, _bottle_id) = setup().await;

        let a = db.resolve_pour_session(&user_id, evening(0), gap()).await.unwrap();
        let b = db.resolve_pour_session(&user_id, evening(0), gap()).await.unwrap();
        assert_eq!(a, b);

        let c = db.resolve_pour_session(&user_id, evening(120), gap()).await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn deleting_pour_restores_stock_and_prunes_session() {
        let (_dir, db, user_id, bottle_id) = setup().await;
        let recorded = db
            .record_pour(&user_id, pour(&bottle_id, evening(0)), gap(), evening(0))
            .await
            .unwrap();

        let other = db.create_user("not_the_pourer", None).await.unwrap();
        assert!(!db.delete_pour(&other.id, &recorded.pour.id).await.unwrap());

        assert!(db.delete_pour(&user_id, &recorded.pour.id).await.unwrap());
        assert!(db.list_pour_sessions(&user_id, 10, 0).await.unwrap().is_empty());

        let item = db
            .get_collection_item(&user_id, &bottle_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.bottle.remaining_ml, 700);
    }

    #[tokio::test]
    async fn pours_on_foreign_bottles_are_rejected() {
        let (_dir, db, _user_id, bottle_id) = setup().await;
        let other = db.create_user("borrower", None).await.unwrap();

        let err = db
            .record_pour(&other.id, pour(&bottle_id, evening(0)), gap(), evening(0))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::NotFound("bottle"))
        );
    }

    #[tokio::test]
    async fn out_of_range_and_future_pour_times_are_invalid() {
        let (_dir, db, user_id, bottle_id) = setup().await;

        let far_future = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        let err = db
            .record_pour(&user_id, pour(&bottle_id, far_future), gap(), evening(0))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Invalid(_))));

        let next_hour = evening(60);
        let err = db
            .record_pour(&user_id, pour(&bottle_id, next_hour), gap(), evening(0))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Invalid(_))));

        // small clock skew is tolerated
        let recorded = db
            .record_pour(&user_id, pour(&bottle_id, evening(2)), gap(), evening(0))
            .await
            .unwrap();
        assert_eq!(recorded.pour.poured_at, evening(2));

        let item = db
            .get_collection_item(&user_id, &bottle_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.bottle.remaining_ml, 670);
    }
}
