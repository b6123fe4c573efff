// src/store/sqlite.rs
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{ListingQuery, ListingStore, LocationStats, StoreError};
use crate::listing::{
    CanonicalRecord, ChangeKind, ChangeLogEntry, FieldSnapshot, ListingId, PersistedListing,
};

const BASE_DB_VERSION: i32 = 300;
const CURRENT_DB_VERSION: i32 = 0;

const TABLE_LISTING: &str = "listing";
const TABLE_LISTING_CHANGE: &str = "listing_change";

const LISTING_COLUMNS: &[&str] = &[
    "id",
    "identity_key",
    "title",
    "organization",
    "location",
    "compensation_min",
    "compensation_max",
    "currency",
    "schedule",
    "published_at",
    "description",
    "requirements",
    "source_name",
    "source_ref",
    "is_active",
    "closed_at",
    "created_at",
];

const CHANGE_COLUMNS: &[&str] = &[
    "id",
    "listing_id",
    "identity_key",
    "change_type",
    "event_time",
    "title",
    "organization",
    "location",
    "compensation_min",
    "compensation_max",
    "currency",
    "published_at",
    "schedule",
];

const SCHEMA_V0: &[&str] = &[
    "CREATE TABLE listing (id INTEGER PRIMARY KEY AUTOINCREMENT, identity_key TEXT NOT NULL UNIQUE, title TEXT, organization TEXT, location TEXT, compensation_min INTEGER, compensation_max INTEGER, currency TEXT, schedule TEXT, published_at TEXT NOT NULL, description TEXT, requirements TEXT, source_name TEXT NOT NULL, source_ref TEXT NOT NULL, is_active INTEGER NOT NULL DEFAULT 1, closed_at TEXT, created_at TEXT NOT NULL);",
    "CREATE INDEX listing_active_index ON listing (is_active);",
    "CREATE TABLE listing_change (id INTEGER PRIMARY KEY AUTOINCREMENT, listing_id INTEGER, identity_key TEXT NOT NULL, change_type TEXT NOT NULL, event_time TEXT NOT NULL, title TEXT, organization TEXT, location TEXT, compensation_min INTEGER, compensation_max INTEGER, currency TEXT, published_at TEXT, schedule TEXT);",
    "CREATE INDEX listing_change_key_index ON listing_change (identity_key);",
];

/// Busy/locked statements are retried this many times before surfacing.
const MAX_BUSY_RETRIES: u32 = 3;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<T: AsRef<Path>>(db_path: T) -> Result<Self, StoreError> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;

        let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        match version {
            0 => Self::create_schema(&conn)?,
            v if v == BASE_DB_VERSION + CURRENT_DB_VERSION => Self::validate_schema(&conn)?,
            v => return Err(StoreError::Schema(format!("unknown database version {v}"))),
        }

        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn create_schema(conn: &Connection) -> Result<(), StoreError> {
        for stmt in SCHEMA_V0 {
            conn.execute(stmt, [])?;
        }
        conn.execute(
            &format!(
                "PRAGMA user_version = {}",
                BASE_DB_VERSION + CURRENT_DB_VERSION
            ),
            [],
        )?;
        tracing::info!(target: "store", "created listing schema");
        Ok(())
    }

    fn validate_schema(conn: &Connection) -> Result<(), StoreError> {
        for (table, expected) in [
            (TABLE_LISTING, LISTING_COLUMNS),
            (TABLE_LISTING_CHANGE, CHANGE_COLUMNS),
        ] {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
            let columns: Vec<String> = stmt
                .query_map([], |row| row.get(1))?
                .collect::<Result<_, _>>()?;
            if columns != expected {
                return Err(StoreError::Schema(format!(
                    "schema validation failed for {table}, found {columns:?}"
                )));
            }
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `op`, retrying while the database reports busy/locked.
    fn with_conn<T>(
        &self,
        op: impl Fn(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self.lock();
        let mut attempt = 0u32;
        loop {
            match op(&conn) {
                Err(e) if is_busy(&e) && attempt < MAX_BUSY_RETRIES => {
                    attempt += 1;
                    tracing::debug!(target: "store", attempt, "database busy, retrying");
                    std::thread::sleep(Duration::from_millis(50u64 << attempt));
                }
                other => return other.map_err(StoreError::from),
            }
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Only a UNIQUE violation means the identity key is already stored; other
/// constraint failures (NOT NULL, CHECK) surface as plain sqlite errors.
fn is_unique_violation(e: &StoreError) -> bool {
    matches!(
        e,
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(f, _))
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<PersistedListing> {
    Ok(PersistedListing {
        id: row.get("id")?,
        record: CanonicalRecord {
            identity_key: row.get("identity_key")?,
            title: row.get("title")?,
            organization: row.get("organization")?,
            location: row.get("location")?,
            compensation_min: row.get("compensation_min")?,
            compensation_max: row.get("compensation_max")?,
            currency: row.get("currency")?,
            schedule: row.get("schedule")?,
            published_at: row.get("published_at")?,
            description: row.get("description")?,
            requirements: row.get("requirements")?,
            source_name: row.get("source_name")?,
            source_ref: row.get("source_ref")?,
        },
        is_active: row.get("is_active")?,
        closed_at: row.get("closed_at")?,
        created_at: row.get("created_at")?,
    })
}

fn change_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeLogEntry> {
    let kind: String = row.get("change_type")?;
    let kind = ChangeKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown change type {kind}").into(),
        )
    })?;
    Ok(ChangeLogEntry {
        listing_id: row.get("listing_id")?,
        identity_key: row.get("identity_key")?,
        kind,
        event_time: row.get("event_time")?,
        snapshot: FieldSnapshot {
            title: row.get("title")?,
            organization: row.get("organization")?,
            location: row.get("location")?,
            compensation_min: row.get("compensation_min")?,
            compensation_max: row.get("compensation_max")?,
            currency: row.get("currency")?,
            published_at: row.get("published_at")?,
            schedule: row.get("schedule")?,
        },
    })
}

impl ListingStore for SqliteStore {
    fn active_identity_keys(&self) -> Result<HashSet<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT identity_key FROM {TABLE_LISTING} WHERE is_active = 1"
            ))?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<HashSet<String>, _>>()?;
            Ok(keys)
        })
    }

    fn find_id(&self, identity_key: &str) -> Result<Option<ListingId>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT id FROM {TABLE_LISTING} WHERE identity_key = ?1"),
                params![identity_key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn find_listing(&self, id: ListingId) -> Result<Option<PersistedListing>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT * FROM {TABLE_LISTING} WHERE id = ?1"),
                params![id],
                listing_from_row,
            )
            .optional()
        })
    }

    fn insert(&self, r: &CanonicalRecord, at: DateTime<Utc>) -> Result<ListingId, StoreError> {
        let res = self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {TABLE_LISTING} (identity_key, title, organization, location, \
                     compensation_min, compensation_max, currency, schedule, published_at, \
                     description, requirements, source_name, source_ref, is_active, closed_at, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1, NULL, ?14)"
                ),
                params![
                    r.identity_key,
                    r.title,
                    r.organization,
                    r.location,
                    r.compensation_min,
                    r.compensation_max,
                    r.currency,
                    r.schedule,
                    r.published_at,
                    r.description,
                    r.requirements,
                    r.source_name,
                    r.source_ref,
                    at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        });
        match res {
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate(r.identity_key.clone())),
            other => other,
        }
    }

    fn reactivate(
        &self,
        id: ListingId,
        r: &CanonicalRecord,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "UPDATE {TABLE_LISTING} SET title = ?2, organization = ?3, location = ?4, \
                     compensation_min = ?5, compensation_max = ?6, currency = ?7, schedule = ?8, \
                     published_at = ?9, description = ?10, requirements = ?11, source_name = ?12, \
                     source_ref = ?13, is_active = 1, closed_at = NULL WHERE id = ?1"
                ),
                params![
                    id,
                    r.title,
                    r.organization,
                    r.location,
                    r.compensation_min,
                    r.compensation_max,
                    r.currency,
                    r.schedule,
                    r.published_at,
                    r.description,
                    r.requirements,
                    r.source_name,
                    r.source_ref,
                ],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn deactivate(&self, id: ListingId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                &format!("UPDATE {TABLE_LISTING} SET is_active = 0, closed_at = ?2 WHERE id = ?1"),
                params![id, at],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn append_change_log(&self, e: &ChangeLogEntry) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {TABLE_LISTING_CHANGE} (listing_id, identity_key, change_type, \
                     event_time, title, organization, location, compensation_min, compensation_max, \
                     currency, published_at, schedule) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    e.listing_id,
                    e.identity_key,
                    e.kind.as_str(),
                    e.event_time,
                    e.snapshot.title,
                    e.snapshot.organization,
                    e.snapshot.location,
                    e.snapshot.compensation_min,
                    e.snapshot.compensation_max,
                    e.snapshot.currency,
                    e.snapshot.published_at,
                    e.snapshot.schedule,
                ],
            )?;
            Ok(())
        })
    }

    fn change_log(&self, identity_key: Option<&str>) -> Result<Vec<ChangeLogEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM {TABLE_LISTING_CHANGE} \
                 WHERE ?1 IS NULL OR identity_key = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![identity_key], change_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn active_listings(&self, query: &ListingQuery) -> Result<Vec<PersistedListing>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM {TABLE_LISTING} WHERE is_active = 1 \
                 AND (?1 IS NULL OR location = ?1) \
                 AND (?2 IS NULL OR organization = ?2) \
                 AND (?3 IS NULL OR instr(title, ?3) > 0 OR instr(description, ?3) > 0) \
                 AND (?4 IS NULL OR compensation_min >= ?4) \
                 AND (?5 IS NULL OR compensation_max <= ?5) \
                 ORDER BY {}",
                query.sort.order_by()
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        query.location,
                        query.organization,
                        query.keyword,
                        query.min_compensation,
                        query.max_compensation
                    ],
                    listing_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn stats_by_location(&self) -> Result<Vec<LocationStats>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT location, COUNT(*) AS n, AVG(compensation_min), AVG(compensation_max) \
                 FROM {TABLE_LISTING} WHERE is_active = 1 \
                 GROUP BY location ORDER BY n DESC, location ASC"
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(LocationStats {
                        location: row.get(0)?,
                        count: row.get::<_, i64>(1)? as usize,
                        avg_compensation_min: row.get(2)?,
                        avg_compensation_max: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
