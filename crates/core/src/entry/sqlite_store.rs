//! SQLite-backed entry store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    EntryFilter, EntryId, EntryStore, InstallableEntry, NewEntry, RefreshErrorClass,
    RefreshRecord, Secret, StoreError,
};

const SELECT_COLUMNS: &str = "id, app_name, app_path, device_name, device_class, udid, account, \
     secret, bundle_identifier, version, remove_extensions, enabled, installed_at, refreshed_at, \
     expires_at, refresh_succeeded, refresh_error";

/// SQLite-backed entry store.
pub struct SqliteEntryStore {
    conn: Mutex<Connection>,
}

impl SqliteEntryStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                app_name TEXT NOT NULL,
                app_path TEXT NOT NULL,
                device_name TEXT NOT NULL DEFAULT '',
                device_class TEXT NOT NULL DEFAULT 'AppleTV',
                udid TEXT NOT NULL,
                account TEXT NOT NULL,
                secret TEXT NOT NULL,
                bundle_identifier TEXT NOT NULL DEFAULT '',
                version TEXT NOT NULL DEFAULT '',
                remove_extensions INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                installed_at TEXT,
                refreshed_at TEXT,
                expires_at TEXT,
                refresh_succeeded INTEGER NOT NULL DEFAULT 0,
                refresh_error INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_udid ON entries(udid);
            CREATE INDEX IF NOT EXISTS idx_entries_enabled ON entries(enabled);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
        value.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<InstallableEntry> {
        let device_class: String = row.get(4)?;
        let app_path: String = row.get(2)?;
        let secret: String = row.get(7)?;

        Ok(InstallableEntry {
            id: row.get(0)?,
            app_name: row.get(1)?,
            app_path: PathBuf::from(app_path),
            device_name: row.get(3)?,
            device_class: device_class.parse().unwrap_or_default(),
            udid: row.get(5)?,
            account: row.get(6)?,
            secret: Secret::new(secret),
            bundle_identifier: row.get(8)?,
            version: row.get(9)?,
            remove_extensions: row.get(10)?,
            enabled: row.get(11)?,
            installed_at: Self::parse_time(row.get(12)?),
            refreshed_at: Self::parse_time(row.get(13)?),
            expires_at: Self::parse_time(row.get(14)?),
            refresh_succeeded: row.get(15)?,
            refresh_error: RefreshErrorClass::from_code(row.get(16)?),
        })
    }

    fn get_locked(conn: &Connection, id: EntryId) -> Result<Option<InstallableEntry>, StoreError> {
        let sql = format!("SELECT {} FROM entries WHERE id = ?", SELECT_COLUMNS);
        let entry = conn
            .query_row(&sql, params![id], Self::row_to_entry)
            .optional()?;
        Ok(entry)
    }

    fn require_locked(conn: &Connection, id: EntryId) -> Result<InstallableEntry, StoreError> {
        Self::get_locked(conn, id)?.ok_or(StoreError::NotFound(id))
    }
}

impl EntryStore for SqliteEntryStore {
    fn create(&self, entry: NewEntry) -> Result<InstallableEntry, StoreError> {
        if entry.udid.is_empty() || entry.account.is_empty() {
            return Err(StoreError::Invalid(
                "udid and account are required".to_string(),
            ));
        }

        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO entries (app_name, app_path, device_name, device_class, udid, account, secret, \
             bundle_identifier, version, remove_extensions, enabled, installed_at, refreshed_at, \
             expires_at, refresh_succeeded, refresh_error, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, 0, ?, ?)",
            params![
                entry.app_name,
                entry.app_path.to_string_lossy().to_string(),
                entry.device_name,
                entry.device_class.as_str(),
                entry.udid,
                entry.account,
                entry.secret.expose(),
                entry.bundle_identifier,
                entry.version,
                entry.remove_extensions,
                entry.installed_at.map(|t| t.to_rfc3339()),
                entry.installed_at.map(|t| t.to_rfc3339()),
                entry.expires_at.map(|t| t.to_rfc3339()),
                entry.installed_at.is_some(),
                now,
                now,
            ],
        )?;

        let id = conn.last_insert_rowid();
        Self::require_locked(&conn, id)
    }

    fn get(&self, id: EntryId) -> Result<Option<InstallableEntry>, StoreError> {
        let conn = self.conn()?;
        Self::get_locked(&conn, id)
    }

    fn list(&self, filter: &EntryFilter) -> Result<Vec<InstallableEntry>, StoreError> {
        let conn = self.conn()?;

        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(enabled) = filter.enabled {
            conditions.push("enabled = ?");
            values.push(Box::new(enabled));
        }
        if let Some(ref udid) = filter.udid {
            conditions.push("udid = ?");
            values.push(Box::new(udid.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM entries {} ORDER BY id ASC",
            SELECT_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(params.as_slice(), Self::row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn record_refresh(
        &self,
        id: EntryId,
        record: &RefreshRecord,
    ) -> Result<InstallableEntry, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entries SET refreshed_at = ?, refresh_succeeded = ?, refresh_error = ?, \
             expires_at = COALESCE(?, expires_at), updated_at = ? WHERE id = ?",
            params![
                record.refreshed_at.to_rfc3339(),
                record.succeeded,
                record.error.code(),
                record.expires_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Self::require_locked(&conn, id)
    }

    fn set_enabled(&self, id: EntryId, enabled: bool) -> Result<InstallableEntry, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entries SET enabled = ?, updated_at = ? WHERE id = ?",
            params![enabled, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Self::require_locked(&conn, id)
    }

    fn clear_refresh_error(&self, id: EntryId) -> Result<InstallableEntry, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE entries SET refresh_error = 0, updated_at = ? WHERE id = ?",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Self::require_locked(&conn, id)
    }

    fn delete(&self, id: EntryId) -> Result<InstallableEntry, StoreError> {
        let conn = self.conn()?;
        let entry = Self::require_locked(&conn, id)?;
        conn.execute("DELETE FROM entries WHERE id = ?", params![id])?;
        Ok(entry)
    }
}
