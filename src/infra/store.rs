use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Error};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::model::{HistoryEntry, HistoryStatus};
use crate::domain::port::VersionStore;

/// rusqlite-backed store for version history, pending updates and
/// settings overrides. Statements are short and infrequent, so a single
/// mutex-guarded connection is enough.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub async fn open(path: &str) -> Result<SqliteStore, Error> {
        if let Some(dir) = Path::new(path).parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("Failed to open {}", path))?;
        Self::init(conn)
    }

    pub async fn open_in_memory() -> Result<SqliteStore, Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<SqliteStore, Error> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS version_history (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 container TEXT NOT NULL,
                 tag TEXT NOT NULL,
                 deployed_at TEXT NOT NULL,
                 status TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS available_updates (
                 container TEXT PRIMARY KEY,
                 available_tag TEXT NOT NULL,
                 checked_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS settings (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )
        .context("Failed to create schema")?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl VersionStore for SqliteStore {
    async fn add_history(
        &self,
        container: &str,
        tag: &str,
        status: HistoryStatus,
        limit: u32,
    ) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO version_history (container, tag, deployed_at, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![container, tag, Utc::now().to_rfc3339(), status.as_str()],
        )?;
        // retain only the most recent rows for this container
        conn.execute(
            "DELETE FROM version_history
             WHERE container = ?1 AND id NOT IN (
                 SELECT id FROM version_history WHERE container = ?1
                 ORDER BY deployed_at DESC, id DESC LIMIT ?2)",
            params![container, limit],
        )?;
        Ok(())
    }

    async fn history(&self, container: &str, limit: u32) -> Result<Vec<HistoryEntry>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT tag, deployed_at, status FROM version_history
             WHERE container = ?1 ORDER BY deployed_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![container, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (tag, date, status) = row?;
            let Some(status) = HistoryStatus::parse(&status) else {
                continue;
            };
            entries.push(HistoryEntry { tag, date, status });
        }
        Ok(entries)
    }

    async fn save_available_update(&self, container: &str, tag: &str) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO available_updates (container, available_tag, checked_at)
             VALUES (?1, ?2, ?3)",
            params![container, tag, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn clear_available_update(&self, container: &str) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM available_updates WHERE container = ?1",
            params![container],
        )?;
        Ok(())
    }

    async fn available_update(&self, container: &str) -> Result<Option<String>, Error> {
        let conn = self.conn.lock().unwrap();
        let tag = conn
            .query_row(
                "SELECT available_tag FROM available_updates WHERE container = ?1",
                params![container],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tag)
    }

    async fn setting(&self, key: &str) -> Result<Option<String>, Error> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    async fn settings(&self) -> Result<Vec<(String, String)>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }
}
