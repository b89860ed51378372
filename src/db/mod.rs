pub mod models;
pub mod queries;

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: charts discovered by the scanner + one record per chart/mode.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS charts (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                hash            TEXT NOT NULL,
                file_path       TEXT NOT NULL UNIQUE,
                folder          TEXT NOT NULL,
                format          TEXT NOT NULL,
                file_size       INTEGER NOT NULL,
                file_modified   TEXT NOT NULL,

                -- Metadata from song.ini
                name            TEXT NOT NULL,
                artist          TEXT NOT NULL,
                charter         TEXT NOT NULL,

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_charts_hash ON charts(hash);
            CREATE INDEX IF NOT EXISTS idx_charts_name ON charts(name);
            CREATE INDEX IF NOT EXISTS idx_charts_artist ON charts(artist);

            -- One record per unique chart content and decode mode
            -- (difficulty plus modifiers).
            CREATE TABLE IF NOT EXISTS records (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                chart_hash      TEXT NOT NULL,
                mode            TEXT NOT NULL,
                total_score     INTEGER NOT NULL,
                notation        TEXT NOT NULL,
                record_json     TEXT NOT NULL,
                version         TEXT NOT NULL,
                analyzed_at     TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(chart_hash, mode)
            );

            CREATE INDEX IF NOT EXISTS idx_records_hash ON records(chart_hash);
            ",
        )?;
        Ok(())
    }
}
