//! SQLite database management with migrations
//!
//! Holds the persisted image records and store metadata

use crate::error::{PhotofindError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, ErrorCode};
use std::path::{Path, PathBuf};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database file and bring the schema up to date
    ///
    /// A file that is not a SQLite database, or fails the integrity check, is
    /// reported as `StoreCorruption`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PhotofindError::io(e, format!("Failed to create store directory: {:?}", parent))
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA busy_timeout = 5000;
                PRAGMA foreign_keys = ON;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| {
                PhotofindError::Config(format!("Failed to create connection pool: {}", e))
            })?;

        let db = Self {
            pool,
            path: db_path.to_path_buf(),
        };

        {
            let conn = db.get_conn()?;
            // First statement that touches the file header
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )
            .map_err(|e| corruption_or(e, db_path))?;

            let integrity: String = conn
                .query_row("PRAGMA integrity_check", [], |row| row.get(0))
                .map_err(|e| corruption_or(e, db_path))?;
            if integrity != "ok" {
                return Err(PhotofindError::StoreCorruption(format!(
                    "{}: integrity check failed: {}",
                    db_path.display(),
                    integrity
                )));
            }
        }

        db.migrate()?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the database file plus its write-ahead log
    pub fn size_bytes(&self) -> u64 {
        let wal = PathBuf::from(format!("{}-wal", self.path.display()));
        [self.path.as_path(), wal.as_path()]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Fold the WAL back into the main file
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    /// Read a value from the store_meta table
    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT value FROM store_meta WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        if current_version as usize > MIGRATIONS.len() {
            return Err(PhotofindError::StoreCorruption(format!(
                "{}: schema version {} is newer than this build supports",
                self.path.display(),
                current_version
            )));
        }

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying store migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }
}

/// Map "not a database"/"corrupt" SQLite failures to `StoreCorruption`
pub(crate) fn corruption_or(e: rusqlite::Error, path: &Path) -> PhotofindError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if matches!(err.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) {
            return PhotofindError::StoreCorruption(format!("{}: {}", path.display(), e));
        }
    }
    PhotofindError::Database(e)
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE store_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- One row per indexed image, keyed by the path-derived id
    CREATE TABLE images (
        id TEXT PRIMARY KEY,
        seq INTEGER NOT NULL UNIQUE,
        path TEXT NOT NULL,
        embedding BLOB NOT NULL,
        ocr_text TEXT NOT NULL DEFAULT '',
        faces TEXT NOT NULL DEFAULT '[]',  -- JSON [{name, confidence}]
        unknown_faces INTEGER NOT NULL DEFAULT 0,
        searchable_text TEXT NOT NULL DEFAULT '',
        indexed_at TEXT NOT NULL
    );

    CREATE INDEX idx_images_path ON images(path);
    "#,
];
