//! # Scholar Database
//!
//! Single SQLite database holding sessions and their checkpoints,
//! by default at `.scholar/scholar.db`.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Database handle shared by the session and checkpoint stores
pub struct ScholarDb {
    conn: Arc<Mutex<Connection>>,
}

impl ScholarDb {
    /// Open or create the database at `.scholar/scholar.db`
    pub fn open() -> Result<Self> {
        Self::open_at(".scholar/scholar.db")
    }

    /// Open database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open scholar database")?;
        Self::from_connection(conn)
    }

    /// Private in-memory database (tests, one-shot CLI runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Version 1: sessions and checkpoints
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                language TEXT NOT NULL DEFAULT 'en',
                status TEXT NOT NULL DEFAULT 'running',
                stage TEXT NOT NULL DEFAULT 'planning',
                error_category TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // versions are dense and monotonic per session
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT NOT NULL REFERENCES sessions(id),
                version INTEGER NOT NULL,
                stage TEXT NOT NULL,
                blackboard TEXT NOT NULL,
                pending_interrupt INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_id, version)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)",
            [],
        )?;

        tracing::info!("ScholarDb initialized with schema version {}", SCHEMA_VERSION);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_tables() {
        let db = ScholarDb::open_in_memory().unwrap();
        let conn = db.connection();
        let conn = conn.lock().unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"checkpoints".to_string()));
    }

    #[test]
    fn test_schema_version_tracking() {
        let path = std::env::temp_dir().join(format!("scholar-{}.db", uuid::Uuid::new_v4()));

        // Open twice - should not fail on second open
        let db1 = ScholarDb::open_at(&path).unwrap();
        drop(db1);

        let db2 = ScholarDb::open_at(&path).unwrap();
        let conn = db2.connection();
        let conn = conn.lock().unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();

        assert_eq!(version, SCHEMA_VERSION);

        drop(conn);
        let _ = std::fs::remove_file(&path);
    }
}
