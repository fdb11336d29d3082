//! # Discovery Database
//!
//! Single SQLite database holding the project, its stages and the stage
//! version history. Lives at `.discovery/discovery.db` by default.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::io::get_runtime_path;

/// Latest schema version
const SCHEMA_VERSION: i32 = 2;

/// Database file name inside the runtime directory
pub const DB_FILE: &str = "discovery.db";

/// Owner of the shared SQLite connection
pub struct DiscoveryDb {
    conn: Arc<Mutex<Connection>>,
}

impl DiscoveryDb {
    /// Open or create the database in the runtime directory
    pub fn open() -> Result<Self> {
        Self::open_at(get_runtime_path().join(DB_FILE))
    }

    /// Open database at a specific path (useful for testing)
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn =
            Connection::open(path.as_ref()).context("Failed to open discovery database")?;
        Self::from_connection(conn)
    }

    /// In-memory database, migrated and ready
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
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

    /// Current schema version recorded in the database
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let version = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
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
            conn.execute("INSERT OR REPLACE INTO schema_version (version) VALUES (?1)", [1])?;
        }
        if current_version < 2 {
            Self::migrate_v2(&conn)?;
            conn.execute("INSERT OR REPLACE INTO schema_version (version) VALUES (?1)", [2])?;
        }

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                from = current_version,
                to = SCHEMA_VERSION,
                "Discovery database migrated"
            );
        }
        Ok(())
    }

    /// Version 1: projects, stages and stage_versions
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                current_stage TEXT NOT NULL DEFAULT 'DOMAIN',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL REFERENCES projects(id),
                stage_name TEXT NOT NULL,
                input TEXT NOT NULL DEFAULT '',
                output TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                questions TEXT NOT NULL DEFAULT '[]',
                answers TEXT NOT NULL DEFAULT '{}',
                grounding_sources TEXT,
                search_entry_point_html TEXT,
                coherence_score INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE (project_id, stage_name)
            );

            CREATE TABLE IF NOT EXISTS stage_versions (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                stage_name TEXT NOT NULL,
                output TEXT NOT NULL,
                questions TEXT NOT NULL DEFAULT '[]',
                coherence_score INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_stage_versions_stage
                ON stage_versions(project_id, stage_name, created_at);
            "#,
        )?;
        Ok(())
    }

    /// Version 2: revision token, attached context and version input
    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            ALTER TABLE projects ADD COLUMN revision INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE stages ADD COLUMN urls TEXT NOT NULL DEFAULT '[]';
            ALTER TABLE stages ADD COLUMN files TEXT NOT NULL DEFAULT '[]';
            ALTER TABLE stages ADD COLUMN format_reference TEXT;
            ALTER TABLE stage_versions ADD COLUMN input TEXT NOT NULL DEFAULT '';
            "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_runs_all_migrations() {
        let db = DiscoveryDb::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);

        let conn = db.connection();
        let conn = conn.lock().unwrap();
        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('stages')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(columns.contains(&"format_reference".to_string()));
        assert!(columns.contains(&"coherence_score".to_string()));
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(DB_FILE);

        DiscoveryDb::open_at(&path).unwrap();
        let db = DiscoveryDb::open_at(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }
}
