pub mod repositories;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// Attributes mirrored into the auxiliary metrics tables
pub const PRICE_PER_SQM: &str = "price_per_sqm";
pub const MONTHLY_RENT: &str = "monthly_rent";
pub const SOCIAL_FOLLOWERS: &str = "social_followers";
pub const ENGAGEMENT_RATE: &str = "engagement_rate";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open (or create) the database at `path` and make sure the schema exists.
///
/// Lock waits are bounded by `busy_timeout`; a write that cannot get the lock
/// in time fails with `SQLITE_BUSY`.
pub fn establish_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, DatabaseError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    initialize_schema(&conn)?;
    Ok(conn)
}

pub fn initialize_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS locations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            attributes TEXT NOT NULL DEFAULT '{}',
            data_hash TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_locations_data_hash ON locations(data_hash);

        CREATE TABLE IF NOT EXISTS prices (
            location_id INTEGER PRIMARY KEY REFERENCES locations(id),
            price_per_sqm REAL,
            monthly_rent REAL
        );

        CREATE TABLE IF NOT EXISTS social_metrics (
            location_id INTEGER PRIMARY KEY REFERENCES locations(id),
            followers INTEGER,
            engagement_rate REAL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            removed_id INTEGER NOT NULL,
            survivor_id INTEGER NOT NULL,
            matched_id INTEGER NOT NULL,
            similarity_score INTEGER NOT NULL,
            distance_meters REAL NOT NULL,
            action TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_connection() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let conn = establish_connection(&db_path, Duration::from_millis(100)).unwrap();

        let test: i32 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(test, 1);
        assert!(db_path.exists());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('locations', 'prices', 'social_metrics', 'audit_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
