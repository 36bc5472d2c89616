use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS images (
    path TEXT PRIMARY KEY NOT NULL,
    fingerprint INTEGER NOT NULL,
    width REAL NOT NULL,
    height REAL NOT NULL,
    items TEXT NOT NULL,
    indexed_at TEXT NOT NULL
);
";

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}
