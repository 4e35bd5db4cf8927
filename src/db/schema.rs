//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- One named collection per user (<user>_context)
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Append-only conversation turns
        CREATE TABLE IF NOT EXISTS turns (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            collection TEXT NOT NULL REFERENCES collections(name),
            user_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('human', 'assistant')),
            content TEXT NOT NULL,
            created_at_us INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            embedding BLOB
        );

        CREATE INDEX IF NOT EXISTS idx_turns_user_time ON turns(user_id, created_at_us, seq);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    // sqlite-vec is registered globally in db::init() before any connection opens
    conn.execute_batch(
        r"
        CREATE VIRTUAL TABLE IF NOT EXISTS turns_vec USING vec0(
            turn_id TEXT PRIMARY KEY,
            embedding FLOAT[768]
        );

        -- Turns are write-once
        CREATE TRIGGER IF NOT EXISTS turns_no_update
        BEFORE UPDATE ON turns
        BEGIN
            SELECT RAISE(ABORT, 'turns are immutable');
        END;

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2 (vector search)");
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    // Partition vectors by owner so KNN never ranks other users' turns
    conn.execute_batch(
        r"
        DROP TABLE IF EXISTS turns_vec;

        CREATE VIRTUAL TABLE turns_vec USING vec0(
            turn_id TEXT PRIMARY KEY,
            user_id TEXT partition key,
            embedding FLOAT[768]
        );

        INSERT INTO turns_vec (turn_id, user_id, embedding)
        SELECT id, user_id, embedding FROM turns WHERE embedding IS NOT NULL;

        PRAGMA user_version = 3;
        ",
    )?;

    tracing::info!("migrated to schema v3 (per-user vector partitions)");
    Ok(())
}
