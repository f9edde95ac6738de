//! SQLite schema definitions and migrations.

use rusqlite::Connection;

use crate::error::{BackendError, StorageError, StorageResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        // Fresh database - create base schema then run all migrations
        create_schema_v1(conn)?;
        set_schema_version(conn, 1)?;
        migrate_schema(conn, 1)?;
    } else if current_version < SCHEMA_VERSION {
        migrate_schema(conn, current_version)?;
    }

    Ok(())
}

fn schema_error(action: &str, e: rusqlite::Error) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message: format!("Failed to {}: {}", action, e),
        source: None,
    })
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> StorageResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| schema_error("create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| schema_error("clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| schema_error("set schema_version", e))?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> StorageResult<()> {
    // Identity map. Surrogate ids are never reused.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS resource_identity (
            surrogate_id INTEGER PRIMARY KEY AUTOINCREMENT,
            partition_id INTEGER,
            resource_type TEXT NOT NULL,
            external_id TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
        [],
    )
    .map_err(|e| schema_error("create resource_identity table", e))?;

    // Current record, one row per resource
    conn.execute(
        "CREATE TABLE IF NOT EXISTS resources (
            surrogate_id INTEGER PRIMARY KEY REFERENCES resource_identity(surrogate_id),
            resource_type TEXT NOT NULL,
            partition_id INTEGER,
            version INTEGER NOT NULL,
            content_hash TEXT,
            encoding TEXT NOT NULL,
            index_status INTEGER,
            deleted_at TEXT,
            updated_at TEXT NOT NULL,
            published_at TEXT NOT NULL,
            has_tags INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )
    .map_err(|e| schema_error("create resources table", e))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS resource_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            surrogate_id INTEGER NOT NULL REFERENCES resources(surrogate_id),
            resource_type TEXT NOT NULL,
            partition_id INTEGER,
            version INTEGER NOT NULL,
            encoding TEXT NOT NULL,
            text TEXT,
            bytes BLOB,
            source_uri TEXT,
            request_id TEXT,
            updated_at TEXT NOT NULL,
            UNIQUE (surrogate_id, version)
        )",
        [],
    )
    .map_err(|e| schema_error("create resource_history table", e))?;

    // Shared, append-only tag definitions
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tag_definitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tag_type INTEGER NOT NULL,
            system TEXT,
            code TEXT,
            display TEXT,
            version TEXT,
            user_selected INTEGER
        )",
        [],
    )
    .map_err(|e| schema_error("create tag_definitions table", e))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS resource_tags (
            surrogate_id INTEGER NOT NULL REFERENCES resources(surrogate_id),
            tag_id INTEGER NOT NULL REFERENCES tag_definitions(id),
            PRIMARY KEY (surrogate_id, tag_id)
        )",
        [],
    )
    .map_err(|e| schema_error("create resource_tags table", e))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS history_tags (
            history_id INTEGER NOT NULL REFERENCES resource_history(id),
            surrogate_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL REFERENCES tag_definitions(id),
            PRIMARY KEY (history_id, tag_id)
        )",
        [],
    )
    .map_err(|e| schema_error("create history_tags table", e))?;

    create_indexes(conn)?;

    Ok(())
}

/// Create indexes.
fn create_indexes(conn: &Connection) -> StorageResult<()> {
    // An external id is unique per (partition, type); NULL partition is the default one
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_identity_external
         ON resource_identity(COALESCE(partition_id, -1), resource_type, external_id)
         WHERE external_id IS NOT NULL",
        [],
    )
    .map_err(|e| schema_error("create idx_identity_external", e))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_identity_type
         ON resource_identity(resource_type, partition_id)",
        [],
    )
    .map_err(|e| schema_error("create idx_identity_type", e))?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_tag_definition_identity
         ON tag_definitions(
            tag_type,
            COALESCE(system, ''),
            COALESCE(code, ''),
            COALESCE(version, ''),
            COALESCE(user_selected, -1)
         )",
        [],
    )
    .map_err(|e| schema_error("create idx_tag_definition_identity", e))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_tags_surrogate
         ON history_tags(surrogate_id)",
        [],
    )
    .map_err(|e| schema_error("create idx_history_tags_surrogate", e))?;

    Ok(())
}

/// Run migrations from a given version to the current version.
fn migrate_schema(conn: &Connection, from_version: i32) -> StorageResult<()> {
    let mut version = from_version;

    while version < SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(conn)?,
            other => {
                return Err(StorageError::Backend(BackendError::MigrationError {
                    message: format!("No migration from schema version {}", other),
                }));
            }
        }
        version += 1;
        set_schema_version(conn, version)?;
        tracing::debug!(version, "Migrated SQLite schema");
    }

    Ok(())
}

/// Migration v1 -> v2: inline tag snapshots on current and history rows.
fn migrate_v1_to_v2(conn: &Connection) -> StorageResult<()> {
    for table in ["resources", "resource_history"] {
        let has_column: bool = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = 'inline_tags'",
                    table
                ),
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)
            .map_err(|e| schema_error("inspect table columns", e))?;
        if !has_column {
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN inline_tags TEXT", table),
                [],
            )
            .map_err(|e| schema_error("add inline_tags column", e))?;
        }
    }
    Ok(())
}

/// Drop all tables (for testing).
#[cfg(test)]
pub fn drop_all_tables(conn: &Connection) -> StorageResult<()> {
    for table in [
        "history_tags",
        "resource_tags",
        "tag_definitions",
        "resource_history",
        "resources",
        "resource_identity",
        "schema_version",
    ] {
        conn.execute(&format!("DROP TABLE IF EXISTS {}", table), [])
            .map_err(|e| schema_error(&format!("drop {}", table), e))?;
    }
    Ok(())
}
