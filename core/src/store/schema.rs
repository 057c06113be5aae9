//! On-disk schema for the state store.

use rusqlite::Connection;

use crate::errors::CoreError;

/// Bump when the table layout changes. A store opened against a different
/// version fails closed rather than attempting a migration.
pub const SCHEMA_VERSION: i32 = 1;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS schema_info (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS device_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    device_id TEXT NOT NULL,
    proxy_config TEXT NOT NULL DEFAULT 'System',
    proxy_type TEXT,
    proxy_server TEXT,
    proxy_port INTEGER,
    proxy_username TEXT,
    proxy_password TEXT,
    proxy_authenticated INTEGER NOT NULL DEFAULT 0,
    proxy_exceptions TEXT
);

CREATE TABLE IF NOT EXISTS server_bindings (
    local_folder TEXT PRIMARY KEY,
    server_url TEXT NOT NULL,
    remote_user TEXT NOT NULL,
    remote_password TEXT,
    remote_token TEXT
);

CREATE TABLE IF NOT EXISTS last_known_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    local_folder TEXT NOT NULL REFERENCES server_bindings(local_folder) ON DELETE CASCADE,
    local_path TEXT,
    remote_ref TEXT,
    local_parent_path TEXT,
    remote_parent_ref TEXT,
    local_name TEXT,
    remote_name TEXT,
    remote_parent_path TEXT,
    folderish INTEGER NOT NULL DEFAULT 0,
    local_state TEXT NOT NULL DEFAULT 'unknown',
    remote_state TEXT NOT NULL DEFAULT 'unknown',
    last_sync_error_date TEXT
);

CREATE INDEX IF NOT EXISTS idx_states_local_folder ON last_known_states(local_folder);
CREATE INDEX IF NOT EXISTS idx_states_local_path ON last_known_states(local_folder, local_path);
CREATE INDEX IF NOT EXISTS idx_states_remote_ref ON last_known_states(local_folder, remote_ref);
";

/// Creates the schema if the database is fresh, or validates the stored
/// version against [`SCHEMA_VERSION`] if it already exists.
pub fn ensure_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_info'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0)?;

    if !table_exists {
        conn.execute_batch(DDL)?;
        conn.execute("INSERT INTO schema_info (version) VALUES (?1)", [SCHEMA_VERSION])?;
        return Ok(());
    }

    let stored: i32 = conn.query_row("SELECT version FROM schema_info", [], |row| row.get(0))?;
    if stored != SCHEMA_VERSION {
        return Err(CoreError::Schema(format!(
            "store was created with schema version {stored}, this build expects {SCHEMA_VERSION}"
        )));
    }
    Ok(())
}
