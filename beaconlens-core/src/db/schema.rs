//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: sessions + append-only events
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id               TEXT PRIMARY KEY,   -- internal UUID
        session_key      TEXT NOT NULL UNIQUE, -- client-generated sessionId
        domain_id        INTEGER NOT NULL,
        domain_name      TEXT NOT NULL,
        user_agent       TEXT,
        referrer         TEXT,
        start_time       DATETIME NOT NULL,
        last_activity    DATETIME NOT NULL,
        end_time         DATETIME,
        page_count       INTEGER NOT NULL DEFAULT 1 CHECK (page_count >= 1),
        last_page        TEXT NOT NULL DEFAULT '',
        exit_page        TEXT,
        duration         INTEGER,
        is_active        INTEGER NOT NULL DEFAULT 1,

        -- Terminal fields are written together or not at all
        CHECK ((is_active = 1) = (duration IS NULL)),
        CHECK ((is_active = 1) = (exit_page IS NULL)),
        CHECK ((is_active = 1) = (end_time IS NULL))
    );

    CREATE TABLE IF NOT EXISTS events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        session_ref      TEXT NOT NULL REFERENCES sessions(id),
        event_type       TEXT NOT NULL,      -- verbatim, unknown kinds included
        page             TEXT NOT NULL,
        element          TEXT,
        data             JSON NOT NULL,
        ts               DATETIME NOT NULL,  -- client clock
        received_at      DATETIME NOT NULL   -- server clock
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_domain_start ON sessions(domain_id, start_time);
    CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_ref);
    "#,
    // Version 2: aggregation filters by kind within a session set
    r#"
    CREATE INDEX IF NOT EXISTS idx_events_session_type ON events(session_ref, event_type);
    CREATE INDEX IF NOT EXISTS idx_sessions_active ON sessions(domain_id) WHERE is_active = 1;
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
