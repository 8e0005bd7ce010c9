//! Database repository layer
//!
//! Session upserts, append-only event inserts, and the scoped reads that feed
//! the aggregation engine.

use crate::analytics::{AnalyticsSource, TimeWindow};
use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::session::{self, Transition};
use crate::types::*;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{
    params, types::Type, Connection, OpenFlags, OptionalExtension, Row, ToSql,
    TransactionBehavior,
};
use std::path::Path;

/// Result of recording one inbound event.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// Row id of the appended event
    pub event_id: i64,
    /// Session state after the event was applied
    pub session: Session,
    /// What the event did to the session
    pub transition: Transition,
}

/// Row counts for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub sessions: i64,
    pub active_sessions: i64,
    pub events: i64,
}

/// Database handle.
///
/// Writes go through a single writer connection. File-backed databases also
/// open a read-only connection so aggregation queries never wait on the
/// writer lock (WAL mode lets them run concurrently).
pub struct Database {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.execute_batch("PRAGMA busy_timeout = 5000;")?;

        Ok(Self {
            writer: Mutex::new(conn),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.writer.lock();
        super::schema::run_migrations(&conn)
    }

    /// Connection used for analytical reads.
    fn read_conn(&self) -> MutexGuard<'_, Connection> {
        match &self.reader {
            Some(reader) => reader.lock(),
            None => self.writer.lock(),
        }
    }

    // ============================================
    // Ingestion
    // ============================================

    /// Apply `event` to its session and append it to the event store.
    ///
    /// Runs as one IMMEDIATE transaction: load the session by key, compute the
    /// transition, write the session, append the event. The session write is
    /// guarded at the SQL level too (`ON CONFLICT DO NOTHING` for creation,
    /// `WHERE is_active = 1` for updates), so a duplicate create or a second
    /// terminal write can never change a stored row.
    pub fn record_event(&self, event: &NormalizedEvent, domain: &Domain) -> Result<RecordedEvent> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                "SELECT * FROM sessions WHERE session_key = ?",
                [&event.session_id],
                Self::row_to_session,
            )
            .optional()?;

        let (session, transition) = session::apply_event(existing, event, domain, || {
            uuid::Uuid::new_v4().to_string()
        });

        match transition {
            Transition::Created | Transition::CreatedTerminal => {
                let inserted = Self::insert_session(&tx, &session)?;
                if inserted == 0 {
                    // The IMMEDIATE transaction holds the write lock, so a
                    // concurrent create means another process bypassed it.
                    return Err(Error::Database(rusqlite::Error::StatementChangedRows(0)));
                }
            }
            Transition::Updated | Transition::Terminated => {
                Self::update_active_session(&tx, &session)?;
            }
            Transition::LateArrival => {}
        }

        tx.execute(
            r#"
            INSERT INTO events (session_ref, event_type, page, element, data, ts, received_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                session.id,
                event.event_type.as_str(),
                event.page,
                event.element,
                event.payload.to_string(),
                format_timestamp(event.timestamp),
                format_timestamp(event.received_at),
            ],
        )?;
        let event_id = tx.last_insert_rowid();

        tx.commit()?;

        Ok(RecordedEvent {
            event_id,
            session,
            transition,
        })
    }

    fn insert_session(conn: &Connection, session: &Session) -> Result<usize> {
        let inserted = conn.execute(
            r#"
            INSERT INTO sessions (id, session_key, domain_id, domain_name, user_agent, referrer,
                                  start_time, last_activity, end_time, page_count, last_page,
                                  exit_page, duration, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(session_key) DO NOTHING
            "#,
            params![
                session.id,
                session.session_key,
                session.domain_id,
                session.domain_name,
                session.user_agent,
                session.referrer,
                format_timestamp(session.start_time),
                format_timestamp(session.last_activity),
                session.end_time.map(format_timestamp),
                session.page_count,
                session.last_page,
                session.exit_page,
                session.duration,
                session.is_active,
            ],
        )?;
        Ok(inserted)
    }

    fn update_active_session(conn: &Connection, session: &Session) -> Result<usize> {
        let updated = conn.execute(
            r#"
            UPDATE sessions SET
                last_activity = ?2,
                end_time = ?3,
                page_count = ?4,
                last_page = ?5,
                exit_page = ?6,
                duration = ?7,
                is_active = ?8
            WHERE id = ?1 AND is_active = 1
            "#,
            params![
                session.id,
                format_timestamp(session.last_activity),
                session.end_time.map(format_timestamp),
                session.page_count,
                session.last_page,
                session.exit_page,
                session.duration,
                session.is_active,
            ],
        )?;
        Ok(updated)
    }

    // ============================================
    // Session reads
    // ============================================

    /// Get a session by its client-supplied key
    pub fn get_session_by_key(&self, session_key: &str) -> Result<Option<Session>> {
        let conn = self.read_conn();
        conn.query_row(
            "SELECT * FROM sessions WHERE session_key = ?",
            [session_key],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Count session rows sharing a client key (always 0 or 1).
    pub fn count_sessions_with_key(&self, session_key: &str) -> Result<i64> {
        let conn = self.read_conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE session_key = ?",
            [session_key],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Events of one session, in arrival order
    pub fn get_session_events(&self, session_id: &str) -> Result<Vec<Event>> {
        let conn = self.read_conn();
        let mut stmt = conn.prepare("SELECT * FROM events WHERE session_ref = ? ORDER BY id ASC")?;
        let events = stmt
            .query_map([session_id], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Row counts across the whole store
    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.read_conn();
        let counts = conn.query_row(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sessions),
                (SELECT COUNT(*) FROM sessions WHERE is_active = 1),
                (SELECT COUNT(*) FROM events)
            "#,
            [],
            |row| {
                Ok(StoreCounts {
                    sessions: row.get(0)?,
                    active_sessions: row.get(1)?,
                    events: row.get(2)?,
                })
            },
        )?;
        Ok(counts)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
        Ok(Session {
            id: row.get("id")?,
            session_key: row.get("session_key")?,
            domain_id: row.get("domain_id")?,
            domain_name: row.get("domain_name")?,
            user_agent: row.get("user_agent")?,
            referrer: row.get("referrer")?,
            start_time: ts_column(row, "start_time")?,
            last_activity: ts_column(row, "last_activity")?,
            end_time: opt_ts_column(row, "end_time")?,
            page_count: row.get("page_count")?,
            last_page: row.get("last_page")?,
            exit_page: row.get("exit_page")?,
            duration: row.get("duration")?,
            is_active: row.get("is_active")?,
        })
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
        let event_type: String = row.get("event_type")?;
        let data: String = row.get("data")?;
        let ts: String = row.get("ts")?;
        let received_at = ts_column(row, "received_at")?;

        Ok(Event {
            id: row.get("id")?,
            session_ref: row.get("session_ref")?,
            event_type: EventType::parse(&event_type),
            page: row.get("page")?,
            element: row.get("element")?,
            // Malformed historical payloads degrade to null instead of failing reads
            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
            // The client clock is advisory; an unreadable one reads as arrival time
            timestamp: parse_timestamp(&ts).unwrap_or(received_at),
            received_at,
        })
    }

    // ============================================
    // Scoped reads for aggregation
    // ============================================

    /// `domain_id IN (?, ?, ...)` fragment plus its parameters.
    fn scope_clause(scope: &Scope, column: &str) -> (String, Vec<Box<dyn ToSql>>) {
        let ids: Vec<DomainId> = scope.ids().collect();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let params = ids
            .into_iter()
            .map(|id| Box::new(id) as Box<dyn ToSql>)
            .collect();
        (format!("{} IN ({})", column, placeholders), params)
    }
}

impl AnalyticsSource for Database {
    fn sessions(&self, scope: &Scope, window: &TimeWindow) -> Result<Vec<Session>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let (scope_sql, mut params) = Self::scope_clause(scope, "domain_id");
        let sql = format!(
            "SELECT * FROM sessions WHERE {} AND start_time >= ? AND start_time <= ? \
             ORDER BY start_time ASC, id ASC",
            scope_sql
        );
        params.push(Box::new(format_timestamp(window.from)));
        params.push(Box::new(format_timestamp(window.to)));
        let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let conn = self.read_conn();
        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params_refs.as_slice(), Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn events(&self, scope: &Scope, window: &TimeWindow) -> Result<Vec<Event>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let (scope_sql, mut params) = Self::scope_clause(scope, "s.domain_id");
        let sql = format!(
            "SELECT e.* FROM events e JOIN sessions s ON e.session_ref = s.id \
             WHERE {} AND s.start_time >= ? AND s.start_time <= ? \
             ORDER BY e.id ASC",
            scope_sql
        );
        params.push(Box::new(format_timestamp(window.from)));
        params.push(Box::new(format_timestamp(window.to)));
        let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let conn = self.read_conn();
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params_refs.as_slice(), Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

fn ts_column(row: &Row, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(name)?;
    parse_stored_timestamp(row, name, &raw)
}

fn opt_ts_column(row: &Row, name: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(name)?;
    raw.map(|s| parse_stored_timestamp(row, name, &s))
        .transpose()
}

fn parse_stored_timestamp(row: &Row, name: &str, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(raw).ok_or_else(|| {
        let idx = row.as_ref().column_index(name).unwrap_or(0);
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp in {}: {}", name, raw).into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn domain() -> Domain {
        Domain {
            domain_id: 1,
            domain_name: "shop.example.com".to_string(),
            is_active: true,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn event(key: &str, kind: &str, page: &str, offset_secs: i64) -> NormalizedEvent {
        let at = t0() + Duration::seconds(offset_secs);
        NormalizedEvent {
            session_id: key.to_string(),
            domain_name: "shop.example.com".to_string(),
            event_type: EventType::parse(kind),
            page: page.to_string(),
            element: None,
            timestamp: at,
            received_at: at,
            user_agent: Some("test-agent".to_string()),
            referrer: Some("https://search.example/".to_string()),
            payload: json!({"title": "t"}),
        }
    }

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_record_event_creates_then_updates() {
        let db = db();

        let first = db.record_event(&event("s1", "page_view", "/", 0), &domain()).unwrap();
        assert_eq!(first.transition, Transition::Created);

        let second = db
            .record_event(&event("s1", "page_view", "/cart", 30), &domain())
            .unwrap();
        assert_eq!(second.transition, Transition::Updated);
        assert_eq!(second.session.id, first.session.id);

        let stored = db.get_session_by_key("s1").unwrap().unwrap();
        assert_eq!(stored.page_count, 2);
        assert_eq!(stored.referrer.as_deref(), Some("https://search.example/"));
        assert_eq!(stored.start_time, t0());

        let events = db.get_session_events(&stored.id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].page, "/cart");
        assert_eq!(events[0].data, json!({"title": "t"}));
    }

    #[test]
    fn test_late_events_are_stored_against_terminal_session() {
        let db = db();
        db.record_event(&event("s1", "page_view", "/", 0), &domain()).unwrap();
        db.record_event(&event("s1", "page_exit", "/checkout", 65), &domain())
            .unwrap();

        let late = db
            .record_event(&event("s1", "page_view", "/again", 90), &domain())
            .unwrap();
        assert_eq!(late.transition, Transition::LateArrival);

        let stored = db.get_session_by_key("s1").unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.duration, Some(65));
        assert_eq!(stored.exit_page.as_deref(), Some("/checkout"));
        assert_eq!(db.get_session_events(&stored.id).unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_event_types_are_stored_verbatim() {
        let db = db();
        let recorded = db
            .record_event(&event("s9", "rage_click", "/", 0), &domain())
            .unwrap();
        let events = db.get_session_events(&recorded.session.id).unwrap();
        assert_eq!(events[0].event_type.as_str(), "rage_click");
    }

    #[test]
    fn test_unreadable_client_timestamp_reads_as_arrival_time() {
        let db = db();
        let recorded = db.record_event(&event("s1", "page_view", "/", 0), &domain()).unwrap();
        db.writer
            .lock()
            .execute(
                "UPDATE events SET ts = '+255479-11-28T14:13:20.000Z' WHERE id = ?",
                [recorded.event_id],
            )
            .unwrap();

        let events = db.get_session_events(&recorded.session.id).unwrap();
        assert_eq!(events[0].timestamp, events[0].received_at);

        let window = TimeWindow::new(t0() - Duration::minutes(1), t0() + Duration::minutes(1));
        assert_eq!(db.events(&Scope::new([1]), &window).unwrap().len(), 1);
    }

    #[test]
    fn test_scoped_reads_respect_scope_and_window() {
        let db = db();
        let other = Domain {
            domain_id: 2,
            domain_name: "blog.example.com".to_string(),
            is_active: true,
        };
        db.record_event(&event("a", "page_view", "/", 0), &domain()).unwrap();
        db.record_event(&event("b", "page_view", "/", 0), &other).unwrap();
        db.record_event(&event("c", "page_view", "/", 7200), &domain())
            .unwrap();

        let window = TimeWindow::new(t0() - Duration::minutes(1), t0() + Duration::minutes(1));
        let sessions = db.sessions(&Scope::new([1]), &window).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_key, "a");

        let events = db.events(&Scope::new([1]), &window).unwrap();
        assert_eq!(events.len(), 1);

        assert!(db.sessions(&Scope::default(), &window).unwrap().is_empty());
        assert!(db.events(&Scope::default(), &window).unwrap().is_empty());

        let counts = db.counts().unwrap();
        assert_eq!(counts.sessions, 3);
        assert_eq!(counts.events, 3);
        assert_eq!(counts.active_sessions, 3);
    }

    #[test]
    fn test_file_backed_database_reads_through_reader() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("nested/data.db")).unwrap();
        db.migrate().unwrap();

        db.record_event(&event("s1", "page_view", "/", 0), &domain()).unwrap();
        assert_eq!(db.count_sessions_with_key("s1").unwrap(), 1);
        assert!(db.get_session_by_key("missing").unwrap().is_none());
    }
}
