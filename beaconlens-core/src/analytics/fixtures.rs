//! Snapshot builders shared by the analytics unit tests.

use crate::types::{Event, EventType, Session};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

/// Active single-page session on `d<domain_id>.example`, started
/// `offset_secs` after [`t0`]. Internal id is `id-<key>`.
pub fn session(key: &str, domain_id: i64, offset_secs: i64) -> Session {
    let start = t0() + Duration::seconds(offset_secs);
    Session {
        id: format!("id-{}", key),
        session_key: key.to_string(),
        domain_id,
        domain_name: format!("d{}.example", domain_id),
        user_agent: None,
        referrer: None,
        start_time: start,
        last_activity: start,
        end_time: None,
        page_count: 1,
        last_page: "/".to_string(),
        exit_page: None,
        duration: None,
        is_active: true,
    }
}

pub trait SessionFixture {
    fn terminal(self, exit_page: &str, duration: i64) -> Session;
    fn pages(self, page_count: i64) -> Session;
}

impl SessionFixture for Session {
    fn terminal(mut self, exit_page: &str, duration: i64) -> Session {
        let end = self.start_time + Duration::seconds(duration);
        self.is_active = false;
        self.exit_page = Some(exit_page.to_string());
        self.duration = Some(duration);
        self.end_time = Some(end);
        self.last_activity = end;
        self
    }

    fn pages(mut self, page_count: i64) -> Session {
        self.page_count = page_count;
        self
    }
}

/// Event with an empty payload on session `id-<key>`.
pub fn event(id: i64, key: &str, kind: &str, page: &str) -> Event {
    event_with(id, key, kind, page, json!({}))
}

pub fn event_with(id: i64, key: &str, kind: &str, page: &str, data: Value) -> Event {
    Event {
        id,
        session_ref: format!("id-{}", key),
        event_type: EventType::parse(kind),
        page: page.to_string(),
        element: data.get("element").and_then(Value::as_str).map(str::to_string),
        data,
        timestamp: t0(),
        received_at: t0(),
    }
}
