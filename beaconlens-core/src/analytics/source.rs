//! Snapshot access for the aggregation engine.

use crate::error::Result;
use crate::scope::Scope;
use crate::types::{Event, Session};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Inclusive `[from, to]` range over session start times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The `days` days ending at `now`, starting no earlier than the
    /// earliest representable instant.
    pub fn trailing_days(days: i64, now: DateTime<Utc>) -> Self {
        let from = Duration::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(from, now)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from <= ts && ts <= self.to
    }
}

/// Read-only access to sessions and events for one scope and window.
///
/// A session belongs to the window when its `start_time` does; an event
/// belongs when its session does. An empty scope yields nothing.
pub trait AnalyticsSource: Send + Sync {
    /// In-window sessions, oldest `start_time` first (ties by id).
    fn sessions(&self, scope: &Scope, window: &TimeWindow) -> Result<Vec<Session>>;

    /// Events of in-window sessions, in insertion order.
    fn events(&self, scope: &Scope, window: &TimeWindow) -> Result<Vec<Event>>;
}

impl<T: AnalyticsSource + ?Sized> AnalyticsSource for Arc<T> {
    fn sessions(&self, scope: &Scope, window: &TimeWindow) -> Result<Vec<Session>> {
        (**self).sessions(scope, window)
    }

    fn events(&self, scope: &Scope, window: &TimeWindow) -> Result<Vec<Event>> {
        (**self).events(scope, window)
    }
}

/// Fixed in-memory snapshot, for reports over exported data and for tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    sessions: Vec<Session>,
    events: Vec<Event>,
}

impl MemorySource {
    pub fn new(sessions: Vec<Session>, events: Vec<Event>) -> Self {
        Self { sessions, events }
    }
}

impl AnalyticsSource for MemorySource {
    fn sessions(&self, scope: &Scope, window: &TimeWindow) -> Result<Vec<Session>> {
        let mut out: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| scope.contains(s.domain_id) && window.contains(s.start_time))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn events(&self, scope: &Scope, window: &TimeWindow) -> Result<Vec<Event>> {
        let members: HashSet<String> = self
            .sessions(scope, window)?
            .into_iter()
            .map(|s| s.id)
            .collect();
        let mut out: Vec<Event> = self
            .events
            .iter()
            .filter(|e| members.contains(&e.session_ref))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.id);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fixtures::t0;

    #[test]
    fn test_trailing_days() {
        let window = TimeWindow::trailing_days(7, t0());
        assert_eq!(window.from, t0() - Duration::days(7));
        assert!(window.contains(t0()));
        assert!(!window.contains(t0() + Duration::seconds(1)));
    }

    #[test]
    fn test_trailing_days_saturates_at_earliest_instant() {
        for days in [i64::MAX, 200_000_000] {
            let window = TimeWindow::trailing_days(days, t0());
            assert_eq!(window.from, DateTime::<Utc>::MIN_UTC);
            assert_eq!(window.to, t0());
        }
    }
}
