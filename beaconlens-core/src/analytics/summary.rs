//! Session summary, rankings and the hourly histogram.
//!
//! Every function here is pure: it takes an already-scoped snapshot and
//! never touches storage.

use crate::types::{Event, EventType, Session};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;

/// Headline numbers for a set of sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub terminal_sessions: usize,
    /// Mean duration of terminal sessions, whole seconds
    pub average_duration: i64,
    /// Mean page count, two decimals
    pub average_page_count: f64,
    /// Known-type events only
    pub total_events: usize,
}

/// A page and how often it occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageCount {
    pub page: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeCount {
    pub event_type: EventType,
    pub count: usize,
}

/// Sessions started within one wall-clock UTC hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyBucket {
    /// Start of the hour
    pub hour: DateTime<Utc>,
    pub count: usize,
}

/// Number of buckets in [`hourly_activity`].
pub const HOURLY_BUCKETS: usize = 24;

pub fn summarize(sessions: &[Session], events: &[Event]) -> Summary {
    let total_sessions = sessions.len();
    let active_sessions = sessions.iter().filter(|s| s.is_active).count();

    let durations: Vec<i64> = sessions.iter().filter_map(|s| s.duration).collect();
    let average_duration = if durations.is_empty() {
        0
    } else {
        (durations.iter().sum::<i64>() as f64 / durations.len() as f64).round() as i64
    };

    let average_page_count = if total_sessions == 0 {
        0.0
    } else {
        let mean = sessions.iter().map(|s| s.page_count).sum::<i64>() as f64 / total_sessions as f64;
        (mean * 100.0).round() / 100.0
    };

    Summary {
        total_sessions,
        active_sessions,
        terminal_sessions: total_sessions - active_sessions,
        average_duration,
        average_page_count,
        total_events: events.iter().filter(|e| e.event_type.is_known()).count(),
    }
}

/// Count occurrences, most frequent first; ties keep first-seen order.
fn rank<K: Eq + Hash + Clone>(keys: impl IntoIterator<Item = K>) -> Vec<(K, usize)> {
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut counts: Vec<(K, usize)> = Vec::new();
    for key in keys {
        match index.get(&key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(key.clone(), counts.len());
                counts.push((key, 1));
            }
        }
    }
    // sort_by is stable
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Most common exit pages among terminal sessions, at most `top_n`.
///
/// Sessions are visited oldest first (ties by id), which fixes the order of
/// equally ranked pages.
pub fn exit_pages(sessions: &[Session], top_n: usize) -> Vec<PageCount> {
    let mut terminal: Vec<&Session> = sessions.iter().filter(|s| !s.is_active).collect();
    terminal.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));

    rank(terminal.into_iter().filter_map(|s| s.exit_page.clone()))
        .into_iter()
        .take(top_n)
        .map(|(page, count)| PageCount { page, count })
        .collect()
}

/// Known event types by frequency. Not truncated.
pub fn event_types(events: &[Event]) -> Vec<EventTypeCount> {
    rank(
        events
            .iter()
            .filter(|e| e.event_type.is_known())
            .map(|e| e.event_type.clone()),
    )
    .into_iter()
    .map(|(event_type, count)| EventTypeCount { event_type, count })
    .collect()
}

/// Most viewed pages, at most `top_n`.
pub fn page_views(events: &[Event], top_n: usize) -> Vec<PageCount> {
    rank(
        events
            .iter()
            .filter(|e| e.event_type == EventType::PageView)
            .map(|e| e.page.clone()),
    )
    .into_iter()
    .take(top_n)
    .map(|(page, count)| PageCount { page, count })
    .collect()
}

/// Session starts per hour for the 24 hours ending with the hour holding
/// `now`, oldest first.
pub fn hourly_activity(sessions: &[Session], now: DateTime<Utc>) -> Vec<HourlyBucket> {
    let current = hour_start(now);
    let first = current - Duration::hours(HOURLY_BUCKETS as i64 - 1);
    let end = current + Duration::hours(1);

    let mut counts = [0usize; HOURLY_BUCKETS];
    for session in sessions {
        if session.start_time < first || session.start_time >= end {
            continue;
        }
        let idx = (session.start_time - first).num_hours() as usize;
        if let Some(slot) = counts.get_mut(idx) {
            *slot += 1;
        }
    }

    counts
        .iter()
        .enumerate()
        .map(|(i, &count)| HourlyBucket {
            hour: first + Duration::hours(i as i64),
            count,
        })
        .collect()
}

/// Truncate to the start of the UTC hour.
pub fn hour_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts - Duration::seconds(ts.timestamp().rem_euclid(3600))
        - Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
}

/// Newest sessions first, at most `limit`.
pub fn recent_sessions(sessions: &[Session], limit: usize) -> Vec<Session> {
    let mut sorted: Vec<&Session> = sessions.iter().collect();
    sorted.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| b.id.cmp(&a.id)));
    sorted.into_iter().take(limit).cloned().collect()
}
