//! Session correlation and lifecycle
//!
//! Maps a client-supplied session key to a durable [`Session`] record and
//! enforces the lifecycle:
//!
//! ```text
//!   NEW ──any event──► ACTIVE ──page_exit / session_timeout──► TERMINAL
//!                       │  ▲                                     │
//!                       └──┘ page_view (+1 page), other events   └──► late events stored,
//!                                                                     session untouched
//! ```
//!
//! [`apply_event`] is the pure transition function. [`SessionCorrelator`]
//! wraps it with domain validation, per-key serialization ([`SessionLocks`])
//! and the transactional write in [`crate::db::Database::record_event`].

mod correlator;
mod locks;

pub use correlator::{IngestOutcome, SessionCorrelator};
pub use locks::SessionLocks;

use crate::types::{Domain, EventType, NormalizedEvent, Session};

/// What an inbound event did to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// NEW → ACTIVE
    Created,
    /// NEW → TERMINAL: the first event seen was itself an exit
    CreatedTerminal,
    /// ACTIVE → ACTIVE
    Updated,
    /// ACTIVE → TERMINAL
    Terminated,
    /// TERMINAL: event is stored, session is not mutated
    LateArrival,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Created => "created",
            Transition::CreatedTerminal => "created_terminal",
            Transition::Updated => "updated",
            Transition::Terminated => "terminated",
            Transition::LateArrival => "late_arrival",
        }
    }

    pub fn is_creation(&self) -> bool {
        matches!(self, Transition::Created | Transition::CreatedTerminal)
    }

    pub fn mutates_session(&self) -> bool {
        !matches!(self, Transition::LateArrival)
    }
}

/// Apply `event` to the current session state.
///
/// `existing` is `None` for a session key never seen before, in which case a
/// new session bound to `domain` is created with id `new_id()`. All mutation
/// timestamps come from `event.received_at`; the client `timestamp` only seeds
/// `start_time` on creation.
pub fn apply_event(
    existing: Option<Session>,
    event: &NormalizedEvent,
    domain: &Domain,
    new_id: impl FnOnce() -> String,
) -> (Session, Transition) {
    let Some(mut session) = existing else {
        let mut session = create(event, domain, new_id());
        if event.event_type.is_terminal() {
            terminate(&mut session, event);
            return (session, Transition::CreatedTerminal);
        }
        return (session, Transition::Created);
    };

    if !session.is_active {
        return (session, Transition::LateArrival);
    }

    if event.event_type.is_terminal() {
        terminate(&mut session, event);
        return (session, Transition::Terminated);
    }

    session.last_activity = event.received_at;
    if event.event_type == EventType::PageView {
        session.page_count += 1;
    }
    if !event.page.is_empty() {
        session.last_page = event.page.clone();
    }
    (session, Transition::Updated)
}

fn create(event: &NormalizedEvent, domain: &Domain, id: String) -> Session {
    Session {
        id,
        session_key: event.session_id.clone(),
        domain_id: domain.domain_id,
        domain_name: domain.domain_name.clone(),
        user_agent: event.user_agent.clone(),
        referrer: event.referrer.clone(),
        start_time: event.timestamp,
        last_activity: event.timestamp,
        end_time: None,
        // First contact always counts as one page, whatever the event type.
        page_count: 1,
        last_page: event.page.clone(),
        exit_page: None,
        duration: None,
        is_active: true,
    }
}

fn terminate(session: &mut Session, event: &NormalizedEvent) {
    // endTime >= startTime even when the client clock ran ahead of ours.
    let end = event.received_at.max(session.start_time);

    let exit_page = match event.event_type {
        EventType::SessionTimeout if !session.last_page.is_empty() => session.last_page.clone(),
        _ => event.page.clone(),
    };

    session.last_activity = end;
    session.end_time = Some(end);
    session.exit_page = Some(exit_page);
    session.duration = Some((end - session.start_time).num_seconds());
    session.is_active = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn domain() -> Domain {
        Domain {
            domain_id: 7,
            domain_name: "shop.example.com".to_string(),
            is_active: true,
        }
    }

    fn event(kind: &str, page: &str, offset_secs: i64) -> NormalizedEvent {
        let at = t0() + Duration::seconds(offset_secs);
        NormalizedEvent {
            session_id: "s1".to_string(),
            domain_name: "shop.example.com".to_string(),
            event_type: EventType::parse(kind),
            page: page.to_string(),
            element: None,
            timestamp: at,
            received_at: at,
            user_agent: Some("Mozilla/5.0".to_string()),
            referrer: None,
            payload: json!({}),
        }
    }

    fn run(events: &[NormalizedEvent]) -> (Session, Vec<Transition>) {
        let mut current: Option<Session> = None;
        let mut transitions = Vec::new();
        for ev in events {
            let (session, transition) =
                apply_event(current.take(), ev, &domain(), || "internal-1".to_string());
            transitions.push(transition);
            current = Some(session);
        }
        (current.unwrap(), transitions)
    }

    #[test]
    fn test_checkout_scenario() {
        let (session, transitions) = run(&[
            event("page_view", "/", 0),
            event("page_view", "/cart", 30),
            event("page_exit", "/checkout", 65),
        ]);

        assert_eq!(
            transitions,
            vec![
                Transition::Created,
                Transition::Updated,
                Transition::Terminated
            ]
        );
        assert_eq!(session.page_count, 2);
        assert!(!session.is_active);
        assert_eq!(session.exit_page.as_deref(), Some("/checkout"));
        assert_eq!(session.duration, Some(65));
        assert_eq!(session.end_time, Some(t0() + Duration::seconds(65)));
    }

    #[test]
    fn test_creation_floors_page_count_at_one() {
        let (session, transitions) = run(&[event("interaction", "/pricing", 0)]);
        assert_eq!(transitions, vec![Transition::Created]);
        assert_eq!(session.page_count, 1);
        assert!(session.is_active);
        assert_eq!(session.duration, None);
        assert_eq!(session.exit_page, None);
        assert_eq!(session.domain_id, 7);
    }

    #[test]
    fn test_terminal_session_is_immutable() {
        let (terminal, _) = run(&[
            event("page_view", "/", 0),
            event("page_exit", "/about", 10),
        ]);

        for late in [
            event("page_view", "/late", 20),
            event("page_exit", "/other", 30),
            event("session_timeout", "/x", 40),
        ] {
            let (after, transition) =
                apply_event(Some(terminal.clone()), &late, &domain(), || unreachable!());
            assert_eq!(transition, Transition::LateArrival);
            assert_eq!(after, terminal);
        }
    }

    #[test]
    fn test_timeout_reuses_last_known_page() {
        let (session, _) = run(&[
            event("page_view", "/", 0),
            event("page_view", "/docs", 5),
            event("session_timeout", "", 1805),
        ]);
        assert_eq!(session.exit_page.as_deref(), Some("/docs"));
        assert_eq!(session.duration, Some(1805));
    }

    #[test]
    fn test_first_event_exit_creates_terminal_session() {
        let (session, transitions) = run(&[event("page_exit", "/landing", 0)]);
        assert_eq!(transitions, vec![Transition::CreatedTerminal]);
        assert_eq!(session.page_count, 1);
        assert_eq!(session.duration, Some(0));
        assert_eq!(session.exit_page.as_deref(), Some("/landing"));
    }

    #[test]
    fn test_client_clock_skew_never_yields_negative_duration() {
        let mut first = event("page_view", "/", 0);
        // Client clock is five minutes ahead of the server.
        first.timestamp = first.received_at + Duration::minutes(5);
        let (session, _) = run(&[first, event("page_exit", "/", 10)]);
        assert_eq!(session.duration, Some(0));
        assert!(session.end_time.unwrap() >= session.start_time);
    }

    #[test]
    fn test_non_page_events_only_touch_activity() {
        let (session, _) = run(&[
            event("page_view", "/", 0),
            event("scroll_milestone", "/", 12),
            event("custom_thing", "/", 14),
        ]);
        assert_eq!(session.page_count, 1);
        assert_eq!(session.last_activity, t0() + Duration::seconds(14));
        assert!(session.is_active);
    }
}
