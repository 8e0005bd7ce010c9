//! Integration tests for the correlation and aggregation pipeline
//!
//! These run against a file-backed database in a temp dir so that the
//! separate reader connection is exercised alongside the writer.

use beaconlens_core::analytics::{HeatmapQuery, SummaryQuery};
use beaconlens_core::config::AnalyticsConfig;
use beaconlens_core::ingest::{normalize_beacon, RequestContext};
use beaconlens_core::{
    AnalyticsEngine, ConfigDomainRegistry, Database, Domain, EventType, NormalizedEvent, Scope,
    SessionCorrelator, TimeWindow, Transition,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

fn setup() -> (TempDir, Arc<SessionCorrelator>) {
    beaconlens_core::logging::init_test();
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("beaconlens.db")).unwrap();
    db.migrate().unwrap();
    let registry = ConfigDomainRegistry::new([
        Domain {
            domain_id: 1,
            domain_name: "shop.example.com".to_string(),
            is_active: true,
        },
        Domain {
            domain_id: 2,
            domain_name: "blog.example.com".to_string(),
            is_active: true,
        },
    ]);
    let correlator = SessionCorrelator::new(Arc::new(db), Arc::new(registry));
    (dir, Arc::new(correlator))
}

fn event(
    session: &str,
    domain: &str,
    kind: &str,
    page: &str,
    offset_secs: i64,
    payload: Value,
) -> NormalizedEvent {
    let at = t0() + Duration::seconds(offset_secs);
    NormalizedEvent {
        session_id: session.to_string(),
        domain_name: domain.to_string(),
        event_type: EventType::parse(kind),
        page: page.to_string(),
        element: None,
        timestamp: at,
        received_at: at,
        user_agent: Some("Mozilla/5.0".to_string()),
        referrer: None,
        payload,
    }
}

fn wide_window() -> TimeWindow {
    TimeWindow::new(t0() - Duration::days(1), t0() + Duration::days(1))
}

// ============================================
// Lifecycle scenarios
// ============================================

#[test]
fn test_checkout_session_lifecycle() {
    let (_dir, c) = setup();
    let shop = "shop.example.com";

    let first = c.ingest(&event("s1", shop, "page_view", "/", 0, json!({}))).unwrap();
    assert_eq!(first.transition, Transition::Created);
    c.ingest(&event("s1", shop, "page_view", "/cart", 30, json!({})))
        .unwrap();
    let exit = c
        .ingest(&event(
            "s1",
            shop,
            "page_exit",
            "/checkout",
            65,
            json!({"exitPage": "/checkout", "engagementScore": 7, "maxScrollDepth": 90}),
        ))
        .unwrap();
    assert_eq!(exit.transition, Transition::Terminated);

    let session = c.database().get_session_by_key("s1").unwrap().unwrap();
    assert_eq!(session.page_count, 2);
    assert!(!session.is_active);
    assert_eq!(session.exit_page.as_deref(), Some("/checkout"));
    assert_eq!(session.duration, Some(65));
    assert_eq!(c.database().get_session_events(&session.id).unwrap().len(), 3);
}

#[test]
fn test_terminal_session_ignores_later_events() {
    let (_dir, c) = setup();
    let shop = "shop.example.com";

    c.ingest(&event("s1", shop, "page_view", "/", 0, json!({}))).unwrap();
    c.ingest(&event("s1", shop, "page_exit", "/a", 10, json!({}))).unwrap();
    let frozen = c.database().get_session_by_key("s1").unwrap().unwrap();

    for (kind, offset) in [("page_exit", 20), ("page_view", 30), ("session_timeout", 40)] {
        let outcome = c.ingest(&event("s1", shop, kind, "/b", offset, json!({}))).unwrap();
        assert_eq!(outcome.transition, Transition::LateArrival);
    }

    let after = c.database().get_session_by_key("s1").unwrap().unwrap();
    assert_eq!(after, frozen);
    assert_eq!(c.database().get_session_events(&after.id).unwrap().len(), 5);
}

// ============================================
// Concurrency
// ============================================

#[test]
fn test_concurrent_first_events_create_one_session() {
    let (_dir, c) = setup();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let c = c.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                c.ingest(&event(
                    "s2",
                    "shop.example.com",
                    "page_view",
                    &format!("/p{}", i),
                    0,
                    json!({}),
                ))
                .unwrap()
                .transition
            })
        })
        .collect();

    let transitions: Vec<Transition> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(
        transitions.iter().filter(|t| t.is_creation()).count(),
        1,
        "exactly one event creates the session"
    );

    let db = c.database();
    assert_eq!(db.count_sessions_with_key("s2").unwrap(), 1);
    let session = db.get_session_by_key("s2").unwrap().unwrap();
    assert_eq!(session.page_count, threads as i64);
    assert_eq!(db.counts().unwrap().events, threads as i64);
}

#[test]
fn test_concurrent_exits_terminate_once() {
    let (_dir, c) = setup();
    c.ingest(&event("s3", "shop.example.com", "page_view", "/", 0, json!({})))
        .unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let c = c.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                c.ingest(&event(
                    "s3",
                    "shop.example.com",
                    "page_exit",
                    &format!("/exit{}", i),
                    10,
                    json!({}),
                ))
                .unwrap()
                .transition
            })
        })
        .collect();

    let terminated = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|t| *t == Transition::Terminated)
        .count();
    assert_eq!(terminated, 1);
}

// ============================================
// Aggregation over stored data
// ============================================

#[test]
fn test_reports_over_stored_events_are_scoped() {
    let (_dir, c) = setup();
    let shop = "shop.example.com";
    let blog = "blog.example.com";

    c.ingest(&event("a", shop, "page_view", "/", 0, json!({}))).unwrap();
    c.ingest(&event(
        "a",
        shop,
        "interaction",
        "/",
        5,
        json!({"viewportX": 10, "viewportY": 20, "element": "#buy"}),
    ))
    .unwrap();
    c.ingest(&event("a", shop, "page_exit", "/", 20, json!({"maxScrollDepth": 5})))
        .unwrap();
    c.ingest(&event("b", shop, "page_view", "/pricing", 30, json!({}))).unwrap();
    c.ingest(&event(
        "b",
        shop,
        "potential_exit",
        "/pricing",
        40,
        json!({"maxScrollDepth": 11, "timeOnPage": 10}),
    ))
    .unwrap();
    c.ingest(&event("z", blog, "page_view", "/post", 0, json!({}))).unwrap();
    c.ingest(&event("z", blog, "conversion", "/post", 9, json!({"type": "subscribe"})))
        .unwrap();

    let engine = AnalyticsEngine::new(c.database().clone(), AnalyticsConfig::default());
    let shop_only = Scope::new([1]);

    let report = engine
        .summary_report(
            &shop_only,
            &SummaryQuery {
                domain_id: None,
                window: wide_window(),
                limit: None,
            },
            t0(),
        )
        .unwrap();
    assert_eq!(report.summary.total_sessions, 2);
    assert_eq!(report.summary.terminal_sessions, 1);
    assert_eq!(report.summary.total_events, 5);
    assert_eq!(report.exit_pages.len(), 1);

    let heatmap = engine
        .heatmap_report(
            &shop_only,
            &HeatmapQuery {
                domain_id: None,
                window: wide_window(),
                page: None,
            },
        )
        .unwrap();
    // maxScrollDepth=5 is a bounce, 11 is kept
    assert_eq!(heatmap.summary.total_exit_events, 1);
    assert_eq!(heatmap.exit_heatmap[0].page, "/pricing");
    assert_eq!(heatmap.summary.total_clicks, 1);
    assert!(heatmap.conversions.is_empty());

    let foreign = engine
        .heatmap_report(
            &shop_only,
            &HeatmapQuery {
                domain_id: Some(2),
                window: wide_window(),
                page: None,
            },
        )
        .unwrap();
    assert_eq!(foreign.summary.pages_tracked, 0);
}

#[test]
fn test_beacon_query_flows_into_storage() {
    let (_dir, c) = setup();
    let ctx = RequestContext {
        received_at: t0(),
        user_agent: Some("Beacon/1.0".to_string()),
        referrer: None,
    };
    let normalized = normalize_beacon(
        "sessionId=s9&domain=shop.example.com&eventType=page_view&page=%2Fhome&data_title=Home",
        &ctx,
    )
    .unwrap();

    let outcome = c.ingest(&normalized).unwrap();
    let events = c.database().get_session_events(&outcome.session.id).unwrap();
    assert_eq!(events[0].data, json!({"title": "Home"}));
    assert_eq!(outcome.session.user_agent.as_deref(), Some("Beacon/1.0"));
}
