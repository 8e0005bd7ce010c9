//! Core domain types for beaconlens
//!
//! These types are the shared vocabulary of the telemetry pipeline: the
//! event taxonomy, the canonical inbound event, and the stored session and
//! event records.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Domain** | A website registered with the external domain registry |
//! | **Session** | A correlated run of visitor activity sharing a client-generated key |
//! | **Session key** | The client-supplied `sessionId`; the internal `id` is a UUID assigned here |
//! | **Event** | An append-only fact tied to a session |
//! | **Terminal transition** | The change that ends a session and fixes its duration and exit page |

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the external domain registry.
pub type DomainId = i64;

// ============================================
// Domains
// ============================================

/// A domain as seen by this core (read-only, owned by the registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub domain_id: DomainId,
    pub domain_name: String,
    pub is_active: bool,
}

// ============================================
// Event taxonomy
// ============================================

/// Kind of a telemetry event.
///
/// Unknown kinds are carried as [`EventType::Other`] so that ingestion never
/// fails on a type this build does not know about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventType {
    PageView,
    PageExit,
    PotentialExit,
    SessionTimeout,
    Interaction,
    FormSubmit,
    ScrollMilestone,
    Conversion,
    PageHide,
    PageShow,
    /// Stored verbatim, excluded from aggregation
    Other(String),
}

impl EventType {
    /// All known kinds, in taxonomy order.
    pub const KNOWN: [EventType; 10] = [
        EventType::PageView,
        EventType::PageExit,
        EventType::PotentialExit,
        EventType::SessionTimeout,
        EventType::Interaction,
        EventType::FormSubmit,
        EventType::ScrollMilestone,
        EventType::Conversion,
        EventType::PageHide,
        EventType::PageShow,
    ];

    /// Parse a wire name. Never fails: unknown names become `Other`.
    pub fn parse(s: &str) -> Self {
        match s {
            "page_view" => EventType::PageView,
            "page_exit" => EventType::PageExit,
            "potential_exit" => EventType::PotentialExit,
            "session_timeout" => EventType::SessionTimeout,
            "interaction" => EventType::Interaction,
            "form_submit" => EventType::FormSubmit,
            "scroll_milestone" => EventType::ScrollMilestone,
            "conversion" => EventType::Conversion,
            "page_hide" => EventType::PageHide,
            "page_show" => EventType::PageShow,
            other => EventType::Other(other.to_string()),
        }
    }

    /// Wire / storage name
    pub fn as_str(&self) -> &str {
        match self {
            EventType::PageView => "page_view",
            EventType::PageExit => "page_exit",
            EventType::PotentialExit => "potential_exit",
            EventType::SessionTimeout => "session_timeout",
            EventType::Interaction => "interaction",
            EventType::FormSubmit => "form_submit",
            EventType::ScrollMilestone => "scroll_milestone",
            EventType::Conversion => "conversion",
            EventType::PageHide => "page_hide",
            EventType::PageShow => "page_show",
            EventType::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, EventType::Other(_))
    }

    /// Ends the session it is applied to.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::PageExit | EventType::SessionTimeout)
    }

    /// Feeds the exit heatmap.
    pub fn is_exit_signal(&self) -> bool {
        matches!(
            self,
            EventType::PageExit | EventType::PotentialExit | EventType::SessionTimeout
        )
    }

    /// Payload fields producers are expected to send for this kind.
    ///
    /// Advisory only: a missing field never rejects the event.
    pub fn required_payload_fields(&self) -> &'static [&'static str] {
        match self {
            EventType::PageView => &["title", "url"],
            EventType::PageExit => &[
                "exitPage",
                "timeOnPage",
                "engagementScore",
                "maxScrollDepth",
                "scrollMilestones",
            ],
            EventType::PotentialExit => &["timeOnPage", "engagementScore", "maxScrollDepth"],
            EventType::Interaction => &["element", "elementType", "viewportX", "viewportY"],
            EventType::FormSubmit => &["formId", "fieldCount", "fields"],
            EventType::ScrollMilestone => &["depth", "timeToReach"],
            EventType::Conversion => &["type", "conversionPage", "timeToConvert"],
            EventType::SessionTimeout
            | EventType::PageHide
            | EventType::PageShow
            | EventType::Other(_) => &[],
        }
    }

    /// Required payload fields absent from `payload`.
    pub fn missing_payload_fields(&self, payload: &serde_json::Value) -> Vec<&'static str> {
        self.required_payload_fields()
            .iter()
            .copied()
            .filter(|field| payload.get(field).map_or(true, serde_json::Value::is_null))
            .collect()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::parse(&s)
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

// ============================================
// Inbound events
// ============================================

/// Canonical inbound event produced by both transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    /// Client-supplied correlation key
    pub session_id: String,
    pub domain_name: String,
    pub event_type: EventType,
    /// Path plus query string
    pub page: String,
    /// Optional selector for interaction-style events
    pub element: Option<String>,
    /// Client clock; analytical only, never gates transitions
    pub timestamp: DateTime<Utc>,
    /// Server arrival time; drives the session state machine
    pub received_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// Type-specific payload, always a JSON object
    pub payload: serde_json::Value,
}

// ============================================
// Sessions
// ============================================

/// Lifecycle state of a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Terminal,
}

/// A visitor session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Internal identifier (UUID), used as the event foreign key
    pub id: String,
    /// Client-supplied correlation key
    #[serde(rename = "sessionId")]
    pub session_key: String,
    pub domain_id: DomainId,
    pub domain_name: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub page_count: i64,
    /// Page of the most recently applied event
    pub last_page: String,
    pub exit_page: Option<String>,
    /// Whole seconds between start and end
    pub duration: Option<i64>,
    pub is_active: bool,
}

impl Session {
    pub fn state(&self) -> SessionState {
        if self.is_active {
            SessionState::Active
        } else {
            SessionState::Terminal
        }
    }
}

// ============================================
// Stored events
// ============================================

/// An event as persisted in the append-only store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    /// Internal session id (not the client key)
    pub session_ref: String,
    pub event_type: EventType,
    pub page: String,
    pub element: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// Storage format for timestamps: RFC 3339, UTC, millisecond precision.
///
/// Fixed width keeps lexical and chronological order identical in SQL.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whether [`format_timestamp`] output for `ts` reads back through
/// [`parse_timestamp`]. RFC 3339 only has four-digit years.
pub fn is_storable_timestamp(ts: DateTime<Utc>) -> bool {
    (0..=9999).contains(&ts.year())
}

/// Inverse of [`format_timestamp`], accepting any RFC 3339 offset.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
