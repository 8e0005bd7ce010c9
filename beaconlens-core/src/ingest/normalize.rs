//! Transport-specific decoding into [`NormalizedEvent`].

use crate::error::{Error, Result};
use crate::types::{is_storable_timestamp, EventType, NormalizedEvent};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Beacon keys carrying payload entries start with this prefix.
pub const DATA_PREFIX: &str = "data_";

/// Longest accepted value for page, element, user agent and referrer.
pub const MAX_FIELD_LEN: usize = 2048;

/// Epoch values at or above this are milliseconds (JS `Date.now()`).
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const FIELD_KEYS: [&str; 8] = [
    "sessionId",
    "domain",
    "eventType",
    "page",
    "timestamp",
    "userAgent",
    "referrer",
    "element",
];

/// Request-level facts that are not part of the event fields.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Server arrival time
    pub received_at: DateTime<Utc>,
    /// `User-Agent` header, used when the event carries none
    pub user_agent: Option<String>,
    /// `Referer` header, used when the event carries none
    pub referrer: Option<String>,
}

/// Split a raw query string into decoded `(key, value)` pairs.
///
/// Lenient: `+` decodes to a space, pairs that fail percent-decoding are
/// dropped, a key without `=` gets an empty value.
pub fn parse_query_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(key)?;
            let value = decode_component(value)?;
            Some((key, value))
        })
        .collect()
}

fn decode_component(s: &str) -> Option<String> {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|c| c.into_owned())
}

/// Normalize a beacon (`GET /beacon?...`) query string.
///
/// `data_<key>` parameters become payload entries; each value is parsed as
/// JSON and kept as a plain string when it is not valid JSON.
pub fn normalize_beacon(raw_query: &str, ctx: &RequestContext) -> Result<NormalizedEvent> {
    let mut fields = Map::new();
    let mut payload = Map::new();

    for (key, value) in parse_query_pairs(raw_query) {
        if let Some(data_key) = key.strip_prefix(DATA_PREFIX) {
            if data_key.is_empty() {
                continue;
            }
            let parsed = serde_json::from_str(&value).unwrap_or(Value::String(value));
            payload.insert(data_key.to_string(), parsed);
        } else if FIELD_KEYS.contains(&key.as_str()) {
            fields.insert(key, Value::String(value));
        }
    }

    build(fields, payload, ctx)
}

/// Normalize a direct (`POST /events`) JSON body.
///
/// Unrecognized top-level fields form the payload; a `data` object is merged
/// into it.
pub fn normalize_direct(body: &[u8], ctx: &RequestContext) -> Result<NormalizedEvent> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("body is not valid JSON: {}", e)))?;
    let Value::Object(object) = value else {
        return Err(Error::Validation("body must be a JSON object".to_string()));
    };

    let mut fields = Map::new();
    let mut payload = Map::new();
    let mut nested = None;

    for (key, value) in object {
        if FIELD_KEYS.contains(&key.as_str()) {
            fields.insert(key, value);
        } else if key == "data" && value.is_object() {
            nested = Some(value);
        } else {
            payload.insert(key, value);
        }
    }

    if let Some(Value::Object(data)) = nested {
        for (key, value) in data {
            payload.entry(key).or_insert(value);
        }
    }

    build(fields, payload, ctx)
}

fn build(fields: Map<String, Value>, payload: Map<String, Value>, ctx: &RequestContext) -> Result<NormalizedEvent> {
    let session_id = required(&fields, "sessionId")?;
    let domain_name = required(&fields, "domain")?;
    let event_type = EventType::parse(&required(&fields, "eventType")?);
    let page = truncate(required(&fields, "page")?);

    let timestamp = fields
        .get("timestamp")
        .and_then(parse_client_timestamp)
        .unwrap_or(ctx.received_at);

    let element = optional(&fields, "element")
        .or_else(|| payload.get("element").and_then(Value::as_str).map(str::to_string))
        .map(truncate);
    let user_agent = optional(&fields, "userAgent")
        .or_else(|| ctx.user_agent.clone())
        .map(truncate);
    let referrer = optional(&fields, "referrer")
        .or_else(|| ctx.referrer.clone())
        .map(truncate);

    Ok(NormalizedEvent {
        session_id,
        domain_name,
        event_type,
        page,
        element,
        timestamp,
        received_at: ctx.received_at,
        user_agent,
        referrer,
        payload: Value::Object(payload),
    })
}

fn optional(fields: &Map<String, Value>, key: &str) -> Option<String> {
    let s = match fields.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn required(fields: &Map<String, Value>, key: &str) -> Result<String> {
    optional(fields, key).ok_or_else(|| Error::Validation(format!("missing required field: {}", key)))
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_FIELD_LEN {
        let mut end = MAX_FIELD_LEN;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// Parse a client timestamp: RFC 3339 text, or epoch seconds / milliseconds
/// as a number or numeric string.
///
/// Values outside years 0 through 9999 are rejected, as they cannot be stored.
pub fn parse_client_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let parsed = match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_epoch))
        }
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    };
    parsed.filter(|ts| is_storable_timestamp(*ts))
}

fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw >= EPOCH_MILLIS_THRESHOLD as f64 {
        raw as i64
    } else {
        (raw * 1000.0) as i64
    };
    Utc.timestamp_millis_opt(millis).single()
}
