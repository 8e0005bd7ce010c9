//! `GET /analytics` and `GET /analytics/heatmap`.
//!
//! Both resolve the caller's scope first, then parse their parameters, then
//! run the engine on the blocking pool.

use super::error::ApiError;
use super::AppState;
use axum::extract::{RawQuery, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::Json;
use beaconlens_core::analytics::{AnalyticsReport, HeatmapQuery, HeatmapReport, SummaryQuery};
use beaconlens_core::ingest::parse_query_pairs;
use beaconlens_core::{Scope, TimeWindow};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::str::FromStr;

/// Longest heatmap window accepted, in days.
const MAX_HEATMAP_DAYS: i64 = 366;

/// Credential from `Authorization: Bearer <key>` or `X-Api-Key: <key>`.
pub fn credential(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty());

    bearer.or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
    })
}

/// Decoded query parameters. Empty values count as absent.
struct Params(HashMap<String, String>);

impl Params {
    fn from_raw(raw: Option<&str>) -> Self {
        Self(
            parse_query_pairs(raw.unwrap_or(""))
                .into_iter()
                .filter(|(_, v)| !v.trim().is_empty())
                .collect(),
        )
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.trim())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ApiError> {
        self.get(key)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|_| ApiError::bad_request(format!("invalid {}: {}", key, v)))
            })
            .transpose()
    }

    fn date(&self, key: &str, end_of_day: bool) -> Result<Option<DateTime<Utc>>, ApiError> {
        self.get(key)
            .map(|v| {
                parse_date(v, end_of_day)
                    .ok_or_else(|| ApiError::bad_request(format!("invalid {}: {}", key, v)))
            })
            .transpose()
    }
}

/// RFC 3339, or `YYYY-MM-DD` as the start (or last millisecond) of that UTC day.
pub fn parse_date(value: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let naive = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(naive.and_utc())
}

fn resolve_scope(state: &AppState, headers: &HeaderMap) -> Result<Scope, ApiError> {
    Ok(state.scopes.resolve(credential(headers))?)
}

pub async fn handle_summary(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Result<Json<AnalyticsReport>, ApiError> {
    let scope = resolve_scope(&state, &headers)?;
    let params = Params::from_raw(raw.as_deref());
    let now = Utc::now();

    let default_window = state.engine.default_window(now);
    let from = params.date("startDate", false)?;
    let to = params.date("endDate", true)?;
    let window = match (from, to) {
        (Some(from), Some(to)) => TimeWindow::new(from, to),
        (Some(from), None) => TimeWindow::new(from, now),
        (None, Some(to)) => {
            let from = to
                .checked_sub_signed(default_window.to - default_window.from)
                .ok_or_else(|| ApiError::bad_request("endDate is out of range"))?;
            TimeWindow::new(from, to)
        }
        (None, None) => default_window,
    };
    if window.from > window.to {
        return Err(ApiError::bad_request("startDate is after endDate"));
    }

    let query = SummaryQuery {
        domain_id: params.parse("domainId")?,
        window,
        limit: params.parse("limit")?,
    };

    let engine = state.engine.clone();
    let report =
        tokio::task::spawn_blocking(move || engine.summary_report(&scope, &query, now)).await??;
    Ok(Json(report))
}

pub async fn handle_heatmap(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Result<Json<HeatmapReport>, ApiError> {
    let mut scope = resolve_scope(&state, &headers)?;
    let params = Params::from_raw(raw.as_deref());

    let days: Option<i64> = params.parse("days")?;
    if let Some(days) = days {
        if !(1..=MAX_HEATMAP_DAYS).contains(&days) {
            return Err(ApiError::bad_request(format!(
                "days must be between 1 and {}",
                MAX_HEATMAP_DAYS
            )));
        }
    }

    let domain_id = match params.get("domain") {
        Some(name) => match state.registry.find_by_name(name) {
            Some(domain) => Some(domain.domain_id),
            None => {
                // Unknown name: empty report, same as an out-of-scope one.
                scope = Scope::default();
                None
            }
        },
        None => None,
    };

    let query = HeatmapQuery {
        domain_id,
        window: state.engine.heatmap_window(days, Utc::now()),
        page: params.get("page").map(str::to_string),
    };

    let engine = state.engine.clone();
    let report = tokio::task::spawn_blocking(move || engine.heatmap_report(&scope, &query)).await??;
    Ok(Json(report))
}
