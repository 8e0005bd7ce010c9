//! Query-level entry points combining the pure aggregates into reports.

use super::heatmap::{
    self, ClickHeatmapEntry, DomainLookup, ExitHeatmapEntry, HeatmapSummary, PageKey,
};
use super::source::{AnalyticsSource, TimeWindow};
use super::summary::{self, EventTypeCount, HourlyBucket, PageCount, Summary};
use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::scope::Scope;
use crate::types::{DomainId, Session};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Parameters of the summary query, already parsed.
#[derive(Debug, Clone)]
pub struct SummaryQuery {
    /// Restrict to one domain (intersected with the scope)
    pub domain_id: Option<DomainId>,
    pub window: TimeWindow,
    /// Sessions to list; clamped to the configured maximum
    pub limit: Option<usize>,
}

/// Parameters of the heatmap query, already parsed.
#[derive(Debug, Clone)]
pub struct HeatmapQuery {
    pub domain_id: Option<DomainId>,
    pub window: TimeWindow,
    /// Only aggregate events on this page
    pub page: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub sessions: Vec<Session>,
    pub summary: Summary,
    pub exit_pages: Vec<PageCount>,
    pub event_types: Vec<EventTypeCount>,
    pub page_views: Vec<PageCount>,
    pub hourly_activity: Vec<HourlyBucket>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapReport {
    pub exit_heatmap: Vec<ExitHeatmapEntry>,
    pub click_heatmap: Vec<ClickHeatmapEntry>,
    pub conversions: BTreeMap<PageKey, usize>,
    pub summary: HeatmapSummary,
}

/// Computes reports over snapshots from an [`AnalyticsSource`].
///
/// Holds no state beyond its settings; every call reads a fresh snapshot.
pub struct AnalyticsEngine<S> {
    source: S,
    settings: AnalyticsConfig,
}

impl<S: AnalyticsSource> AnalyticsEngine<S> {
    pub fn new(source: S, settings: AnalyticsConfig) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> &AnalyticsConfig {
        &self.settings
    }

    /// Summary window when the caller gives no dates.
    pub fn default_window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::trailing_days(self.settings.default_window_days, now)
    }

    /// Heatmap window for `days` (or the configured default).
    pub fn heatmap_window(&self, days: Option<i64>, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow::trailing_days(days.unwrap_or(self.settings.default_heatmap_days), now)
    }

    fn effective_scope(scope: &Scope, domain_id: Option<DomainId>) -> Scope {
        match domain_id {
            Some(id) => scope.narrow_to(id),
            None => scope.clone(),
        }
    }

    /// Sessions, summary, rankings and the trailing-24h histogram.
    pub fn summary_report(
        &self,
        scope: &Scope,
        query: &SummaryQuery,
        now: DateTime<Utc>,
    ) -> Result<AnalyticsReport> {
        let scope = Self::effective_scope(scope, query.domain_id);
        let sessions = self.source.sessions(&scope, &query.window)?;
        let events = self.source.events(&scope, &query.window)?;

        let current_hour = summary::hour_start(now);
        let recent = TimeWindow::new(
            current_hour - Duration::hours(summary::HOURLY_BUCKETS as i64 - 1),
            current_hour + Duration::hours(1),
        );
        let recent_sessions = self.source.sessions(&scope, &recent)?;

        let limit = query
            .limit
            .unwrap_or(self.settings.default_session_limit)
            .min(self.settings.max_session_limit);

        tracing::debug!(
            sessions = sessions.len(),
            events = events.len(),
            limit,
            "Computed summary snapshot"
        );

        Ok(AnalyticsReport {
            sessions: summary::recent_sessions(&sessions, limit),
            summary: summary::summarize(&sessions, &events),
            exit_pages: summary::exit_pages(&sessions, self.settings.top_n),
            event_types: summary::event_types(&events),
            page_views: summary::page_views(&events, self.settings.top_n),
            hourly_activity: summary::hourly_activity(&recent_sessions, now),
        })
    }

    /// Exit heatmap, click density and conversions.
    pub fn heatmap_report(&self, scope: &Scope, query: &HeatmapQuery) -> Result<HeatmapReport> {
        let scope = Self::effective_scope(scope, query.domain_id);
        let sessions = self.source.sessions(&scope, &query.window)?;
        let mut events = self.source.events(&scope, &query.window)?;
        if let Some(page) = &query.page {
            events.retain(|e| &e.page == page);
        }

        let lookup = DomainLookup::new(&sessions);
        let exit_heatmap = heatmap::exit_heatmap(&events, &lookup);
        let click_heatmap = heatmap::click_heatmap(&events, &lookup);
        let conversions = heatmap::conversions(&events, &lookup);
        let summary = heatmap::heatmap_summary(&exit_heatmap, &click_heatmap, &conversions);

        Ok(HeatmapReport {
            exit_heatmap,
            click_heatmap,
            conversions,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::fixtures::{event, event_with, session, t0, SessionFixture};
    use crate::analytics::source::MemorySource;
    use serde_json::json;

    fn engine() -> AnalyticsEngine<MemorySource> {
        let sessions = vec![
            session("a", 1, 0).terminal("/checkout", 65).pages(2),
            session("b", 1, 10),
            session("x", 2, 5).terminal("/secret", 30),
        ];
        let events = vec![
            event(1, "a", "page_view", "/"),
            event(2, "a", "page_view", "/cart"),
            event_with(3, "a", "page_exit", "/checkout", json!({"engagementScore": 5})),
            event(4, "b", "page_view", "/"),
            event(5, "x", "page_view", "/secret"),
            event_with(6, "x", "conversion", "/secret", json!({"type": "signup"})),
        ];
        AnalyticsEngine::new(MemorySource::new(sessions, events), AnalyticsConfig::default())
    }

    fn window() -> TimeWindow {
        TimeWindow::new(t0() - Duration::hours(1), t0() + Duration::hours(1))
    }

    #[test]
    fn test_summary_report_respects_scope() {
        let engine = engine();
        let scope = Scope::new([1]);
        let query = SummaryQuery {
            domain_id: None,
            window: window(),
            limit: None,
        };

        let report = engine.summary_report(&scope, &query, t0()).unwrap();
        assert_eq!(report.summary.total_sessions, 2);
        assert_eq!(report.summary.total_events, 4);
        assert_eq!(report.exit_pages[0].page, "/checkout");
        assert!(report.sessions.iter().all(|s| s.domain_id == 1));
        assert_eq!(report.hourly_activity.len(), 24);
        assert_eq!(report.hourly_activity[23].count, 2);
    }

    #[test]
    fn test_out_of_scope_filter_yields_nothing() {
        let engine = engine();
        let scope = Scope::new([1]);
        let query = SummaryQuery {
            domain_id: Some(2),
            window: window(),
            limit: None,
        };

        let report = engine.summary_report(&scope, &query, t0()).unwrap();
        assert!(report.sessions.is_empty());
        assert_eq!(report.summary.total_sessions, 0);
        assert!(report.hourly_activity.iter().all(|b| b.count == 0));

        let heatmap = engine
            .heatmap_report(
                &scope,
                &HeatmapQuery {
                    domain_id: Some(2),
                    window: window(),
                    page: None,
                },
            )
            .unwrap();
        assert!(heatmap.conversions.is_empty());
    }

    #[test]
    fn test_session_limit_is_capped() {
        let engine = AnalyticsEngine::new(
            MemorySource::new(vec![session("a", 1, 0), session("b", 1, 1)], vec![]),
            AnalyticsConfig {
                max_session_limit: 1,
                ..AnalyticsConfig::default()
            },
        );
        let query = SummaryQuery {
            domain_id: None,
            window: window(),
            limit: Some(50),
        };
        let report = engine.summary_report(&Scope::new([1]), &query, t0()).unwrap();
        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.summary.total_sessions, 2);
    }

    #[test]
    fn test_heatmap_page_filter() {
        let engine = engine();
        let scope = Scope::new([1, 2]);
        let query = HeatmapQuery {
            domain_id: None,
            window: window(),
            page: Some("/checkout".to_string()),
        };

        let report = engine.heatmap_report(&scope, &query).unwrap();
        assert_eq!(report.summary.total_exit_events, 1);
        assert_eq!(report.summary.total_conversions, 0);
        assert_eq!(report.summary.pages_tracked, 1);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let engine = engine();
        let query = HeatmapQuery {
            domain_id: None,
            window: window(),
            page: None,
        };
        let value = serde_json::to_value(engine.heatmap_report(&Scope::new([2]), &query).unwrap())
            .unwrap();
        assert_eq!(value["conversions"], json!({"d2.example/secret": 1}));
        assert_eq!(value["summary"]["totalConversions"], json!(1));
        assert!(value["exitHeatmap"].as_array().unwrap().is_empty());
    }
}
