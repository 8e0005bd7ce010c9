//! Exit heatmap, click density and conversion attribution.
//!
//! Events carry only the internal session id, so each aggregate resolves
//! the owning domain through a [`DomainLookup`] built from the same
//! snapshot's sessions. Events whose session is not in the snapshot are
//! skipped.

use crate::types::{Event, EventType, Session};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Exit events at or below both thresholds are treated as bounces.
const MIN_ENGAGEMENT: f64 = 0.0;
const MIN_SCROLL_DEPTH: f64 = 10.0;

/// Grouping key for per-page aggregates.
///
/// Serialized as the single string `domain + page`, e.g.
/// `shop.example.com/checkout`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub domain: String,
    pub page: String,
}

impl PageKey {
    pub fn new(domain: impl Into<String>, page: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            page: page.into(),
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.domain, self.page)
    }
}

impl Serialize for PageKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Internal session id to domain name.
pub struct DomainLookup<'a> {
    domains: HashMap<&'a str, &'a str>,
}

impl<'a> DomainLookup<'a> {
    pub fn new(sessions: &'a [Session]) -> Self {
        Self {
            domains: sessions
                .iter()
                .map(|s| (s.id.as_str(), s.domain_name.as_str()))
                .collect(),
        }
    }

    fn key(&self, event: &Event) -> Option<PageKey> {
        let domain = self.domains.get(event.session_ref.as_str())?;
        Some(PageKey::new(*domain, event.page.clone()))
    }
}

/// Read a payload value as a number. Numeric strings count.
pub fn payload_number(data: &Value, field: &str) -> Option<f64> {
    match data.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// A payload value feeding an average. Missing counts as 0; present but
/// non-numeric is `None` and stays out of that average.
fn payload_metric(data: &Value, field: &str) -> Option<f64> {
    match data.get(field) {
        None | Some(Value::Null) => Some(0.0),
        Some(_) => payload_number(data, field),
    }
}

fn payload_string(data: &Value, field: &str) -> Option<String> {
    data.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Whether an exit event shows any engagement at all.
pub fn is_engaged_exit(data: &Value) -> bool {
    let engagement = payload_number(data, "engagementScore").unwrap_or(0.0);
    let depth = payload_number(data, "maxScrollDepth").unwrap_or(0.0);
    engagement > MIN_ENGAGEMENT || depth > MIN_SCROLL_DEPTH
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitHeatmapEntry {
    pub key: PageKey,
    pub domain: String,
    pub page: String,
    pub total_exits: usize,
    pub avg_time_on_page: f64,
    pub avg_engagement: f64,
    pub avg_scroll_depth: f64,
    /// Exits that contributed to `avg_engagement`
    #[serde(skip)]
    pub engagement_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickPoint {
    pub x: f64,
    pub y: f64,
    pub element: Option<String>,
    pub element_type: Option<String>,
    pub element_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickHeatmapEntry {
    pub key: PageKey,
    pub domain: String,
    pub page: String,
    pub clicks: Vec<ClickPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapSummary {
    pub total_exit_events: usize,
    pub total_clicks: usize,
    pub total_conversions: usize,
    /// Distinct page keys across all three aggregates
    pub pages_tracked: usize,
    pub avg_engagement: f64,
}

#[derive(Default, Clone, Copy)]
struct Mean {
    sum: f64,
    samples: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.samples += 1;
        }
    }

    fn value(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum / self.samples as f64
        }
    }
}

#[derive(Default)]
struct ExitAccumulator {
    exits: usize,
    time_on_page: Mean,
    engagement: Mean,
    scroll_depth: Mean,
}

/// Group engaged exit events by page, most exits first.
pub fn exit_heatmap(events: &[Event], lookup: &DomainLookup<'_>) -> Vec<ExitHeatmapEntry> {
    let mut order: Vec<PageKey> = Vec::new();
    let mut groups: HashMap<PageKey, ExitAccumulator> = HashMap::new();

    for event in events.iter().filter(|e| e.event_type.is_exit_signal()) {
        if !is_engaged_exit(&event.data) {
            continue;
        }
        let Some(key) = lookup.key(event) else {
            continue;
        };
        let acc = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            ExitAccumulator::default()
        });
        acc.exits += 1;
        acc.time_on_page.push(payload_metric(&event.data, "timeOnPage"));
        acc.engagement.push(payload_metric(&event.data, "engagementScore"));
        acc.scroll_depth.push(payload_metric(&event.data, "maxScrollDepth"));
    }

    let mut entries: Vec<ExitHeatmapEntry> = order
        .into_iter()
        .filter_map(|key| {
            let acc = groups.remove(&key)?;
            Some(ExitHeatmapEntry {
                domain: key.domain.clone(),
                page: key.page.clone(),
                key,
                total_exits: acc.exits,
                avg_time_on_page: acc.time_on_page.value(),
                avg_engagement: acc.engagement.value(),
                avg_scroll_depth: acc.scroll_depth.value(),
                engagement_samples: acc.engagement.samples,
            })
        })
        .collect();
    entries.sort_by(|a, b| b.total_exits.cmp(&a.total_exits));
    entries
}

/// Raw click points per page, busiest page first.
///
/// Interactions without numeric `viewportX` and `viewportY` are dropped.
pub fn click_heatmap(events: &[Event], lookup: &DomainLookup<'_>) -> Vec<ClickHeatmapEntry> {
    let mut entries: Vec<ClickHeatmapEntry> = Vec::new();
    let mut index: HashMap<PageKey, usize> = HashMap::new();

    for event in events.iter().filter(|e| e.event_type == EventType::Interaction) {
        let (Some(x), Some(y)) = (
            payload_number(&event.data, "viewportX"),
            payload_number(&event.data, "viewportY"),
        ) else {
            continue;
        };
        let Some(key) = lookup.key(event) else {
            continue;
        };

        let point = ClickPoint {
            x,
            y,
            element: event
                .element
                .clone()
                .or_else(|| payload_string(&event.data, "element")),
            element_type: payload_string(&event.data, "elementType"),
            element_text: payload_string(&event.data, "elementText"),
        };

        match index.get(&key) {
            Some(&i) => entries[i].clicks.push(point),
            None => {
                index.insert(key.clone(), entries.len());
                entries.push(ClickHeatmapEntry {
                    domain: key.domain.clone(),
                    page: key.page.clone(),
                    key,
                    clicks: vec![point],
                });
            }
        }
    }

    entries.sort_by(|a, b| b.clicks.len().cmp(&a.clicks.len()));
    entries
}

/// Conversion events counted per page.
pub fn conversions(events: &[Event], lookup: &DomainLookup<'_>) -> BTreeMap<PageKey, usize> {
    let mut counts = BTreeMap::new();
    for event in events.iter().filter(|e| e.event_type == EventType::Conversion) {
        if let Some(key) = lookup.key(event) {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

pub fn heatmap_summary(
    exits: &[ExitHeatmapEntry],
    clicks: &[ClickHeatmapEntry],
    conversions: &BTreeMap<PageKey, usize>,
) -> HeatmapSummary {
    let total_exit_events: usize = exits.iter().map(|e| e.total_exits).sum();
    let mut engagement = Mean::default();
    for entry in exits {
        engagement.sum += entry.avg_engagement * entry.engagement_samples as f64;
        engagement.samples += entry.engagement_samples;
    }

    let pages: BTreeSet<&PageKey> = exits
        .iter()
        .map(|e| &e.key)
        .chain(clicks.iter().map(|c| &c.key))
        .chain(conversions.keys())
        .collect();

    HeatmapSummary {
        total_exit_events,
        total_clicks: clicks.iter().map(|c| c.clicks.len()).sum(),
        total_conversions: conversions.values().sum(),
        pages_tracked: pages.len(),
        avg_engagement: engagement.value(),
    }
}
