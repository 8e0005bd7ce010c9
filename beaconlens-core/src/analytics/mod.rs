//! Aggregation engine
//!
//! Read-only, on-demand computation over a scoped snapshot:
//! - [`summary`]: session summary, exit-page and page-view rankings, event
//!   type distribution, hourly activity
//! - [`heatmap`]: exit heatmap, click density, conversion attribution
//!
//! Snapshots come from an [`AnalyticsSource`]; [`crate::db::Database`] is the
//! production source. Events of unknown type never reach an aggregate.

pub mod engine;
pub mod heatmap;
pub mod source;
pub mod summary;

#[cfg(test)]
pub(crate) mod fixtures;

pub use engine::{AnalyticsEngine, AnalyticsReport, HeatmapQuery, HeatmapReport, SummaryQuery};
pub use heatmap::{ClickHeatmapEntry, ClickPoint, ExitHeatmapEntry, HeatmapSummary, PageKey};
pub use source::{AnalyticsSource, MemorySource, TimeWindow};
pub use summary::{EventTypeCount, HourlyBucket, PageCount, Summary};
