//! # beaconlens-core
//!
//! Core library for beaconlens - behavioral telemetry for websites.
//!
//! This library provides:
//! - Domain types for events, sessions and domains
//! - Ingestion: beacon and direct-POST normalization, the background beacon queue
//! - The session correlator and its lifecycle state machine
//! - SQLite storage for sessions and the append-only event log
//! - The aggregation engine (summaries, rankings, heatmaps)
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Ingest:** transports decode requests into a `NormalizedEvent`
//! - **Correlate:** events are applied to their session and appended, one
//!   session key at a time
//! - **Aggregate:** scoped, read-only reports computed on demand
//!
//! ## Example
//!
//! ```rust,no_run
//! use beaconlens_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&config.resolved_database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{AnalyticsEngine, AnalyticsSource, TimeWindow};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use scope::{ConfigDomainRegistry, ConfigScopeResolver, DomainRegistry, Scope, ScopeResolver};
pub use session::{IngestOutcome, SessionCorrelator, Transition};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod scope;
pub mod session;
pub mod types;
