//! Database layer for beaconlens
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Transactional session upserts with an append-only event store
//! - Scoped reads for the aggregation engine

pub mod repo;
pub mod schema;

pub use repo::{Database, RecordedEvent, StoreCounts};
