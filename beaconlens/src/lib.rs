//! # beaconlens
//!
//! HTTP server for the beaconlens telemetry pipeline. The pipeline itself
//! lives in `beaconlens-core`; this crate maps it onto routes.

pub mod server;

pub use server::{router, serve, AppState};
