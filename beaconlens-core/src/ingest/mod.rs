//! Ingestion gateway
//!
//! Both transports decode into the same [`NormalizedEvent`](crate::types::NormalizedEvent)
//! and feed the same correlator call.
//!
//! ## Architecture
//!
//! ```text
//! GET /beacon ──► normalize_beacon ──► BeaconQueue ──► worker ──┐
//!   (always 200 + GIF)                 (sharded by sessionId)   │
//!                                                               ▼
//! POST /events ──► normalize_direct ────────────────────► SessionCorrelator
//!   (status reflects the outcome)                               │
//!                                                               ▼
//!                                                           Database
//! ```

pub mod normalize;
pub mod queue;

pub use normalize::{
    normalize_beacon, normalize_direct, parse_client_timestamp, parse_query_pairs,
    RequestContext,
};
pub use queue::{BeaconQueue, QueueStats, QueueStatsSnapshot, QueueWorkers};
