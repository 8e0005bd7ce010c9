//! HTTP surface: ingestion transports and the analytics queries.

pub mod analytics;
pub mod beacon;
pub mod error;
pub mod events;

use axum::http::header::{REFERER, USER_AGENT};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use beaconlens_core::ingest::{BeaconQueue, QueueWorkers, RequestContext};
use beaconlens_core::{
    AnalyticsEngine, Config, ConfigDomainRegistry, ConfigScopeResolver, Database, DomainRegistry,
    ScopeResolver, SessionCorrelator,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub correlator: Arc<SessionCorrelator>,
    pub queue: BeaconQueue,
    pub engine: Arc<AnalyticsEngine<Arc<Database>>>,
    pub registry: Arc<dyn DomainRegistry>,
    pub scopes: Arc<dyn ScopeResolver>,
}

impl AppState {
    /// Wire the pipeline from config, using the config-backed registry and
    /// scope resolver. Starts the beacon workers on the current runtime.
    pub fn from_config(config: &Config, db: Arc<Database>) -> (Self, QueueWorkers) {
        let registry: Arc<dyn DomainRegistry> = Arc::new(ConfigDomainRegistry::from_config(config));
        let scopes: Arc<dyn ScopeResolver> = Arc::new(ConfigScopeResolver::from_config(config));
        Self::new(config, db, registry, scopes)
    }

    pub fn new(
        config: &Config,
        db: Arc<Database>,
        registry: Arc<dyn DomainRegistry>,
        scopes: Arc<dyn ScopeResolver>,
    ) -> (Self, QueueWorkers) {
        let correlator = Arc::new(SessionCorrelator::new(db.clone(), registry.clone()));
        let (queue, workers) = BeaconQueue::spawn(correlator.clone(), &config.ingest);
        let engine = Arc::new(AnalyticsEngine::new(db, config.analytics.clone()));

        let state = Self {
            correlator,
            queue,
            engine,
            registry,
            scopes,
        };
        (state, workers)
    }
}

/// Arrival time plus the header fallbacks for `userAgent` / `referrer`.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|v| !v.is_empty())
    };
    RequestContext {
        received_at: Utc::now(),
        user_agent: header(USER_AGENT),
        referrer: header(REFERER),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/beacon", get(beacon::handle_beacon))
        .route("/events", post(events::handle_event))
        .route("/analytics", get(analytics::handle_summary))
        .route("/analytics/heatmap", get(analytics::handle_heatmap))
        .route("/health", get(health))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Serve until `shutdown` resolves, then close the beacon queue and wait for
/// its workers to drain.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    workers: QueueWorkers,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let queue = state.queue.clone();
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;

    queue.close();
    workers.drain().await;
    result
}
