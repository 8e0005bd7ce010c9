//! The correlator service: validate, serialize per key, persist.

use super::{SessionLocks, Transition};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::scope::DomainRegistry;
use crate::types::{is_storable_timestamp, NormalizedEvent, Session};
use std::sync::Arc;

/// Outcome of a successful ingest.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub event_id: i64,
    pub session: Session,
    pub transition: Transition,
}

/// Maps inbound events onto durable sessions.
///
/// Safe to share across threads; mutations for one session key are applied
/// one at a time, in the order callers reach [`SessionCorrelator::ingest`].
///
/// [`Database`] has a single writer connection, so writes for different
/// sessions are serialized there as well. The keyed lock only orders events
/// of the same session; it adds no write parallelism.
pub struct SessionCorrelator {
    db: Arc<Database>,
    registry: Arc<dyn DomainRegistry>,
    locks: SessionLocks,
}

impl SessionCorrelator {
    pub fn new(db: Arc<Database>, registry: Arc<dyn DomainRegistry>) -> Self {
        Self {
            db,
            registry,
            locks: SessionLocks::new(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Resolve the domain, apply the event to its session, append it.
    ///
    /// Blocking: call from a blocking context (`spawn_blocking`) in async code.
    pub fn ingest(&self, event: &NormalizedEvent) -> Result<IngestOutcome> {
        if !is_storable_timestamp(event.timestamp) || !is_storable_timestamp(event.received_at) {
            return Err(Error::Validation(format!(
                "timestamp out of range: {}",
                event.timestamp
            )));
        }

        let domain = self
            .registry
            .find_by_name(&event.domain_name)
            .ok_or_else(|| Error::UnknownDomain(event.domain_name.clone()))?;
        if !domain.is_active {
            return Err(Error::InactiveDomain(domain.domain_name));
        }

        let missing = event.event_type.missing_payload_fields(&event.payload);
        if !missing.is_empty() {
            tracing::debug!(
                session_id = %event.session_id,
                event_type = %event.event_type,
                ?missing,
                "Event payload is missing expected fields"
            );
        }

        let recorded = self
            .locks
            .with_lock(&event.session_id, || self.db.record_event(event, &domain))?;

        tracing::debug!(
            session_id = %event.session_id,
            event_type = %event.event_type,
            transition = recorded.transition.as_str(),
            mutated = recorded.transition.mutates_session(),
            event_id = recorded.event_id,
            "Event recorded"
        );

        Ok(IngestOutcome {
            event_id: recorded.event_id,
            session: recorded.session,
            transition: recorded.transition,
        })
    }
}
