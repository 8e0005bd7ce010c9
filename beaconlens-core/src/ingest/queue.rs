//! Background queue decoupling beacon responses from persistence.

use crate::config::IngestConfig;
use crate::session::SessionCorrelator;
use crate::types::NormalizedEvent;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Running counters for the beacon pipeline.
#[derive(Debug, Default)]
pub struct QueueStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`QueueStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatsSnapshot {
    /// Enqueued within the deadline
    pub accepted: u64,
    /// Refused: deadline passed or queue closed
    pub dropped: u64,
    /// Stored by a worker
    pub processed: u64,
    /// Rejected by the correlator or by storage
    pub failed: u64,
}

impl QueueStats {
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Sharded, bounded queue of normalized beacon events.
///
/// Events are routed by a hash of their session key, so one session is
/// always handled by one worker in arrival order. Cheap to clone.
#[derive(Clone)]
pub struct BeaconQueue {
    shards: Arc<RwLock<Vec<mpsc::Sender<NormalizedEvent>>>>,
    deadline: Duration,
    stats: Arc<QueueStats>,
}

/// Join handles of the queue's worker tasks.
pub struct QueueWorkers {
    handles: Vec<JoinHandle<()>>,
    stats: Arc<QueueStats>,
}

impl BeaconQueue {
    /// Start one worker task per shard on the current tokio runtime.
    pub fn spawn(correlator: Arc<SessionCorrelator>, config: &IngestConfig) -> (Self, QueueWorkers) {
        let workers = config.workers.max(1);
        let per_shard = (config.queue_capacity / workers).max(1);
        let stats = Arc::new(QueueStats::default());

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for shard in 0..workers {
            let (tx, rx) = mpsc::channel(per_shard);
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(
                shard,
                rx,
                correlator.clone(),
                stats.clone(),
            )));
        }

        tracing::info!(
            workers,
            capacity_per_worker = per_shard,
            deadline_ms = config.beacon_deadline_ms,
            "Beacon queue started"
        );

        let queue = Self {
            shards: Arc::new(RwLock::new(senders)),
            deadline: Duration::from_millis(config.beacon_deadline_ms),
            stats: stats.clone(),
        };
        (queue, QueueWorkers { handles, stats })
    }

    fn shard_for(&self, session_id: &str) -> Option<mpsc::Sender<NormalizedEvent>> {
        let shards = self.shards.read();
        if shards.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        session_id.hash(&mut hasher);
        let idx = (hasher.finish() % shards.len() as u64) as usize;
        shards.get(idx).cloned()
    }

    /// Hand an event to its shard, waiting at most the configured deadline.
    ///
    /// Returns `false` when the event was dropped. Never errors.
    pub async fn enqueue(&self, event: NormalizedEvent) -> bool {
        let Some(sender) = self.shard_for(&event.session_id) else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.send_timeout(event, self.deadline).await {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Beacon dropped");
                false
            }
        }
    }

    /// Stop accepting events. Workers finish what is already queued.
    pub fn close(&self) {
        let closed = std::mem::take(&mut *self.shards.write());
        if !closed.is_empty() {
            tracing::info!("Beacon queue closed");
        }
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }
}

impl QueueWorkers {
    /// Wait for every worker to drain its shard. Call after
    /// [`BeaconQueue::close`].
    pub async fn drain(self) -> QueueStatsSnapshot {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Beacon worker panicked");
            }
        }
        let stats = self.stats.snapshot();
        tracing::info!(
            accepted = stats.accepted,
            dropped = stats.dropped,
            processed = stats.processed,
            failed = stats.failed,
            "Beacon queue drained"
        );
        stats
    }
}

async fn run_worker(
    shard: usize,
    mut rx: mpsc::Receiver<NormalizedEvent>,
    correlator: Arc<SessionCorrelator>,
    stats: Arc<QueueStats>,
) {
    while let Some(event) = rx.recv().await {
        let correlator = correlator.clone();
        let session_id = event.session_id.clone();
        let result = tokio::task::spawn_blocking(move || correlator.ingest(&event)).await;

        match result {
            Ok(Ok(_)) => {
                stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) if e.is_client_error() => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(shard, %session_id, error = %e, "Beacon rejected");
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(shard, %session_id, error = %e, "Beacon could not be stored");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(shard, %session_id, error = %e, "Beacon worker task failed");
            }
        }
    }
    tracing::debug!(shard, "Beacon worker stopped");
}
