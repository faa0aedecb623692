use super::SyncError;
use super::snapshot::{CachedDocument, SnapshotStore};
use scribe_core::DocumentStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one pass over the snapshot cache
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub failed: usize,
    /// Entries evicted between the walk starting and reaching them
    pub skipped: usize,
}

/// Write-behind persistence of cached snapshots.
///
/// Every tick writes the content of every cached document to the durable
/// store. Writes replace content wholesale, so a repeated flush of an
/// unchanged snapshot leaves the store as it was.
pub struct Synchronizer {
    snapshots: Arc<SnapshotStore>,
    store: Arc<dyn DocumentStore>,
    period: Duration,
}

impl Synchronizer {
    pub fn new(
        snapshots: Arc<SnapshotStore>,
        store: Arc<dyn DocumentStore>,
        period: Duration,
    ) -> Self {
        Self {
            snapshots,
            store,
            period,
        }
    }

    /// Flush every cached document once.
    ///
    /// A failing document is logged and left cached for the next tick; it
    /// never stops the others from being flushed.
    pub async fn tick(&self) -> FlushReport {
        let mut report = FlushReport::default();

        for (document_id, entry) in self.snapshots.entries().await {
            match self.flush_entry(&document_id, &entry).await {
                Ok(true) => report.flushed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!("{}", e);
                    report.failed += 1;
                }
            }
        }

        if report.flushed + report.failed > 0 {
            debug!(
                "Write-behind tick: {} flushed, {} failed, {} skipped",
                report.flushed, report.failed, report.skipped
            );
        }
        report
    }

    async fn flush_entry(
        &self,
        document_id: &str,
        entry: &Arc<CachedDocument>,
    ) -> Result<bool, SyncError> {
        let _flush = entry.begin_flush().await;
        if entry.is_evicted() {
            return Ok(false);
        }

        self.persist(document_id, entry).await?;

        if entry.is_pending_eviction() {
            self.snapshots.evict_entry(document_id, entry).await;
            info!("Evicted document {} after delayed final flush", document_id);
        }
        Ok(true)
    }

    /// Final synchronous flush for a document whose room just emptied.
    ///
    /// On success the snapshot is evicted. On failure it stays cached and is
    /// evicted by the first tick that manages to persist it, so the last
    /// edits are never dropped. Returns `false` if nothing was cached.
    pub async fn flush_and_evict(&self, document_id: &str) -> Result<bool, SyncError> {
        let Some(entry) = self.snapshots.entry(document_id).await else {
            return Ok(false);
        };
        let _flush = entry.begin_flush().await;
        if entry.is_evicted() {
            return Ok(false);
        }

        if let Err(e) = self.persist(document_id, &entry).await {
            entry.mark_pending_eviction();
            return Err(e);
        }

        self.snapshots.evict_entry(document_id, &entry).await;
        Ok(true)
    }

    async fn persist(&self, document_id: &str, entry: &CachedDocument) -> Result<(), SyncError> {
        if entry.is_deleted() {
            return Ok(());
        }
        let data = entry.data().await;
        match self.store.update_content(document_id, &data) {
            Ok(true) => Ok(()),
            Ok(false) => {
                // Deleted while open; nothing left to write to
                debug!("Document {} no longer exists in the store", document_id);
                Ok(())
            }
            Err(source) => Err(SyncError::PersistFailure {
                document_id: document_id.to_string(),
                source,
            }),
        }
    }

    /// Run the synchronizer on its period until stopped.
    ///
    /// The first tick fires one full period after spawning. Stopping runs
    /// one last tick so nothing cached at shutdown is lost.
    pub fn spawn(self: Arc<Self>) -> SynchronizerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Write-behind synchronizer started (every {:?})", self.period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = &mut stop_rx => break,
                }
            }

            let report = self.tick().await;
            info!(
                "Write-behind synchronizer stopped after final flush ({} flushed, {} failed)",
                report.flushed, report.failed
            );
            report
        });

        SynchronizerHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Stop signal for a spawned [`Synchronizer`]
pub struct SynchronizerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<FlushReport>,
}

impl SynchronizerHandle {
    /// Signal the task and wait for its final flush
    pub async fn stop(self) -> FlushReport {
        let _ = self.stop.send(());
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                warn!("Write-behind synchronizer task ended abnormally: {}", e);
                FlushReport::default()
            }
        }
    }
}
