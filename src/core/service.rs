//! Entry points for scans: interactive preview/apply and queued full scans.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::{ArchiveMetadataExtractor, CoverCache, FolderSeriesLinker};
use crate::config::ResolvedConfig;
use crate::domain::{ScanJob, ScanOperation, ScanStage};
use crate::queue::{CancelOutcome, JobQueue, RecoverySource};
use crate::scanner::{
    ApplyOutcome, InMemoryPendingScans, PendingScanStore, ScanResult, ScanSummary, Scanner,
};
use crate::store::LibraryStore;

use super::orchestrator::ScanOrchestrator;

/// A scan held for confirmation
#[derive(Debug, Clone, Serialize)]
pub struct StartedScan {
    pub scan_id: Uuid,
    pub summary: ScanSummary,
}

/// Reads interrupted scan jobs back from the store
pub struct StoreRecovery {
    store: Arc<dyn LibraryStore>,
}

impl StoreRecovery {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecoverySource<ScanOperation> for StoreRecovery {
    async fn interrupted_jobs(&self) -> Result<Vec<(Uuid, ScanOperation)>> {
        let jobs = self.store.interrupted_scan_jobs().await?;
        Ok(jobs
            .into_iter()
            .filter_map(|job| ScanOperation::resume_from(job.stage).map(|op| (job.id, op)))
            .collect())
    }
}

/// Owns the scan queue and the pending-scan holding area
pub struct ScanService {
    store: Arc<dyn LibraryStore>,
    scanner: Scanner,
    pending: Arc<dyn PendingScanStore>,
    queue: JobQueue<ScanOperation>,
}

impl ScanService {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        scanner: Scanner,
        pending: Arc<dyn PendingScanStore>,
        queue: JobQueue<ScanOperation>,
    ) -> Self {
        Self {
            store,
            scanner,
            pending,
            queue,
        }
    }

    /// Wire the bundled collaborators from configuration
    pub fn from_config(store: Arc<dyn LibraryStore>, config: &ResolvedConfig) -> Self {
        let settings = &config.scan;
        let scanner = Scanner::new(store.clone(), settings.discover_options());

        let orchestrator = ScanOrchestrator::new(
            store.clone(),
            scanner.clone(),
            Arc::new(ArchiveMetadataExtractor::new()),
            Arc::new(FolderSeriesLinker::new(store.clone())),
            Arc::new(CoverCache::new(config.cover_dir.clone(), store.clone())),
        )
        .with_batch_sizes(settings.batch_sizes());

        let queue = JobQueue::new("scan", settings.queue_capacity, Arc::new(orchestrator))
            .with_history_limit(settings.history_size);
        let pending = Arc::new(InMemoryPendingScans::new(settings.pending_ttl()));

        Self::new(store, scanner, pending, queue)
    }

    /// Build from configuration and re-queue any interrupted jobs.
    ///
    /// This is the process start-up path: jobs left mid-stage or queued by a
    /// previous process begin running before this returns.
    pub async fn open(store: Arc<dyn LibraryStore>, config: &ResolvedConfig) -> Result<Self> {
        let service = Self::from_config(store, config);
        let recovered = service
            .recover()
            .await
            .context("Failed to recover interrupted scan jobs")?;
        if recovered > 0 {
            info!(recovered, "Resumed interrupted scan jobs");
        }
        Ok(service)
    }

    pub fn store(&self) -> &Arc<dyn LibraryStore> {
        &self.store
    }

    pub fn queue(&self) -> &JobQueue<ScanOperation> {
        &self.queue
    }

    /// Scan a library and hold the result for confirmation
    #[instrument(skip(self), fields(library_id = %library_id))]
    pub async fn start_scan(&self, library_id: Uuid) -> Result<StartedScan> {
        let purged = self.pending.purge_expired().await;
        if purged > 0 {
            info!(purged, "Dropped expired pending scans");
        }

        let result = self.scanner.scan_library(library_id).await?;
        let summary = result.summary();
        let scan_id = self.pending.insert(result).await;
        info!(%scan_id, "Scan held for confirmation");

        Ok(StartedScan { scan_id, summary })
    }

    /// The full result behind a pending scan id
    pub async fn pending_result(&self, scan_id: Uuid) -> Option<ScanResult> {
        self.pending.get(scan_id).await.map(|scan| scan.result)
    }

    /// Apply a held scan. Unknown or expired ids are an error.
    #[instrument(skip(self), fields(scan_id = %scan_id))]
    pub async fn apply_pending(&self, scan_id: Uuid) -> Result<ApplyOutcome> {
        let scan = self
            .pending
            .remove(scan_id)
            .await
            .ok_or_else(|| anyhow!("Pending scan {} not found or expired", scan_id))?;

        Ok(self.scanner.apply(&scan.result).await?)
    }

    /// Drop a held scan. Returns false if it was unknown or already expired.
    pub async fn discard_pending(&self, scan_id: Uuid) -> bool {
        self.pending.remove(scan_id).await.is_some()
    }

    /// Queue a full orchestrated scan.
    ///
    /// If the library already has a job queued or running in this process,
    /// that job is returned instead of creating another.
    #[instrument(skip(self), fields(library_id = %library_id))]
    pub async fn scan_now(&self, library_id: Uuid) -> Result<ScanJob> {
        self.store
            .get_library(library_id)
            .await
            .with_context(|| format!("Cannot scan library {}", library_id))?;

        for job in self.store.interrupted_scan_jobs().await? {
            if job.library_id != library_id {
                continue;
            }
            if let Some(item) = self.queue.status(job.id) {
                if !item.status.is_settled() {
                    info!(job_id = %job.id, "Scan already active");
                    return Ok(job);
                }
            }
        }

        let mut job = ScanJob::new(library_id);
        self.store.save_scan_job(&job).await?;

        if let Err(e) = self.queue.enqueue(job.id, ScanOperation::Discover) {
            warn!(job_id = %job.id, error = %e, "Could not queue scan");
            job.fail(e.to_string());
            self.store.save_scan_job(&job).await?;
            return Err(e.into());
        }

        info!(job_id = %job.id, "Scan queued");
        Ok(job)
    }

    /// Cancel a scan job.
    ///
    /// A job that never started is marked cancelled here; a running job is
    /// asked to stop and records its own cancellation.
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelOutcome> {
        let outcome = self.queue.cancel(job_id);

        if outcome == CancelOutcome::Dequeued {
            let mut job = self.store.get_scan_job(job_id).await?;
            if !job.is_finished() {
                job.enter_stage(ScanStage::Cancelled);
                job.log("Cancelled before start");
                self.store.save_scan_job(&job).await?;
            }
        }

        Ok(outcome)
    }

    pub async fn job_status(&self, job_id: Uuid) -> Result<ScanJob> {
        self.store
            .get_scan_job(job_id)
            .await
            .with_context(|| format!("Scan job {} not found", job_id))
    }

    /// Wait until a queued job settles, then return its persisted record
    pub async fn wait_for_job(&self, job_id: Uuid) -> Result<ScanJob> {
        self.queue.wait_for(job_id).await;
        self.job_status(job_id).await
    }

    /// Re-queue jobs interrupted by a previous shutdown (once per service)
    pub async fn recover(&self) -> Result<usize> {
        let source = StoreRecovery::new(self.store.clone());
        self.queue.recover(&source).await
    }
}
