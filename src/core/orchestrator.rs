//! Scan job orchestrator.
//!
//! Runs one scan job through its five stages (discover, clean, index, link,
//! covers), persisting the job record at every stage boundary and after
//! every batch. Cancellation is checked between stages and between batches;
//! completed stages are never rolled back.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::{CoverExtractor, LinkOutcome, MetadataExtractor, SeriesLinker};
use crate::domain::{ComicFile, FileStatus, ScanJob, ScanOperation, ScanStage};
use crate::queue::{CancelToken, JobHandler};
use crate::scanner::{DiscoveryResult, Scanner};
use crate::store::LibraryStore;

/// Batch sizes for the batched stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub index: usize,
    pub link: usize,
    pub covers: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            index: 50,
            link: 100,
            covers: 25,
        }
    }
}

/// Whether the pipeline should keep going after a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageFlow {
    Continue,
    Cancelled,
}

/// State carried between stages of one run
#[derive(Default)]
struct RunContext {
    /// Walk from the discovering stage, reused by cleaning
    discovery: Option<DiscoveryResult>,
}

/// Executes scan jobs pulled from the scan queue
pub struct ScanOrchestrator {
    store: Arc<dyn LibraryStore>,
    scanner: Scanner,
    metadata: Arc<dyn MetadataExtractor>,
    linker: Arc<dyn SeriesLinker>,
    covers: Arc<dyn CoverExtractor>,
    batches: BatchSizes,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        scanner: Scanner,
        metadata: Arc<dyn MetadataExtractor>,
        linker: Arc<dyn SeriesLinker>,
        covers: Arc<dyn CoverExtractor>,
    ) -> Self {
        Self {
            store,
            scanner,
            metadata,
            linker,
            covers,
            batches: BatchSizes::default(),
        }
    }

    pub fn with_batch_sizes(mut self, batches: BatchSizes) -> Self {
        self.batches = BatchSizes {
            index: batches.index.max(1),
            link: batches.link.max(1),
            covers: batches.covers.max(1),
        };
        self
    }

    /// Run a job from `start` to the end of the pipeline.
    ///
    /// Returns `Ok` for completed and cancelled jobs. A stage error marks the
    /// job failed and is returned.
    #[instrument(skip(self, token), fields(job_id = %job_id, start = %start))]
    pub async fn run_job(&self, job_id: Uuid, start: ScanOperation, token: CancelToken) -> Result<()> {
        let mut job = self
            .store
            .get_scan_job(job_id)
            .await
            .with_context(|| format!("Failed to load scan job {}", job_id))?;

        if job.is_finished() {
            info!(stage = %job.stage, "Job already finished, skipping");
            return Ok(());
        }

        info!(library_id = %job.library_id, "Starting scan job");
        let mut ctx = RunContext::default();

        for op in start.remaining() {
            if token.is_cancelled() {
                return self.cancel_job(&mut job).await;
            }

            job.enter_stage(op.stage());
            self.store.save_scan_job(&job).await?;

            let flow = match self.run_stage(op, &mut job, &mut ctx, &token).await {
                Ok(flow) => flow,
                Err(e) => return self.handle_job_failure(&mut job, e).await,
            };
            self.store.save_scan_job(&job).await?;

            if flow == StageFlow::Cancelled {
                return self.cancel_job(&mut job).await;
            }
        }

        self.complete_job(&mut job).await
    }

    async fn run_stage(
        &self,
        op: ScanOperation,
        job: &mut ScanJob,
        ctx: &mut RunContext,
        token: &CancelToken,
    ) -> Result<StageFlow> {
        match op {
            ScanOperation::Discover => self.discover(job, ctx).await,
            ScanOperation::Clean => self.clean(job, ctx).await,
            ScanOperation::Index => self.index(job, token).await,
            ScanOperation::Link => self.link(job, token).await,
            ScanOperation::Covers => self.extract_covers(job, token).await,
        }
    }

    async fn discover(&self, job: &mut ScanJob, ctx: &mut RunContext) -> Result<StageFlow> {
        let discovery = self
            .scanner
            .discover(job.library_id)
            .await
            .context("Discovery failed")?;

        let found = discovery.files.len() as u64;
        let errors = discovery.errors.len() as u64;
        job.progress.discovering.total = found;
        job.progress.discovering.processed = found;
        job.progress.discovering.errors = errors;
        job.log(format!("Discovered {} files ({} errors)", found, errors));

        ctx.discovery = Some(discovery);
        Ok(StageFlow::Continue)
    }

    async fn clean(&self, job: &mut ScanJob, ctx: &mut RunContext) -> Result<StageFlow> {
        let discovery = match ctx.discovery.take() {
            Some(discovery) => discovery,
            None => {
                debug!("No discovery from this run, walking again");
                self.scanner
                    .discover(job.library_id)
                    .await
                    .context("Discovery failed")?
            }
        };

        let result = self
            .scanner
            .scan_with_discovery(job.library_id, discovery)
            .await
            .context("Diff failed")?;

        let changes = (result.new_files.len()
            + result.moved_files.len()
            + result.modified_files.len()
            + result.orphaned_files.len()
            + result.existing_orphaned_ids.len()) as u64;
        job.progress.cleaning.total = changes;

        if !result.has_changes() {
            job.log(format!("No changes ({} unchanged)", result.unchanged_files));
            return Ok(StageFlow::Continue);
        }

        let outcome = self.scanner.apply(&result).await.context("Apply failed")?;
        job.progress.cleaning.processed = changes;
        job.progress.files_added += outcome.added as u64;
        job.progress.files_moved += outcome.moved as u64;
        job.progress.files_orphaned += outcome.orphaned as u64;
        job.progress.files_removed += outcome.removed as u64;
        job.log(format!(
            "Applied changes: {} added, {} moved, {} updated, {} orphaned, {} removed",
            outcome.added, outcome.moved, outcome.updated, outcome.orphaned, outcome.removed
        ));

        Ok(StageFlow::Continue)
    }

    async fn index(&self, job: &mut ScanJob, token: &CancelToken) -> Result<StageFlow> {
        let files = self.store.files_needing_metadata(job.library_id).await?;
        job.progress.indexing.total = files.len() as u64;

        for batch in files.chunks(self.batches.index) {
            if token.is_cancelled() {
                return Ok(StageFlow::Cancelled);
            }

            for file in batch {
                match self.metadata.extract(file).await {
                    Ok(meta) => {
                        let mut updated = file.clone();
                        updated.page_count = Some(meta.page_count);
                        updated.has_comic_info = meta.has_comic_info;
                        updated.metadata_at = Some(Utc::now());
                        updated.status = FileStatus::Indexed;
                        updated.touch();
                        self.store.update_file(&updated).await?;
                    }
                    Err(e) => {
                        warn!(file = %file.relative_path, error = %e, "Metadata extraction failed");
                        job.progress.indexing.errors += 1;
                    }
                }
                job.progress.indexing.processed += 1;
            }

            self.store.save_scan_job(job).await?;
        }

        job.log(format!(
            "Indexed {} files ({} errors)",
            job.progress.indexing.processed - job.progress.indexing.errors,
            job.progress.indexing.errors
        ));
        Ok(StageFlow::Continue)
    }

    async fn link_file(&self, file: &ComicFile) -> Result<LinkOutcome> {
        let outcome = self.linker.link_by_metadata(file).await?;
        if outcome.linked {
            return Ok(outcome);
        }
        self.linker.link_by_folder(file).await
    }

    async fn link(&self, job: &mut ScanJob, token: &CancelToken) -> Result<StageFlow> {
        let files = self.store.unlinked_files(job.library_id).await?;
        job.progress.linking.total = files.len() as u64;
        let mut linked = 0u64;

        for batch in files.chunks(self.batches.link) {
            if token.is_cancelled() {
                return Ok(StageFlow::Cancelled);
            }

            for file in batch {
                match self.link_file(file).await {
                    Ok(outcome) => {
                        if outcome.linked {
                            linked += 1;
                        }
                        if outcome.created_series {
                            job.progress.series_created += 1;
                        }
                    }
                    Err(e) => {
                        warn!(file = %file.relative_path, error = %e, "Series linking failed");
                        job.progress.linking.errors += 1;
                    }
                }
                job.progress.linking.processed += 1;
            }

            self.store.save_scan_job(job).await?;
        }

        // Catch-all: one more attempt for anything still unlinked
        if token.is_cancelled() {
            return Ok(StageFlow::Cancelled);
        }
        let stragglers = self.store.unlinked_files(job.library_id).await?;
        let mut recovered = 0u64;
        for file in &stragglers {
            match self.link_file(file).await {
                Ok(outcome) if outcome.linked => {
                    recovered += 1;
                    if outcome.created_series {
                        job.progress.series_created += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(file = %file.relative_path, error = %e, "Catch-all link failed"),
            }
        }

        job.log(format!(
            "Linked {} files, {} series created, {} of {} stragglers recovered",
            linked + recovered,
            job.progress.series_created,
            recovered,
            stragglers.len()
        ));
        Ok(StageFlow::Continue)
    }

    async fn extract_covers(&self, job: &mut ScanJob, token: &CancelToken) -> Result<StageFlow> {
        let files = self.store.files_needing_cover(job.library_id).await?;
        job.progress.covers.total = files.len() as u64;

        for batch in files.chunks(self.batches.covers) {
            if token.is_cancelled() {
                return Ok(StageFlow::Cancelled);
            }

            let outcome = self.covers.extract_batch(batch).await?;
            job.progress.covers.processed += batch.len() as u64;
            job.progress.covers.errors += outcome.failed;
            job.progress.covers_extracted += outcome.extracted;
            job.progress.covers_cached += outcome.cached;

            self.store.save_scan_job(job).await?;
        }

        job.log(format!(
            "Covers: {} extracted, {} already cached, {} failed",
            job.progress.covers_extracted, job.progress.covers_cached, job.progress.covers.errors
        ));
        Ok(StageFlow::Continue)
    }

    async fn cancel_job(&self, job: &mut ScanJob) -> Result<()> {
        let stopped_at = job.stage;
        job.enter_stage(ScanStage::Cancelled);
        job.log(format!("Cancelled during {}", stopped_at));
        self.store.save_scan_job(job).await?;
        info!(stage = %stopped_at, "Scan job cancelled");
        Ok(())
    }

    async fn handle_job_failure(&self, job: &mut ScanJob, err: anyhow::Error) -> Result<()> {
        let message = format!("{:#}", err);
        error!(stage = %job.stage, error = %message, "Scan job failed");

        job.fail(message);
        if let Err(save_err) = self.store.save_scan_job(job).await {
            error!(error = %save_err, "Failed to persist failed job");
        }
        Err(err)
    }

    async fn complete_job(&self, job: &mut ScanJob) -> Result<()> {
        job.enter_stage(ScanStage::Complete);
        self.store.save_scan_job(job).await?;

        let p = &job.progress;
        info!(
            added = p.files_added,
            moved = p.files_moved,
            orphaned = p.files_orphaned,
            removed = p.files_removed,
            indexed = p.indexing.processed,
            series_created = p.series_created,
            covers_extracted = p.covers_extracted,
            "Scan job complete"
        );
        Ok(())
    }
}

#[async_trait]
impl JobHandler<ScanOperation> for ScanOrchestrator {
    async fn run(&self, job_id: Uuid, kind: ScanOperation, token: CancelToken) -> Result<()> {
        self.run_job(job_id, kind, token).await
    }
}
