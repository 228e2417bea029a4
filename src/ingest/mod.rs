//! Ingestion worker pool
//!
//! A fixed pool of tokio tasks shares one bounded job queue. File jobs decode
//! provider drops and push follow-on jobs (odds, live score) back onto the
//! same queue; outcome batches are written under their canonical keys and
//! staged for categorization.
//!
//! ```text
//! input dir ──► [ file jobs ] ──► bounded mpsc ◄──┐
//!                                     │           │ follow-on jobs
//!                               N workers ────────┘
//!                                     │
//!                                     ▼
//!                             Category Store
//! ```
//!
//! A follow-on job that does not fit in the queue is processed inline by the
//! worker that produced it, so workers never block on their own queue. The
//! run completes when the pending-job count drains to zero.

pub mod files;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::IngestionConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{CandidateKey, LiveScorePayload, OddsPayload, WinningOutcome};
use crate::store::{now_priority, CategoryStore, SharedCategoryStore};
use crate::taxonomy::Taxonomy;

pub use files::{FileDescriptor, FileKind, MatchFile, MatchRecord};

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestJob {
    MatchFile(FileDescriptor),
    OutcomeFile(FileDescriptor),
    Odds { region: String, match_id: u64 },
    LiveScore { region: String, match_id: u64 },
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
pub struct IngestStats {
    pub files_seen: AtomicU64,
    pub files_processed: AtomicU64,
    pub files_skipped: AtomicU64,
    pub files_rejected: AtomicU64,
    pub outcomes_written: AtomicU64,
    pub odds_written: AtomicU64,
    pub live_scores_written: AtomicU64,
    pub payloads_missing: AtomicU64,
    pub failed_jobs: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestReport {
        IngestReport {
            files_seen: self.files_seen.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_rejected: self.files_rejected.load(Ordering::Relaxed),
            outcomes_written: self.outcomes_written.load(Ordering::Relaxed),
            odds_written: self.odds_written.load(Ordering::Relaxed),
            live_scores_written: self.live_scores_written.load(Ordering::Relaxed),
            payloads_missing: self.payloads_missing.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files_seen: u64,
    pub files_processed: u64,
    /// Names that do not follow the provider convention
    pub files_skipped: u64,
    /// Files whose payload could not be decoded
    pub files_rejected: u64,
    pub outcomes_written: u64,
    pub odds_written: u64,
    pub live_scores_written: u64,
    /// Follow-on payload files that were not there
    pub payloads_missing: u64,
    pub failed_jobs: u64,
}

// ============================================================================
// Worker context
// ============================================================================

struct IngestContext {
    store: SharedCategoryStore,
    taxonomy: Taxonomy,
    config: IngestionConfig,
    dir: PathBuf,
    ttl: Duration,
    stats: Arc<IngestStats>,
}

impl IngestContext {
    /// Process one job, returning its follow-on jobs
    async fn process(&self, job: IngestJob) -> Result<Vec<IngestJob>> {
        match job {
            IngestJob::MatchFile(fd) => self.match_file(fd).await,
            IngestJob::OutcomeFile(fd) => self.outcome_file(fd).await.map(|_| Vec::new()),
            IngestJob::Odds { region, match_id } => {
                self.odds(&region, match_id).await.map(|_| Vec::new())
            }
            IngestJob::LiveScore { region, match_id } => {
                self.live_score(&region, match_id).await.map(|_| Vec::new())
            }
        }
    }

    async fn match_file(&self, fd: FileDescriptor) -> Result<Vec<IngestJob>> {
        let raw = tokio::fs::read_to_string(&fd.path).await?;
        let parsed: MatchFile = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.reject(&fd, &e.to_string()).await;
                return Ok(Vec::new());
            }
        };

        let region = self.config.region_for(fd.project_id).to_string();
        let mut follow_ons = Vec::with_capacity(parsed.matches.len() * 2);
        for record in &parsed.matches {
            follow_ons.push(IngestJob::Odds {
                region: region.clone(),
                match_id: record.id,
            });
            follow_ons.push(IngestJob::LiveScore {
                region: region.clone(),
                match_id: record.id,
            });
        }

        tracing::debug!(
            file = fd.file_name(),
            region = %region,
            matches = parsed.matches.len(),
            "Decoded match file"
        );
        self.archive(&fd).await?;
        Ok(follow_ons)
    }

    async fn outcome_file(&self, fd: FileDescriptor) -> Result<()> {
        let raw = tokio::fs::read_to_string(&fd.path).await?;
        let outcomes: Vec<WinningOutcome> = match serde_json::from_str(&raw) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.reject(&fd, &e.to_string()).await;
                return Ok(());
            }
        };

        let region = self.config.region_for(fd.project_id);
        let staging = self.taxonomy.staging_key(region);
        for outcome in &outcomes {
            let key = CandidateKey::new(region, outcome.match_id);
            let payload = serde_json::to_string(outcome)?;
            self.store
                .set_with_ttl(&key.outcome_key(), &payload, self.ttl)
                .await?;
            self.store
                .add_to_bin(&staging, now_priority(), &key.to_string())
                .await?;
            IngestStats::bump(&self.stats.outcomes_written);
        }

        tracing::debug!(file = fd.file_name(), region, outcomes = outcomes.len(), "Staged outcome batch");
        self.archive(&fd).await
    }

    async fn odds(&self, region: &str, match_id: u64) -> Result<()> {
        let path = files::odds_path(&self.dir, match_id);
        let Some(payload) = self.read_payload::<OddsPayload>(&path).await? else {
            return Ok(());
        };

        let key = CandidateKey::new(region, match_id);
        self.store
            .set_with_ttl(&key.odds_key(), &serde_json::to_string(&payload)?, self.ttl)
            .await?;
        IngestStats::bump(&self.stats.odds_written);
        Ok(())
    }

    async fn live_score(&self, region: &str, match_id: u64) -> Result<()> {
        let path = files::live_score_path(&self.dir, match_id);
        let Some(payload) = self.read_payload::<LiveScorePayload>(&path).await? else {
            return Ok(());
        };

        let key = CandidateKey::new(region, match_id);
        self.store
            .set_with_ttl(&key.live_score_key(), &serde_json::to_string(&payload)?, self.ttl)
            .await?;
        IngestStats::bump(&self.stats.live_scores_written);
        Ok(())
    }

    /// Read and decode a follow-on payload; a missing file is not an error
    async fn read_payload<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Payload file not present");
                IngestStats::bump(&self.stats.payloads_missing);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&raw).map(Some).map_err(|e| {
            Error::malformed_candidate(path.display().to_string(), format!("unparsable payload: {e}"))
        })
    }

    async fn archive(&self, fd: &FileDescriptor) -> Result<()> {
        IngestStats::bump(&self.stats.files_processed);
        if self.config.archive_processed {
            move_into(&self.dir.join(files::PROCESSED_DIR), &fd.path).await?;
        }
        Ok(())
    }

    async fn reject(&self, fd: &FileDescriptor, reason: &str) {
        tracing::warn!(file = fd.file_name(), %reason, "Rejecting undecodable file");
        IngestStats::bump(&self.stats.files_rejected);
        if self.config.archive_processed {
            if let Err(e) = move_into(&self.dir.join(files::REJECTED_DIR), &fd.path).await {
                tracing::warn!(file = fd.file_name(), error = %e, "Failed to move rejected file");
            }
        }
    }
}

async fn move_into(target_dir: &Path, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(target_dir).await?;
    let Some(name) = path.file_name() else {
        return Ok(());
    };
    tokio::fs::rename(path, target_dir.join(name)).await?;
    Ok(())
}

// ============================================================================
// Pool
// ============================================================================

pub struct IngestionPool {
    store: SharedCategoryStore,
    taxonomy: Taxonomy,
    config: IngestionConfig,
    ttl: Duration,
}

impl IngestionPool {
    pub fn new(
        store: SharedCategoryStore,
        taxonomy: Taxonomy,
        config: IngestionConfig,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            taxonomy,
            config,
            ttl,
        }
    }

    /// Ingest every provider file in the configured input directory
    pub async fn run_configured(&self) -> Result<IngestReport> {
        let dir = self.config.input_dir.clone();
        self.run(&dir).await
    }

    /// Ingest every provider file in `dir` and wait for the queue to drain
    pub async fn run(&self, dir: &Path) -> Result<IngestReport> {
        let stats = IngestStats::new();
        let jobs = Self::scan(dir, &stats).await?;

        let ctx = Arc::new(IngestContext {
            store: Arc::clone(&self.store),
            taxonomy: self.taxonomy.clone(),
            config: self.config.clone(),
            dir: dir.to_path_buf(),
            ttl: self.ttl,
            stats: Arc::clone(&stats),
        });

        let workers = self.config.workers.max(1);
        let (tx, rx) = mpsc::channel::<IngestJob>(self.config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        // Starts at one so workers cannot observe an empty pool while jobs are still being seeded
        let (pending_tx, pending_rx) = watch::channel(1usize);
        let pending_tx = Arc::new(pending_tx);

        tracing::info!(dir = %dir.display(), files = jobs.len(), workers, "Starting ingestion");

        let handles = Self::spawn_workers(workers, &ctx, &tx, &rx, &pending_tx, &pending_rx);

        for job in jobs {
            pending_tx.send_modify(|n| *n += 1);
            if tx.send(job).await.is_err() {
                pending_tx.send_modify(|n| *n -= 1);
                tracing::error!("Ingestion queue closed while seeding");
                break;
            }
        }
        drop(tx);
        pending_tx.send_modify(|n| *n -= 1);

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Ingestion worker panicked");
            }
        }

        let report = stats.snapshot();
        metrics::record_ingested("outcome", report.outcomes_written);
        metrics::record_ingested("odds", report.odds_written);
        metrics::record_ingested("live_score", report.live_scores_written);

        tracing::info!(
            files = report.files_processed,
            skipped = report.files_skipped,
            rejected = report.files_rejected,
            outcomes = report.outcomes_written,
            odds = report.odds_written,
            live_scores = report.live_scores_written,
            failed = report.failed_jobs,
            "Ingestion complete"
        );
        Ok(report)
    }

    /// List provider files directly under `dir`, oldest name first
    async fn scan(dir: &Path, stats: &IngestStats) -> Result<Vec<IngestJob>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "Input directory does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut jobs = Vec::with_capacity(paths.len());
        for path in paths {
            IngestStats::bump(&stats.files_seen);
            match FileDescriptor::parse(&path) {
                Some(fd) if fd.kind == FileKind::Matches => jobs.push(IngestJob::MatchFile(fd)),
                Some(fd) => jobs.push(IngestJob::OutcomeFile(fd)),
                None => {
                    tracing::warn!(path = %path.display(), "Skipping file with malformed name");
                    IngestStats::bump(&stats.files_skipped);
                }
            }
        }
        Ok(jobs)
    }

    fn spawn_workers(
        count: usize,
        ctx: &Arc<IngestContext>,
        tx: &mpsc::Sender<IngestJob>,
        rx: &Arc<Mutex<mpsc::Receiver<IngestJob>>>,
        pending_tx: &Arc<watch::Sender<usize>>,
        pending_rx: &watch::Receiver<usize>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(count);

        for worker_id in 0..count {
            let ctx = Arc::clone(ctx);
            let tx = tx.clone();
            let rx = Arc::clone(rx);
            let pending_tx = Arc::clone(pending_tx);
            let mut idle = pending_rx.clone();

            let handle = tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        biased;
                        job = async {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        } => job,
                        _ = async {
                            let _ = idle.wait_for(|n| *n == 0).await;
                        } => None,
                    };

                    let Some(job) = job else {
                        break;
                    };

                    let mut backlog = VecDeque::from([job]);
                    while let Some(job) = backlog.pop_front() {
                        match ctx.process(job).await {
                            Ok(follow_ons) => {
                                for follow_on in follow_ons {
                                    pending_tx.send_modify(|n| *n += 1);
                                    if let Err(e) = tx.try_send(follow_on) {
                                        backlog.push_back(e.into_inner());
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(worker_id, error = %e, "Ingestion job failed");
                                IngestStats::bump(&ctx.stats.failed_jobs);
                            }
                        }
                        pending_tx.send_modify(|n| *n -= 1);
                    }
                }

                tracing::debug!(worker_id, "Ingestion worker shutting down");
            });

            handles.push(handle);
        }

        handles
    }
}
