//! Categorization engine
//!
//! Turns staged candidates into outcome-bin memberships. Each run samples a
//! bounded number of candidates from the staging bin, validates their
//! payloads and files them into every bin [`bins_for`](crate::taxonomy::bins_for)
//! names. Candidates with broken payloads go to `WRONG_FORMAT`; candidates
//! whose odds have not arrived yet stay staged for a later run.

use std::sync::Mutex;

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::CategorizationConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{CandidateKey, OddsPayload, WinningOutcome};
use crate::storage::{CategoryAudit, SharedUsageLedger, UsageLedger};
use crate::store::{now_priority, CategoryStore, SharedCategoryStore};
use crate::taxonomy::{Category, Taxonomy};

/// Outcome of a single categorization run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorizationReport {
    pub region: String,
    /// Candidates inspected this run
    pub examined: usize,
    pub classified: usize,
    pub quarantined: usize,
    /// Left in staging because the odds payload is not there yet
    pub deferred: usize,
    /// Store errors on individual candidates
    pub failed: usize,
    /// Every watched bin was already above the ceiling
    pub saturated: bool,
    /// Every watched bin holds at least the minimum population
    pub ready: bool,
}

/// What happened to one staged candidate
#[derive(Debug, Clone, PartialEq, Eq)]
enum Disposition {
    Classified,
    Deferred,
    Quarantined(String),
}

pub struct Categorizer {
    store: SharedCategoryStore,
    ledger: SharedUsageLedger,
    taxonomy: Taxonomy,
    config: CategorizationConfig,
    rng: Mutex<ChaCha8Rng>,
}

impl Categorizer {
    pub fn new(
        store: SharedCategoryStore,
        ledger: SharedUsageLedger,
        taxonomy: Taxonomy,
        config: CategorizationConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            store,
            ledger,
            taxonomy,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Run one categorization pass for a region
    ///
    /// Fails with [`Error::InsufficientSupply`] when fewer than the configured
    /// minimum are staged. Per-candidate problems never abort the pass.
    pub async fn run(&self, region: &str) -> Result<CategorizationReport> {
        let mut report = CategorizationReport {
            region: region.to_string(),
            ..Default::default()
        };

        if self.is_saturated(region).await? {
            tracing::debug!(region, ceiling = self.config.bin_ceiling, "All goal bins full, skipping");
            report.saturated = true;
            report.ready = true;
            return Ok(report);
        }

        let staging = self.taxonomy.staging_key(region);
        let mut staged = self
            .store
            .range_bin(&staging, self.config.staging_window)
            .await?;

        if staged.len() < self.config.min_staged {
            tracing::warn!(
                region,
                bin = %staging,
                required = self.config.min_staged,
                available = staged.len(),
                "Not enough staged candidates"
            );
            return Err(Error::InsufficientSupply {
                bin: staging,
                required: self.config.min_staged,
                available: staged.len(),
            });
        }

        self.sample(&mut staged);

        for member in &staged {
            report.examined += 1;
            match self.classify(region, member).await {
                Ok(Disposition::Classified) => report.classified += 1,
                Ok(Disposition::Deferred) => report.deferred += 1,
                Ok(Disposition::Quarantined(reason)) => {
                    tracing::warn!(region, key = %member, %reason, "Quarantined candidate");
                    report.quarantined += 1;
                }
                Err(e) => {
                    tracing::warn!(region, key = %member, error = %e, "Failed to categorize candidate");
                    report.failed += 1;
                }
            }
        }

        report.ready = self.is_ready(region).await?;

        metrics::record_classified(region, report.classified as u64);
        metrics::record_quarantined(region, "categorize", report.quarantined as u64);

        tracing::info!(
            region,
            examined = report.examined,
            classified = report.classified,
            quarantined = report.quarantined,
            deferred = report.deferred,
            failed = report.failed,
            ready = report.ready,
            "Categorization run complete"
        );
        Ok(report)
    }

    /// Shuffle the staging window and keep the first `sample_draws`
    fn sample(&self, staged: &mut Vec<String>) {
        match self.rng.lock() {
            Ok(mut rng) => staged.shuffle(&mut *rng),
            Err(poisoned) => staged.shuffle(&mut *poisoned.into_inner()),
        }
        staged.truncate(self.config.sample_draws);
    }

    async fn is_saturated(&self, region: &str) -> Result<bool> {
        for bin in self.taxonomy.watched_bins(region) {
            if self.store.bin_size(&bin).await? <= self.config.bin_ceiling {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether every goal bin holds at least the minimum population
    pub async fn is_ready(&self, region: &str) -> Result<bool> {
        for bin in self.taxonomy.watched_bins(region) {
            if self.store.bin_size(&bin).await? < self.config.min_population {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn classify(&self, region: &str, member: &str) -> Result<Disposition> {
        let key: CandidateKey = match member.parse() {
            Ok(key) => key,
            Err(e) => return self.quarantine(region, member, e.to_string()).await,
        };
        if key.region != region {
            return self
                .quarantine(
                    region,
                    member,
                    format!("key region {} staged under {region}", key.region),
                )
                .await;
        }

        let Some(odds) = self.store.get(&key.odds_key()).await? else {
            tracing::debug!(key = %key, "Odds not ingested yet, deferring");
            return Ok(Disposition::Deferred);
        };
        if let Err(e) = serde_json::from_str::<OddsPayload>(&odds) {
            return self
                .quarantine(region, member, format!("unparsable odds: {e}"))
                .await;
        }

        let Some(raw) = self.store.get(&key.outcome_key()).await? else {
            return self
                .quarantine(region, member, "missing winning outcome".to_string())
                .await;
        };
        let outcome: WinningOutcome = match serde_json::from_str(&raw) {
            Ok(wo) => wo,
            Err(e) => {
                return self
                    .quarantine(region, member, format!("unparsable winning outcome: {e}"))
                    .await
            }
        };
        if !outcome.is_complete(self.config.min_outcome_entries) {
            return self
                .quarantine(
                    region,
                    member,
                    format!(
                        "only {} outcome entries, need {}",
                        outcome.outcomes.len(),
                        self.config.min_outcome_entries
                    ),
                )
                .await;
        }

        let score = outcome.outcome();
        if score.checked_total().is_none() {
            return self
                .quarantine(region, member, format!("score {score} is out of range"))
                .await;
        }

        let priority = now_priority();
        for bin in self.taxonomy.bin_keys_for(region, &score) {
            self.store.add_to_bin(&bin, priority, member).await?;
        }
        self.store
            .remove_from_bin(&self.taxonomy.staging_key(region), member)
            .await?;

        let audit = CategoryAudit {
            bin: self.taxonomy.bin_key(region, &Category::exact_for(&score)),
            key,
            total_goals: score.total_goals(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.ledger.record_category(&audit) {
            tracing::warn!(key = %member, error = %e, "Failed to write category audit");
        }

        tracing::debug!(key = %member, score = %score, "Classified candidate");
        Ok(Disposition::Classified)
    }

    async fn quarantine(&self, region: &str, member: &str, reason: String) -> Result<Disposition> {
        self.store
            .add_to_bin(&self.taxonomy.wrong_format_key(region), now_priority(), member)
            .await?;
        self.store
            .remove_from_bin(&self.taxonomy.staging_key(region), member)
            .await?;
        Ok(Disposition::Quarantined(reason))
    }
}
