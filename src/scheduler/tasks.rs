//! The periodic jobs the `serve` command schedules

use std::sync::Arc;

use async_trait::async_trait;

use super::harness::ScheduledJob;
use crate::config::AllocationTarget;
use crate::engine::{Allocator, Categorizer, Cleaner, RoundPublisher};
use crate::error::{Error, Result};
use crate::ingest::IngestionPool;
use crate::storage::SharedTemplateRepository;

pub const INGESTION_JOB: &str = "ingestion";
pub const CATEGORIZATION_JOB: &str = "categorization";
pub const ALLOCATION_JOB: &str = "allocation";
pub const CLEANUP_JOB: &str = "cleanup";

/// Keep the first hard error; supply shortages only warn
fn absorb(first: &mut Option<Error>, job: &str, scope: &str, err: Error) {
    if err.is_insufficient_supply() || matches!(err, Error::TemplateNotFound { .. }) {
        tracing::warn!(job, scope, error = %err, "Not enough data, retrying next tick");
        return;
    }
    tracing::warn!(job, scope, error = %err, "Job step failed");
    first.get_or_insert(err);
}

fn finish(first: Option<Error>) -> Result<()> {
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// ============================================================================
// Ingestion
// ============================================================================

pub struct IngestionTask {
    pool: Arc<IngestionPool>,
}

impl IngestionTask {
    pub fn new(pool: Arc<IngestionPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduledJob for IngestionTask {
    fn name(&self) -> &str {
        INGESTION_JOB
    }

    async fn run(&self) -> Result<()> {
        self.pool.run_configured().await.map(|_| ())
    }
}

// ============================================================================
// Categorization
// ============================================================================

pub struct CategorizationTask {
    categorizer: Arc<Categorizer>,
    regions: Vec<String>,
}

impl CategorizationTask {
    pub fn new(categorizer: Arc<Categorizer>, regions: Vec<String>) -> Self {
        Self {
            categorizer,
            regions,
        }
    }
}

#[async_trait]
impl ScheduledJob for CategorizationTask {
    fn name(&self) -> &str {
        CATEGORIZATION_JOB
    }

    async fn run(&self) -> Result<()> {
        let mut first = None;
        for region in &self.regions {
            if let Err(e) = self.categorizer.run(region).await {
                absorb(&mut first, CATEGORIZATION_JOB, region, e);
            }
        }
        finish(first)
    }
}

// ============================================================================
// Allocation
// ============================================================================

pub struct AllocationTask {
    allocator: Arc<Allocator>,
    templates: SharedTemplateRepository,
    publisher: Arc<dyn RoundPublisher>,
    targets: Vec<AllocationTarget>,
}

impl AllocationTask {
    pub fn new(
        allocator: Arc<Allocator>,
        templates: SharedTemplateRepository,
        publisher: Arc<dyn RoundPublisher>,
        targets: Vec<AllocationTarget>,
    ) -> Self {
        Self {
            allocator,
            templates,
            publisher,
            targets,
        }
    }

    /// Allocate and publish the next slot for one target.
    ///
    /// Returns the slot that was published, or `None` when the competition has
    /// no templates yet. The slot cursor only moves after a successful publish.
    pub async fn allocate_next(&self, target: &AllocationTarget) -> Result<Option<u32>> {
        let slots = self.templates.slots_for(target.competition_id)?;
        let Some(&first_slot) = slots.first() else {
            tracing::debug!(
                region = %target.region,
                competition = target.competition_id,
                "No templates for competition yet"
            );
            return Ok(None);
        };

        let slot = self
            .templates
            .load_cursor(&target.region, target.competition_id)?
            .unwrap_or(first_slot);

        let round = self
            .allocator
            .allocate_for_slot(self.templates.as_ref(), &target.region, target.competition_id, slot)
            .await?;
        self.publisher
            .publish(target.competition_id, slot, &round)
            .await?;

        let next = next_slot(&slots, slot);
        self.templates
            .save_cursor(&target.region, target.competition_id, next)?;

        tracing::info!(
            region = %target.region,
            competition = target.competition_id,
            slot,
            next_slot = next,
            size = round.len(),
            "Published round"
        );
        Ok(Some(slot))
    }
}

/// The slot after `current`, wrapping to the first
fn next_slot(slots: &[u32], current: u32) -> u32 {
    slots
        .iter()
        .copied()
        .find(|&s| s > current)
        .or_else(|| slots.first().copied())
        .unwrap_or(current)
}

#[async_trait]
impl ScheduledJob for AllocationTask {
    fn name(&self) -> &str {
        ALLOCATION_JOB
    }

    async fn run(&self) -> Result<()> {
        let mut first = None;
        for target in &self.targets {
            if let Err(e) = self.allocate_next(target).await {
                let scope = format!("{}/{}", target.region, target.competition_id);
                absorb(&mut first, ALLOCATION_JOB, &scope, e);
            }
        }
        finish(first)
    }
}

// ============================================================================
// Cleanup
// ============================================================================

pub struct CleanupTask {
    cleaner: Arc<Cleaner>,
    regions: Vec<String>,
}

impl CleanupTask {
    pub fn new(cleaner: Arc<Cleaner>, regions: Vec<String>) -> Self {
        Self { cleaner, regions }
    }
}

#[async_trait]
impl ScheduledJob for CleanupTask {
    fn name(&self) -> &str {
        CLEANUP_JOB
    }

    async fn run(&self) -> Result<()> {
        self.cleaner.run(&self.regions).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllocationConfig, CategorizationConfig};
    use crate::engine::StorePublisher;
    use crate::storage::{MockTemplateRepository, MockUsageLedger, TemplateKind, TemplateRepository, TemplateRow};
    use crate::store::{CategoryStore, MemoryCategoryStore};
    use crate::taxonomy::Taxonomy;
    use std::time::Duration;

    async fn seed(store: &MemoryCategoryStore, region: &str, id: u64, home: u32, away: u32) {
        let key = crate::models::CandidateKey::new(region, id);
        let outcome = serde_json::json!({
            "matchId": id,
            "homeScore": home,
            "awayScore": away,
            "outcomes": (0..26).map(|i| format!("M{i}")).collect::<Vec<_>>(),
        });
        let ttl = Duration::from_secs(600);
        store.set_with_ttl(&key.outcome_key(), &outcome.to_string(), ttl).await.unwrap();
        store
            .set_with_ttl(&key.odds_key(), &format!(r#"{{"matchId":{id}}}"#), ttl)
            .await
            .unwrap();
        let outcome = crate::taxonomy::Outcome::new(home, away);
        for bin in Taxonomy::default().bin_keys_for(region, &outcome) {
            store.add_to_bin(&bin, id as f64, &key.to_string()).await.unwrap();
        }
    }

    fn allocation_task(store: Arc<MemoryCategoryStore>, templates: Arc<MockTemplateRepository>) -> AllocationTask {
        let config = AllocationConfig {
            default_round_size: 2,
            seed: Some(7),
            targets: vec![AllocationTarget {
                region: "EN".to_string(),
                competition_id: 1,
            }],
            ..Default::default()
        };
        let targets = config.targets.clone();
        let allocator = Allocator::new(
            store.clone(),
            Arc::new(MockUsageLedger::new()),
            Taxonomy::default(),
            config,
            7,
            26,
        );
        let publisher = Arc::new(StorePublisher::new(store, Duration::from_secs(600)));
        AllocationTask::new(Arc::new(allocator), templates, publisher, targets)
    }

    #[test]
    fn test_next_slot_wraps() {
        assert_eq!(next_slot(&[1, 2, 5], 1), 2);
        assert_eq!(next_slot(&[1, 2, 5], 2), 5);
        assert_eq!(next_slot(&[1, 2, 5], 5), 1);
        assert_eq!(next_slot(&[], 4), 4);
    }

    #[tokio::test]
    async fn test_allocation_advances_cursor_only_on_success() {
        let store = MemoryCategoryStore::shared();
        let templates = Arc::new(MockTemplateRepository::new());
        templates
            .upsert(&TemplateRow::new(1, 1, TemplateKind::Raw, "1#0#0,2#0#0"))
            .unwrap();
        templates
            .upsert(&TemplateRow::new(1, 2, TemplateKind::Raw, "3#1#0,4#1#0"))
            .unwrap();
        seed(&store, "EN", 10, 0, 0).await;
        seed(&store, "EN", 11, 0, 0).await;

        let task = allocation_task(store.clone(), templates.clone());
        let target = task.targets[0].clone();

        assert_eq!(task.allocate_next(&target).await.unwrap(), Some(1));
        assert_eq!(templates.load_cursor("EN", 1).unwrap(), Some(2));
        assert!(store.get("EN:ROUND:1:1").await.unwrap().is_some());

        // Slot 2 needs 1-0 home wins, none are categorized
        let err = task.allocate_next(&target).await.unwrap_err();
        assert!(err.is_insufficient_supply());
        assert_eq!(templates.load_cursor("EN", 1).unwrap(), Some(2));

        // Shortages are not job failures
        assert!(task.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_allocation_without_templates_is_noop() {
        let store = MemoryCategoryStore::shared();
        let templates = Arc::new(MockTemplateRepository::new());
        let task = allocation_task(store, templates);
        let target = task.targets[0].clone();
        assert_eq!(task.allocate_next(&target).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_categorization_task_tolerates_empty_staging() {
        let store = MemoryCategoryStore::shared();
        let categorizer = Categorizer::new(
            store,
            Arc::new(MockUsageLedger::new()),
            Taxonomy::default(),
            CategorizationConfig::default(),
        );
        let task = CategorizationTask::new(Arc::new(categorizer), vec!["EN".to_string(), "DE".to_string()]);
        assert_eq!(task.name(), CATEGORIZATION_JOB);
        assert!(task.run().await.is_ok());
    }
}
