pub mod jobs;
pub mod serve;
pub mod stats;

use std::sync::Arc;

use anyhow::{Context, Result};

use roundsmith::config::Config;
use roundsmith::engine::{Allocator, Categorizer, Cleaner, StorePublisher};
use roundsmith::ingest::IngestionPool;
use roundsmith::storage::{
    SharedTemplateRepository, SharedUsageLedger, SqliteTemplateRepository, SqliteUsageLedger,
};
use roundsmith::store::{RedisCategoryStore, SharedCategoryStore};
use roundsmith::taxonomy::Taxonomy;

// Re-export command functions for convenience
pub use jobs::{allocate, categorize, ingest};
pub use serve::serve;
pub use stats::stats;

/// Connected backends shared by every command
pub struct Services {
    pub config: Config,
    pub taxonomy: Taxonomy,
    pub store: SharedCategoryStore,
    pub ledger: SharedUsageLedger,
    pub templates: SharedTemplateRepository,
}

impl Services {
    pub async fn connect(config: Config) -> Result<Self> {
        let store = RedisCategoryStore::connect(&config.store)
            .await
            .context("Failed to connect to the category store")?;

        let ledger = SqliteUsageLedger::new(&config.ledger.sqlite_path).with_context(|| {
            format!(
                "Failed to open usage ledger at {}",
                config.ledger.sqlite_path.display()
            )
        })?;
        let templates = SqliteTemplateRepository::new(&config.ledger.sqlite_path)
            .context("Failed to open template repository")?;

        Ok(Self {
            taxonomy: Taxonomy::new(config.store.set_name.clone()),
            store: Arc::new(store),
            ledger: Arc::new(ledger),
            templates: Arc::new(templates),
            config,
        })
    }

    /// Regions to act on: the one given, or every configured region
    pub fn regions(&self, region: Option<String>) -> Vec<String> {
        match region {
            Some(region) => vec![region],
            None => self.config.scheduler.regions.clone(),
        }
    }

    pub fn categorizer(&self) -> Categorizer {
        Categorizer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
            self.taxonomy.clone(),
            self.config.categorization.clone(),
        )
    }

    pub fn allocator(&self) -> Allocator {
        Allocator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
            self.taxonomy.clone(),
            self.config.allocation.clone(),
            self.config.ledger.cooldown_days,
            self.config.categorization.min_outcome_entries,
        )
    }

    pub fn cleaner(&self) -> Cleaner {
        Cleaner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
            self.taxonomy.clone(),
            self.config.cleanup.clone(),
            self.config.ledger.retention_days,
        )
    }

    pub fn ingestion_pool(&self) -> IngestionPool {
        IngestionPool::new(
            Arc::clone(&self.store),
            self.taxonomy.clone(),
            self.config.ingestion.clone(),
            self.config.payload_ttl(),
        )
    }

    pub fn publisher(&self) -> StorePublisher {
        StorePublisher::new(Arc::clone(&self.store), self.config.payload_ttl())
    }
}
