//! Periodic store and ledger cleanup

use chrono::{Duration as ChronoDuration, Utc};

use crate::config::CleanupConfig;
use crate::error::Result;
use crate::models::CandidateKey;
use crate::storage::{SharedUsageLedger, UsageLedger};
use crate::store::{CategoryStore, SharedCategoryStore};
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Ledger rows past the retention window
    pub ledger_purged: usize,
    /// Staging entries whose winning outcome expired
    pub staging_expired: usize,
    /// Oldest `WRONG_FORMAT` entries dropped to respect the cap
    pub wrong_format_trimmed: usize,
}

pub struct Cleaner {
    store: SharedCategoryStore,
    ledger: SharedUsageLedger,
    taxonomy: Taxonomy,
    config: CleanupConfig,
    retention_days: u32,
}

impl Cleaner {
    pub fn new(
        store: SharedCategoryStore,
        ledger: SharedUsageLedger,
        taxonomy: Taxonomy,
        config: CleanupConfig,
        retention_days: u32,
    ) -> Self {
        Self {
            store,
            ledger,
            taxonomy,
            config,
            retention_days,
        }
    }

    /// Purge the ledger once, then sweep every region
    pub async fn run(&self, regions: &[String]) -> Result<CleanupReport> {
        let cutoff = Utc::now().date_naive() - ChronoDuration::days(i64::from(self.retention_days));
        let mut report = CleanupReport {
            ledger_purged: self.ledger.purge_older_than(cutoff)?,
            ..Default::default()
        };

        for region in regions {
            report.staging_expired += self.sweep_staging(region).await?;
            report.wrong_format_trimmed += self
                .store
                .trim_oldest(&self.taxonomy.wrong_format_key(region), self.config.wrong_format_cap)
                .await?;
        }

        tracing::info!(
            ledger_purged = report.ledger_purged,
            staging_expired = report.staging_expired,
            wrong_format_trimmed = report.wrong_format_trimmed,
            "Cleanup complete"
        );
        Ok(report)
    }

    async fn sweep_staging(&self, region: &str) -> Result<usize> {
        let staging = self.taxonomy.staging_key(region);
        let members = self
            .store
            .range_bin(&staging, self.config.staging_scan)
            .await?;

        let mut dropped = 0;
        for member in members {
            let expired = match member.parse::<CandidateKey>() {
                Ok(key) => self.store.get(&key.outcome_key()).await?.is_none(),
                Err(_) => true,
            };
            if expired && self.store.remove_from_bin(&staging, &member).await? {
                tracing::debug!(region, key = %member, "Dropped expired staging entry");
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockUsageLedger;
    use crate::store::MemoryCategoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cleanup_run() {
        let store = MemoryCategoryStore::shared();
        let ledger = Arc::new(MockUsageLedger::new());

        let old = Utc::now().date_naive() - ChronoDuration::days(120);
        ledger.record_use(&CandidateKey::new("EN", 1), old).unwrap();
        ledger
            .record_use(&CandidateKey::new("EN", 2), Utc::now().date_naive())
            .unwrap();

        store
            .set_with_ttl("ENWo:10", "{}", Duration::from_secs(60))
            .await
            .unwrap();
        store.add_to_bin("EN:STAGING", 1.0, "EN:10").await.unwrap();
        store.add_to_bin("EN:STAGING", 2.0, "EN:11").await.unwrap();

        for i in 0..5 {
            store
                .add_to_bin("EN:WRONG_FORMAT", i as f64, &format!("EN:{i}"))
                .await
                .unwrap();
        }

        let config = CleanupConfig {
            wrong_format_cap: 3,
            staging_scan: 100,
        };
        let cleaner = Cleaner::new(store.clone(), ledger.clone(), Taxonomy::default(), config, 90);
        let report = cleaner.run(&["EN".to_string()]).await.unwrap();

        assert_eq!(
            report,
            CleanupReport {
                ledger_purged: 1,
                staging_expired: 1,
                wrong_format_trimmed: 2,
            }
        );
        assert!(store.contains("EN:STAGING", "EN:10").await.unwrap());
        assert!(!store.contains("EN:STAGING", "EN:11").await.unwrap());
        assert_eq!(ledger.len(), 1);
    }
}
