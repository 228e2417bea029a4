//! Quota-allocation engine
//!
//! Assembles one round from the outcome bins so that the round reproduces a
//! distribution template. Allocation is two-phase:
//!
//! 1. **Stage**: read each quota's bin oldest first and collect usable
//!    candidates. Nothing is removed or ledgered in this phase, so a bin that
//!    runs dry fails the call without consuming anything.
//! 2. **Commit**: once every quota is covered, remove each pick from every
//!    bin its outcome is filed under and write its ledger entry.
//!
//! Head-of-bin candidates that turn out to be malformed, misfiled or still in
//! cooldown are cleaned out of the store during staging even when the call
//! fails, so they cannot block the bin on the next attempt.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::AllocationConfig;
use crate::error::{Error, Result, RoundsmithErrorTrait};
use crate::metrics;
use crate::models::{CandidateKey, LiveScorePayload, OddsPayload, RoundEntry, RoundSelection, WinningOutcome};
use crate::storage::{SharedUsageLedger, TemplateRepository, UsageLedger};
use crate::store::{now_priority, CategoryStore, SharedCategoryStore};
use crate::taxonomy::{bins_for, Category, Taxonomy};
use crate::template::{rescale_quotas, DistributionTemplate, Quota};

/// Store cleanup discovered while staging
#[derive(Debug, Clone, PartialEq)]
enum Hygiene {
    /// Move to `WRONG_FORMAT` and drop from the listed bins
    Quarantine {
        member: String,
        bins: Vec<String>,
        reason: String,
    },
    /// Drop from the listed bins
    Evict {
        member: String,
        bins: Vec<String>,
        reason: String,
    },
}

/// Verdict on one bin member
enum Inspection {
    Usable(Box<RoundEntry>),
    Rejected(Hygiene),
}

pub struct Allocator {
    store: SharedCategoryStore,
    ledger: SharedUsageLedger,
    taxonomy: Taxonomy,
    config: AllocationConfig,
    cooldown_days: u32,
    min_outcome_entries: usize,
    rng: Mutex<ChaCha8Rng>,
}

impl Allocator {
    pub fn new(
        store: SharedCategoryStore,
        ledger: SharedUsageLedger,
        taxonomy: Taxonomy,
        config: AllocationConfig,
        cooldown_days: u32,
        min_outcome_entries: usize,
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
            cooldown_days,
            min_outcome_entries,
            rng: Mutex::new(rng),
        }
    }

    pub fn round_size_for(&self, competition_id: u32) -> usize {
        self.config.round_size_for(competition_id)
    }

    /// Allocate the round for a stored template slot
    pub async fn allocate_for_slot(
        &self,
        templates: &dyn TemplateRepository,
        region: &str,
        competition_id: u32,
        round_slot: u32,
    ) -> Result<RoundSelection> {
        let row = templates
            .get(competition_id, round_slot)?
            .ok_or(Error::TemplateNotFound {
                competition: competition_id,
                slot: round_slot,
            })?;
        let template = DistributionTemplate::from_row(&row)?;
        self.allocate(region, self.round_size_for(competition_id), &template)
            .await
    }

    /// Assemble a round of exactly `round_size` candidates matching `template`
    pub async fn allocate(
        &self,
        region: &str,
        round_size: usize,
        template: &DistributionTemplate,
    ) -> Result<RoundSelection> {
        let started = Instant::now();
        let result = self.allocate_inner(region, round_size, template).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.category().as_str(),
        };
        metrics::record_allocation(region, outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn allocate_inner(
        &self,
        region: &str,
        round_size: usize,
        template: &DistributionTemplate,
    ) -> Result<RoundSelection> {
        let quotas = rescale_quotas(template.quotas(self.config.strategy)?, round_size)?;
        let today = Utc::now().date_naive();

        let mut hygiene = Vec::new();
        let staged = self.stage(region, &quotas, today, &mut hygiene).await;
        self.apply_hygiene(region, &hygiene).await;

        let mut entries = staged?;
        if entries.len() != round_size {
            return Err(Error::QuotaMismatch {
                expected: round_size,
                actual: entries.len(),
            });
        }

        self.commit(region, &entries, today).await?;
        self.shuffle(&mut entries);

        tracing::info!(
            region,
            round_size,
            quotas = quotas.len(),
            cleaned = hygiene.len(),
            "Round allocated"
        );

        Ok(RoundSelection {
            region: region.to_string(),
            entries,
            created_at: Utc::now(),
        })
    }

    /// Collect picks for every quota without mutating the bins
    async fn stage(
        &self,
        region: &str,
        quotas: &[Quota],
        today: NaiveDate,
        hygiene: &mut Vec<Hygiene>,
    ) -> Result<Vec<RoundEntry>> {
        let mut entries: Vec<RoundEntry> = Vec::new();
        let mut taken: HashSet<String> = HashSet::new();

        for quota in quotas {
            let bin = self.taxonomy.bin_key(region, &quota.category);
            let window = quota.count + self.config.lookahead + taken.len();
            let members = self.store.range_bin(&bin, window).await?;

            let mut picked = 0;
            for member in members {
                if picked == quota.count {
                    break;
                }
                if taken.contains(&member) {
                    continue;
                }

                match self
                    .inspect(region, &bin, &member, &quota.category, today)
                    .await?
                {
                    Inspection::Usable(entry) => {
                        taken.insert(member);
                        entries.push(*entry);
                        picked += 1;
                    }
                    Inspection::Rejected(action) => hygiene.push(action),
                }
            }

            if picked < quota.count {
                tracing::warn!(
                    region,
                    bin = %bin,
                    required = quota.count,
                    available = picked,
                    "Not enough data in bin"
                );
                return Err(Error::InsufficientSupply {
                    bin,
                    required: quota.count,
                    available: picked,
                });
            }
        }

        Ok(entries)
    }

    async fn inspect(
        &self,
        region: &str,
        bin: &str,
        member: &str,
        category: &Category,
        today: NaiveDate,
    ) -> Result<Inspection> {
        let quarantine = |bins: Vec<String>, reason: String| -> Result<Inspection> {
            Ok(Inspection::Rejected(Hygiene::Quarantine {
                member: member.to_string(),
                bins,
                reason,
            }))
        };
        let only_this_bin = || vec![bin.to_string()];

        let key: CandidateKey = match member.parse() {
            Ok(key) => key,
            Err(e) => return quarantine(only_this_bin(), e.to_string()),
        };

        let Some(raw_outcome) = self.store.get(&key.outcome_key()).await? else {
            return quarantine(only_this_bin(), "winning outcome expired".to_string());
        };
        let winning_outcome: WinningOutcome = match serde_json::from_str(&raw_outcome) {
            Ok(wo) => wo,
            Err(e) => return quarantine(only_this_bin(), format!("unparsable winning outcome: {e}")),
        };

        let score = winning_outcome.outcome();
        let filed_under = self.taxonomy.bin_keys_for(region, &score);

        if !winning_outcome.is_complete(self.min_outcome_entries) {
            return quarantine(filed_under, "incomplete outcome list".to_string());
        }
        if score.checked_total().is_none() {
            return quarantine(filed_under, format!("score {score} is out of range"));
        }

        let odds: OddsPayload = match self.store.get(&key.odds_key()).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(odds) => odds,
                Err(e) => return quarantine(filed_under, format!("unparsable odds: {e}")),
            },
            None => return quarantine(filed_under, "odds expired".to_string()),
        };

        if !category.matches(&score) {
            return Ok(Inspection::Rejected(Hygiene::Evict {
                member: member.to_string(),
                bins: only_this_bin(),
                reason: format!("score {score} does not belong in {bin}"),
            }));
        }

        if self.config.enforce_cooldown
            && self.ledger.in_cooldown(&key, today, self.cooldown_days)?
        {
            return Ok(Inspection::Rejected(Hygiene::Evict {
                member: member.to_string(),
                bins: filed_under,
                reason: "used within cooldown window".to_string(),
            }));
        }

        let live_score = match self.store.get(&key.live_score_key()).await? {
            Some(raw) => match serde_json::from_str::<LiveScorePayload>(&raw) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Ignoring unparsable live score");
                    None
                }
            },
            None => None,
        };

        Ok(Inspection::Usable(Box::new(RoundEntry {
            key,
            odds,
            winning_outcome,
            live_score,
        })))
    }

    /// Apply staging cleanup; failures are logged and left for the next run
    async fn apply_hygiene(&self, region: &str, actions: &[Hygiene]) {
        let wrong_format = self.taxonomy.wrong_format_key(region);
        let mut quarantined = 0u64;

        for action in actions {
            let result = match action {
                Hygiene::Quarantine {
                    member,
                    bins,
                    reason,
                } => {
                    tracing::warn!(region, key = %member, %reason, "Quarantining candidate during allocation");
                    quarantined += 1;
                    match self
                        .store
                        .add_to_bin(&wrong_format, now_priority(), member)
                        .await
                    {
                        Ok(_) => self.store.remove_from_bins(bins, member).await.map(|_| ()),
                        Err(e) => Err(e),
                    }
                }
                Hygiene::Evict {
                    member,
                    bins,
                    reason,
                } => {
                    tracing::debug!(region, key = %member, %reason, "Evicting candidate");
                    self.store.remove_from_bins(bins, member).await.map(|_| ())
                }
            };

            if let Err(e) = result {
                tracing::warn!(region, error = %e, "Failed to apply bin cleanup");
            }
        }

        metrics::record_quarantined(region, "allocate", quarantined);
    }

    /// Retire picks from every bin and write their ledger entries
    async fn commit(&self, region: &str, entries: &[RoundEntry], today: NaiveDate) -> Result<()> {
        for (committed, entry) in entries.iter().enumerate() {
            let member = entry.key.to_string();
            let bins: Vec<String> = bins_for(&entry.outcome())
                .iter()
                .map(|c| self.taxonomy.bin_key(region, c))
                .collect();

            let step = async {
                let removed = self.store.remove_from_bins(&bins, &member).await?;
                if removed == 0 {
                    tracing::warn!(region, key = %member, "Candidate already retired by a concurrent allocation");
                }
                self.ledger.record_use(&entry.key, today)
            };

            if let Err(e) = step.await {
                tracing::error!(
                    region,
                    key = %member,
                    committed,
                    total = entries.len(),
                    error = %e,
                    "Commit failed after partial retirement"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    fn shuffle(&self, entries: &mut [RoundEntry]) {
        match self.rng.lock() {
            Ok(mut rng) => entries.shuffle(&mut *rng),
            Err(poisoned) => entries.shuffle(&mut *poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockTemplateRepository, MockUsageLedger, TemplateKind, TemplateRow};
    use crate::store::MemoryCategoryStore;
    use crate::taxonomy::Outcome;
    use crate::template::AllocationStrategy;
    use std::sync::Arc;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(600);

    async fn seed(store: &MemoryCategoryStore, id: u64, home: u32, away: u32) {
        let key = CandidateKey::new("EN", id);
        let outcome = serde_json::json!({
            "matchId": id,
            "homeScore": home,
            "awayScore": away,
            "outcomes": (0..26).map(|i| format!("M{i}")).collect::<Vec<_>>(),
        });
        store
            .set_with_ttl(&key.odds_key(), &format!(r#"{{"matchId":{id}}}"#), TTL)
            .await
            .unwrap();
        store
            .set_with_ttl(&key.outcome_key(), &outcome.to_string(), TTL)
            .await
            .unwrap();
        for bin in Taxonomy::default().bin_keys_for("EN", &Outcome::new(home, away)) {
            store.add_to_bin(&bin, id as f64, &key.to_string()).await.unwrap();
        }
    }

    fn allocator(store: Arc<MemoryCategoryStore>, ledger: Arc<MockUsageLedger>) -> Allocator {
        let config = AllocationConfig {
            strategy: AllocationStrategy::FlatRatio,
            seed: Some(11),
            lookahead: 4,
            ..Default::default()
        };
        Allocator::new(store, ledger, Taxonomy::default(), config, 7, 26)
    }

    fn goals(payload: &str) -> DistributionTemplate {
        DistributionTemplate::parse(TemplateKind::Goals, payload).unwrap()
    }

    #[tokio::test]
    async fn test_allocates_exact_quotas() {
        let store = MemoryCategoryStore::shared();
        let ledger = Arc::new(MockUsageLedger::new());
        seed(&store, 1, 0, 0).await;
        seed(&store, 2, 1, 0).await;
        seed(&store, 3, 0, 1).await;

        let engine = allocator(store.clone(), ledger.clone());
        let round = engine.allocate("EN", 3, &goals("0,1,1")).await.unwrap();

        assert_eq!(round.len(), 3);
        let mut ids: Vec<u64> = round.entries.iter().map(|e| e.key.match_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(ledger.len(), 3);
        assert_eq!(store.bin_size("EN:SET_READY").await.unwrap(), 0);
        assert_eq!(store.bin_size("EN:SET_TGU25").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_leaves_bins_untouched() {
        let store = MemoryCategoryStore::shared();
        let ledger = Arc::new(MockUsageLedger::new());
        seed(&store, 1, 1, 0).await;

        let engine = allocator(store.clone(), ledger.clone());
        let err = engine.allocate("EN", 2, &goals("0,1")).await.unwrap_err();

        assert!(matches!(
            err,
            Error::InsufficientSupply { ref bin, required: 1, available: 0 } if bin == "EN:SET_0"
        ));
        assert!(store.contains("EN:SET_1", "EN:1").await.unwrap());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_candidates_are_skipped_and_evicted() {
        let store = MemoryCategoryStore::shared();
        let ledger = Arc::new(MockUsageLedger::new());
        seed(&store, 1, 2, 0).await;
        seed(&store, 2, 2, 0).await;
        ledger
            .record_use(&CandidateKey::new("EN", 1), Utc::now().date_naive())
            .unwrap();

        let engine = allocator(store.clone(), ledger.clone());
        let round = engine.allocate("EN", 1, &goals("2")).await.unwrap();

        assert_eq!(round.entries[0].key.match_id, 2);
        assert!(!store.contains("EN:SET_2", "EN:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_overflowing_score_is_quarantined_during_staging() {
        let store = MemoryCategoryStore::shared();
        let ledger = Arc::new(MockUsageLedger::new());
        seed(&store, 1, u32::MAX, 1).await;
        seed(&store, 2, 4, 4).await;

        let engine = allocator(store.clone(), ledger.clone());
        let round = engine.allocate("EN", 1, &goals("8")).await.unwrap();

        assert_eq!(round.entries[0].key.match_id, 2);
        assert!(store.contains("EN:WRONG_FORMAT", "EN:1").await.unwrap());
        assert!(!store.contains("EN:SET_7", "EN:1").await.unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_check_can_be_disabled() {
        let store = MemoryCategoryStore::shared();
        let ledger = Arc::new(MockUsageLedger::new());
        seed(&store, 1, 2, 0).await;
        ledger
            .record_use(&CandidateKey::new("EN", 1), Utc::now().date_naive())
            .unwrap();

        let config = AllocationConfig {
            strategy: AllocationStrategy::FlatRatio,
            enforce_cooldown: false,
            seed: Some(1),
            ..Default::default()
        };
        let engine = Allocator::new(store, ledger, Taxonomy::default(), config, 7, 26);
        let round = engine.allocate("EN", 1, &goals("2")).await.unwrap();
        assert_eq!(round.entries[0].key.match_id, 1);
    }

    #[tokio::test]
    async fn test_overlapping_quotas_never_share_a_candidate() {
        let store = MemoryCategoryStore::shared();
        let ledger = Arc::new(MockUsageLedger::new());
        seed(&store, 1, 2, 1).await;
        seed(&store, 2, 2, 1).await;

        let engine = allocator(store.clone(), ledger.clone());
        let template = DistributionTemplate::parse(TemplateKind::Raw, "9#2#1,8#2#1").unwrap();
        let config = AllocationConfig {
            strategy: AllocationStrategy::ExactScore,
            seed: Some(3),
            ..Default::default()
        };
        let exact = Allocator::new(store.clone(), ledger.clone(), Taxonomy::default(), config, 7, 26);

        let round = exact.allocate("EN", 2, &template).await.unwrap();
        let ids: HashSet<u64> = round.entries.iter().map(|e| e.key.match_id).collect();
        assert_eq!(ids.len(), 2);

        // Both retired everywhere, so the flat allocator finds nothing left
        assert!(engine.allocate("EN", 1, &goals("3")).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_head_is_quarantined_even_on_failure() {
        let store = MemoryCategoryStore::shared();
        let ledger = Arc::new(MockUsageLedger::new());
        seed(&store, 1, 0, 0).await;
        store.expire("ENWo:1");

        let engine = allocator(store.clone(), ledger.clone());
        assert!(engine.allocate("EN", 1, &goals("0")).await.is_err());

        assert!(store.contains("EN:WRONG_FORMAT", "EN:1").await.unwrap());
        assert!(!store.contains("EN:SET_0", "EN:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_allocate_for_slot_uses_round_size_and_template() {
        let store = MemoryCategoryStore::shared();
        let ledger = Arc::new(MockUsageLedger::new());
        for id in 1..=9 {
            seed(&store, id, 1, 1).await;
        }
        let templates = MockTemplateRepository::new();
        templates
            .upsert(&TemplateRow::new(42, 1, TemplateKind::Goals, "2,2,2,2,2,2,2,2,2"))
            .unwrap();

        let config = AllocationConfig {
            strategy: AllocationStrategy::FlatRatio,
            nine_match_competitions: vec![42],
            seed: Some(5),
            ..Default::default()
        };
        let engine = Allocator::new(store, ledger, Taxonomy::default(), config, 7, 26);

        let round = engine.allocate_for_slot(&templates, "EN", 42, 1).await.unwrap();
        assert_eq!(round.len(), 9);

        let err = engine
            .allocate_for_slot(&templates, "EN", 42, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound { competition: 42, slot: 2 }));
    }
}
