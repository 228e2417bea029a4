//! Common test utilities

use std::sync::Arc;
use std::time::Duration;

use roundsmith::config::{AllocationConfig, CategorizationConfig};
use roundsmith::engine::{Allocator, Categorizer};
use roundsmith::models::CandidateKey;
use roundsmith::storage::MockUsageLedger;
use roundsmith::store::{CategoryStore, MemoryCategoryStore};
use roundsmith::taxonomy::{Outcome, Taxonomy};

pub const REGION: &str = "EN";

pub fn ttl() -> Duration {
    Duration::from_secs(3600)
}

/// Winning-outcome JSON with a complete outcome list
pub fn outcome_json(match_id: u64, home: u32, away: u32) -> String {
    serde_json::json!({
        "matchId": match_id,
        "homeScore": home,
        "awayScore": away,
        "outcomes": (0..26).map(|i| format!("M{i}")).collect::<Vec<_>>(),
    })
    .to_string()
}

pub fn odds_json(match_id: u64) -> String {
    serde_json::json!({
        "matchId": match_id,
        "markets": [{ "name": "1X2", "selections": [{ "name": "1", "price": 2.1 }] }],
    })
    .to_string()
}

/// Write a candidate's payloads without staging or filing it
pub async fn write_payloads(store: &MemoryCategoryStore, match_id: u64, home: u32, away: u32) -> CandidateKey {
    let key = CandidateKey::new(REGION, match_id);
    store
        .set_with_ttl(&key.outcome_key(), &outcome_json(match_id, home, away), ttl())
        .await
        .unwrap();
    store
        .set_with_ttl(&key.odds_key(), &odds_json(match_id), ttl())
        .await
        .unwrap();
    key
}

/// Write payloads and put the candidate in staging
#[allow(dead_code)]
pub async fn stage(store: &MemoryCategoryStore, match_id: u64, home: u32, away: u32) -> CandidateKey {
    let key = write_payloads(store, match_id, home, away).await;
    store
        .add_to_bin(
            &Taxonomy::default().staging_key(REGION),
            match_id as f64,
            &key.to_string(),
        )
        .await
        .unwrap();
    key
}

/// Write payloads and file the candidate in every bin of its outcome
#[allow(dead_code)]
pub async fn file(store: &MemoryCategoryStore, match_id: u64, home: u32, away: u32) -> CandidateKey {
    let key = write_payloads(store, match_id, home, away).await;
    for bin in Taxonomy::default().bin_keys_for(REGION, &Outcome::new(home, away)) {
        store
            .add_to_bin(&bin, match_id as f64, &key.to_string())
            .await
            .unwrap();
    }
    key
}

#[allow(dead_code)]
pub fn create_test_allocator(store: Arc<MemoryCategoryStore>, ledger: Arc<MockUsageLedger>) -> Allocator {
    let config = AllocationConfig {
        seed: Some(42),
        ..Default::default()
    };
    Allocator::new(store, ledger, Taxonomy::default(), config, 7, 26)
}

#[allow(dead_code)]
pub fn create_test_categorizer(store: Arc<MemoryCategoryStore>, ledger: Arc<MockUsageLedger>) -> Categorizer {
    let config = CategorizationConfig {
        seed: Some(42),
        min_population: 1,
        ..Default::default()
    };
    Categorizer::new(store, ledger, Taxonomy::default(), config)
}
