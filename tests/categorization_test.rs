//! Integration tests for categorization
//!
//! Staged candidates must land in every bin of their outcome, malformed ones
//! in `WRONG_FORMAT`, and readiness must follow the minimum population.

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use roundsmith::config::CategorizationConfig;
use roundsmith::engine::Categorizer;
use roundsmith::storage::{MockUsageLedger, UsageLedger};
use roundsmith::store::{CategoryStore, MemoryCategoryStore};
use roundsmith::taxonomy::{bins_for, Category, Outcome, Taxonomy};

use common::{create_test_categorizer, stage, ttl, REGION};

#[tokio::test]
async fn test_staged_candidates_fill_every_bin() {
    let store = MemoryCategoryStore::shared();
    let ledger = Arc::new(MockUsageLedger::new());

    let scores = [(0, 0), (1, 0), (0, 1), (1, 1), (2, 1), (0, 4), (5, 3)];
    for (id, (home, away)) in scores.iter().enumerate() {
        stage(&store, id as u64 + 1, *home, *away).await;
    }

    let categorizer = create_test_categorizer(store.clone(), ledger.clone());
    let report = categorizer.run(REGION).await.unwrap();

    assert_eq!(report.examined, scores.len());
    assert_eq!(report.classified, scores.len());
    assert_eq!(report.quarantined, 0);
    assert_eq!(store.bin_size("EN:STAGING").await.unwrap(), 0);

    let taxonomy = Taxonomy::default();
    for (id, (home, away)) in scores.iter().enumerate() {
        let member = format!("EN:{}", id + 1);
        for bin in taxonomy.bin_keys_for(REGION, &Outcome::new(*home, *away)) {
            assert!(store.contains(&bin, &member).await.unwrap(), "{member} missing from {bin}");
        }
    }

    assert!(store.contains("EN:SET_7", "EN:7").await.unwrap());
    assert!(store.contains("EN:SET_4_ng_a", "EN:6").await.unwrap());
    assert!(store.contains("EN:SET_1_a", "EN:3").await.unwrap());
    assert!(store.contains("EN:SET_TGO25", "EN:5").await.unwrap());

    let audited: usize = ledger
        .category_counts(REGION)
        .unwrap()
        .iter()
        .map(|(_, n)| n)
        .sum();
    assert_eq!(audited, scores.len());
}

#[tokio::test]
async fn test_malformed_candidates_are_quarantined() {
    let store = MemoryCategoryStore::shared();
    let ledger = Arc::new(MockUsageLedger::new());

    stage(&store, 1, 2, 0).await;

    // Outcome list too short
    let short = serde_json::json!({
        "matchId": 2, "homeScore": 1, "awayScore": 0, "outcomes": ["A", "B"]
    });
    store.set_with_ttl("ENWo:2", &short.to_string(), ttl()).await.unwrap();
    store.set_with_ttl("ENO:2", r#"{"matchId":2}"#, ttl()).await.unwrap();
    store.add_to_bin("EN:STAGING", 2.0, "EN:2").await.unwrap();

    // Not a candidate key at all
    store.add_to_bin("EN:STAGING", 3.0, "garbage").await.unwrap();

    let categorizer = create_test_categorizer(store.clone(), ledger);
    let report = categorizer.run(REGION).await.unwrap();

    assert_eq!(report.classified, 1);
    assert_eq!(report.quarantined, 2);
    assert!(store.contains("EN:WRONG_FORMAT", "EN:2").await.unwrap());
    assert!(store.contains("EN:WRONG_FORMAT", "garbage").await.unwrap());
    assert!(!store.contains("EN:SET_1_h", "EN:2").await.unwrap());
    assert_eq!(store.bin_size("EN:STAGING").await.unwrap(), 0);
}

#[tokio::test]
async fn test_readiness_requires_minimum_population() {
    let store = MemoryCategoryStore::shared();
    let ledger = Arc::new(MockUsageLedger::new());
    let config = CategorizationConfig {
        seed: Some(3),
        min_population: 2,
        ..Default::default()
    };
    let categorizer = Categorizer::new(store.clone(), ledger, Taxonomy::default(), config);

    // Two of every goal class except seven-plus
    let mut id = 1;
    for total in 0..7u32 {
        for _ in 0..2 {
            stage(&store, id, total, 0).await;
            id += 1;
        }
    }
    let report = categorizer.run(REGION).await.unwrap();
    assert!(!report.ready);

    stage(&store, 100, 4, 4).await;
    stage(&store, 101, 9, 0).await;
    let report = categorizer.run(REGION).await.unwrap();
    assert!(report.ready);
    assert!(categorizer.is_ready(REGION).await.unwrap());
}

#[tokio::test]
async fn test_nothing_staged_is_insufficient_supply() {
    let store = MemoryCategoryStore::shared();
    let categorizer = create_test_categorizer(store, Arc::new(MockUsageLedger::new()));

    let err = categorizer.run("DE").await.unwrap_err();
    assert!(err.is_insufficient_supply());
    assert!(err.to_string().contains("DE:STAGING"));
}

proptest! {
    #[test]
    fn prop_bin_membership_is_complete(home in 0u32..12, away in 0u32..12) {
        let outcome = Outcome::new(home, away);
        let bins = bins_for(&outcome);
        let total = home + away;

        prop_assert!(bins.contains(&Category::Ready));
        prop_assert_eq!(
            bins.iter().filter(|c| matches!(c, Category::Goals(_))).count(),
            1
        );
        prop_assert!(bins.iter().any(|c| matches!(c, Category::OverUnder(_))));

        let splits = bins.iter().filter(|c| matches!(c, Category::Split(..))).count();
        let split_results = bins.iter().filter(|c| matches!(c, Category::SplitResult(..))).count();
        if total >= 2 {
            prop_assert_eq!(splits, 1);
            prop_assert_eq!(split_results, 1);
        } else {
            prop_assert_eq!(splits, 0);
            prop_assert_eq!(split_results, 0);
        }

        prop_assert!(bins.iter().all(|c| c.matches(&outcome)));
    }
}
