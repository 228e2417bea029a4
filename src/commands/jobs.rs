use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use roundsmith::config::AllocationTarget;
use roundsmith::engine::RoundPublisher;
use roundsmith::scheduler::AllocationTask;
use roundsmith::store::CategoryStore;

use super::Services;

pub async fn ingest(services: &Services, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| services.config.ingestion.input_dir.clone());
    println!("Ingesting provider files from {}", dir.display());

    let report = services.ingestion_pool().run(&dir).await?;

    println!("  Files seen:       {}", report.files_seen);
    println!("  Files processed:  {}", report.files_processed);
    println!("  Skipped (names):  {}", report.files_skipped);
    println!("  Rejected:         {}", report.files_rejected);
    println!("  Outcomes staged:  {}", report.outcomes_written);
    println!("  Odds written:     {}", report.odds_written);
    println!("  Live scores:      {}", report.live_scores_written);
    println!("  Failed jobs:      {}", report.failed_jobs);
    Ok(())
}

pub async fn categorize(services: &Services, region: Option<String>) -> Result<()> {
    let categorizer = services.categorizer();

    for region in services.regions(region) {
        match categorizer.run(&region).await {
            Ok(report) => {
                println!(
                    "{}: examined {}, classified {}, quarantined {}, deferred {}, ready {}",
                    report.region,
                    report.examined,
                    report.classified,
                    report.quarantined,
                    report.deferred,
                    report.ready
                );
            }
            Err(e) if e.is_insufficient_supply() => {
                println!("{region}: {e}");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Categorization failed for {region}"));
            }
        }
    }
    Ok(())
}

pub async fn allocate(
    services: &Services,
    region: String,
    competition: u32,
    slot: Option<u32>,
    json: bool,
) -> Result<()> {
    let allocator = services.allocator();

    let (slot, round) = match slot {
        Some(slot) => {
            let round = allocator
                .allocate_for_slot(services.templates.as_ref(), &region, competition, slot)
                .await?;
            services.publisher().publish(competition, slot, &round).await?;
            (slot, round)
        }
        None => {
            let target = AllocationTarget {
                region: region.clone(),
                competition_id: competition,
            };
            let task = AllocationTask::new(
                Arc::new(allocator),
                Arc::clone(&services.templates),
                Arc::new(services.publisher()),
                vec![target.clone()],
            );
            let Some(slot) = task.allocate_next(&target).await? else {
                println!("No distribution templates stored for competition {competition}");
                return Ok(());
            };
            let key = roundsmith::engine::round_key(&region, competition, slot);
            let payload = services
                .store
                .get(&key)
                .await?
                .with_context(|| format!("Published round {key} not found"))?;
            (slot, serde_json::from_str(&payload)?)
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&round)?);
        return Ok(());
    }

    println!("Round {region} competition {competition} slot {slot}:");
    for entry in &round.entries {
        let outcome = entry.outcome();
        println!(
            "  {:<16} {}-{}",
            entry.key.to_string(),
            outcome.home_goals,
            outcome.away_goals
        );
    }
    Ok(())
}
