use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use roundsmith::feed::{FeedConsumer, RedisListFeed, TemplateIngestHandler};
use roundsmith::scheduler::{
    wait_for_signal, AllocationTask, CategorizationTask, CleanupTask, Harness, IngestionTask,
};

use super::Services;

pub async fn serve(services: Services) -> Result<()> {
    let config = &services.config;
    let regions = config.scheduler.regions.clone();
    let secs = Duration::from_secs;

    let mut harness = Harness::new();
    harness.add_job(
        Arc::new(IngestionTask::new(Arc::new(services.ingestion_pool()))),
        secs(config.scheduler.ingest_interval_secs),
    )?;
    harness.add_job(
        Arc::new(CategorizationTask::new(
            Arc::new(services.categorizer()),
            regions.clone(),
        )),
        secs(config.scheduler.categorize_interval_secs),
    )?;
    harness.add_job(
        Arc::new(AllocationTask::new(
            Arc::new(services.allocator()),
            Arc::clone(&services.templates),
            Arc::new(services.publisher()),
            config.allocation.targets.clone(),
        )),
        secs(config.scheduler.allocate_interval_secs),
    )?;
    harness.add_job(
        Arc::new(CleanupTask::new(Arc::new(services.cleaner()), regions.clone())),
        secs(config.scheduler.cleanup_interval_secs),
    )?;

    let shutdown = harness.shutdown_trigger();

    let feed = if config.feed.enabled {
        let mut consumer = FeedConsumer::new(
            RedisListFeed::new(&config.feed),
            secs(config.feed.reconnect_delay_secs),
        );
        consumer.register(
            config.feed.queue.clone(),
            Arc::new(TemplateIngestHandler::new(Arc::clone(&services.templates))),
        );
        let stop = shutdown.subscribe();
        Some(tokio::spawn(async move { consumer.run(stop).await }))
    } else {
        tracing::info!("Result feed disabled");
        None
    };

    println!("roundsmith serving regions {regions:?}");
    println!("Press Ctrl+C to stop.\n");

    let reports = harness
        .run_until(async {
            if let Err(e) = wait_for_signal().await {
                tracing::error!(error = %e, "Failed to wait for shutdown signal");
            }
        })
        .await?;

    // The harness may also stop on its own; make sure the feed follows
    shutdown.trigger();
    if let Some(handle) = feed {
        match handle.await {
            Ok(Ok(stats)) => tracing::info!(
                delivered = stats.delivered,
                failed = stats.failed,
                reconnects = stats.reconnects,
                "Feed consumer finished"
            ),
            Ok(Err(e)) => tracing::warn!(error = %e, "Feed consumer stopped with error"),
            Err(e) => tracing::error!(error = %e, "Feed consumer task failed"),
        }
    }

    for report in &reports {
        tracing::info!(
            job = %report.job,
            runs = report.runs,
            failures = report.failures,
            panics = report.panics,
            skipped = report.skipped,
            "Job summary"
        );
    }

    println!("roundsmith stopped.");
    Ok(())
}
