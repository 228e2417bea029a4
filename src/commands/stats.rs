use anyhow::Result;

use roundsmith::engine::bin_report;

use super::Services;

pub async fn stats(services: &Services, region: Option<String>, json: bool) -> Result<()> {
    let mut reports = Vec::new();
    for region in services.regions(region) {
        reports.push(bin_report(services.store.as_ref(), &services.taxonomy, &region).await?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for report in &reports {
        println!("{report}");
        println!("  {:<24} {:>8}", "ready", report.ready());
    }

    if roundsmith::metrics::metrics_initialized() {
        if let Ok(text) = roundsmith::metrics::encode_metrics() {
            tracing::debug!(metrics = %text, "Current metrics");
        }
    }
    Ok(())
}
