//! Bin population report

use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::metrics;
use crate::store::CategoryStore;
use crate::taxonomy::Taxonomy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinCount {
    pub bin: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinReport {
    pub region: String,
    pub staging: usize,
    pub wrong_format: usize,
    /// Every taxonomy bin in stable order
    pub bins: Vec<BinCount>,
}

impl BinReport {
    pub fn size_of(&self, bin: &str) -> Option<usize> {
        self.bins.iter().find(|b| b.bin == bin).map(|b| b.size)
    }

    /// Candidates classified and not yet allocated
    pub fn ready(&self) -> usize {
        self.bins
            .iter()
            .find(|b| b.bin.ends_with("_READY"))
            .map_or(0, |b| b.size)
    }
}

impl fmt::Display for BinReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Region {}", self.region)?;
        writeln!(f, "  {:<24} {:>8}", "STAGING", self.staging)?;
        writeln!(f, "  {:<24} {:>8}", "WRONG_FORMAT", self.wrong_format)?;
        for count in &self.bins {
            writeln!(f, "  {:<24} {:>8}", count.bin, count.size)?;
        }
        Ok(())
    }
}

/// Read the size of every bin in a region and mirror it into the bin gauge
pub async fn bin_report(
    store: &dyn CategoryStore,
    taxonomy: &Taxonomy,
    region: &str,
) -> Result<BinReport> {
    let staging_key = taxonomy.staging_key(region);
    let wrong_format_key = taxonomy.wrong_format_key(region);
    let staging = store.bin_size(&staging_key).await?;
    let wrong_format = store.bin_size(&wrong_format_key).await?;
    metrics::set_bin_size(&staging_key, staging);
    metrics::set_bin_size(&wrong_format_key, wrong_format);

    let mut bins = Vec::new();
    for category in Taxonomy::all_categories() {
        let bin = taxonomy.bin_key(region, &category);
        let size = store.bin_size(&bin).await?;
        metrics::set_bin_size(&bin, size);
        bins.push(BinCount { bin, size });
    }

    Ok(BinReport {
        region: region.to_string(),
        staging,
        wrong_format,
        bins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCategoryStore;

    #[tokio::test]
    async fn test_bin_report_counts() {
        let store = MemoryCategoryStore::new();
        store.add_to_bin("EN:STAGING", 1.0, "EN:1").await.unwrap();
        store.add_to_bin("EN:SET_READY", 1.0, "EN:2").await.unwrap();
        store.add_to_bin("EN:SET_0", 1.0, "EN:2").await.unwrap();

        let report = bin_report(&store, &Taxonomy::default(), "EN").await.unwrap();

        assert_eq!(report.staging, 1);
        assert_eq!(report.wrong_format, 0);
        assert_eq!(report.ready(), 1);
        assert_eq!(report.size_of("EN:SET_0"), Some(1));
        assert_eq!(report.size_of("EN:SET_7"), Some(0));
        assert!(report.to_string().contains("EN:SET_READY"));
    }
}
