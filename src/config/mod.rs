//! Configuration management for roundsmith
//!
//! Configuration is loaded from environment variables or a TOML file and
//! validated before any store connection is attempted. Every section has
//! defaults, so a TOML file only needs the keys it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::template::AllocationStrategy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Category store (Redis) configuration
    pub store: StoreConfig,

    /// Usage ledger and template database configuration
    pub ledger: LedgerConfig,

    /// File ingestion configuration
    pub ingestion: IngestionConfig,

    /// Categorization engine configuration
    pub categorization: CategorizationConfig,

    /// Quota-allocation engine configuration
    pub allocation: AllocationConfig,

    /// Cleanup job configuration
    pub cleanup: CleanupConfig,

    /// Job intervals and regions
    pub scheduler: SchedulerConfig,

    /// Result feed configuration
    pub feed: FeedConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Category store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Base set name bins are rendered from (`{region}:{set_name}_{suffix}`)
    pub set_name: String,

    /// TTL for odds/outcome/live-score payloads and published rounds, in seconds
    pub payload_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            set_name: "SET".to_string(),
            payload_ttl_secs: 3 * 86400,
        }
    }
}

/// Usage ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database path (ledger, audit, templates, slot cursors)
    pub sqlite_path: PathBuf,

    /// Days a used candidate stays ineligible
    pub cooldown_days: u32,

    /// Days ledger rows are kept before cleanup purges them
    pub retention_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/ledger.db"),
            cooldown_days: 7,
            retention_days: 90,
        }
    }
}

/// File ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Directory scanned for provider files
    pub input_dir: PathBuf,

    /// Number of concurrent ingestion workers
    pub workers: usize,

    /// Bounded job queue capacity
    pub queue_capacity: usize,

    /// Region used when a project id has no explicit mapping
    pub default_region: String,

    /// Project id → region prefix
    pub project_regions: HashMap<String, String>,

    /// Move fully processed files into `{input_dir}/processed`
    pub archive_processed: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data/incoming"),
            workers: 200,
            queue_capacity: 1024,
            default_region: "EN".to_string(),
            project_regions: HashMap::new(),
            archive_processed: true,
        }
    }
}

impl IngestionConfig {
    /// Region prefix for a provider project
    pub fn region_for(&self, project_id: u32) -> &str {
        self.project_regions
            .get(&project_id.to_string())
            .map(String::as_str)
            .unwrap_or(&self.default_region)
    }
}

/// Categorization engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizationConfig {
    /// Candidates sampled from staging per run
    pub sample_draws: usize,

    /// How many staging entries are read before sampling
    pub staging_window: usize,

    /// Goal bins above this size stop categorization (back-pressure)
    pub bin_ceiling: usize,

    /// Every goal bin must hold this many candidates to report ready
    pub min_population: usize,

    /// Fewer staged candidates than this aborts the run
    pub min_staged: usize,

    /// Winning-outcome payloads need at least this many entries
    pub min_outcome_entries: usize,

    /// RNG seed for reproducible sampling
    pub seed: Option<u64>,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            sample_draws: 50,
            staging_window: 5000,
            bin_ceiling: 20_000,
            min_population: 10,
            min_staged: 1,
            min_outcome_entries: crate::models::MIN_OUTCOME_ENTRIES,
            seed: None,
        }
    }
}

/// A (region, competition) pair the allocation job keeps supplied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub region: String,
    pub competition_id: u32,
}

/// Quota-allocation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// How templates turn into quotas
    pub strategy: AllocationStrategy,

    /// Round size for competitions not listed below
    pub default_round_size: usize,

    /// Competitions with 18 teams play 9-match rounds
    pub nine_match_competitions: Vec<u32>,

    /// Skip candidates used within the cooldown window
    pub enforce_cooldown: bool,

    /// Extra candidates read per bin to replace skipped ones
    pub lookahead: usize,

    /// RNG seed for reproducible shuffles
    pub seed: Option<u64>,

    /// Competitions allocated by the scheduled job
    pub targets: Vec<AllocationTarget>,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            strategy: AllocationStrategy::ExactScore,
            default_round_size: 10,
            nine_match_competitions: Vec::new(),
            enforce_cooldown: true,
            lookahead: 16,
            seed: None,
            targets: Vec::new(),
        }
    }
}

impl AllocationConfig {
    pub fn round_size_for(&self, competition_id: u32) -> usize {
        if self.nine_match_competitions.contains(&competition_id) {
            9
        } else {
            self.default_round_size
        }
    }
}

/// Cleanup job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Quarantine bin is trimmed down to this many entries
    pub wrong_format_cap: usize,

    /// Staging entries scanned per run for expired payloads
    pub staging_scan: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            wrong_format_cap: 10_000,
            staging_scan: 5000,
        }
    }
}

/// Job intervals and the regions jobs operate on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub regions: Vec<String>,
    pub ingest_interval_secs: u64,
    pub categorize_interval_secs: u64,
    pub allocate_interval_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            regions: vec!["EN".to_string()],
            ingest_interval_secs: 60,
            categorize_interval_secs: 30,
            allocate_interval_secs: 120,
            cleanup_interval_secs: 3600,
        }
    }
}

/// Result feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Consume the result feed in `serve`
    pub enabled: bool,

    /// Redis URL hosting the durable result queue
    pub url: String,

    /// Queue name carrying historical round results
    pub queue: String,

    /// Fixed delay between reconnect attempts, in seconds
    pub reconnect_delay_secs: u64,

    /// Blocking pop timeout, in seconds
    pub poll_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379".to_string(),
            queue: "results".to_string(),
            reconnect_delay_secs: 2,
            poll_timeout_secs: 5,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| defaults.store.url.clone());

        let regions = std::env::var("ROUNDSMITH_REGIONS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|_| defaults.scheduler.regions.clone());

        let strategy = match std::env::var("ROUNDSMITH_STRATEGY") {
            Ok(v) => v
                .parse::<AllocationStrategy>()
                .map_err(|e| anyhow::anyhow!("ROUNDSMITH_STRATEGY: {e}"))?,
            Err(_) => defaults.allocation.strategy,
        };

        Ok(Self {
            store: StoreConfig {
                url: redis_url.clone(),
                pool_size: env_or("REDIS_POOL_SIZE", defaults.store.pool_size),
                set_name: env_or("ROUNDSMITH_SET_NAME", defaults.store.set_name),
                payload_ttl_secs: env_or(
                    "ROUNDSMITH_PAYLOAD_TTL",
                    defaults.store.payload_ttl_secs,
                ),
            },
            ledger: LedgerConfig {
                sqlite_path: env_or("ROUNDSMITH_SQLITE_PATH", defaults.ledger.sqlite_path),
                cooldown_days: env_or("ROUNDSMITH_COOLDOWN_DAYS", defaults.ledger.cooldown_days),
                retention_days: env_or(
                    "ROUNDSMITH_RETENTION_DAYS",
                    defaults.ledger.retention_days,
                ),
            },
            ingestion: IngestionConfig {
                input_dir: env_or("ROUNDSMITH_INPUT_DIR", defaults.ingestion.input_dir),
                workers: env_or("ROUNDSMITH_WORKERS", defaults.ingestion.workers),
                default_region: env_or(
                    "ROUNDSMITH_DEFAULT_REGION",
                    defaults.ingestion.default_region,
                ),
                ..defaults.ingestion
            },
            allocation: AllocationConfig {
                strategy,
                enforce_cooldown: env_or(
                    "ROUNDSMITH_ENFORCE_COOLDOWN",
                    defaults.allocation.enforce_cooldown,
                ),
                ..defaults.allocation
            },
            scheduler: SchedulerConfig {
                regions,
                ..defaults.scheduler
            },
            feed: FeedConfig {
                enabled: env_or("ROUNDSMITH_FEED_ENABLED", defaults.feed.enabled),
                url: std::env::var("ROUNDSMITH_FEED_URL").unwrap_or(redis_url),
                queue: env_or("ROUNDSMITH_FEED_QUEUE", defaults.feed.queue),
                ..defaults.feed
            },
            logging: LoggingConfig {
                level: env_or("ROUNDSMITH_LOG_LEVEL", defaults.logging.level),
                format: env_or("ROUNDSMITH_LOG_FORMAT", defaults.logging.format),
            },
            ..Self::default()
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            anyhow::bail!("store.pool_size must be greater than 0");
        }

        if self.store.set_name.is_empty() {
            anyhow::bail!("store.set_name must not be empty");
        }

        if !(5..=10).contains(&self.ledger.cooldown_days) {
            anyhow::bail!(
                "ledger.cooldown_days must be between 5 and 10, got {}",
                self.ledger.cooldown_days
            );
        }

        if self.ingestion.workers == 0 || self.ingestion.queue_capacity == 0 {
            anyhow::bail!("ingestion.workers and ingestion.queue_capacity must be greater than 0");
        }

        if self.categorization.sample_draws == 0 {
            anyhow::bail!("categorization.sample_draws must be greater than 0");
        }

        if !(9..=10).contains(&self.allocation.default_round_size) {
            anyhow::bail!(
                "allocation.default_round_size must be 9 or 10, got {}",
                self.allocation.default_round_size
            );
        }

        let intervals = [
            ("ingest", self.scheduler.ingest_interval_secs),
            ("categorize", self.scheduler.categorize_interval_secs),
            ("allocate", self.scheduler.allocate_interval_secs),
            ("cleanup", self.scheduler.cleanup_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            anyhow::bail!("scheduler.{name}_interval_secs must be greater than 0");
        }

        if self.feed.reconnect_delay_secs == 0 {
            anyhow::bail!("feed.reconnect_delay_secs must be greater than 0");
        }

        Ok(())
    }

    /// Payload TTL as Duration
    #[must_use]
    pub fn payload_ttl(&self) -> Duration {
        Duration::from_secs(self.store.payload_ttl_secs)
    }
}
