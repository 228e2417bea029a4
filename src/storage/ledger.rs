//! Usage ledger
//!
//! Records which candidates were published and when, so the allocator can
//! refuse anything still inside its cooldown window. The same database also
//! carries the category audit trail written by the categorizer, which is
//! used for reporting only.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::CandidateKey;

/// Shared handle used by the engine
pub type SharedUsageLedger = Arc<dyn UsageLedger>;

/// One classification event
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryAudit {
    pub key: CandidateKey,
    pub bin: String,
    pub total_goals: u32,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Repository Trait
// ============================================================================

pub trait UsageLedger: Send + Sync {
    /// Date a candidate was last used, if ever
    fn last_used(&self, key: &CandidateKey) -> Result<Option<NaiveDate>>;

    /// Whether a candidate was used fewer than `cooldown_days` days before `today`
    fn in_cooldown(&self, key: &CandidateKey, today: NaiveDate, cooldown_days: u32) -> Result<bool> {
        Ok(self
            .last_used(key)?
            .is_some_and(|used_on| (today - used_on).num_days() < i64::from(cooldown_days)))
    }

    /// Insert or touch the usage entry for a candidate
    fn record_use(&self, key: &CandidateKey, used_on: NaiveDate) -> Result<()>;

    /// Append a category audit record
    fn record_category(&self, audit: &CategoryAudit) -> Result<()>;

    /// Audit counts per bin for a region, sorted by bin name
    fn category_counts(&self, region: &str) -> Result<Vec<(String, usize)>>;

    /// Delete usage entries last touched before `cutoff`; returns rows removed
    fn purge_older_than(&self, cutoff: NaiveDate) -> Result<usize>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteUsageLedger {
    conn: Mutex<Connection>,
}

impl SqliteUsageLedger {
    /// Open (or create) the ledger database at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.create_schema()?;

        tracing::info!(path = %path.display(), "Usage ledger initialized");
        Ok(ledger)
    }

    /// In-memory ledger (for testing and dry runs)
    pub fn in_memory() -> Result<Self> {
        let ledger = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        ledger.create_schema()?;
        Ok(ledger)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::other(format!("ledger connection lock poisoned: {e}")))
    }

    fn create_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS usage_ledger (
                    region TEXT NOT NULL,
                    match_id INTEGER NOT NULL,
                    used_on TEXT NOT NULL,
                    PRIMARY KEY (region, match_id)
                );

                CREATE INDEX IF NOT EXISTS idx_usage_ledger_used_on
                    ON usage_ledger(used_on);

                CREATE TABLE IF NOT EXISTS category_audit (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    region TEXT NOT NULL,
                    match_id INTEGER NOT NULL,
                    bin TEXT NOT NULL,
                    total_goals INTEGER NOT NULL,
                    recorded_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_category_audit_region
                    ON category_audit(region, bin);
                "#,
        )?;
        Ok(())
    }
}

impl UsageLedger for SqliteUsageLedger {
    fn last_used(&self, key: &CandidateKey) -> Result<Option<NaiveDate>> {
        let conn = self.conn()?;
        let used_on: Option<String> = conn
            .query_row(
                "SELECT used_on FROM usage_ledger WHERE region = ?1 AND match_id = ?2",
                params![key.region, key.match_id as i64],
                |row| row.get(0),
            )
            .optional()?;

        used_on
            .map(|s| {
                NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map_err(|e| Error::with_source(format!("bad ledger date '{s}'"), e))
            })
            .transpose()
    }

    fn record_use(&self, key: &CandidateKey, used_on: NaiveDate) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO usage_ledger (region, match_id, used_on)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(region, match_id) DO UPDATE SET used_on = excluded.used_on
            "#,
            params![key.region, key.match_id as i64, used_on.to_string()],
        )?;
        Ok(())
    }

    fn record_category(&self, audit: &CategoryAudit) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO category_audit (region, match_id, bin, total_goals, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                audit.key.region,
                audit.key.match_id as i64,
                audit.bin,
                audit.total_goals,
                audit.recorded_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn category_counts(&self, region: &str) -> Result<Vec<(String, usize)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT bin, COUNT(*) FROM category_audit WHERE region = ?1 GROUP BY bin ORDER BY bin",
        )?;
        let rows = stmt
            .query_map(params![region], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn purge_older_than(&self, cutoff: NaiveDate) -> Result<usize> {
        let removed = self.conn()?.execute(
            "DELETE FROM usage_ledger WHERE used_on < ?1",
            params![cutoff.to_string()],
        )?;
        Ok(removed)
    }
}

// ============================================================================
// Mock Implementation
// ============================================================================

/// In-memory ledger for tests
#[derive(Default)]
pub struct MockUsageLedger {
    usage: RwLock<HashMap<CandidateKey, NaiveDate>>,
    audits: RwLock<Vec<CategoryAudit>>,
}

impl MockUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.usage.read().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned(e: impl std::fmt::Display) -> Error {
        Error::other(format!("mock ledger lock poisoned: {e}"))
    }
}

impl UsageLedger for MockUsageLedger {
    fn last_used(&self, key: &CandidateKey) -> Result<Option<NaiveDate>> {
        Ok(self.usage.read().map_err(Self::poisoned)?.get(key).copied())
    }

    fn record_use(&self, key: &CandidateKey, used_on: NaiveDate) -> Result<()> {
        self.usage
            .write()
            .map_err(Self::poisoned)?
            .insert(key.clone(), used_on);
        Ok(())
    }

    fn record_category(&self, audit: &CategoryAudit) -> Result<()> {
        self.audits
            .write()
            .map_err(Self::poisoned)?
            .push(audit.clone());
        Ok(())
    }

    fn category_counts(&self, region: &str) -> Result<Vec<(String, usize)>> {
        let audits = self.audits.read().map_err(Self::poisoned)?;
        let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
        for audit in audits.iter().filter(|a| a.key.region == region) {
            *counts.entry(audit.bin.clone()).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    fn purge_older_than(&self, cutoff: NaiveDate) -> Result<usize> {
        let mut usage = self.usage.write().map_err(Self::poisoned)?;
        let before = usage.len();
        usage.retain(|_, used_on| *used_on >= cutoff);
        Ok(before - usage.len())
    }
}
