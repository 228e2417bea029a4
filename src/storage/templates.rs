//! Distribution template repository
//!
//! Stores one template row per (competition, round slot) and the per-target
//! slot cursor the allocation job advances after each published round.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shared handle used by the allocation job and the feed handler
pub type SharedTemplateRepository = Arc<dyn TemplateRepository>;

/// Payload encoding of a template row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    /// `matchID#home#away` tuples
    Raw,
    /// Total-goal counts
    Goals,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Raw => "raw",
            TemplateKind::Goals => "goals",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(TemplateKind::Raw),
            "goals" => Ok(TemplateKind::Goals),
            other => Err(Error::malformed_template(format!(
                "unknown template kind '{other}'"
            ))),
        }
    }
}

/// Stored template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRow {
    pub competition_id: u32,
    pub round_slot: u32,
    pub kind: TemplateKind,
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}

impl TemplateRow {
    pub fn new(competition_id: u32, round_slot: u32, kind: TemplateKind, payload: impl Into<String>) -> Self {
        Self {
            competition_id,
            round_slot,
            kind,
            payload: payload.into(),
            updated_at: Utc::now(),
        }
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

pub trait TemplateRepository: Send + Sync {
    /// Insert or replace the template for a slot
    fn upsert(&self, row: &TemplateRow) -> Result<()>;

    fn get(&self, competition_id: u32, round_slot: u32) -> Result<Option<TemplateRow>>;

    /// Slots with a stored template, ascending
    fn slots_for(&self, competition_id: u32) -> Result<Vec<u32>>;

    /// Next slot to allocate for a (region, competition) target
    fn load_cursor(&self, region: &str, competition_id: u32) -> Result<Option<u32>>;

    fn save_cursor(&self, region: &str, competition_id: u32, next_slot: u32) -> Result<()>;
}

fn cursor_key(region: &str, competition_id: u32) -> String {
    format!("{region}:{competition_id}")
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteTemplateRepository {
    conn: Mutex<Connection>,
}

impl SqliteTemplateRepository {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "Template repository initialized");
        Ok(repo)
    }

    pub fn in_memory() -> Result<Self> {
        let repo = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::other(format!("template connection lock poisoned: {e}")))
    }

    fn create_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS distribution_templates (
                    competition_id INTEGER NOT NULL,
                    round_slot INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (competition_id, round_slot)
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                "#,
        )?;
        Ok(())
    }
}

impl TemplateRepository for SqliteTemplateRepository {
    fn upsert(&self, row: &TemplateRow) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO distribution_templates
                (competition_id, round_slot, kind, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                row.competition_id,
                row.round_slot,
                row.kind.as_str(),
                row.payload,
                row.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn get(&self, competition_id: u32, round_slot: u32) -> Result<Option<TemplateRow>> {
        let conn = self.conn()?;
        let raw: Option<(String, String, String)> = conn
            .query_row(
                r#"
                SELECT kind, payload, updated_at FROM distribution_templates
                WHERE competition_id = ?1 AND round_slot = ?2
                "#,
                params![competition_id, round_slot],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((kind, payload, updated_at)) = raw else {
            return Ok(None);
        };

        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(TemplateRow {
            competition_id,
            round_slot,
            kind: kind.parse()?,
            payload,
            updated_at,
        }))
    }

    fn slots_for(&self, competition_id: u32) -> Result<Vec<u32>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT round_slot FROM distribution_templates WHERE competition_id = ?1 ORDER BY round_slot",
        )?;
        let slots = stmt
            .query_map(params![competition_id], |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(slots)
    }

    fn load_cursor(&self, region: &str, competition_id: u32) -> Result<Option<u32>> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM checkpoints WHERE key = ?1",
                params![cursor_key(region, competition_id)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    fn save_cursor(&self, region: &str, competition_id: u32, next_slot: u32) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO checkpoints (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![
                cursor_key(region, competition_id),
                next_slot.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// Mock Implementation
// ============================================================================

#[derive(Default)]
pub struct MockTemplateRepository {
    rows: RwLock<HashMap<(u32, u32), TemplateRow>>,
    cursors: RwLock<HashMap<String, u32>>,
}

impl MockTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned(e: impl fmt::Display) -> Error {
        Error::other(format!("mock template lock poisoned: {e}"))
    }
}

impl TemplateRepository for MockTemplateRepository {
    fn upsert(&self, row: &TemplateRow) -> Result<()> {
        self.rows
            .write()
            .map_err(Self::poisoned)?
            .insert((row.competition_id, row.round_slot), row.clone());
        Ok(())
    }

    fn get(&self, competition_id: u32, round_slot: u32) -> Result<Option<TemplateRow>> {
        Ok(self
            .rows
            .read()
            .map_err(Self::poisoned)?
            .get(&(competition_id, round_slot))
            .cloned())
    }

    fn slots_for(&self, competition_id: u32) -> Result<Vec<u32>> {
        let mut slots: Vec<u32> = self
            .rows
            .read()
            .map_err(Self::poisoned)?
            .keys()
            .filter(|(competition, _)| *competition == competition_id)
            .map(|(_, slot)| *slot)
            .collect();
        slots.sort_unstable();
        Ok(slots)
    }

    fn load_cursor(&self, region: &str, competition_id: u32) -> Result<Option<u32>> {
        Ok(self
            .cursors
            .read()
            .map_err(Self::poisoned)?
            .get(&cursor_key(region, competition_id))
            .copied())
    }

    fn save_cursor(&self, region: &str, competition_id: u32, next_slot: u32) -> Result<()> {
        self.cursors
            .write()
            .map_err(Self::poisoned)?
            .insert(cursor_key(region, competition_id), next_slot);
        Ok(())
    }
}
