//! Provider file naming and payload formats
//!
//! Provider drops are named `{extID}_{projectID}_{competitionID}.{ext}` for
//! match lists and `wo_{extID}_{projectID}_{competitionID}.{ext}` for
//! winning-outcome batches. Odds and live scores for a match sit in
//! `odds/{matchID}.json` and `livescore/{matchID}.json` under the same
//! directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Sub-directory holding per-match odds payloads
pub const ODDS_DIR: &str = "odds";

/// Sub-directory holding per-match live-score payloads
pub const LIVE_SCORE_DIR: &str = "livescore";

/// Fully ingested files are moved here
pub const PROCESSED_DIR: &str = "processed";

/// Files that could not be decoded are moved here
pub const REJECTED_DIR: &str = "rejected";

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(wo_)?(\d+)_(\d+)_(\d+)\.([A-Za-z0-9]+)$").expect("file name pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Fixture list for one competition
    Matches,
    /// Winning-outcome batch (`wo_` prefix)
    Outcomes,
}

/// A provider file whose name parsed cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub kind: FileKind,
    pub ext_id: u64,
    pub project_id: u32,
    pub competition_id: u32,
    pub extension: String,
}

impl FileDescriptor {
    /// Parse a provider file path; `None` when the name does not follow the convention
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let caps = file_name_pattern().captures(name)?;

        Some(Self {
            path: path.to_path_buf(),
            kind: if caps.get(1).is_some() {
                FileKind::Outcomes
            } else {
                FileKind::Matches
            },
            ext_id: caps[2].parse().ok()?,
            project_id: caps[3].parse().ok()?,
            competition_id: caps[4].parse().ok()?,
            extension: caps[5].to_string(),
        })
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Fixture list payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFile {
    #[serde(default)]
    pub matches: Vec<MatchRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: u64,
    #[serde(default, rename = "homeTeam")]
    pub home_team: Option<String>,
    #[serde(default, rename = "awayTeam")]
    pub away_team: Option<String>,
}

pub fn odds_path(dir: &Path, match_id: u64) -> PathBuf {
    dir.join(ODDS_DIR).join(format!("{match_id}.json"))
}

pub fn live_score_path(dir: &Path, match_id: u64) -> PathBuf {
    dir.join(LIVE_SCORE_DIR).join(format!("{match_id}.json"))
}
