// Core data structures for roundsmith

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::taxonomy::Outcome;

/// Minimum number of outcome entries a complete winning-outcome payload carries
pub const MIN_OUTCOME_ENTRIES: usize = 26;

/// Identity of a match candidate: `{region}:{matchID}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateKey {
    pub region: String,
    pub match_id: u64,
}

impl CandidateKey {
    pub fn new(region: impl Into<String>, match_id: u64) -> Self {
        Self {
            region: region.into(),
            match_id,
        }
    }

    /// Odds payload key: `{region}O:{matchID}`
    pub fn odds_key(&self) -> String {
        format!("{}O:{}", self.region, self.match_id)
    }

    /// Winning-outcome payload key: `{region}Wo:{matchID}`
    pub fn outcome_key(&self) -> String {
        format!("{}Wo:{}", self.region, self.match_id)
    }

    /// Live-score payload key: `{region}Ls:{matchID}`
    pub fn live_score_key(&self) -> String {
        format!("{}Ls:{}", self.region, self.match_id)
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.region, self.match_id)
    }
}

impl FromStr for CandidateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (region, id) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::malformed_candidate(s, "missing ':' separator"))?;
        if region.is_empty() {
            return Err(Error::malformed_candidate(s, "empty region"));
        }
        let match_id = id
            .parse::<u64>()
            .map_err(|_| Error::malformed_candidate(s, "match id is not numeric"))?;
        Ok(Self::new(region, match_id))
    }
}

/// Winning-outcome payload: the final score plus every market selection that won
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinningOutcome {
    pub match_id: u64,
    pub home_score: u32,
    pub away_score: u32,
    #[serde(default)]
    pub outcomes: Vec<String>,
}

impl WinningOutcome {
    pub fn outcome(&self) -> Outcome {
        Outcome::new(self.home_score, self.away_score)
    }

    /// Completeness heuristic: short outcome lists come from truncated feeds
    pub fn is_complete(&self, min_entries: usize) -> bool {
        self.outcomes.len() >= min_entries
    }
}

/// Odds payload, passed through untouched to publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OddsPayload {
    pub match_id: u64,
    #[serde(default)]
    pub markets: Vec<OddsMarket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsMarket {
    pub name: String,
    #[serde(default)]
    pub selections: Vec<OddsSelection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSelection {
    pub name: String,
    pub price: f64,
}

/// Live-score timeline for a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveScorePayload {
    pub match_id: u64,
    #[serde(default)]
    pub events: Vec<LiveScoreEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveScoreEvent {
    pub minute: u16,
    pub side: String,
    pub kind: String,
}

/// One validated candidate in a round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundEntry {
    pub key: CandidateKey,
    pub odds: OddsPayload,
    pub winning_outcome: WinningOutcome,
    pub live_score: Option<LiveScorePayload>,
}

impl RoundEntry {
    pub fn outcome(&self) -> Outcome {
        self.winning_outcome.outcome()
    }
}

/// A fully assembled round, ready for publication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSelection {
    pub region: String,
    pub entries: Vec<RoundEntry>,
    pub created_at: DateTime<Utc>,
}

impl RoundSelection {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<&CandidateKey> {
        self.entries.iter().map(|e| &e.key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_key_derived_keys() {
        let key = CandidateKey::new("EN", 4711);
        assert_eq!(key.to_string(), "EN:4711");
        assert_eq!(key.odds_key(), "ENO:4711");
        assert_eq!(key.outcome_key(), "ENWo:4711");
        assert_eq!(key.live_score_key(), "ENLs:4711");
    }

    #[test]
    fn test_candidate_key_parse() {
        let key: CandidateKey = "EN:4711".parse().unwrap();
        assert_eq!(key, CandidateKey::new("EN", 4711));

        assert!("EN4711".parse::<CandidateKey>().is_err());
        assert!(":4711".parse::<CandidateKey>().is_err());
        assert!("EN:abc".parse::<CandidateKey>().is_err());
    }

    #[test]
    fn test_winning_outcome_json() {
        let json = r#"{"matchId":9,"homeScore":2,"awayScore":1,"outcomes":["1X2:1","OU25:O"]}"#;
        let wo: WinningOutcome = serde_json::from_str(json).unwrap();
        assert_eq!(wo.outcome(), Outcome::new(2, 1));
        assert!(!wo.is_complete(MIN_OUTCOME_ENTRIES));
        assert!(wo.is_complete(2));
    }

    #[test]
    fn test_odds_payload_defaults() {
        let odds: OddsPayload = serde_json::from_str(r#"{"matchId":9}"#).unwrap();
        assert!(odds.markets.is_empty());
    }
}
