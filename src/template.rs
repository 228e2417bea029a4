//! Distribution templates and quota derivation
//!
//! A template describes one historical round of a competition. It arrives
//! either as raw scores (`matchID#homeGoals#awayGoals`, comma separated) or as
//! a list of total-goal counts. An [`AllocationStrategy`] turns it into
//! per-bin [`Quota`]s, and [`rescale_quotas`] reconciles those with the round
//! size of the competition being allocated.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::{TemplateKind, TemplateRow};
use crate::taxonomy::{Category, GoalClass, Outcome};

/// How a template is mapped onto bins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// One quota per goal-count bin (`SET_0` .. `SET_7`)
    #[serde(rename = "flat")]
    FlatRatio,
    /// One quota per most specific bin for each historical score
    #[serde(rename = "exact")]
    ExactScore,
}

impl AllocationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlatRatio => "flat",
            Self::ExactScore => "exact",
        }
    }
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" | "flat_ratio" | "ratio" => Ok(Self::FlatRatio),
            "exact" | "exact_score" | "raw" => Ok(Self::ExactScore),
            other => Err(format!("unknown allocation strategy '{other}'")),
        }
    }
}

/// One historical match result inside a raw-score template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawScore {
    pub match_id: u64,
    pub home_goals: u32,
    pub away_goals: u32,
}

impl RawScore {
    pub fn outcome(&self) -> Outcome {
        Outcome::new(self.home_goals, self.away_goals)
    }
}

impl fmt::Display for RawScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}#{}", self.match_id, self.home_goals, self.away_goals)
    }
}

impl FromStr for RawScore {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('#').collect();
        let [id, home, away] = parts.as_slice() else {
            return Err(Error::malformed_template(format!(
                "expected matchID#home#away, got '{s}'"
            )));
        };

        fn number<T: FromStr>(field: &str, value: &str, tuple: &str) -> Result<T> {
            value.trim().parse::<T>().map_err(|_| {
                Error::malformed_template(format!("{field} '{value}' in '{tuple}' is not a valid number"))
            })
        }

        let score = Self {
            match_id: number("match id", id, s)?,
            home_goals: number("home goals", home, s)?,
            away_goals: number("away goals", away, s)?,
        };
        if score.outcome().checked_total().is_none() {
            return Err(Error::malformed_template(format!("score in '{s}' is out of range")));
        }
        Ok(score)
    }
}

/// Required number of candidates from one bin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub category: Category,
    pub count: usize,
}

/// Target outcome distribution for one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionTemplate {
    RawScores(Vec<RawScore>),
    GoalCounts(Vec<u32>),
}

impl DistributionTemplate {
    /// Decode a template payload of the given kind
    pub fn parse(kind: TemplateKind, payload: &str) -> Result<Self> {
        let items = payload
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty());

        let template = match kind {
            TemplateKind::Raw => {
                Self::RawScores(items.map(str::parse).collect::<Result<Vec<RawScore>>>()?)
            }
            TemplateKind::Goals => Self::GoalCounts(
                items
                    .map(|item| {
                        item.parse::<u32>().map_err(|_| {
                            Error::malformed_template(format!("goal count '{item}' is not a number"))
                        })
                    })
                    .collect::<Result<Vec<u32>>>()?,
            ),
        };

        if template.is_empty() {
            return Err(Error::malformed_template("template has no entries"));
        }
        Ok(template)
    }

    /// Decode a stored template row
    pub fn from_row(row: &TemplateRow) -> Result<Self> {
        Self::parse(row.kind, &row.payload)
    }

    /// Encode raw scores into the stored payload format
    pub fn encode_raw(scores: &[RawScore]) -> String {
        scores
            .iter()
            .map(RawScore::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn len(&self) -> usize {
        match self {
            Self::RawScores(scores) => scores.len(),
            Self::GoalCounts(counts) => counts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate the template into per-bin quotas
    ///
    /// Quotas come back in taxonomy order so allocation draws are
    /// deterministic for a given template.
    pub fn quotas(&self, strategy: AllocationStrategy) -> Result<Vec<Quota>> {
        let categories: Vec<Category> = match (self, strategy) {
            (Self::RawScores(scores), AllocationStrategy::ExactScore) => scores
                .iter()
                .map(|s| Category::exact_for(&s.outcome()))
                .collect(),
            (Self::RawScores(scores), AllocationStrategy::FlatRatio) => scores
                .iter()
                .map(|s| Category::Goals(s.outcome().goal_class()))
                .collect(),
            (Self::GoalCounts(counts), AllocationStrategy::FlatRatio) => counts
                .iter()
                .map(|&total| Category::Goals(GoalClass::from_total(total)))
                .collect(),
            (Self::GoalCounts(_), AllocationStrategy::ExactScore) => {
                return Err(Error::malformed_template(
                    "exact-score allocation needs a raw-score template",
                ));
            }
        };

        let mut counts: BTreeMap<Category, usize> = BTreeMap::new();
        for category in categories {
            *counts.entry(category).or_insert(0) += 1;
        }

        Ok(counts
            .into_iter()
            .map(|(category, count)| Quota { category, count })
            .collect())
    }
}

/// Scale quotas so they add up to `round_size`
///
/// When the template total `T` differs from the round size, every quota is
/// divided by the ratio `T / round_size` (both integer divisions) and zero
/// quotas are dropped. A template smaller than the round has a ratio of zero
/// and cannot be scaled. If the scaled quotas still do not add up to the round
/// size the call fails instead of publishing a short or long round.
pub fn rescale_quotas(quotas: Vec<Quota>, round_size: usize) -> Result<Vec<Quota>> {
    let total: usize = quotas.iter().map(|q| q.count).sum();
    if total == 0 {
        return Err(Error::malformed_template("template quotas are all zero"));
    }
    if total == round_size {
        return Ok(quotas);
    }

    let ratio = total / round_size.max(1);
    if ratio == 0 {
        tracing::warn!(template_total = total, round_size, "Template is smaller than the round");
        return Err(Error::QuotaMismatch {
            expected: round_size,
            actual: total,
        });
    }

    let rescaled: Vec<Quota> = quotas
        .into_iter()
        .map(|q| Quota {
            category: q.category,
            count: q.count / ratio,
        })
        .filter(|q| q.count > 0)
        .collect();

    let actual: usize = rescaled.iter().map(|q| q.count).sum();
    if actual != round_size {
        tracing::warn!(
            template_total = total,
            round_size,
            ratio,
            rescaled_total = actual,
            "Rescaled quotas do not reconcile with round size"
        );
        return Err(Error::QuotaMismatch {
            expected: round_size,
            actual,
        });
    }

    tracing::debug!(template_total = total, round_size, "Rescaled template quotas");
    Ok(rescaled)
}
