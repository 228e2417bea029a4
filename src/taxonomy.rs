//! Outcome taxonomy and bin naming
//!
//! Every bin in the category store is named from a typed [`Category`] rather
//! than by concatenating string literals. The only way to learn which bins a
//! match belongs to is [`bins_for`], and both the categorizer (write path) and
//! the allocator (delete path) go through it, so the two can never disagree.
//!
//! # Bin layout
//!
//! | Category | Example key | Holds |
//! |---|---|---|
//! | `Ready` | `EN:SET_READY` | every classified candidate |
//! | `Goals` | `EN:SET_3` | total goals 0..=6, `7` for seven or more |
//! | `OverUnder` | `EN:SET_TGO25` | over 2.5, under 2.5, under 1.5 |
//! | `Result` | `EN:SET_1_h` | one-goal matches by winner |
//! | `Split` | `EN:SET_4_gg` | two or more goals, both scored or not |
//! | `SplitResult` | `EN:SET_4_gg_h` | two or more goals, split and 1X2 |

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Goal class used as the catch-all for seven or more goals
pub const CATCH_ALL_GOALS: u8 = 7;

/// Final score of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outcome {
    pub home_goals: u32,
    pub away_goals: u32,
}

impl Outcome {
    pub fn new(home_goals: u32, away_goals: u32) -> Self {
        Self {
            home_goals,
            away_goals,
        }
    }

    /// Saturates instead of wrapping, so an absurd score lands in the catch-all class
    pub fn total_goals(&self) -> u32 {
        self.home_goals.saturating_add(self.away_goals)
    }

    /// `None` when the two sides do not fit in a goal count
    pub fn checked_total(&self) -> Option<u32> {
        self.home_goals.checked_add(self.away_goals)
    }

    pub fn goal_class(&self) -> GoalClass {
        GoalClass::from_total(self.total_goals())
    }

    pub fn split(&self) -> GoalSplit {
        if self.home_goals > 0 && self.away_goals > 0 {
            GoalSplit::GoalGoal
        } else {
            GoalSplit::NoGoal
        }
    }

    pub fn result(&self) -> MatchResult {
        match self.home_goals.cmp(&self.away_goals) {
            std::cmp::Ordering::Greater => MatchResult::Home,
            std::cmp::Ordering::Less => MatchResult::Away,
            std::cmp::Ordering::Equal => MatchResult::Draw,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home_goals, self.away_goals)
    }
}

/// Total-goals class, `0..=6` exact and `7` for anything higher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GoalClass(u8);

impl GoalClass {
    pub fn from_total(total: u32) -> Self {
        Self(total.min(CATCH_ALL_GOALS as u32) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn is_catch_all(&self) -> bool {
        self.0 == CATCH_ALL_GOALS
    }

    /// All eight goal classes in ascending order
    pub fn all() -> impl Iterator<Item = GoalClass> {
        (0..=CATCH_ALL_GOALS).map(GoalClass)
    }
}

/// Over/under thresholds on total goals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OverUnder {
    Over25,
    Under25,
    Under15,
}

impl OverUnder {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Over25 => "TGO25",
            Self::Under25 => "TGU25",
            Self::Under15 => "TGU15",
        }
    }

    /// Thresholds a total satisfies; under 1.5 implies under 2.5
    pub fn for_total(total: u32) -> Vec<OverUnder> {
        match total {
            0 | 1 => vec![Self::Under25, Self::Under15],
            2 => vec![Self::Under25],
            _ => vec![Self::Over25],
        }
    }

    pub fn matches(&self, total: u32) -> bool {
        match self {
            Self::Over25 => total >= 3,
            Self::Under25 => total <= 2,
            Self::Under15 => total <= 1,
        }
    }
}

/// Goal/no-goal split: did both sides score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GoalSplit {
    GoalGoal,
    NoGoal,
}

impl GoalSplit {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::GoalGoal => "gg",
            Self::NoGoal => "ng",
        }
    }
}

/// 1X2 result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchResult {
    Home,
    Away,
    Draw,
}

impl MatchResult {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Home => "h",
            Self::Away => "a",
            Self::Draw => "d",
        }
    }
}

/// A single taxonomy dimension a candidate can be filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Ready,
    Goals(GoalClass),
    OverUnder(OverUnder),
    Result(GoalClass, MatchResult),
    Split(GoalClass, GoalSplit),
    SplitResult(GoalClass, GoalSplit, MatchResult),
}

impl Category {
    /// Bin suffix appended to the set name (`SET_` + suffix)
    pub fn suffix(&self) -> String {
        match self {
            Self::Ready => "READY".to_string(),
            Self::Goals(class) => class.value().to_string(),
            Self::OverUnder(ou) => ou.suffix().to_string(),
            Self::Result(class, result) => format!("{}_{}", class.value(), result.suffix()),
            Self::Split(class, split) => format!("{}_{}", class.value(), split.suffix()),
            Self::SplitResult(class, split, result) => {
                format!("{}_{}_{}", class.value(), split.suffix(), result.suffix())
            }
        }
    }

    /// Parse a suffix such as `3`, `TGO25`, `1_h`, `4_gg` or `4_gg_h`
    pub fn parse(suffix: &str) -> Option<Self> {
        if suffix == "READY" {
            return Some(Self::Ready);
        }
        for ou in [OverUnder::Over25, OverUnder::Under25, OverUnder::Under15] {
            if suffix == ou.suffix() {
                return Some(Self::OverUnder(ou));
            }
        }

        let mut parts = suffix.split('_');
        let class: u8 = parts.next()?.parse().ok()?;
        if class > CATCH_ALL_GOALS {
            return None;
        }
        let class = GoalClass(class);

        let split = |s: &str| match s {
            "gg" => Some(GoalSplit::GoalGoal),
            "ng" => Some(GoalSplit::NoGoal),
            _ => None,
        };
        let result = |s: &str| match s {
            "h" => Some(MatchResult::Home),
            "a" => Some(MatchResult::Away),
            "d" => Some(MatchResult::Draw),
            _ => None,
        };

        let category = match (parts.next(), parts.next(), parts.next()) {
            (None, _, _) => Self::Goals(class),
            (Some(second), None, _) => match (split(second), result(second)) {
                (Some(s), _) => Self::Split(class, s),
                (_, Some(r)) => Self::Result(class, r),
                _ => return None,
            },
            (Some(second), Some(third), None) => {
                Self::SplitResult(class, split(second)?, result(third)?)
            }
            _ => return None,
        };
        Some(category)
    }

    /// The most specific bin a score is filed under
    ///
    /// Exact-score templates draw from these bins.
    pub fn exact_for(outcome: &Outcome) -> Self {
        let class = outcome.goal_class();
        match outcome.total_goals() {
            0 => Self::Goals(class),
            1 => Self::Result(class, outcome.result()),
            _ => Self::SplitResult(class, outcome.split(), outcome.result()),
        }
    }

    /// Whether a candidate with this outcome belongs in this bin
    pub fn matches(&self, outcome: &Outcome) -> bool {
        bins_for(outcome).contains(self)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

/// Every bin a candidate with this outcome is written to
///
/// The categorizer writes exactly these bins and the allocator removes exactly
/// these bins when the candidate is drawn.
pub fn bins_for(outcome: &Outcome) -> Vec<Category> {
    let total = outcome.total_goals();
    let class = outcome.goal_class();

    let mut bins = vec![Category::Ready, Category::Goals(class)];
    bins.extend(OverUnder::for_total(total).into_iter().map(Category::OverUnder));

    match total {
        0 => {}
        1 => bins.push(Category::Result(class, outcome.result())),
        _ => {
            bins.push(Category::Split(class, outcome.split()));
            bins.push(Category::SplitResult(class, outcome.split(), outcome.result()));
        }
    }
    bins
}

/// Renders categories into store keys for a region
#[derive(Debug, Clone)]
pub struct Taxonomy {
    set_name: String,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::new("SET")
    }
}

impl Taxonomy {
    pub fn new(set_name: impl Into<String>) -> Self {
        Self {
            set_name: set_name.into(),
        }
    }

    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    /// Store key for a category bin, e.g. `EN:SET_4_gg_h`
    pub fn bin_key(&self, region: &str, category: &Category) -> String {
        format!("{region}:{}_{}", self.set_name, category.suffix())
    }

    /// Keys of every bin a candidate with this outcome lives in
    pub fn bin_keys_for(&self, region: &str, outcome: &Outcome) -> Vec<String> {
        bins_for(outcome)
            .iter()
            .map(|c| self.bin_key(region, c))
            .collect()
    }

    /// Staging bin fed by ingestion
    pub fn staging_key(&self, region: &str) -> String {
        format!("{region}:STAGING")
    }

    /// Quarantine bin for malformed candidates
    pub fn wrong_format_key(&self, region: &str) -> String {
        format!("{region}:WRONG_FORMAT")
    }

    /// Goal-count bins watched for back-pressure and readiness
    pub fn watched_bins(&self, region: &str) -> Vec<String> {
        GoalClass::all()
            .map(|class| self.bin_key(region, &Category::Goals(class)))
            .collect()
    }

    /// Every category reachable from some score, in a stable order
    pub fn all_categories() -> Vec<Category> {
        let limit = CATCH_ALL_GOALS as u32 + 1;
        let mut all = BTreeSet::new();
        for home in 0..=limit {
            for away in 0..=limit {
                all.extend(bins_for(&Outcome::new(home, away)));
            }
        }
        all.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bin_key_rendering() {
        let taxonomy = Taxonomy::default();
        let outcome = Outcome::new(3, 1);
        let category = Category::exact_for(&outcome);
        assert_eq!(taxonomy.bin_key("EN", &category), "EN:SET_4_gg_h");
        assert_eq!(
            taxonomy.bin_key("EN", &Category::Goals(GoalClass::from_total(0))),
            "EN:SET_0"
        );
        assert_eq!(taxonomy.staging_key("EN"), "EN:STAGING");
        assert_eq!(taxonomy.wrong_format_key("EN"), "EN:WRONG_FORMAT");
    }

    #[test]
    fn test_overflowing_score_saturates() {
        let outcome = Outcome::new(u32::MAX, 1);
        assert_eq!(outcome.checked_total(), None);
        assert_eq!(outcome.total_goals(), u32::MAX);
        assert!(outcome.goal_class().is_catch_all());
        assert_eq!(Outcome::new(2, 3).checked_total(), Some(5));
    }

    #[test]
    fn test_bins_for_goalless_draw() {
        let bins = bins_for(&Outcome::new(0, 0));
        assert_eq!(
            bins,
            vec![
                Category::Ready,
                Category::Goals(GoalClass(0)),
                Category::OverUnder(OverUnder::Under25),
                Category::OverUnder(OverUnder::Under15),
            ]
        );
    }

    #[test]
    fn test_bins_for_one_goal_files_winner() {
        let bins = bins_for(&Outcome::new(0, 1));
        assert!(bins.contains(&Category::Result(GoalClass(1), MatchResult::Away)));
        assert!(!bins.iter().any(|c| matches!(c, Category::Split(..))));
    }

    #[test]
    fn test_bins_for_high_scoring_uses_catch_all() {
        let outcome = Outcome::new(5, 4);
        assert!(outcome.goal_class().is_catch_all());
        let bins = bins_for(&outcome);
        assert!(bins.contains(&Category::Goals(GoalClass(7))));
        assert!(bins.contains(&Category::SplitResult(
            GoalClass(7),
            GoalSplit::GoalGoal,
            MatchResult::Home
        )));
    }

    #[test]
    fn test_parse_round_trips_every_category() {
        for category in Taxonomy::all_categories() {
            assert_eq!(Category::parse(&category.suffix()), Some(category));
        }
        assert_eq!(Category::parse("8"), None);
        assert_eq!(Category::parse("3_xx"), None);
        assert_eq!(Category::parse("3_gg_h_d"), None);
    }

    #[test]
    fn test_all_categories_excludes_impossible_combinations() {
        let all = Taxonomy::all_categories();
        // A no-goal draw with goals scored cannot happen
        assert!(!all.contains(&Category::SplitResult(
            GoalClass(2),
            GoalSplit::NoGoal,
            MatchResult::Draw
        )));
        assert!(all.contains(&Category::SplitResult(
            GoalClass(2),
            GoalSplit::GoalGoal,
            MatchResult::Draw
        )));
    }

    proptest! {
        #[test]
        fn prop_membership_completeness(home in 0u32..12, away in 0u32..12) {
            let outcome = Outcome::new(home, away);
            let total = home + away;
            let bins = bins_for(&outcome);

            prop_assert!(bins.contains(&Category::Goals(GoalClass::from_total(total))));
            let over = bins.contains(&Category::OverUnder(OverUnder::Over25));
            let under = bins.contains(&Category::OverUnder(OverUnder::Under25));
            prop_assert!(over != under);
            prop_assert_eq!(over, total >= 3);

            if total >= 2 {
                let splits = bins.iter().filter(|c| matches!(c, Category::Split(..))).count();
                let results = bins.iter().filter(|c| matches!(c, Category::SplitResult(..))).count();
                prop_assert_eq!(splits, 1);
                prop_assert_eq!(results, 1);
            }

            prop_assert!(bins.contains(&Category::exact_for(&outcome)));
            for category in &bins {
                prop_assert!(category.matches(&outcome));
            }
        }
    }
}
