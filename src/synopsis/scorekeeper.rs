use super::options::SynopsisOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A strategy for turning one visit's duration into a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scorekeeper {
    /// Diminishing returns in visit duration.
    Concave,
    /// One point per qualifying visit.
    Visits,
}

impl Scorekeeper {
    /// Every registered scorekeeper; the first is the default.
    pub const ALL: [Scorekeeper; 2] = [Scorekeeper::Concave, Scorekeeper::Visits];

    pub fn name(&self) -> &'static str {
        match self {
            Scorekeeper::Concave => "concave",
            Scorekeeper::Visits => "visits",
        }
    }

    pub fn score(&self, duration: u64, options: &SynopsisOptions) -> f64 {
        match self {
            Scorekeeper::Concave => {
                (-options.b + (options.b2 + options.a4 * duration as f64).sqrt()) / options.a2
            }
            Scorekeeper::Visits => 1.0,
        }
    }
}

impl fmt::Display for Scorekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scorekeeper {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown scorekeeper `{s}`"))
    }
}

/// Accumulated score per scorekeeper. Missing entries read as zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scores(BTreeMap<Scorekeeper, f64>);

impl Scores {
    /// A zero entry for each of `keepers`.
    pub fn zeroed(keepers: &[Scorekeeper]) -> Self {
        Self(keepers.iter().map(|k| (*k, 0.0)).collect())
    }

    /// Score one visit under each of `options.scorekeepers`, clamping
    /// negative scores to zero. `None` when no scorekeeper awards anything.
    pub fn for_visit(duration: u64, options: &SynopsisOptions) -> Option<Self> {
        let mut scores = Self::default();
        let mut awarded = false;

        for keeper in &options.scorekeepers {
            let score = keeper.score(duration, options);
            if score > 0.0 {
                awarded = true;
                scores.0.insert(*keeper, score);
            } else {
                scores.0.insert(*keeper, 0.0);
            }
        }

        awarded.then_some(scores)
    }

    pub fn get(&self, keeper: Scorekeeper) -> f64 {
        self.0.get(&keeper).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, keeper: Scorekeeper, value: f64) {
        self.0.insert(keeper, value);
    }

    pub fn add(&mut self, keeper: Scorekeeper, value: f64) {
        *self.0.entry(keeper).or_insert(0.0) += value;
    }

    /// Add every entry of `other` into `self`.
    pub fn accumulate(&mut self, other: &Scores) {
        for (keeper, value) in other.iter() {
            self.add(keeper, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Scorekeeper, f64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
