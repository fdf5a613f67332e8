//! Score vectors: the currency of object budgeting.
//!
//! Every generated object carries a [`Score`] describing what it adds to the
//! zone (army strength, gold, artifact quality, ...). Zone score targets are
//! expressed in the same units and the generation loop drains them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, Sub};

/// Budget axis for generated content.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
pub enum ScoreAttr {
    Army,
    Gold,
    Resource,
    ResourceGen,
    Experience,
    ArtStat,
    ArtSupport,
    SpellOffensive,
    SpellCommon,
    SpellAll,
    Upgrade,
    ArmyDwelling,
    Misc,
}

impl ScoreAttr {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreAttr::Army => "army",
            ScoreAttr::Gold => "gold",
            ScoreAttr::Resource => "resource",
            ScoreAttr::ResourceGen => "resourceGen",
            ScoreAttr::Experience => "experience",
            ScoreAttr::ArtStat => "artStat",
            ScoreAttr::ArtSupport => "artSupport",
            ScoreAttr::SpellOffensive => "spellOffensive",
            ScoreAttr::SpellCommon => "spellCommon",
            ScoreAttr::SpellAll => "spellAll",
            ScoreAttr::Upgrade => "upgrade",
            ScoreAttr::ArmyDwelling => "armyDwelling",
            ScoreAttr::Misc => "misc",
        }
    }
}

/// Sparse signed score vector.
#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(pub BTreeMap<ScoreAttr, i64>);

impl Score {
    pub fn new() -> Self {
        Score(BTreeMap::new())
    }

    pub fn single(attr: ScoreAttr, value: i64) -> Self {
        let mut s = Score::new();
        s.0.insert(attr, value);
        s
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, attr: ScoreAttr) -> i64 {
        self.0.get(&attr).copied().unwrap_or(0)
    }

    pub fn contains(&self, attr: ScoreAttr) -> bool {
        self.0.contains_key(&attr)
    }

    pub fn add_value(&mut self, attr: ScoreAttr, value: i64) {
        *self.0.entry(attr).or_insert(0) += value;
    }

    pub fn set(&mut self, attr: ScoreAttr, value: i64) {
        self.0.insert(attr, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScoreAttr, i64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// Sum of all components.
    pub fn total(&self) -> i64 {
        self.0.values().sum()
    }

    /// Largest single component value (0 for an empty score).
    pub fn max_value(&self) -> i64 {
        self.0.values().copied().max().unwrap_or(0)
    }
}

impl Add for Score {
    type Output = Score;
    fn add(self, rhs: Score) -> Score {
        let mut out = self;
        for (attr, value) in rhs.0 {
            *out.0.entry(attr).or_insert(0) += value;
        }
        out
    }
}

impl Sub for Score {
    type Output = Score;
    fn sub(self, rhs: Score) -> Score {
        let mut out = self;
        for (attr, value) in rhs.0 {
            *out.0.entry(attr).or_insert(0) -= value;
        }
        out
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (attr, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", attr.as_str(), value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let a = Score::single(ScoreAttr::Army, 100) + Score::single(ScoreAttr::Gold, 500);
        let b = Score::single(ScoreAttr::Army, 30);
        let diff = a.clone() - b;
        assert_eq!(diff.get(ScoreAttr::Army), 70);
        assert_eq!(diff.get(ScoreAttr::Gold), 500);
        assert_eq!(diff.total(), 570);
        assert_eq!(a.max_value(), 500);
    }

    #[test]
    fn empty_score() {
        let s = Score::new();
        assert!(s.is_empty());
        assert_eq!(s.total(), 0);
        assert_eq!(s.max_value(), 0);
        assert_eq!(s.get(ScoreAttr::Misc), 0);
    }
}
