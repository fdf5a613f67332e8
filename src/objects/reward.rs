//! Decomposing rewards and entities into score vectors.

use crate::database::{
    ArtifactKind, ArtifactRecord, GameDatabase, ResourceRarity, RewardSpec, SpellRecord,
};
use crate::score::{Score, ScoreAttr};

/// Score contribution of a single artifact.
pub fn estimate_art_score(art: &ArtifactRecord) -> Score {
    let attr = match art.kind {
        ArtifactKind::Stat => ScoreAttr::ArtStat,
        ArtifactKind::Support => ScoreAttr::ArtSupport,
    };
    Score::single(attr, art.value)
}

/// Score contribution of a single spell. Draws made through an "any spell"
/// record budget on the catch-all axis instead of the school split.
pub fn estimate_spell_score(spell: &SpellRecord, as_any_spell: bool) -> Score {
    let attr = if as_any_spell {
        ScoreAttr::SpellAll
    } else if spell.offensive {
        ScoreAttr::SpellOffensive
    } else {
        ScoreAttr::SpellCommon
    };
    Score::single(attr, spell.value)
}

pub fn estimate_spell_list_score(
    db: &GameDatabase,
    spells: &[usize],
    as_any_spell: bool,
) -> Score {
    let mut score = Score::new();
    for &index in spells {
        score = score + estimate_spell_score(db.spells.get(index), as_any_spell);
    }
    score
}

/// Decompose a reward into score axes. Artifact filters and spell filters
/// are estimated separately by the factories, after the concrete draws.
pub fn estimate_reward(db: &GameDatabase, reward: &RewardSpec, unit_attr: ScoreAttr) -> Score {
    let mut score = Score::new();
    for (resource_id, amount) in &reward.resources {
        if let Some(resource) = db.resources.find(resource_id) {
            let attr = match resource.rarity {
                ResourceRarity::Gold => ScoreAttr::Gold,
                _ => ScoreAttr::Resource,
            };
            score.add_value(attr, resource.value * (amount / resource.pile_size.max(1)));
        }
    }
    if reward.gained_exp > 0 {
        score.add_value(ScoreAttr::Experience, reward.gained_exp);
    }
    if reward.army_value > 0 {
        score.add_value(unit_attr, reward.army_value);
    }
    for (unit_id, count) in &reward.units {
        if let Some(unit) = db.units.find(unit_id) {
            score.add_value(unit_attr, unit.value * count);
        }
    }
    for random in &reward.random_units {
        score.add_value(unit_attr, random.value);
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ArtifactClass, Catalog, RandomUnitReward, ResourceRecord, UnitRecord};

    fn db_with_resources() -> GameDatabase {
        let mut db = GameDatabase::default();
        db.resources = Catalog::from_records(vec![
            ResourceRecord {
                id: "gold".to_string(),
                legacy_id: None,
                value: 1000,
                pile_size: 1000,
                rarity: ResourceRarity::Gold,
            },
            ResourceRecord {
                id: "wood".to_string(),
                legacy_id: None,
                value: 1400,
                pile_size: 7,
                rarity: ResourceRarity::Common,
            },
        ]);
        db.units = Catalog::from_records(vec![UnitRecord {
            id: "pikeman".to_string(),
            legacy_id: None,
            faction: "castle".to_string(),
            level: 10,
            value: 80,
            growth: 14,
        }]);
        db
    }

    #[test]
    fn reward_axes() {
        let db = db_with_resources();
        let mut reward = RewardSpec::default();
        reward.resources.insert("gold".to_string(), 5000);
        reward.resources.insert("wood".to_string(), 14);
        reward.gained_exp = 2000;
        reward.units.push(("pikeman".to_string(), 10));
        reward.random_units.push(RandomUnitReward {
            levels: vec![10],
            value: 500,
        });

        let score = estimate_reward(&db, &reward, ScoreAttr::Army);
        assert_eq!(score.get(ScoreAttr::Gold), 5000);
        assert_eq!(score.get(ScoreAttr::Resource), 2800);
        assert_eq!(score.get(ScoreAttr::Experience), 2000);
        assert_eq!(score.get(ScoreAttr::Army), 80 * 10 + 500);
    }

    #[test]
    fn artifact_kinds_split_axes() {
        let stat = ArtifactRecord {
            id: "blade".to_string(),
            legacy_id: None,
            value: 3000,
            guard: 6000,
            class: ArtifactClass::Major,
            kind: ArtifactKind::Stat,
            tags: vec![],
            scroll_spell: None,
        };
        let mut support = stat.clone();
        support.kind = ArtifactKind::Support;
        assert_eq!(estimate_art_score(&stat).get(ScoreAttr::ArtStat), 3000);
        assert_eq!(
            estimate_art_score(&support).get(ScoreAttr::ArtSupport),
            3000
        );
    }
}
