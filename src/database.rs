//! Static game database: the immutable catalog of factions, units,
//! artifacts, spells, terrains and map object definitions the generator
//! consumes read-only. Loaded once (typically from JSON) and injected.

use crate::score::ScoreAttr;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Common surface of every catalog entity.
pub trait CatalogRecord {
    fn id(&self) -> &str;
    /// Dense integer id of the legacy game data, when the entity has one.
    fn legacy_id(&self) -> Option<usize> {
        None
    }
}

/// Ordered entity store. `records()` iterates in insertion order, which is
/// the stable order templates and pools rely on.
#[derive(Clone, Debug)]
pub struct Catalog<T: CatalogRecord> {
    records: Vec<T>,
    index: FnvHashMap<String, usize>,
    legacy: Vec<Option<usize>>,
}

impl<T: CatalogRecord> Default for Catalog<T> {
    fn default() -> Self {
        Catalog {
            records: Vec::new(),
            index: FnvHashMap::default(),
            legacy: Vec::new(),
        }
    }
}

impl<T: CatalogRecord> Catalog<T> {
    pub fn from_records(records: Vec<T>) -> Self {
        let mut index = FnvHashMap::default();
        let mut legacy: Vec<Option<usize>> = Vec::new();
        for (i, rec) in records.iter().enumerate() {
            index.insert(rec.id().to_string(), i);
            if let Some(lid) = rec.legacy_id() {
                if legacy.len() <= lid {
                    legacy.resize(lid + 1, None);
                }
                legacy[lid] = Some(i);
            }
        }
        Catalog {
            records,
            index,
            legacy,
        }
    }

    pub fn find(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn find_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn get(&self, index: usize) -> &T {
        &self.records[index]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Dense vector indexed by legacy id; `None` for holes.
    pub fn legacy_ordered_records(&self) -> Vec<Option<&T>> {
        self.legacy
            .iter()
            .map(|slot| slot.map(|i| &self.records[i]))
            .collect()
    }
}

impl<'de, T: CatalogRecord + Deserialize<'de>> Deserialize<'de> for Catalog<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let records = Vec::<T>::deserialize(deserializer)?;
        Ok(Catalog::from_records(records))
    }
}

fn default_neg() -> i64 {
    -1
}

fn default_freq() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactClass {
    Treasure,
    Minor,
    Major,
    Relic,
}

/// Which budget axis an artifact contributes to.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Raw primary-stat boosters.
    Stat,
    /// Everything else (utility, immunities, movement, ...).
    Support,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    pub value: i64,
    #[serde(default)]
    pub guard: i64,
    pub class: ArtifactClass,
    pub kind: ArtifactKind,
    #[serde(default)]
    pub tags: Vec<String>,
    /// For scroll artifacts: the spell written on the scroll.
    #[serde(default)]
    pub scroll_spell: Option<String>,
}

impl CatalogRecord for ArtifactRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

/// Declarative subset selection over the artifact catalog.
#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ArtifactFilter {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub classes: Vec<ArtifactClass>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub not_ids: Vec<String>,
}

impl ArtifactFilter {
    pub fn is_default(&self) -> bool {
        self.ids.is_empty() && self.classes.is_empty() && self.tags.is_empty()
            && self.not_ids.is_empty()
    }

    pub fn matches(&self, art: &ArtifactRecord) -> bool {
        if self.not_ids.iter().any(|id| id == &art.id) {
            return false;
        }
        if !self.ids.is_empty() && !self.ids.iter().any(|id| id == &art.id) {
            return false;
        }
        if !self.classes.is_empty() && !self.classes.contains(&art.class) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| art.tags.contains(t)) {
            return false;
        }
        true
    }

    /// Keep the catalog indices that pass the filter, preserving order.
    pub fn filter_possible(&self, db: &GameDatabase, candidates: &[usize]) -> Vec<usize> {
        candidates
            .iter()
            .copied()
            .filter(|&i| self.matches(db.artifacts.get(i)))
            .collect()
    }
}

// ---------------------------------------------------------------------------

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpellSchool {
    Air,
    Earth,
    Fire,
    Water,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SpellRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    pub school: SpellSchool,
    pub level: i32,
    pub value: i64,
    #[serde(default = "default_true")]
    pub teachable: bool,
    /// Offensive spells budget separately from utility ones.
    #[serde(default)]
    pub offensive: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CatalogRecord for SpellRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SpellFilter {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub schools: Vec<SpellSchool>,
    #[serde(default)]
    pub levels: Vec<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SpellFilter {
    pub fn is_default(&self) -> bool {
        self.ids.is_empty() && self.schools.is_empty() && self.levels.is_empty()
            && self.tags.is_empty()
    }

    pub fn matches(&self, spell: &SpellRecord) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| id == &spell.id) {
            return false;
        }
        if !self.schools.is_empty() && !self.schools.contains(&spell.school) {
            return false;
        }
        if !self.levels.is_empty() && !self.levels.contains(&spell.level) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| spell.tags.contains(t)) {
            return false;
        }
        true
    }

    pub fn filter_possible(&self, db: &GameDatabase, candidates: &[usize]) -> Vec<usize> {
        candidates
            .iter()
            .copied()
            .filter(|&i| self.matches(db.spells.get(i)))
            .collect()
    }
}

// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct UnitRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    pub faction: String,
    pub level: i32,
    pub value: i64,
    #[serde(default = "default_one")]
    pub growth: i64,
}

fn default_one() -> i64 {
    1
}

impl CatalogRecord for UnitRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct FactionRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
}

impl CatalogRecord for FactionRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TerrainRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
}

impl CatalogRecord for TerrainRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceRarity {
    Common,
    Rare,
    Gold,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    pub value: i64,
    #[serde(default = "default_one")]
    pub pile_size: i64,
    pub rarity: ResourceRarity,
}

impl CatalogRecord for ResourceRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DwellingRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    pub creatures: Vec<String>,
    #[serde(default)]
    pub mask: ObjectMask,
}

impl CatalogRecord for DwellingRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

// ---------------------------------------------------------------------------

/// Relative footprint of a placeable object. Offsets are anchored at the
/// object's bottom-right cell for legacy reasons, so they are non-positive.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ObjectMask {
    #[serde(default = "ObjectMask::default_visitable")]
    pub visitable: Vec<(i32, i32)>,
    #[serde(default)]
    pub blocked: Vec<(i32, i32)>,
}

impl ObjectMask {
    fn default_visitable() -> Vec<(i32, i32)> {
        vec![(0, 0)]
    }

    pub fn single_tile() -> Self {
        ObjectMask {
            visitable: vec![(0, 0)],
            blocked: vec![(0, 0)],
        }
    }

    /// Blocked cells that are not visitable.
    pub fn blocked_unvisitable(&self) -> Vec<(i32, i32)> {
        self.blocked
            .iter()
            .copied()
            .filter(|c| !self.visitable.contains(c))
            .collect()
    }
}

impl Default for ObjectMask {
    fn default() -> Self {
        ObjectMask::single_tile()
    }
}

/// Dense row-major blocking mask of an obstacle sprite.
/// Cell values: 0 = clear, 1 = blocked.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PlanarMask {
    pub width: usize,
    pub height: usize,
    pub rows: Vec<Vec<u8>>,
}

impl PlanarMask {
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

// ---------------------------------------------------------------------------

/// A reward payload: what the player gets from a bank fight or a pandora box.
#[derive(Clone, Default, PartialEq, Debug, Serialize, Deserialize)]
pub struct RewardSpec {
    /// resource id -> amount
    #[serde(default)]
    pub resources: BTreeMap<String, i64>,
    #[serde(default)]
    pub gained_exp: i64,
    #[serde(default)]
    pub army_value: i64,
    #[serde(default)]
    pub artifacts: Vec<ArtifactFilter>,
    #[serde(default)]
    pub spells: SpellFilter,
    /// Concrete unit rewards: (unit id, count).
    #[serde(default)]
    pub units: Vec<(String, i64)>,
    /// Random unit rewards: the faction unit of one of the listed levels,
    /// scaled to roughly `value` worth of creatures.
    #[serde(default)]
    pub random_units: Vec<RandomUnitReward>,
}

#[derive(Clone, Default, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RandomUnitReward {
    pub levels: Vec<i32>,
    pub value: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BankVariant {
    #[serde(default = "default_one_u64")]
    pub frequency_rel: u64,
    pub reward_index: usize,
}

fn default_one_u64() -> u64 {
    1
}

#[derive(Clone, Debug, Deserialize)]
pub struct BankRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    #[serde(default)]
    pub guard_value: i64,
    /// Index of the guard stack that has an upgraded variant, -1 for none.
    #[serde(default = "default_neg")]
    pub upgraded_stack_index: i64,
    pub variants: Vec<BankVariant>,
    pub rewards: Vec<RewardSpec>,
    #[serde(default)]
    pub mask: ObjectMask,
    /// Allowed terrain ids; empty means any.
    #[serde(default)]
    pub terrains: Vec<String>,
}

impl BankRecord {
    pub fn terrain_viable(&self, terrain: &str) -> bool {
        self.terrains.is_empty() || self.terrains.iter().any(|t| t == terrain)
    }
}

impl CatalogRecord for BankRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitKind {
    Normal,
    Pick,
    Remove,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VisitableRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    /// Budget axis this visitable contributes to; `None` excludes it from
    /// random generation entirely.
    #[serde(default)]
    pub attr: Option<ScoreAttr>,
    #[serde(default)]
    pub value: i64,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    #[serde(default = "default_neg")]
    pub min_zone: i64,
    #[serde(default = "default_neg")]
    pub max_zone: i64,
    #[serde(default = "default_visit_kind")]
    pub visit_kind: VisitKind,
    #[serde(default)]
    pub mask: ObjectMask,
    #[serde(default)]
    pub terrains: Vec<String>,
}

fn default_visit_kind() -> VisitKind {
    VisitKind::Normal
}

impl VisitableRecord {
    pub fn terrain_viable(&self, terrain: &str) -> bool {
        self.terrains.is_empty() || self.terrains.iter().any(|t| t == terrain)
    }
}

impl CatalogRecord for VisitableRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObstacleRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    pub mask: PlanarMask,
    #[serde(default)]
    pub terrains: Vec<String>,
}

impl ObstacleRecord {
    pub fn terrain_viable(&self, terrain: &str) -> bool {
        self.terrains.is_empty() || self.terrains.iter().any(|t| t == terrain)
    }
}

impl CatalogRecord for ObstacleRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SkillRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    pub value: i64,
    #[serde(default = "default_true")]
    pub teachable: bool,
}

impl CatalogRecord for SkillRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct HeroRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
    pub faction: String,
}

impl CatalogRecord for HeroRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlayerRecord {
    pub id: String,
    #[serde(default)]
    pub legacy_id: Option<usize>,
}

impl CatalogRecord for PlayerRecord {
    fn id(&self) -> &str {
        &self.id
    }
    fn legacy_id(&self) -> Option<usize> {
        self.legacy_id
    }
}

// ---------------------------------------------------------------------------

/// The injected read-only game database.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GameDatabase {
    #[serde(default)]
    pub artifacts: Catalog<ArtifactRecord>,
    #[serde(default)]
    pub spells: Catalog<SpellRecord>,
    #[serde(default)]
    pub units: Catalog<UnitRecord>,
    #[serde(default)]
    pub factions: Catalog<FactionRecord>,
    #[serde(default)]
    pub terrains: Catalog<TerrainRecord>,
    #[serde(default)]
    pub resources: Catalog<ResourceRecord>,
    #[serde(default)]
    pub dwellings: Catalog<DwellingRecord>,
    #[serde(default)]
    pub banks: Catalog<BankRecord>,
    #[serde(default)]
    pub visitables: Catalog<VisitableRecord>,
    #[serde(default)]
    pub obstacles: Catalog<ObstacleRecord>,
    #[serde(default)]
    pub skills: Catalog<SkillRecord>,
    #[serde(default)]
    pub heroes: Catalog<HeroRecord>,
    #[serde(default)]
    pub players: Catalog<PlayerRecord>,
}

impl GameDatabase {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Units of a faction, in catalog order.
    pub fn faction_units(&self, faction: &str) -> Vec<&UnitRecord> {
        self.units
            .records()
            .iter()
            .filter(|u| u.faction == faction)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn art(id: &str, legacy: Option<usize>, class: ArtifactClass) -> ArtifactRecord {
        ArtifactRecord {
            id: id.to_string(),
            legacy_id: legacy,
            value: 1000,
            guard: 2000,
            class,
            kind: ArtifactKind::Stat,
            tags: vec![],
            scroll_spell: None,
        }
    }

    #[test]
    fn catalog_lookup_and_legacy_order() {
        let catalog = Catalog::from_records(vec![
            art("a", Some(3), ArtifactClass::Treasure),
            art("b", None, ArtifactClass::Minor),
            art("c", Some(1), ArtifactClass::Relic),
        ]);
        assert_eq!(catalog.find("b").unwrap().class, ArtifactClass::Minor);
        assert!(catalog.find("missing").is_none());

        let legacy = catalog.legacy_ordered_records();
        assert_eq!(legacy.len(), 4);
        assert!(legacy[0].is_none());
        assert_eq!(legacy[1].unwrap().id, "c");
        assert!(legacy[2].is_none());
        assert_eq!(legacy[3].unwrap().id, "a");
    }

    #[test]
    fn artifact_filter() {
        let a = art("a", None, ArtifactClass::Treasure);
        let b = art("b", None, ArtifactClass::Relic);
        let filter = ArtifactFilter {
            classes: vec![ArtifactClass::Relic],
            ..Default::default()
        };
        assert!(!filter.matches(&a));
        assert!(filter.matches(&b));
        assert!(ArtifactFilter::default().matches(&a));

        let not = ArtifactFilter {
            not_ids: vec!["b".to_string()],
            ..Default::default()
        };
        assert!(not.matches(&a));
        assert!(!not.matches(&b));
    }

    #[test]
    fn mask_blocked_unvisitable() {
        let mask = ObjectMask {
            visitable: vec![(0, 0)],
            blocked: vec![(0, 0), (-1, 0), (-2, 0)],
        };
        assert_eq!(mask.blocked_unvisitable(), vec![(-1, 0), (-2, 0)]);
    }
}
