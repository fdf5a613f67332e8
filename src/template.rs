//! Declarative template input: zones, their generator tables and score
//! targets, inter-zone connections and user settings. Deserialized from
//! JSON; every field has a sensible default so templates stay short.

use crate::database::{ArtifactFilter, GameDatabase, RewardSpec, SpellFilter};
use crate::error::TemplateError;
use crate::output::GameVersion;
use crate::pos::Pos;
use crate::score::{Score, ScoreAttr};
use crate::zone::RoadType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn default_true() -> bool {
    true
}

fn default_neg() -> i64 {
    -1
}

fn default_freq() -> u64 {
    1000
}

/// Budget scope of one score attribute inside a score target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoreScope {
    pub target: i64,
    /// Minimum accepted single-object value, -1 for no bound.
    #[serde(default = "default_neg")]
    pub min_single: i64,
    /// Maximum accepted single-object value, -1 for no bound.
    #[serde(default = "default_neg")]
    pub max_single: i64,
    /// Largest remainder tolerated when the target loop finishes, -1 for
    /// unlimited.
    #[serde(default = "default_neg")]
    pub max_remain: i64,
    /// When set, the leftover is dropped instead of being carried into the
    /// following score targets.
    #[serde(default)]
    pub consume_remain: bool,
}

/// Where the objects of a score target end up.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZoneObjectType {
    /// Normal segment placement with guards and spacing.
    Segment,
    /// Unguarded pickables scattered over segment ground.
    SegmentScatter,
    /// Unguarded pickables scattered along roads.
    RoadScatter,
}

impl Default for ZoneObjectType {
    fn default() -> Self {
        ZoneObjectType::Segment
    }
}

/// One declarative budget entry: how many points of each attribute to
/// place, and how to guard and position the produced objects.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreSettings {
    pub score: BTreeMap<ScoreAttr, ScoreScope>,
    pub is_enabled: bool,
    pub tolerance_percent: i64,
    pub guard_percent: i64,
    /// -1 defers to the zone-level value.
    pub guard_group_limit: i64,
    pub guard_threshold: i64,
    pub guard_min_to_group: i64,
    pub preferred_heats: Vec<i32>,
    /// Explicit placement order; -2 means "use the preferred heat".
    pub placement_order: i64,
    pub object_type: ZoneObjectType,
    pub generators_include: BTreeSet<String>,
    pub generators_exclude: BTreeSet<String>,
}

impl Default for ScoreSettings {
    fn default() -> Self {
        ScoreSettings {
            score: BTreeMap::new(),
            is_enabled: false,
            tolerance_percent: 5,
            guard_percent: 100,
            guard_group_limit: -1,
            guard_threshold: -1,
            guard_min_to_group: -1,
            preferred_heats: Vec::new(),
            placement_order: -2,
            object_type: ZoneObjectType::Segment,
            generators_include: BTreeSet::new(),
            generators_exclude: BTreeSet::new(),
        }
    }
}

impl ScoreSettings {
    pub fn make_target_score(&self) -> Score {
        let mut score = Score::new();
        for (&attr, scope) in &self.score {
            score.set(attr, scope.target);
        }
        score
    }

    pub fn is_valid_value(&self, attr: ScoreAttr, value: i64) -> bool {
        let Some(scope) = self.score.get(&attr) else {
            return false;
        };
        if scope.min_single != -1 && value < scope.min_single {
            return false;
        }
        if scope.max_single != -1 && value > scope.max_single {
            return false;
        }
        true
    }

    /// A score passes when at least one of its non-zero components fits the
    /// per-object bounds. An empty score always passes.
    pub fn is_valid_score(&self, score: &Score) -> bool {
        if score.is_empty() {
            return true;
        }
        for (attr, value) in score.iter() {
            if value == 0 {
                continue;
            }
            if self.is_valid_value(attr, value) {
                return true;
            }
        }
        false
    }

    pub fn is_generator_filtered_out(&self, key: &str) -> bool {
        if !self.generators_exclude.is_empty() && self.generators_exclude.contains(key) {
            return true;
        }
        if !self.generators_include.is_empty() && !self.generators_include.contains(key) {
            return true;
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Generator tables

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorBank {
    pub is_enabled: bool,
    pub max_unique_factions: usize,
    pub records: BTreeMap<String, BankGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BankGenRecord {
    pub bank: String,
    #[serde(default = "default_neg")]
    pub frequency: i64,
    #[serde(default = "default_neg")]
    pub guard: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub repulse_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorArtifact {
    pub is_enabled: bool,
    pub records: BTreeMap<String, ArtifactGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactGenRecord {
    #[serde(default)]
    pub filter: ArtifactFilter,
    /// The draw pool; falls back to `filter` when left default.
    #[serde(default)]
    pub pool: ArtifactFilter,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    #[serde(default)]
    pub repulse_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorResourcePile {
    pub is_enabled: bool,
    pub records: BTreeMap<String, ResourcePileGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourcePileGenRecord {
    pub resource: String,
    pub amounts: Vec<i64>,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    #[serde(default)]
    pub guard: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorPandora {
    pub is_enabled: bool,
    pub records: BTreeMap<String, PandoraGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PandoraGenRecord {
    pub reward: RewardSpec,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    #[serde(default = "default_neg")]
    pub guard: i64,
    #[serde(default)]
    pub repulse_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorShrine {
    pub is_enabled: bool,
    pub records: BTreeMap<String, ShrineGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShrineGenRecord {
    #[serde(default)]
    pub filter: SpellFilter,
    #[serde(default = "default_one")]
    pub visual_level: i32,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    #[serde(default = "default_neg")]
    pub guard: i64,
    #[serde(default)]
    pub repulse_id: String,
}

fn default_one() -> i32 {
    1
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorScroll {
    pub is_enabled: bool,
    pub records: BTreeMap<String, ScrollGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrollGenRecord {
    #[serde(default)]
    pub filter: SpellFilter,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    #[serde(default = "default_neg")]
    pub guard: i64,
    #[serde(default)]
    pub repulse_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorDwelling {
    pub is_enabled: bool,
    pub records: BTreeMap<String, DwellingGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DwellingGenRecord {
    pub level: i32,
    #[serde(default = "default_neg")]
    pub value: i64,
    #[serde(default = "default_neg")]
    pub guard: i64,
    #[serde(default = "default_freq")]
    pub frequency: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorVisitable {
    pub is_enabled: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorMine {
    pub is_enabled: bool,
    pub records: BTreeMap<String, MineGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MineGenRecord {
    pub resource: String,
    #[serde(default = "default_mine_value")]
    pub value: i64,
    #[serde(default = "default_mine_guard")]
    pub guard: i64,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    #[serde(default = "default_neg")]
    pub min_zone: i64,
    #[serde(default = "default_neg")]
    pub max_zone: i64,
}

fn default_mine_value() -> i64 {
    500
}

fn default_mine_guard() -> i64 {
    1000
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSkillHut {
    pub is_enabled: bool,
    pub frequency: u64,
    pub guard: i64,
}

/// What a scholar teaches.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScholarKind {
    Spell,
    Skill,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorScholar {
    pub is_enabled: bool,
    pub records: BTreeMap<String, ScholarGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScholarGenRecord {
    pub kind: ScholarKind,
    /// Spell scholars draw through this filter; ignored for skill scholars.
    #[serde(default)]
    pub filter: SpellFilter,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    #[serde(default = "default_neg")]
    pub guard: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorQuestHut {
    pub is_enabled: bool,
    pub records: BTreeMap<String, QuestHutGenRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestHutGenRecord {
    pub reward: RewardSpec,
    /// The artifact the seer asks for.
    #[serde(default)]
    pub quest_artifact: ArtifactFilter,
    #[serde(default = "default_freq")]
    pub frequency: u64,
    /// -1 leaves the hut unguarded; the quest itself gates the reward.
    #[serde(default = "default_neg")]
    pub guard: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Generators {
    pub banks: GeneratorBank,
    pub artifacts: GeneratorArtifact,
    pub resources: GeneratorResourcePile,
    pub pandoras: GeneratorPandora,
    pub shrines: GeneratorShrine,
    pub scrolls: GeneratorScroll,
    pub dwellings: GeneratorDwelling,
    pub visitables: GeneratorVisitable,
    pub mines: GeneratorMine,
    pub skill_huts: GeneratorSkillHut,
    pub scholars: GeneratorScholar,
    pub quest_huts: GeneratorQuestHut,
}

// ---------------------------------------------------------------------------
// Zones, towns, connections

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TownSettings {
    pub player_controlled: bool,
    pub use_zone_faction: bool,
    pub faction: Option<String>,
    pub has_fort: bool,
    pub is_main: bool,
}

impl Default for TownSettings {
    fn default() -> Self {
        TownSettings {
            player_controlled: false,
            use_zone_faction: true,
            faction: None,
            has_fort: true,
            is_main: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneSettings {
    pub center_avg: Pos,
    pub center_dispersion: Pos,
    pub relative_size_avg: i64,
    pub relative_size_dispersion: u64,
    pub terrain: String,
    pub main_town_faction: String,
    pub rewards_faction: String,
    pub dwell_faction: String,
    pub player: Option<String>,
    pub towns: Vec<TownSettings>,
    pub max_heat: i32,
    pub segment_area_size: usize,
    pub zone_guard_percent: i64,
    pub zone_guard_dispersion: u64,
    pub guard_min: i64,
    pub guard_max: i64,
    pub guard_block: i64,
    pub guard_group_limit: i64,
    pub guard_threshold: i64,
    pub guard_min_to_group: i64,
    pub score_targets: BTreeMap<String, ScoreSettings>,
    pub generators: Generators,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        ZoneSettings {
            center_avg: Pos::default(),
            center_dispersion: Pos::default(),
            relative_size_avg: 100,
            relative_size_dispersion: 0,
            terrain: String::new(),
            main_town_faction: String::new(),
            rewards_faction: String::new(),
            dwell_faction: String::new(),
            player: None,
            towns: Vec::new(),
            max_heat: 10,
            segment_area_size: 250,
            zone_guard_percent: 100,
            zone_guard_dispersion: 5,
            guard_min: 0,
            guard_max: 0,
            guard_block: 0,
            guard_group_limit: 10000,
            guard_threshold: 100,
            guard_min_to_group: -1,
            score_targets: BTreeMap::new(),
            generators: Generators::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPath {
    pub guard: i64,
    pub mirror_guard: String,
    pub road: Option<RoadType>,
    /// Tiles around the chosen border tile reserved for this path alone.
    pub radius: i64,
}

impl Default for ConnectionPath {
    fn default() -> Self {
        ConnectionPath {
            guard: 0,
            mirror_guard: String::new(),
            road: Some(RoadType::Dirt),
            radius: 2,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Connection {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub paths: BTreeMap<String, ConnectionPath>,
}

// ---------------------------------------------------------------------------
// User settings

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultySettings {
    pub min_guards_percent: i64,
    pub max_guards_percent: i64,
    pub min_army_percent: i64,
    pub max_army_percent: i64,
    pub min_gold_percent: i64,
    pub max_gold_percent: i64,
}

impl Default for DifficultySettings {
    fn default() -> Self {
        DifficultySettings {
            min_guards_percent: 100,
            max_guards_percent: 100,
            min_army_percent: 100,
            max_army_percent: 100,
            min_gold_percent: 100,
            max_gold_percent: 100,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeroGeneration {
    None,
    RandomAnyFaction,
    RandomStartingFaction,
    FixedAny,
    FixedStarting,
}

impl Default for HeroGeneration {
    fn default() -> Self {
        HeroGeneration::RandomStartingFaction
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPlayer {
    pub faction: Option<String>,
    pub starting_hero: Option<String>,
    pub starting_hero_gen: HeroGeneration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub default_road: Option<RoadType>,
    pub difficulty: DifficultySettings,
    pub map_size: i32,
    pub has_underground: bool,
    pub players: BTreeMap<String, UserPlayer>,
    pub allow_special_weeks: bool,
    pub round_limit: Option<i32>,
}

impl Default for UserSettings {
    fn default() -> Self {
        UserSettings {
            default_road: Some(RoadType::Cobblestone),
            difficulty: DifficultySettings::default(),
            map_size: 144,
            has_underground: false,
            players: BTreeMap::new(),
            allow_special_weeks: true,
            round_limit: None,
        }
    }
}

// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    pub version: GameVersion,
    pub zones: BTreeMap<String, ZoneSettings>,
    pub connections: BTreeMap<String, Connection>,
    pub user: UserSettings,
    pub allow_flip: bool,
    pub rotation_degree_dispersion: u64,
    /// Entity ids excluded from all pools.
    pub disabled_artifacts: BTreeSet<String>,
    pub disabled_spells: BTreeSet<String>,
    pub disabled_skills: BTreeSet<String>,
    pub disabled_banks: BTreeSet<String>,
}

impl Default for Template {
    fn default() -> Self {
        Template {
            width: 72,
            height: 72,
            depth: 1,
            version: GameVersion::Sod,
            zones: BTreeMap::new(),
            connections: BTreeMap::new(),
            user: UserSettings::default(),
            allow_flip: false,
            rotation_degree_dispersion: 0,
            disabled_artifacts: BTreeSet::new(),
            disabled_spells: BTreeSet::new(),
            disabled_skills: BTreeSet::new(),
            disabled_banks: BTreeSet::new(),
        }
    }
}

impl Template {
    pub fn from_json_str(text: &str) -> Result<Self, TemplateError> {
        serde_json::from_str(text).map_err(|e| TemplateError::Parse(e.to_string()))
    }

    /// Structural validation against the database. Catches the errors a new
    /// seed cannot fix.
    pub fn validate(&self, db: &GameDatabase) -> Result<(), TemplateError> {
        if self.zones.is_empty() {
            return Err(TemplateError::ZeroTotalRelativeArea);
        }
        let total: i64 = self.zones.values().map(|z| z.relative_size_avg).sum();
        if total <= 0 {
            return Err(TemplateError::ZeroTotalRelativeArea);
        }

        let missing = |kind: &'static str, id: &str| TemplateError::MissingEntity {
            kind,
            id: id.to_string(),
        };

        for (id, zone) in &self.zones {
            if zone.relative_size_avg <= 0 {
                return Err(TemplateError::NonPositiveZoneSize(id.clone()));
            }
            if db.terrains.find(&zone.terrain).is_none() {
                return Err(missing("terrain", &zone.terrain));
            }
            if db.factions.find(&zone.main_town_faction).is_none() {
                return Err(missing("faction", &zone.main_town_faction));
            }
            if db.factions.find(&zone.rewards_faction).is_none() {
                return Err(missing("faction", &zone.rewards_faction));
            }
            if let Some(player) = &zone.player {
                if db.players.find(player).is_none() {
                    return Err(missing("player", player));
                }
            }
            for record in zone.generators.banks.records.values() {
                if db.banks.find(&record.bank).is_none() {
                    return Err(missing("bank", &record.bank));
                }
            }
            for record in zone.generators.resources.records.values() {
                if db.resources.find(&record.resource).is_none() {
                    return Err(missing("resource", &record.resource));
                }
            }
            for record in zone.generators.mines.records.values() {
                if db.resources.find(&record.resource).is_none() {
                    return Err(missing("resource", &record.resource));
                }
            }
        }

        let mut all_path_ids = BTreeSet::new();
        for (id, connection) in &self.connections {
            for zone in [&connection.from, &connection.to] {
                if !self.zones.contains_key(zone) {
                    return Err(TemplateError::UnknownConnectionZone {
                        connection: id.clone(),
                        zone: zone.clone(),
                    });
                }
            }
            for path_id in connection.paths.keys() {
                if !all_path_ids.insert(path_id.clone()) {
                    return Err(TemplateError::DuplicateId(path_id.clone()));
                }
            }
        }
        for connection in self.connections.values() {
            for (path_id, path) in &connection.paths {
                if !path.mirror_guard.is_empty() && !all_path_ids.contains(&path.mirror_guard) {
                    return Err(TemplateError::UnknownMirrorGuard {
                        guard: path_id.clone(),
                        mirror: path.mirror_guard.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_settings_validity() {
        let mut settings = ScoreSettings::default();
        settings.score.insert(
            ScoreAttr::Gold,
            ScoreScope {
                target: 10000,
                min_single: 500,
                max_single: 5000,
                max_remain: -1,
                consume_remain: false,
            },
        );

        assert!(settings.is_valid_value(ScoreAttr::Gold, 500));
        assert!(settings.is_valid_value(ScoreAttr::Gold, 5000));
        assert!(!settings.is_valid_value(ScoreAttr::Gold, 499));
        assert!(!settings.is_valid_value(ScoreAttr::Gold, 5001));
        assert!(!settings.is_valid_value(ScoreAttr::Army, 1000));

        let ok = Score::single(ScoreAttr::Gold, 1000);
        let too_big = Score::single(ScoreAttr::Gold, 50000);
        let off_axis = Score::single(ScoreAttr::Army, 1000);
        assert!(settings.is_valid_score(&ok));
        assert!(!settings.is_valid_score(&too_big));
        assert!(!settings.is_valid_score(&off_axis));
        assert!(settings.is_valid_score(&Score::new()));
    }

    #[test]
    fn generator_filtering() {
        let mut settings = ScoreSettings::default();
        assert!(!settings.is_generator_filtered_out("banks"));
        settings.generators_include.insert("banks".to_string());
        assert!(!settings.is_generator_filtered_out("banks"));
        assert!(settings.is_generator_filtered_out("mines"));
        settings.generators_exclude.insert("banks".to_string());
        assert!(settings.is_generator_filtered_out("banks"));
    }

    #[test]
    fn template_parses_minimal_json() {
        let text = r#"{
            "width": 36, "height": 36,
            "zones": {
                "a": { "center_avg": {"x": 10, "y": 10}, "terrain": "grass" }
            }
        }"#;
        let template = Template::from_json_str(text).unwrap();
        assert_eq!(template.width, 36);
        assert_eq!(template.zones.len(), 1);
        let zone = &template.zones["a"];
        assert_eq!(zone.terrain, "grass");
        assert_eq!(zone.center_avg, Pos::new(10, 10, 0));
        assert_eq!(zone.relative_size_avg, 100);
        assert_eq!(zone.max_heat, 10);
    }
}
