//! In-memory result map: tile layers, per-kind object collections, roads
//! and resolved guards. Consumed by an external serializer; the generator
//! never writes files itself.

use crate::database::RewardSpec;
use crate::pos::Pos;
use crate::score::Score;
use crate::zone::RoadType;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Target game flavor. A couple of placement offsets differ between the
/// classic engine and its expansion; they are kept as named constants and
/// never inferred.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameVersion {
    Sod,
    Hota,
}

impl GameVersion {
    /// Horizontal offset of monster sprites relative to their logical tile.
    pub const fn monster_x_offset(self) -> i32 {
        match self {
            GameVersion::Sod => SOD_MONSTER_X_OFFSET,
            GameVersion::Hota => HOTA_MONSTER_X_OFFSET,
        }
    }
}

pub const SOD_MONSTER_X_OFFSET: i32 = 0;
pub const HOTA_MONSTER_X_OFFSET: i32 = 1;

bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct TileFlags: u8 {
        const COASTAL = 1;
        const FLIP_HOR = 2;
        const FLIP_VERT = 4;
    }
}

impl Serialize for TileFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TileFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(TileFlags::from_bits_truncate(u8::deserialize(
            deserializer,
        )?))
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiverType {
    Water,
    Ice,
    Mud,
    Lava,
}

/// One rendered map cell. View indices are -1 until the renderer-adjacent
/// view selection pass fills them in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileInfo {
    /// Index into [`GeneratedMap::terrain_ids`].
    pub terrain: u16,
    pub terrain_view: i16,
    pub road: Option<RoadType>,
    pub road_view: i16,
    pub river: Option<RiverType>,
    pub river_view: i16,
    pub flags: TileFlags,
}

impl Default for TileInfo {
    fn default() -> Self {
        TileInfo {
            terrain: 0,
            terrain_view: -1,
            road: None,
            road_view: -1,
            river: None,
            river_view: -1,
            flags: TileFlags::empty(),
        }
    }
}

/// Zone footprint for the external renderer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapZone {
    pub id: String,
    pub terrain: String,
    pub tiles: Vec<Pos>,
}

/// Fields shared by every object kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObjectCommon {
    pub pos: Pos,
    pub guard: i64,
    pub score: Score,
    /// Score target id that produced this object (diagnostics).
    pub generation_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhTown {
    pub common: ObjectCommon,
    pub player: Option<String>,
    pub faction: String,
    pub is_main: bool,
    pub has_fort: bool,
    pub quest_identifier: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhHero {
    pub common: ObjectCommon,
    pub player: Option<String>,
    pub hero: String,
    pub is_main: bool,
    pub quest_identifier: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhMonster {
    pub common: ObjectCommon,
    pub unit: String,
    pub count: i64,
    pub aggression_min: i32,
    pub aggression_max: i32,
    pub join_only_for_money: bool,
    pub join_percent: i32,
    pub quest_identifier: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhResource {
    pub common: ObjectCommon,
    pub resource: String,
    pub amount: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhArtifact {
    pub common: ObjectCommon,
    pub artifact: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhPandora {
    pub common: ObjectCommon,
    pub key: String,
    pub reward: RewardSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhBank {
    pub common: ObjectCommon,
    pub bank: String,
    pub guards_variant: usize,
    pub upgraded_stack: bool,
    pub artifacts: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhDwelling {
    pub common: ObjectCommon,
    pub dwelling: String,
    pub player: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhMine {
    pub common: ObjectCommon,
    pub resource: String,
    pub player: Option<String>,
    pub def_variant: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhVisitable {
    pub common: ObjectCommon,
    pub visitable: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhShrine {
    pub common: ObjectCommon,
    pub visitable: String,
    pub spell: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhSkillHut {
    pub common: ObjectCommon,
    pub visitable: String,
    pub skills: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhScholar {
    pub common: ObjectCommon,
    pub visitable: String,
    pub spell: Option<String>,
    pub skill: Option<String>,
}

/// Seer's hut: bring the quest artifact, collect the reward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhQuestHut {
    pub common: ObjectCommon,
    pub visitable: String,
    pub quest_artifact: String,
    pub reward: RewardSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhObstacle {
    pub common: ObjectCommon,
    pub obstacle: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FhRoad {
    pub road_type: RoadType,
    pub tiles: Vec<Pos>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Objects {
    pub towns: Vec<FhTown>,
    pub heroes: Vec<FhHero>,
    pub monsters: Vec<FhMonster>,
    pub resources: Vec<FhResource>,
    pub artifacts: Vec<FhArtifact>,
    pub pandoras: Vec<FhPandora>,
    pub banks: Vec<FhBank>,
    pub dwellings: Vec<FhDwelling>,
    pub mines: Vec<FhMine>,
    pub visitables: Vec<FhVisitable>,
    pub shrines: Vec<FhShrine>,
    pub skill_huts: Vec<FhSkillHut>,
    pub scholars: Vec<FhScholar>,
    pub quest_huts: Vec<FhQuestHut>,
    pub obstacles: Vec<FhObstacle>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapConfig {
    pub allow_special_weeks: bool,
    pub round_limit: Option<i32>,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            allow_special_weeks: true,
            round_limit: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratedMap {
    pub version: GameVersion,
    pub seed: u64,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    /// Terrain id table referenced by [`TileInfo::terrain`].
    pub terrain_ids: Vec<String>,
    /// Row-major (z, y, x) tile layer.
    pub tiles: Vec<TileInfo>,
    pub zones: Vec<MapZone>,
    pub objects: Objects,
    pub roads: Vec<FhRoad>,
    /// Object-def ids used by the map, for the serializer's def table.
    pub initial_object_defs: Vec<String>,
    pub config: MapConfig,
}

impl GeneratedMap {
    pub fn new(version: GameVersion, seed: u64, width: i32, height: i32, depth: i32) -> Self {
        GeneratedMap {
            version,
            seed,
            width,
            height,
            depth,
            terrain_ids: Vec::new(),
            tiles: vec![TileInfo::default(); (width * height * depth) as usize],
            zones: Vec::new(),
            objects: Objects::default(),
            roads: Vec::new(),
            initial_object_defs: Vec::new(),
            config: MapConfig::default(),
        }
    }

    pub fn tile_index(&self, pos: Pos) -> usize {
        ((pos.z * self.height + pos.y) * self.width + pos.x) as usize
    }

    pub fn tile_mut(&mut self, pos: Pos) -> &mut TileInfo {
        let index = self.tile_index(pos);
        &mut self.tiles[index]
    }

    /// Index of a terrain id in the table, interning it on first use.
    pub fn terrain_index(&mut self, terrain: &str) -> u16 {
        if let Some(i) = self.terrain_ids.iter().position(|t| t == terrain) {
            return i as u16;
        }
        self.terrain_ids.push(terrain.to_string());
        (self.terrain_ids.len() - 1) as u16
    }

    pub fn register_object_def(&mut self, def: &str) {
        if !self.initial_object_defs.iter().any(|d| d == def) {
            self.initial_object_defs.push(def.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_addressing() {
        let mut map = GeneratedMap::new(GameVersion::Sod, 1, 4, 3, 2);
        assert_eq!(map.tiles.len(), 24);
        map.tile_mut(Pos::new(3, 2, 1)).road = Some(RoadType::Dirt);
        assert_eq!(map.tiles[23].road, Some(RoadType::Dirt));
    }

    #[test]
    fn terrain_interning() {
        let mut map = GeneratedMap::new(GameVersion::Sod, 1, 2, 2, 1);
        assert_eq!(map.terrain_index("grass"), 0);
        assert_eq!(map.terrain_index("dirt"), 1);
        assert_eq!(map.terrain_index("grass"), 0);
        assert_eq!(map.terrain_ids.len(), 2);
    }

    #[test]
    fn version_offsets() {
        assert_eq!(GameVersion::Sod.monster_x_offset(), 0);
        assert_eq!(GameVersion::Hota.monster_x_offset(), 1);
    }
}
