//! Per-zone working state: placed area, usable area, segments, road and
//! node registries, heat and distance maps.

use crate::grid::{TileGrid, TileId};
use crate::region::Region;
use crate::region_edge::RegionWithEdge;
use crate::template::ZoneSettings;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Road surface kind, ordered weakest to strongest. When two requirements
/// cross the same tile the stronger (greater) one wins.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RoadType {
    Trail,
    Pothole,
    Dirt,
    Gravel,
    Cobblestone,
}

/// Waypoint priority for road laying, ordered least to most important.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum NodeLevel {
    InnerPoints,
    BorderPoints,
    Exits,
    Towns,
}

/// Tiles bucketed by a level value, with a reverse tile -> level lookup.
/// Re-adding a tile moves it between buckets.
#[derive(Clone, Debug)]
pub struct LevelMap<T: Ord + Copy> {
    pub all: Region,
    by_level: BTreeMap<T, Region>,
    tile_levels: FnvHashMap<TileId, T>,
}

impl<T: Ord + Copy> Default for LevelMap<T> {
    fn default() -> Self {
        LevelMap {
            all: Region::new(),
            by_level: BTreeMap::new(),
            tile_levels: FnvHashMap::default(),
        }
    }
}

impl<T: Ord + Copy> LevelMap<T> {
    pub fn add(&mut self, tile: TileId, level: T) {
        self.all.insert(tile);
        if let Some(old) = self.tile_levels.get(&tile).copied() {
            if let Some(region) = self.by_level.get_mut(&old) {
                region.erase(tile);
            }
        }
        self.by_level.entry(level).or_default().insert(tile);
        self.tile_levels.insert(tile, level);
    }

    pub fn add_if_not_exist(&mut self, tile: TileId, level: T) {
        if !self.tile_levels.contains_key(&tile) {
            self.add(tile, level);
        }
    }

    pub fn level_of(&self, tile: TileId) -> Option<T> {
        self.tile_levels.get(&tile).copied()
    }

    pub fn region(&self, level: T) -> Region {
        self.by_level.get(&level).cloned().unwrap_or_default()
    }

    pub fn erase(&mut self, tile: TileId) {
        if let Some(level) = self.tile_levels.remove(&tile) {
            if let Some(region) = self.by_level.get_mut(&level) {
                region.erase(tile);
            }
            self.all.erase(tile);
        }
    }

    pub fn levels(&self) -> impl Iterator<Item = (T, &Region)> {
        self.by_level.iter().map(|(k, v)| (*k, v))
    }
}

/// One K-means subdivision of a zone's usable area; the placement unit for
/// objects.
#[derive(Clone, Debug, Default)]
pub struct ZoneSegmentArea {
    pub index: usize,
    pub area: RegionWithEdge,
}

pub struct TileZone {
    pub index: usize,
    pub id: String,
    pub settings: ZoneSettings,
    pub terrain: String,
    pub main_town_faction: String,
    pub rewards_faction: String,
    pub dwell_faction: String,
    pub player: Option<String>,

    pub start_tile: TileId,
    pub centroid: TileId,

    pub relative_area: i64,
    pub absolute_area: i64,
    pub absolute_radius: i64,

    pub area: RegionWithEdge,
    pub inner_usable: RegionWithEdge,
    pub towns_borders: Region,

    pub segments: Vec<ZoneSegmentArea>,
    pub segments_united: Region,

    pub road_potential: Region,
    pub roads: LevelMap<RoadType>,
    pub nodes: LevelMap<NodeLevel>,
    /// Requested road type per node tile; the A* pass takes the max along
    /// each path.
    pub node_road_types: BTreeMap<TileId, RoadType>,

    pub protection_border: Region,
    /// Tiles occupied by towns or otherwise reserved before placement.
    pub unpassable: Region,
    pub need_obstacles: Region,
    pub need_obstacles_tentative: Region,

    /// Raw travel distance per usable tile, from the heat-map sources.
    pub distances: FnvHashMap<TileId, i64>,
    pub heat_roads: LevelMap<i32>,
    pub heat_segments: LevelMap<i32>,
    pub heat_all: LevelMap<i32>,

    /// Exit tiles by connection path id.
    pub named_tiles: BTreeMap<String, TileId>,
}

impl TileZone {
    pub fn new(index: usize, id: String, settings: ZoneSettings, start_tile: TileId) -> Self {
        let terrain = settings.terrain.clone();
        let main_town_faction = settings.main_town_faction.clone();
        let rewards_faction = settings.rewards_faction.clone();
        let dwell_faction = if settings.dwell_faction.is_empty() {
            settings.rewards_faction.clone()
        } else {
            settings.dwell_faction.clone()
        };
        let player = settings.player.clone();
        TileZone {
            index,
            id,
            settings,
            terrain,
            main_town_faction,
            rewards_faction,
            dwell_faction,
            player,
            start_tile,
            centroid: start_tile,
            relative_area: 0,
            absolute_area: 0,
            absolute_radius: 0,
            area: RegionWithEdge::default(),
            inner_usable: RegionWithEdge::default(),
            towns_borders: Region::new(),
            segments: Vec::new(),
            segments_united: Region::new(),
            road_potential: Region::new(),
            roads: LevelMap::default(),
            nodes: LevelMap::default(),
            node_road_types: BTreeMap::new(),
            protection_border: Region::new(),
            unpassable: Region::new(),
            need_obstacles: Region::new(),
            need_obstacles_tentative: Region::new(),
            distances: FnvHashMap::default(),
            heat_roads: LevelMap::default(),
            heat_segments: LevelMap::default(),
            heat_all: LevelMap::default(),
            named_tiles: BTreeMap::new(),
        }
    }

    pub fn placed_area(&self) -> i64 {
        self.area.inner_area.len() as i64
    }

    pub fn area_deficit(&self) -> i64 {
        self.absolute_area - self.placed_area()
    }

    pub fn area_deficit_percent(&self) -> i64 {
        self.area_deficit() * 100 / self.absolute_area.max(1)
    }

    pub fn set_segments(&mut self, list: Vec<RegionWithEdge>) {
        self.segments = list
            .into_iter()
            .enumerate()
            .map(|(index, area)| ZoneSegmentArea { index, area })
            .collect();
    }

    pub fn segment_regions(&self) -> Vec<RegionWithEdge> {
        self.segments.iter().map(|s| s.area.clone()).collect()
    }

    /// Refresh per-tile segment back-pointers and the united segment region.
    pub fn update_segment_index(&mut self, grid: &mut TileGrid) {
        for tile in self.inner_usable.inner_area.iter() {
            grid.set_segment(tile, None);
        }
        self.segments_united.clear();
        for seg in &self.segments {
            self.segments_united.insert_region(&seg.area.inner_area);
            for tile in seg.area.inner_area.iter() {
                grid.set_segment(tile, Some(seg.index as u16));
            }
        }
    }

    /// Movement cost per tile. Plain tiles cost 100; tiles hugging the
    /// non-walkable rim cost extra so paths and heat prefer open ground.
    pub fn make_move_costs(&self, grid: &TileGrid, only_usable: bool) -> FnvHashMap<TileId, i64> {
        let walkable: &Region = if only_usable {
            &self.inner_usable.inner_area
        } else {
            &self.area.inner_area
        };
        let mut costs = FnvHashMap::default();
        costs.reserve(walkable.len());
        for tile in walkable.iter() {
            let t = grid.tile(tile);
            let near_rim = t.orth.len() != 4
                || t.orth.iter().any(|&n| !walkable.contains(n));
            costs.insert(tile, if near_rim { 130 } else { 100 });
        }
        costs
    }

    /// Multi-source Dijkstra over the cost map. `completed` holds the
    /// sources; only tiles from `remaining` appear in the result, grouped
    /// and sorted by total travel cost.
    pub fn compute_distances(
        grid: &TileGrid,
        costs: &FnvHashMap<TileId, i64>,
        completed: &BTreeSet<TileId>,
        remaining: &BTreeSet<TileId>,
        max_cost: i64,
    ) -> BTreeMap<i64, Vec<TileId>> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let mut dist: FnvHashMap<TileId, i64> = FnvHashMap::default();
        let mut heap: BinaryHeap<Reverse<(i64, TileId)>> = BinaryHeap::new();
        for &tile in completed {
            dist.insert(tile, 0);
            heap.push(Reverse((0, tile)));
        }

        while let Some(Reverse((d, tile))) = heap.pop() {
            if dist.get(&tile).copied().unwrap_or(i64::MAX) < d {
                continue;
            }
            let t = grid.tile(tile);
            let mut relax = |n: TileId, step_scale: i64| {
                let Some(&base) = costs.get(&n) else {
                    return;
                };
                let nd = d + base * step_scale / 100;
                if max_cost >= 0 && nd > max_cost {
                    return;
                }
                if nd < dist.get(&n).copied().unwrap_or(i64::MAX) {
                    dist.insert(n, nd);
                    heap.push(Reverse((nd, n)));
                }
            };
            for &n in &t.orth {
                relax(n, 100);
            }
            for &n in &t.diag {
                relax(n, 141);
            }
        }

        let mut result: BTreeMap<i64, Vec<TileId>> = BTreeMap::new();
        for (&tile, &d) in &dist {
            if remaining.contains(&tile) {
                result.entry(d).or_default().push(tile);
            }
        }
        for tiles in result.values_mut() {
            tiles.sort();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pos::Pos;

    #[test]
    fn level_map_moves_between_buckets() {
        let mut map: LevelMap<NodeLevel> = LevelMap::default();
        let tile = TileId(5);
        map.add(tile, NodeLevel::InnerPoints);
        assert_eq!(map.level_of(tile), Some(NodeLevel::InnerPoints));
        map.add(tile, NodeLevel::Towns);
        assert_eq!(map.level_of(tile), Some(NodeLevel::Towns));
        assert!(map.region(NodeLevel::InnerPoints).is_empty());
        assert_eq!(map.region(NodeLevel::Towns).len(), 1);
        assert_eq!(map.all.len(), 1);

        map.add_if_not_exist(tile, NodeLevel::Exits);
        assert_eq!(map.level_of(tile), Some(NodeLevel::Towns));

        map.erase(tile);
        assert!(map.all.is_empty());
        assert_eq!(map.level_of(tile), None);
    }

    #[test]
    fn road_type_ordering() {
        assert!(RoadType::Cobblestone > RoadType::Gravel);
        assert!(RoadType::Gravel > RoadType::Dirt);
        assert!(RoadType::Dirt > RoadType::Pothole);
        assert!(RoadType::Pothole > RoadType::Trail);
        assert_eq!(
            RoadType::Dirt.max(RoadType::Cobblestone),
            RoadType::Cobblestone
        );
    }

    #[test]
    fn distances_prefer_cheap_ground() {
        let grid = TileGrid::new(7, 7, 1);
        let all = grid.all_region();

        let mut costs = FnvHashMap::default();
        for tile in all.iter() {
            costs.insert(tile, 100i64);
        }
        let source = grid.find(Pos::new(0, 0, 0)).unwrap();
        let completed: BTreeSet<TileId> = [source].into_iter().collect();
        let remaining: BTreeSet<TileId> = all.iter().filter(|&t| t != source).collect();

        let by_distance = TileZone::compute_distances(&grid, &costs, &completed, &remaining, -1);
        // Orthogonal step costs 100, diagonal 141.
        let diag = grid.find(Pos::new(1, 1, 0)).unwrap();
        let orth = grid.find(Pos::new(1, 0, 0)).unwrap();
        assert!(by_distance[&100].contains(&orth));
        assert!(by_distance[&141].contains(&diag));

        // Cutoff trims faraway tiles.
        let capped = TileZone::compute_distances(&grid, &costs, &completed, &remaining, 200);
        let total: usize = capped.values().map(|v| v.len()).sum();
        assert!(total < remaining.len());
        assert!(capped.keys().all(|&d| d <= 200));
    }
}
