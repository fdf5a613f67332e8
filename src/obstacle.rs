//! Obstacle filling: tile the remaining must-block regions with obstacle
//! sprites whose blocking masks fit exactly into the wanted pattern.

use crate::database::{GameDatabase, PlanarMask};
use crate::grid::TileGrid;
use crate::output::{FhObstacle, GeneratedMap, ObjectCommon};
use crate::pos::Pos;
use crate::region::Region;
use crate::rng::RandomSource;
use crate::zone::TileZone;

/// Obstacles bucketed by their exact blocking mask, largest masks first.
pub struct ObstacleIndex {
    buckets: Vec<ObstacleBucket>,
}

struct ObstacleBucket {
    mask: PlanarMask,
    area: usize,
    /// Obstacle catalog indices sharing this mask.
    objects: Vec<usize>,
}

/// Cell states of the sweep mask.
const CELL_CLEAR: u8 = 0;
const CELL_REQUIRED: u8 = 1;
const CELL_TENTATIVE: u8 = 2;

/// Window size probed at each sweep position.
const LOOKUP_WIDTH: usize = 8;
const LOOKUP_HEIGHT: usize = 6;

impl ObstacleIndex {
    pub fn new(db: &GameDatabase) -> Self {
        let mut buckets: Vec<ObstacleBucket> = Vec::new();
        for (index, obstacle) in db.obstacles.records().iter().enumerate() {
            let mask = &obstacle.mask;
            if mask.width == 0 || mask.height == 0 {
                continue;
            }
            match buckets.iter_mut().find(|b| b.mask == *mask) {
                Some(bucket) => bucket.objects.push(index),
                None => buckets.push(ObstacleBucket {
                    mask: mask.clone(),
                    area: mask.area(),
                    objects: vec![index],
                }),
            }
        }
        buckets.sort_by(|a, b| b.area.cmp(&a.area));
        ObstacleIndex { buckets }
    }

    /// True when the lookup window at the offset holds nothing to block.
    fn window_is_empty(mask: &SweepMask, x: usize, y: usize) -> bool {
        for wy in 0..LOOKUP_HEIGHT {
            if y + wy >= mask.height {
                break;
            }
            for wx in 0..LOOKUP_WIDTH {
                if x + wx >= mask.width {
                    break;
                }
                if mask.cells[(y + wy) * mask.width + x + wx] != CELL_CLEAR {
                    return false;
                }
            }
        }
        true
    }

    /// Buckets whose mask fits at the offset: no obstacle bit may cover a
    /// clear cell, and at least one required bit must be consumed.
    fn find(&self, mask: &SweepMask, x: usize, y: usize) -> Vec<&ObstacleBucket> {
        let fits = |candidate: &PlanarMask| -> bool {
            let w = mask.width - x;
            let h = mask.height - y;
            let wmin = candidate.width.min(w);
            let hmin = candidate.height.min(h);
            let mut overlap = 0usize;
            for my in 0..hmin {
                for mx in 0..wmin {
                    let cell = mask.cells[(y + my) * mask.width + x + mx];
                    let obstacle_bit = candidate.rows[my][mx] == 1;
                    if obstacle_bit {
                        overlap += 1;
                        if cell == CELL_CLEAR {
                            return false;
                        }
                    } else if cell == CELL_REQUIRED {
                        return false;
                    }
                }
            }
            overlap > 0
        };

        self.buckets.iter().filter(|b| fits(&b.mask)).collect()
    }
}

struct SweepMask {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

/// Fill all block regions of all zones with obstacle sprites.
pub struct ObstacleHelper<'a> {
    pub db: &'a GameDatabase,
    pub grid: &'a TileGrid,
}

impl<'a> ObstacleHelper<'a> {
    pub fn place_obstacles(
        &self,
        zones: &mut [TileZone],
        extra_required: &Region,
        rng: &mut dyn RandomSource,
        map: &mut GeneratedMap,
    ) {
        let index = ObstacleIndex::new(self.db);
        let width = self.grid.width as usize;
        let height = self.grid.height as usize;

        for z in 0..self.grid.depth {
            let mut mask = SweepMask {
                width,
                height,
                cells: vec![CELL_CLEAR; width * height],
            };
            let cell_of = |pos: Pos| (pos.y as usize) * width + pos.x as usize;
            for zone in zones.iter() {
                for tile in zone.need_obstacles.iter() {
                    let pos = self.grid.pos(tile);
                    if pos.z == z {
                        mask.cells[cell_of(pos)] = CELL_REQUIRED;
                    }
                }
                for tile in zone.need_obstacles_tentative.iter() {
                    let pos = self.grid.pos(tile);
                    if pos.z == z {
                        mask.cells[cell_of(pos)] = CELL_TENTATIVE;
                    }
                }
            }
            for tile in extra_required.iter() {
                let pos = self.grid.pos(tile);
                if pos.z == z {
                    mask.cells[cell_of(pos)] = CELL_REQUIRED;
                }
            }

            self.sweep_plane(&index, &mut mask, z, zones, rng, map);
        }
    }

    fn sweep_plane(
        &self,
        index: &ObstacleIndex,
        mask: &mut SweepMask,
        z: i32,
        zones: &mut [TileZone],
        rng: &mut dyn RandomSource,
        map: &mut GeneratedMap,
    ) {
        for y in 0..mask.height {
            let mut prev: Option<usize> = None;
            for x in 0..mask.width {
                if ObstacleIndex::window_is_empty(mask, x, y) {
                    continue;
                }
                let buckets = index.find(mask, x, y);
                if buckets.is_empty() {
                    continue;
                }

                // Anchor at the lower-right of the sprite mask; filter by
                // the terrain of the zone owning that tile and avoid an
                // immediate repeat of the previous pick.
                let mut suitable: Vec<usize> = Vec::new();
                for bucket in &buckets {
                    for &obstacle_index in &bucket.objects {
                        if prev == Some(obstacle_index) {
                            continue;
                        }
                        let obstacle = self.db.obstacles.get(obstacle_index);
                        let anchor = Pos::new(
                            (x + obstacle.mask.width - 1) as i32,
                            (y + obstacle.mask.height - 1) as i32,
                            z,
                        );
                        let Some(anchor_tile) = self.grid.find(anchor) else {
                            continue;
                        };
                        let Some(zone_index) = self.grid.zone_of(anchor_tile) else {
                            continue;
                        };
                        let terrain = &zones[zone_index as usize].terrain;
                        if obstacle.terrain_viable(terrain) {
                            suitable.push(obstacle_index);
                        }
                    }
                }
                if suitable.is_empty() {
                    continue;
                }

                let obstacle_index = suitable[rng.gen(suitable.len() as u64 - 1) as usize];
                prev = Some(obstacle_index);
                let obstacle = self.db.obstacles.get(obstacle_index);

                for my in 0..obstacle.mask.height {
                    for mx in 0..obstacle.mask.width {
                        if obstacle.mask.rows[my][mx] == 0 {
                            continue;
                        }
                        let px = x + mx;
                        let py = y + my;
                        if px >= mask.width || py >= mask.height {
                            continue;
                        }
                        if mask.cells[py * mask.width + px] == CELL_REQUIRED {
                            mask.cells[py * mask.width + px] = CELL_TENTATIVE;
                        }
                        let pos = Pos::new(px as i32, py as i32, z);
                        if let Some(tile) = self.grid.find(pos) {
                            for zone in zones.iter_mut() {
                                zone.need_obstacles.erase(tile);
                                zone.need_obstacles_tentative.erase(tile);
                            }
                        }
                    }
                }

                let anchor = Pos::new(
                    (x + obstacle.mask.width - 1) as i32,
                    (y + obstacle.mask.height - 1) as i32,
                    z,
                );
                map.register_object_def(&obstacle.id);
                map.objects.obstacles.push(FhObstacle {
                    common: ObjectCommon {
                        pos: anchor,
                        ..Default::default()
                    },
                    obstacle: obstacle.id.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Catalog, ObstacleRecord};
    use crate::rng::ChaChaSource;
    use crate::template::ZoneSettings;

    fn obstacle(id: &str, rows: &[&[u8]]) -> ObstacleRecord {
        ObstacleRecord {
            id: id.to_string(),
            legacy_id: None,
            mask: PlanarMask {
                width: rows[0].len(),
                height: rows.len(),
                rows: rows.iter().map(|r| r.to_vec()).collect(),
            },
            terrains: vec![],
        }
    }

    fn setup(size: i32) -> (TileGrid, Vec<TileZone>, GameDatabase) {
        let grid = TileGrid::new(size, size, 1);
        let start = grid.find(Pos::new(size / 2, size / 2, 0)).unwrap();
        let mut zone = TileZone::new(0, "z".to_string(), ZoneSettings::default(), start);
        zone.terrain = "grass".to_string();
        zone.area.inner_area = grid.all_region();
        let mut db = GameDatabase::default();
        db.obstacles = Catalog::from_records(vec![
            obstacle("rock1", &[&[1]]),
            obstacle("rock2", &[&[1]]),
            obstacle("trees2x2", &[&[1, 1], &[1, 1]]),
        ]);
        (grid, vec![zone], db)
    }

    #[test]
    fn fills_required_cells() {
        let (mut grid, mut zones, db) = setup(10);
        for i in 0..grid.len() {
            grid.set_zone(crate::grid::TileId(i as u32), Some(0));
        }
        // A 2x2 block plus one stray tile must all end up blocked.
        for (x, y) in [(3, 3), (4, 3), (3, 4), (4, 4), (7, 7)] {
            let tile = grid.find(Pos::new(x, y, 0)).unwrap();
            zones[0].need_obstacles.insert(tile);
        }
        let mut rng = ChaChaSource::new(5);
        let mut map = GeneratedMap::new(crate::output::GameVersion::Sod, 5, 10, 10, 1);
        let helper = ObstacleHelper {
            db: &db,
            grid: &grid,
        };
        helper.place_obstacles(&mut zones, &Region::new(), &mut rng, &mut map);

        assert!(zones[0].need_obstacles.is_empty());
        assert!(!map.objects.obstacles.is_empty());
    }

    #[test]
    fn respects_terrain_filter() {
        let (mut grid, mut zones, _db) = setup(10);
        for i in 0..grid.len() {
            grid.set_zone(crate::grid::TileId(i as u32), Some(0));
        }
        let mut db = GameDatabase::default();
        let mut lava_only = obstacle("vent", &[&[1]]);
        lava_only.terrains = vec!["lava".to_string()];
        db.obstacles = Catalog::from_records(vec![lava_only]);

        let tile = grid.find(Pos::new(5, 5, 0)).unwrap();
        zones[0].need_obstacles.insert(tile);

        let mut rng = ChaChaSource::new(5);
        let mut map = GeneratedMap::new(crate::output::GameVersion::Sod, 5, 10, 10, 1);
        let helper = ObstacleHelper {
            db: &db,
            grid: &grid,
        };
        helper.place_obstacles(&mut zones, &Region::new(), &mut rng, &mut map);

        // The only obstacle is terrain-incompatible, nothing gets placed.
        assert!(map.objects.obstacles.is_empty());
        assert!(!zones[0].need_obstacles.is_empty());
    }
}
