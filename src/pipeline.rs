//! Stage orchestration: executes the generation stages in a fixed order,
//! with per-stage timing and an optional stop-after switch for debugging.

use crate::database::GameDatabase;
use crate::distributor::{DistributionResult, ZoneObjectDistributor};
use crate::error::{FailureKind, GenerationError, TemplateError};
use crate::grid::{TileGrid, TileId};
use crate::guard::MapGuard;
use crate::objects::generator::ObjectGenerator;
use crate::obstacle::ObstacleHelper;
use crate::output::{FhHero, FhRoad, FhTown, GeneratedMap, ObjectCommon};
use crate::pos::{rotate_chebyshev, Pos};
use crate::region::Region;
use crate::rng::RandomSource;
use crate::roads;
use crate::segments;
use crate::template::Template;
use crate::zone::{NodeLevel, RoadType, TileZone};
use log::{info, warn};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

/// Exclave repair passes allowed before the layout counts as infeasible.
const EXCLAVE_FIX_LIMIT: usize = 10;

/// Town footprint: 5 wide, 3 tall, gate at the bottom-center.
const TOWN_WIDTH: i32 = 5;
const TOWN_HEIGHT: i32 = 3;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Stage {
    ZoneCenterPlacement,
    ZoneTilesInitial,
    ZoneTilesExpand,
    ZoneTilesRefinement,
    TownsPlacement,
    Borders,
    Segmentation,
    RoadsPlacement,
    HeatMap,
    Objects,
    Obstacles,
    Guards,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::ZoneCenterPlacement,
        Stage::ZoneTilesInitial,
        Stage::ZoneTilesExpand,
        Stage::ZoneTilesRefinement,
        Stage::TownsPlacement,
        Stage::Borders,
        Stage::Segmentation,
        Stage::RoadsPlacement,
        Stage::HeatMap,
        Stage::Objects,
        Stage::Obstacles,
        Stage::Guards,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::ZoneCenterPlacement => "ZoneCenterPlacement",
            Stage::ZoneTilesInitial => "ZoneTilesInitial",
            Stage::ZoneTilesExpand => "ZoneTilesExpand",
            Stage::ZoneTilesRefinement => "ZoneTilesRefinement",
            Stage::TownsPlacement => "TownsPlacement",
            Stage::Borders => "Borders",
            Stage::Segmentation => "Segmentation",
            Stage::RoadsPlacement => "RoadsPlacement",
            Stage::HeatMap => "HeatMap",
            Stage::Objects => "Objects",
            Stage::Obstacles => "Obstacles",
            Stage::Guards => "Guards",
        }
    }

    pub fn from_str(name: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.as_str() == name)
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Validate the template and run the full pipeline.
pub fn generate(
    template: &Template,
    db: &GameDatabase,
    rng: &mut dyn RandomSource,
    stop_after: Option<Stage>,
) -> Result<GeneratedMap, GenerateError> {
    template.validate(db)?;
    let mut processor = TemplateProcessor {
        db,
        template,
        rng,
        grid: TileGrid::new(template.width, template.height, template.depth),
        zones: Vec::new(),
        layout: None,
        guards: Vec::new(),
        need_block: Region::new(),
        quest_counter: 0,
        map: GeneratedMap::new(
            template.version,
            0,
            template.width,
            template.height,
            template.depth,
        ),
    };
    Ok(processor.run(stop_after)?)
}

struct TemplateProcessor<'a> {
    db: &'a GameDatabase,
    template: &'a Template,
    rng: &'a mut dyn RandomSource,
    grid: TileGrid,
    zones: Vec<TileZone>,
    layout: Option<segments::ZoneLayoutState>,
    guards: Vec<MapGuard>,
    need_block: Region,
    quest_counter: u32,
    map: GeneratedMap,
}

impl<'a> TemplateProcessor<'a> {
    fn run(&mut self, stop_after: Option<Stage>) -> Result<GeneratedMap, GenerationError> {
        self.map.seed = self.rng.seed();
        self.init_zones()?;

        for stage in Stage::ALL {
            let started = Instant::now();
            info!("Start stage: {}", stage.as_str());
            self.run_stage(stage)?;
            info!(
                "End stage: {} ({} us.)",
                stage.as_str(),
                started.elapsed().as_micros()
            );
            if stop_after == Some(stage) {
                info!("stopping further generation, as 'stopAfter' was provided");
                break;
            }
        }

        self.finalize_map();
        Ok(std::mem::replace(
            &mut self.map,
            GeneratedMap::new(self.template.version, 0, 1, 1, 1),
        ))
    }

    fn run_stage(&mut self, stage: Stage) -> Result<(), GenerationError> {
        match stage {
            Stage::ZoneCenterPlacement => self.run_zone_center_placement(),
            Stage::ZoneTilesInitial => {
                self.layout = Some(segments::make_initial_zones(&self.grid, &mut self.zones)?);
                Ok(())
            }
            Stage::ZoneTilesExpand => {
                let layout = self.layout.as_mut().expect("initial stage ran");
                segments::refine_zone_areas(&self.grid, &self.zones, layout)
            }
            Stage::ZoneTilesRefinement => self.run_zone_tiles_refinement(),
            Stage::TownsPlacement => self.run_towns_placement(),
            Stage::Borders => {
                let mut guards = segments::make_borders(
                    &self.grid,
                    &mut self.zones,
                    &self.template.connections,
                    self.template.user.default_road,
                )?;
                self.guards.append(&mut guards);
                Ok(())
            }
            Stage::Segmentation => {
                for zone in &mut self.zones {
                    segments::make_segments(&mut self.grid, zone)?;
                }
                Ok(())
            }
            Stage::RoadsPlacement => {
                for zone in &mut self.zones {
                    roads::place_zone_roads(&self.grid, zone, self.template.user.default_road)?;
                    segments::refine_segments(&mut self.grid, zone);
                }
                Ok(())
            }
            Stage::HeatMap => {
                for zone in &mut self.zones {
                    segments::make_heat_map(&self.grid, zone);
                }
                Ok(())
            }
            Stage::Objects => self.run_objects(),
            Stage::Obstacles => {
                let helper = ObstacleHelper {
                    db: self.db,
                    grid: &self.grid,
                };
                helper.place_obstacles(
                    &mut self.zones,
                    &self.need_block,
                    self.rng,
                    &mut self.map,
                );
                Ok(())
            }
            Stage::Guards => self.run_guards(),
        }
    }

    /// Draw start tiles and relative sizes from their dispersion windows,
    /// before any stage runs.
    fn init_zones(&mut self) -> Result<(), GenerationError> {
        const STAGE: &str = "ZoneCenterPlacement";
        for (index, (id, settings)) in self.template.zones.iter().enumerate() {
            let x = self.rng.gen_dispersed(
                settings.center_avg.x as i64,
                settings.center_dispersion.x.max(0) as u64,
            );
            let y = self.rng.gen_dispersed(
                settings.center_avg.y as i64,
                settings.center_dispersion.y.max(0) as u64,
            );
            let start = self
                .grid
                .find_clamped(Pos::new(x as i32, y as i32, settings.center_avg.z));
            let mut zone = TileZone::new(index, id.clone(), settings.clone(), start);
            zone.relative_area = self.rng.gen_dispersed(
                settings.relative_size_avg,
                settings.relative_size_dispersion,
            );
            if zone.relative_area <= 0 {
                return Err(GenerationError::in_zone(
                    STAGE,
                    id.clone(),
                    FailureKind::InfeasibleLayout(
                        "dispersed relative size is non-positive".to_string(),
                    ),
                ));
            }
            self.zones.push(zone);
        }
        Ok(())
    }

    /// Optional whole-map flip and rotation of the zone start tiles.
    fn run_zone_center_placement(&mut self) -> Result<(), GenerationError> {
        let w = self.grid.width;
        let h = self.grid.height;
        if self.template.allow_flip {
            let vertical = self.rng.gen_small(1) == 1;
            let horizontal = self.rng.gen_small(1) == 1;
            for zone in &mut self.zones {
                let mut pos = self.grid.pos(zone.start_tile);
                if horizontal {
                    pos.x = w - pos.x - 1;
                }
                if vertical {
                    pos.y = h - pos.y - 1;
                }
                zone.start_tile = self.grid.find_clamped(pos);
            }
        }
        if self.template.rotation_degree_dispersion > 0 {
            let degree = self
                .rng
                .gen_dispersed(0, self.template.rotation_degree_dispersion)
                as i32;
            info!("rotating zone centers by {degree} degrees");
            for zone in &mut self.zones {
                let rotated = rotate_chebyshev(self.grid.pos(zone.start_tile), degree, w, h);
                zone.start_tile = self.grid.find_clamped(rotated);
            }
        }
        Ok(())
    }

    fn run_zone_tiles_refinement(&mut self) -> Result<(), GenerationError> {
        const STAGE: &str = "ZoneTilesRefinement";
        let layout = self.layout.take().expect("expansion stage ran");
        segments::commit_zone_areas(&mut self.grid, &mut self.zones, layout);

        let mut fixed = false;
        for i in 0..=EXCLAVE_FIX_LIMIT {
            if self.grid.fix_exclaves() {
                info!("exclaves fixed on [{i}] iteration");
                fixed = true;
                break;
            }
        }
        if !fixed {
            return Err(GenerationError::new(
                STAGE,
                FailureKind::InfeasibleLayout(format!(
                    "failed to fix all exclaves after {EXCLAVE_FIX_LIMIT} iterations"
                )),
            ));
        }
        segments::read_zones_from_grid(&self.grid, &mut self.zones);
        Ok(())
    }

    /// Stamp the main towns: reserve footprints, register the gates as
    /// `Towns` road nodes, emit town (and starting hero) objects.
    fn run_towns_placement(&mut self) -> Result<(), GenerationError> {
        const STAGE: &str = "TownsPlacement";
        let default_road = self.template.user.default_road.unwrap_or(RoadType::Dirt);
        for zone_index in 0..self.zones.len() {
            let town_count = self.zones[zone_index].settings.towns.len();
            if town_count == 0 {
                continue;
            }
            let anchors: Vec<TileId> = if town_count == 1 {
                vec![self.zones[zone_index].centroid]
            } else {
                let area = self.zones[zone_index].area.inner_area.clone();
                let parts =
                    crate::segmentation::split_by_k(&self.grid, &area, town_count, 100)
                        .map_err(|e| {
                            GenerationError::in_zone(
                                STAGE,
                                self.zones[zone_index].id.clone(),
                                FailureKind::InfeasibleLayout(e.to_string()),
                            )
                        })?;
                parts
                    .iter()
                    .filter_map(|p| p.make_centroid(&self.grid, true))
                    .collect()
            };

            for (town_index, anchor) in anchors.into_iter().enumerate() {
                if town_index >= town_count {
                    break;
                }
                let town_settings = self.zones[zone_index].settings.towns[town_index].clone();
                let Some(footprint) = self.find_town_footprint(zone_index, anchor) else {
                    return Err(GenerationError::in_zone(
                        STAGE,
                        self.zones[zone_index].id.clone(),
                        FailureKind::PlacementFailure(
                            "no room for a town footprint".to_string(),
                        ),
                    ));
                };

                let gate = footprint.gate;
                let zone = &mut self.zones[zone_index];
                zone.unpassable.insert_region(&footprint.blocked);
                let borders = footprint.blocked.make_outer_edge(&self.grid, true);
                zone.towns_borders
                    .insert_region(&borders.intersect_with(&zone.area.inner_area));
                zone.nodes.add(gate, NodeLevel::Towns);
                zone.node_road_types.insert(gate, default_road);

                let faction = if town_settings.use_zone_faction {
                    zone.main_town_faction.clone()
                } else {
                    town_settings
                        .faction
                        .clone()
                        .unwrap_or_else(|| zone.main_town_faction.clone())
                };
                let player = if town_settings.player_controlled {
                    zone.player.clone()
                } else {
                    None
                };
                self.quest_counter += 1;
                self.map.objects.towns.push(FhTown {
                    common: ObjectCommon {
                        pos: self.grid.pos(gate),
                        ..Default::default()
                    },
                    player: player.clone(),
                    faction,
                    is_main: town_settings.is_main,
                    has_fort: town_settings.has_fort,
                    quest_identifier: self.quest_counter,
                });

                // A player-controlled main town spawns the starting hero
                // just below the gate.
                if town_settings.player_controlled && town_settings.is_main {
                    if let Some(player_id) = player {
                        let hero = self
                            .template
                            .user
                            .players
                            .get(&player_id)
                            .and_then(|p| p.starting_hero.clone())
                            .or_else(|| {
                                let faction = &self.zones[zone_index].main_town_faction;
                                self.db
                                    .heroes
                                    .records()
                                    .iter()
                                    .find(|h| &h.faction == faction)
                                    .map(|h| h.id.clone())
                            });
                        if let Some(hero_id) = hero {
                            let below = self
                                .grid
                                .neighbor_by_offset(gate, 0, 1)
                                .unwrap_or(gate);
                            self.quest_counter += 1;
                            self.map.objects.heroes.push(FhHero {
                                common: ObjectCommon {
                                    pos: self.grid.pos(below),
                                    ..Default::default()
                                },
                                player: Some(player_id),
                                hero: hero_id,
                                is_main: true,
                                quest_identifier: self.quest_counter,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Try the anchor and its widening neighborhood until the whole 5x3
    /// footprint (plus the free tile below the gate) fits into the zone.
    fn find_town_footprint(&self, zone_index: usize, anchor: TileId) -> Option<TownFootprint> {
        let zone_area = &self.zones[zone_index].area.inner_area;
        let mut candidates = vec![anchor];
        candidates.extend(self.grid.tile(anchor).all.iter().copied());
        for radius in 2i32..=3 {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs() != radius && dy.abs() != radius {
                        continue;
                    }
                    if let Some(tile) = self.grid.neighbor_by_offset(anchor, dx, dy) {
                        candidates.push(tile);
                    }
                }
            }
        }

        for candidate in candidates {
            let mut blocked = Region::new();
            let mut ok = true;
            for dy in -(TOWN_HEIGHT - 1)..=0 {
                for dx in -(TOWN_WIDTH - 1)..=0 {
                    match self.grid.neighbor_by_offset(candidate, dx, dy) {
                        Some(tile) if zone_area.contains(tile) => blocked.insert(tile),
                        _ => {
                            ok = false;
                            break;
                        }
                    }
                }
                if !ok {
                    break;
                }
            }
            if !ok {
                continue;
            }
            let gate = match self.grid.neighbor_by_offset(candidate, -(TOWN_WIDTH / 2), 0) {
                Some(tile) => tile,
                None => continue,
            };
            // The gate needs a walkable tile right below it.
            match self.grid.neighbor_by_offset(gate, 0, 1) {
                Some(below) if zone_area.contains(below) && !blocked.contains(below) => {}
                _ => continue,
            }
            return Some(TownFootprint { blocked, gate });
        }
        None
    }

    fn run_objects(&mut self) -> Result<(), GenerationError> {
        const STAGE: &str = "Objects";
        let difficulty = &self.template.user.difficulty;
        let army_percent = self
            .rng
            .gen_min_max(
                difficulty.min_army_percent.max(0) as u64,
                difficulty.max_army_percent.max(0) as u64,
            ) as i64;
        let gold_percent = self
            .rng
            .gen_min_max(
                difficulty.min_gold_percent.max(0) as u64,
                difficulty.max_gold_percent.max(0) as u64,
            ) as i64;
        info!("difficulty rolls: army {army_percent}%, gold {gold_percent}%");

        let generator = ObjectGenerator {
            db: self.db,
            template: self.template,
            army_percent,
            gold_percent,
        };

        for zone_index in 0..self.zones.len() {
            let zone_id = self.zones[zone_index].id.clone();
            if self.zones[zone_index].settings.score_targets.is_empty() {
                continue;
            }
            let generated = {
                let zone = &self.zones[zone_index];
                generator
                    .generate(
                        &zone.id,
                        &zone.settings,
                        &zone.rewards_faction,
                        &zone.dwell_faction,
                        &zone.terrain,
                        self.rng,
                    )
                    .map_err(|kind| {
                        GenerationError::in_zone(STAGE, zone_id.clone(), kind)
                    })?
            };

            let distributor = ZoneObjectDistributor {
                grid: &self.grid,
                map_width: self.grid.width,
                map_height: self.grid.height,
            };
            let zone = &self.zones[zone_index];
            let mut distribution = DistributionResult::init(&self.grid, zone)
                .map_err(|kind| GenerationError::in_zone(STAGE, zone_id.clone(), kind))?;
            distributor
                .make_initial_distribution(&mut distribution, zone, generated)
                .map_err(|kind| GenerationError::in_zone(STAGE, zone_id.clone(), kind))?;
            distributor
                .do_place_distribution(&mut distribution, zone, &mut self.map)
                .map_err(|kind| GenerationError::in_zone(STAGE, zone_id.clone(), kind))?;

            self.need_block.insert_region(&distribution.need_block);
            self.guards.append(&mut distribution.guards);
            info!(
                "zone [{zone_id}]: placed {} objects",
                distribution.placed_ids.len()
            );
        }
        Ok(())
    }

    /// Resolve mirror references, apply guard difficulty scaling, and stamp
    /// the guard stacks onto the map as monsters.
    fn run_guards(&mut self) -> Result<(), GenerationError> {
        const STAGE: &str = "Guards";
        let difficulty = &self.template.user.difficulty;
        let guard_percent = self.rng.gen_min_max(
            difficulty.min_guards_percent.max(0) as u64,
            difficulty.max_guards_percent.max(0) as u64,
        ) as i64;

        let mut zone_percents: Vec<i64> = Vec::with_capacity(self.zones.len());
        for zone in &self.zones {
            zone_percents.push(self.rng.gen_dispersed(
                zone.settings.zone_guard_percent,
                zone.settings.zone_guard_dispersion,
            ));
        }

        // First pass: scale direct guard values.
        let mut resolved: BTreeMap<String, i64> = BTreeMap::new();
        for guard in &mut self.guards {
            if !guard.mirror_from_id.is_empty() {
                continue;
            }
            let zone_index = guard
                .zone_index
                .or_else(|| guard.pos.and_then(|p| self.grid.zone_of(p).map(|z| z as usize)));
            let zone_percent = zone_index
                .and_then(|i| zone_percents.get(i).copied())
                .unwrap_or(100);
            guard.value = guard.value * zone_percent / 100 * guard_percent / 100;
            if !guard.id.is_empty() {
                resolved.insert(guard.id.clone(), guard.value);
            }
        }
        // Second pass: mirrors copy the referent's resolved value.
        for guard in &mut self.guards {
            if guard.mirror_from_id.is_empty() {
                continue;
            }
            match resolved.get(&guard.mirror_from_id) {
                Some(&value) => guard.value = value,
                None => {
                    return Err(GenerationError::new(
                        STAGE,
                        FailureKind::Internal(format!(
                            "guard '{}' mirrors unknown guard '{}'",
                            guard.id, guard.mirror_from_id
                        )),
                    ))
                }
            }
        }

        let guards = std::mem::take(&mut self.guards);
        for guard in guards {
            let Some(pos) = guard.pos else {
                continue;
            };
            if guard.value <= 0 {
                continue;
            }
            let zone_index = guard
                .zone_index
                .or_else(|| self.grid.zone_of(pos).map(|z| z as usize));
            let Some(zone_index) = zone_index else {
                warn!("guard '{}' sits on an unzoned tile, skipped", guard.id);
                continue;
            };
            let faction = &self.zones[zone_index].rewards_faction;
            let units = self.db.faction_units(faction);
            if units.is_empty() {
                warn!("faction '{faction}' has no units, guard '{}' skipped", guard.id);
                continue;
            }
            // The strongest unit still affordable; else a single weakest.
            let unit = units
                .iter()
                .filter(|u| u.value > 0 && u.value <= guard.value)
                .max_by_key(|u| (u.value, &u.id))
                .copied()
                .unwrap_or_else(|| {
                    units
                        .iter()
                        .min_by_key(|u| (u.value, &u.id))
                        .copied()
                        .expect("non-empty unit list")
                });
            let count = (guard.value / unit.value.max(1)).max(1);
            self.quest_counter += 1;
            self.map.objects.monsters.push(crate::output::FhMonster {
                common: ObjectCommon {
                    pos: self.grid.pos(pos),
                    guard: guard.value,
                    ..Default::default()
                },
                unit: unit.id.clone(),
                count,
                aggression_min: 1,
                aggression_max: 10,
                join_only_for_money: guard.joinable,
                join_percent: 100,
                quest_identifier: self.quest_counter,
            });
        }
        Ok(())
    }

    /// Paint zone terrains and roads into the tile layer and emit the zone
    /// regions plus the global config.
    fn finalize_map(&mut self) {
        for zone in &self.zones {
            let terrain_index = self.map.terrain_index(&zone.terrain);
            let mut tiles = Vec::with_capacity(zone.area.inner_area.len());
            for tile in zone.area.inner_area.iter() {
                let pos = self.grid.pos(tile);
                self.map.tile_mut(pos).terrain = terrain_index;
                tiles.push(pos);
            }
            self.map.zones.push(crate::output::MapZone {
                id: zone.id.clone(),
                terrain: zone.terrain.clone(),
                tiles,
            });
        }

        for zone in &self.zones {
            let mut by_type: BTreeMap<RoadType, Vec<Pos>> = BTreeMap::new();
            for (road_type, region) in zone.roads.levels() {
                for tile in region.iter() {
                    let pos = self.grid.pos(tile);
                    let info = self.map.tile_mut(pos);
                    info.road = Some(info.road.map_or(road_type, |r| r.max(road_type)));
                    by_type.entry(road_type).or_default().push(pos);
                }
            }
            for (road_type, tiles) in by_type {
                if !tiles.is_empty() {
                    self.map.roads.push(FhRoad { road_type, tiles });
                }
            }
        }

        self.map.config.allow_special_weeks = self.template.user.allow_special_weeks;
        self.map.config.round_limit = self.template.user.round_limit;
    }
}

struct TownFootprint {
    blocked: Region,
    gate: TileId,
}
