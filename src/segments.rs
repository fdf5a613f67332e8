//! Zone layout: initial K-means assignment with area refinement, inter-zone
//! borders and connections, per-zone segmentation with road-node detection,
//! and the heat map.

use crate::error::{FailureKind, GenerationError};
use crate::grid::{TileGrid, TileId};
use crate::guard::MapGuard;
use crate::region::Region;
use crate::region_edge::RegionWithEdge;
use crate::segmentation::{
    self, area_from_radius, radius_promille, KMeansItem, KMeansSettings,
};
use crate::template::Connection;
use crate::zone::{NodeLevel, RoadType, TileZone};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Obstacle belt depth (in tiles) grown inward from zone borders.
const BORDER_OBSTACLE_RADIUS: i64 = 2;

/// Refinement passes allowed for zone area balancing.
const AREA_REFINE_ATTEMPTS: usize = 10;

/// K-means state carried between the initial-assignment and the expansion
/// stages.
pub struct ZoneLayoutState {
    settings: KMeansSettings,
    pub regions: Vec<Region>,
}

fn layout_error(stage: &'static str, err: segmentation::KMeansError) -> GenerationError {
    GenerationError::new(stage, FailureKind::InfeasibleLayout(err.to_string()))
}

/// Compute absolute zone areas and run the first K-means assignment. Each
/// cluster is anchored at the zone's start tile with twice the area hint in
/// extra mass so clusters do not drift away from their declared centers.
pub fn make_initial_zones(
    grid: &TileGrid,
    zones: &mut [TileZone],
) -> Result<ZoneLayoutState, GenerationError> {
    const STAGE: &str = "ZoneTilesInitial";
    let map_area = grid.len() as i64;
    let total_relative: i64 = zones.iter().map(|z| z.relative_area).sum();
    if total_relative <= 0 {
        return Err(GenerationError::new(
            STAGE,
            FailureKind::InfeasibleLayout("total relative area is zero".to_string()),
        ));
    }

    let mut settings = KMeansSettings::default();
    for zone in zones.iter_mut() {
        zone.absolute_area = zone.relative_area * map_area / total_relative;
        zone.absolute_radius = crate::pos::int_sqrt(zone.absolute_area * 1_000_000);
        info!(
            "zone [{}] area={}, radius={:.3}, startTile={}, terrain={}",
            zone.id,
            zone.absolute_area,
            zone.absolute_radius as f64 / 1000.0,
            grid.pos(zone.start_tile),
            zone.terrain
        );
        let mut item = KMeansItem::new(zone.start_tile, zone.absolute_area.max(1));
        item.extra_mass_point = Some(zone.start_tile);
        item.extra_mass_weight = zone.absolute_area.max(1) * 2;
        settings.items.push(item);
    }

    let all = grid.all_region();
    let regions = segmentation::split_by_k_ext(grid, &all, &settings, 1)
        .map_err(|e| layout_error(STAGE, e))?;

    // Re-seed each cluster at the centroid of its first assignment.
    for zone in zones.iter() {
        if let Some(centroid) = regions[zone.index].make_centroid(grid, true) {
            settings.items[zone.index].initial_centroid = centroid;
        }
    }

    Ok(ZoneLayoutState { settings, regions })
}

/// Iterate K-means with per-zone area corrections (in radius domain) until
/// every zone is within 5% and 10 tiles of its intended area.
pub fn refine_zone_areas(
    grid: &TileGrid,
    zones: &[TileZone],
    state: &mut ZoneLayoutState,
) -> Result<(), GenerationError> {
    const STAGE: &str = "ZoneTilesExpand";
    let all = grid.all_region();
    let mut done = false;
    for attempt in 0..AREA_REFINE_ATTEMPTS {
        done = true;
        for zone in zones {
            let zone_settings = &mut state.settings.items[zone.index];
            let intended_area = zone.absolute_area;
            let prev_area = zone_settings.area_hint;
            let placed_area = state.regions[zone.index].len() as i64;

            let intended_radius = radius_promille(intended_area);
            let prev_radius = radius_promille(prev_area);
            let placed_radius = radius_promille(placed_area);
            let correction_radius = 100.max(prev_radius + (intended_radius - placed_radius));
            let correction_area = area_from_radius(correction_radius);

            let diff = (placed_area - intended_area).abs();
            let diff_percent = diff * 100 / intended_area.max(1);
            zone_settings.area_hint = correction_area.max(1);
            if diff > 10 && diff_percent > 5 {
                done = false;
            }
            debug!(
                "refine #{attempt} [{}]: intended={intended_area}, prev={prev_area}, \
                 placed={placed_area}, next={correction_area}, diff={diff} ({diff_percent}%)",
                zone.id
            );
        }
        if done {
            info!("area refinement converged, no deficit left");
            break;
        }
        state.regions = segmentation::split_by_k_ext(grid, &all, &state.settings, 100)
            .map_err(|e| layout_error(STAGE, e))?;
    }
    if !done {
        return Err(GenerationError::new(
            STAGE,
            FailureKind::InfeasibleLayout(format!(
                "zone areas did not converge after {AREA_REFINE_ATTEMPTS} refinement passes"
            )),
        ));
    }
    Ok(())
}

/// Write the final assignment into the zones and the tile back-pointers.
pub fn commit_zone_areas(grid: &mut TileGrid, zones: &mut [TileZone], state: ZoneLayoutState) {
    for zone in zones.iter_mut() {
        zone.area.inner_area = state.regions[zone.index].clone();
        zone.area.make_edge_from_inner_area(grid);
        for tile in zone.area.inner_area.iter() {
            grid.set_zone(tile, Some(zone.index as u16));
        }
        info!("zone [{}] areaDeficit={}", zone.id, zone.area_deficit());
    }
    for zone in zones.iter_mut() {
        if let Some(centroid) = zone.area.inner_area.make_centroid(grid, true) {
            zone.centroid = centroid;
        }
    }
}

/// Re-read zone areas from the tile back-pointers (after exclave fixing).
pub fn read_zones_from_grid(grid: &TileGrid, zones: &mut [TileZone]) {
    let mut regions: Vec<Vec<TileId>> = vec![Vec::new(); zones.len()];
    for tile in grid.all_region().iter() {
        if let Some(zone_index) = grid.zone_of(tile) {
            regions[zone_index as usize].push(tile);
        }
    }
    for zone in zones.iter_mut() {
        zone.area.inner_area = Region::from_unsorted(std::mem::take(&mut regions[zone.index]));
        zone.area.make_edge_from_inner_area(grid);
        if let Some(centroid) = zone.area.inner_area.make_centroid(grid, true) {
            zone.centroid = centroid;
        }
    }
}

// ---------------------------------------------------------------------------

/// Orthogonal L-walk between two tiles (x first, then y). Used to carve the
/// short road strips between a connection exit and the usable area.
fn make_path_to(grid: &TileGrid, from: TileId, to: TileId) -> Vec<TileId> {
    let mut path = vec![from];
    let target = grid.pos(to);
    let mut current = from;
    while current != to {
        let pos = grid.pos(current);
        let (dx, dy) = if pos.x != target.x {
            ((target.x - pos.x).signum(), 0)
        } else {
            (0, (target.y - pos.y).signum())
        };
        match grid.neighbor_by_offset(current, dx, dy) {
            Some(next) => {
                current = next;
                path.push(next);
            }
            None => break,
        }
    }
    path
}

/// Build inter-zone borders, obstacle belts, usable areas, and realize the
/// template connections (exit nodes, border guards, reserved radii).
pub fn make_borders(
    grid: &TileGrid,
    zones: &mut [TileZone],
    connections: &BTreeMap<String, Connection>,
    default_road: Option<RoadType>,
) -> Result<Vec<MapGuard>, GenerationError> {
    const STAGE: &str = "Borders";
    let mut guards = Vec::new();

    let make_key = |a: usize, b: usize| if a <= b { (a, b) } else { (b, a) };

    let mut border_tiles: BTreeMap<(usize, usize), Region> = BTreeMap::new();
    let mut all_border_net = Region::new();
    for first in 0..zones.len() {
        for second in (first + 1)..zones.len() {
            let mut two_side = Region::new();
            for cell in zones[first].area.outside_edge.iter() {
                if grid.zone_of(cell) == Some(second as u16) {
                    two_side.insert(cell);
                }
            }
            for cell in zones[second].area.outside_edge.iter() {
                if grid.zone_of(cell) == Some(first as u16) {
                    two_side.insert(cell);
                }
            }
            all_border_net.insert_region(&two_side);
            border_tiles.insert((first, second), two_side);
        }
    }

    for zone in zones.iter_mut() {
        zone.protection_border = zone
            .area
            .inner_area
            .make_inner_edge(grid, true)
            .intersect_with(&all_border_net);
        zone.need_obstacles = zone.protection_border.clone();
        zone.need_obstacles_tentative = Region::new();

        let costs = zone.make_move_costs(grid, false);
        let completed: BTreeSet<TileId> = zone.protection_border.iter().collect();
        let remaining: BTreeSet<TileId> = zone.area.inner_area.iter().collect();
        let by_distance = TileZone::compute_distances(
            grid,
            &costs,
            &completed,
            &remaining,
            BORDER_OBSTACLE_RADIUS * 100,
        );
        for (distance, tiles) in by_distance {
            let firm = distance <= (BORDER_OBSTACLE_RADIUS - 1) * 100;
            for tile in tiles {
                if firm {
                    zone.need_obstacles.insert(tile);
                } else {
                    zone.need_obstacles_tentative.insert(tile);
                }
            }
        }

        zone.inner_usable.inner_area = zone.area.inner_area.clone();
        zone.inner_usable
            .inner_area
            .erase_region(&zone.need_obstacles);
        zone.inner_usable
            .inner_area
            .erase_region(&zone.need_obstacles_tentative);
        // Town footprints and other reserved tiles are not usable either.
        zone.inner_usable.inner_area.erase_region(&zone.unpassable);
        zone.inner_usable.make_edge_from_inner_area(grid);

        // In-game objects require a free tile below them.
        let bottom = zone.inner_usable.bottom_edge(grid);
        zone.inner_usable.inner_area.erase_region(&bottom);
        zone.inner_usable.make_edge_from_inner_area(grid);
    }

    let zone_index_by_id: BTreeMap<String, usize> = zones
        .iter()
        .map(|z| (z.id.clone(), z.index))
        .collect();

    for (connection_id, connection) in connections {
        debug!("processing connection '{connection_id}'");
        let from_index = *zone_index_by_id.get(&connection.from).ok_or_else(|| {
            GenerationError::new(
                STAGE,
                FailureKind::Internal(format!("unknown zone id '{}'", connection.from)),
            )
        })?;
        let to_index = *zone_index_by_id.get(&connection.to).ok_or_else(|| {
            GenerationError::new(
                STAGE,
                FailureKind::Internal(format!("unknown zone id '{}'", connection.to)),
            )
        })?;
        let key = make_key(from_index, to_index);
        let border = border_tiles.get_mut(&key).ok_or_else(|| {
            GenerationError::new(
                STAGE,
                FailureKind::InfeasibleConnection {
                    from: connection.from.clone(),
                    to: connection.to.clone(),
                },
            )
        })?;
        if border.is_empty() {
            return Err(GenerationError::new(
                STAGE,
                FailureKind::InfeasibleConnection {
                    from: connection.from.clone(),
                    to: connection.to.clone(),
                },
            ));
        }
        let centroid = border
            .make_centroid(grid, true)
            .expect("non-empty border has a centroid");

        for (path_id, path) in &connection.paths {
            if border.is_empty() {
                return Err(GenerationError::new(
                    STAGE,
                    FailureKind::InfeasibleConnection {
                        from: connection.from.clone(),
                        to: connection.to.clone(),
                    },
                ));
            }
            let cell = border
                .find_closest(grid, grid.pos(centroid))
                .expect("non-empty border");
            debug!(
                "placing connection '{path_id}' {} -> {} at {}",
                connection.from,
                connection.to,
                grid.pos(cell)
            );

            let guarded = path.guard > 0 || !path.mirror_guard.is_empty();
            let cell_zone = grid.zone_of(cell);
            let ncell = grid
                .tile(cell)
                .orth
                .iter()
                .copied()
                .find(|&n| grid.zone_of(n) != cell_zone)
                .ok_or_else(|| {
                    GenerationError::new(
                        STAGE,
                        FailureKind::Internal(
                            "connection border tile has no cross-zone neighbor".to_string(),
                        ),
                    )
                })?;

            let (cell_from, cell_to) = if cell_zone == Some(from_index as u16) {
                (cell, ncell)
            } else {
                (ncell, cell)
            };

            let road_type = path.road.or(default_road).unwrap_or(RoadType::Dirt);
            for exit_cell in [cell_from, cell_to] {
                let Some(zone_index) = grid.zone_of(exit_cell) else {
                    continue;
                };
                let zone = &mut zones[zone_index as usize];
                let cell_inner = zone
                    .inner_usable
                    .outside_edge
                    .find_closest(grid, grid.pos(exit_cell))
                    .or_else(|| {
                        zone.inner_usable
                            .inner_area
                            .find_closest(grid, grid.pos(exit_cell))
                    })
                    .ok_or_else(|| {
                        GenerationError::in_zone(
                            STAGE,
                            zone.id.clone(),
                            FailureKind::InfeasibleConnection {
                                from: connection.from.clone(),
                                to: connection.to.clone(),
                            },
                        )
                    })?;

                zone.nodes.add(cell_inner, NodeLevel::Exits);
                zone.node_road_types.insert(cell_inner, road_type);
                zone.named_tiles.insert(path_id.clone(), cell_inner);

                for tile in make_path_to(grid, exit_cell, cell_inner) {
                    zone.roads.add(tile, road_type);
                    zone.need_obstacles.erase(tile);
                    zone.need_obstacles_tentative.erase(tile);
                    for &n in &grid.tile(tile).orth {
                        if !zone.protection_border.contains(n) {
                            zone.need_obstacles.erase(n);
                            zone.need_obstacles_tentative.erase(n);
                        }
                    }
                }
            }

            if guarded {
                guards.push(MapGuard {
                    id: path_id.clone(),
                    value: path.guard,
                    mirror_from_id: path.mirror_guard.clone(),
                    pos: Some(cell_from),
                    zone_index: None,
                    joinable: false,
                });
            }

            // Reserve a clear radius so other paths never share tiles.
            let mut for_erase = Region::new();
            let from_pos = grid.pos(cell_from);
            for border_cell in border.iter() {
                if crate::pos::pos_distance(grid.pos(border_cell), from_pos, 100)
                    < path.radius * 100
                {
                    for_erase.insert(border_cell);
                }
            }
            border.erase_region(&for_erase);
        }
    }
    Ok(guards)
}

// ---------------------------------------------------------------------------

/// Subdivide the usable area into segments and derive the road-potential
/// strip with its node candidates.
pub fn make_segments(
    grid: &mut TileGrid,
    zone: &mut TileZone,
) -> Result<(), GenerationError> {
    const STAGE: &str = "Segmentation";
    let segment_list = segmentation::split_by_max_area(
        grid,
        &zone.inner_usable.inner_area,
        zone.settings.segment_area_size,
        30,
    )
    .map_err(|e| GenerationError::in_zone(STAGE, zone.id.clone(), FailureKind::InfeasibleLayout(e.to_string())))?;
    if segment_list.is_empty() {
        return Err(GenerationError::in_zone(
            STAGE,
            zone.id.clone(),
            FailureKind::InfeasibleLayout("no segments in tile zone".to_string()),
        ));
    }

    zone.set_segments(RegionWithEdge::make_edge_list(grid, segment_list));

    // Smooth segment edges before the border net is cut out.
    {
        let mut allowed = Region::new();
        for seg in &mut zone.segments {
            seg.area.refine_edge_remove_spikes(grid, &mut allowed);
        }
        for seg in &mut zone.segments {
            seg.area.refine_edge_remove_hollows(grid, &mut allowed);
        }
    }

    let border_net = RegionWithEdge::inner_border_net(&zone.segment_regions());
    for seg in &mut zone.segments {
        seg.area.inner_area.erase_region(&border_net);
        seg.area.make_edge_from_inner_area(grid);
    }

    let mut segment_spikes = Region::new();
    for seg in &mut zone.segments {
        seg.area
            .refine_edge_remove_spikes(grid, &mut segment_spikes);
    }
    let spikes_on_border = segment_spikes.intersect_with(&zone.inner_usable.inner_edge);

    zone.update_segment_index(grid);

    // The full road-potential strip is everything usable that no segment
    // claimed.
    let border_net = zone
        .inner_usable
        .inner_area
        .diff_with(&zone.segments_united);

    // A tile whose doubled neighborhood ring touches 3+ distinct
    // {zone, segment} labels is a crossing, hence a node candidate.
    let mut inner_nodes = Region::new();
    for cell in border_net.iter() {
        let mut cell_local = Region::new();
        for &n in &grid.tile(cell).all {
            cell_local.insert_slice(&grid.tile(n).orth);
        }
        cell_local.erase_region(&Region::from_unsorted(grid.tile(cell).all.clone()));
        cell_local.erase(cell);
        cell_local.erase_region(&border_net);

        let mut labels: BTreeSet<(bool, Option<u16>)> = BTreeSet::new();
        for neighbor in cell_local.iter() {
            if grid.tile(neighbor).all.len() != 8 {
                labels.insert((false, None)); // map border
            }
            let self_zone = grid.zone_of(neighbor) == Some(zone.index as u16);
            let segment = if self_zone {
                grid.segment_of(neighbor)
            } else {
                None
            };
            labels.insert((self_zone, segment));
        }
        if labels.len() >= 3 {
            inner_nodes.insert(cell);
        }
    }

    // Reduce every candidate cluster to a single node; exits and town
    // gates already cover their clusters.
    let mut inner_nodes_reduced = Region::new();
    let mut outer_nodes_reduced = Region::new();
    let exits = zone.nodes.region(NodeLevel::Exits);
    for group in segmentation::split_by_flood_fill(grid, &inner_nodes, true, None) {
        if !exits.intersect_with(&group).is_empty() {
            continue;
        }
        if !zone.towns_borders.intersect_with(&group).is_empty() {
            continue;
        }
        let border_intersection = zone
            .inner_usable
            .inner_edge
            .intersect_with(&group)
            .diff_with(&spikes_on_border);
        if !border_intersection.is_empty() {
            outer_nodes_reduced.insert(border_intersection.at(0));
            continue;
        }
        if let Some(centroid) = group.make_centroid(grid, true) {
            inner_nodes_reduced.insert(centroid);
        }
    }

    zone.road_potential.insert_region(&zone.nodes.all);
    for cell in outer_nodes_reduced.iter() {
        zone.nodes.add(cell, NodeLevel::BorderPoints);
    }
    for cell in inner_nodes_reduced.iter() {
        zone.nodes.add(cell, NodeLevel::InnerPoints);
    }
    zone.road_potential.insert_region(&border_net);

    repair_road_potential_connectivity(grid, zone);

    zone.update_segment_index(grid);
    Ok(())
}

/// If the road-potential area broke into islands, A* the orphans back to
/// the largest component through the usable area.
fn repair_road_potential_connectivity(grid: &TileGrid, zone: &mut TileZone) {
    let parts = segmentation::split_by_flood_fill(grid, &zone.road_potential, true, None);
    if parts.len() < 2 {
        return;
    }
    let largest_index = parts
        .iter()
        .enumerate()
        .max_by_key(|(i, p)| (p.len(), usize::MAX - i))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let largest = parts[largest_index].clone();

    for (i, orphan) in parts.iter().enumerate() {
        if i == largest_index {
            continue;
        }
        if orphan.len() < 3 && zone.nodes.all.intersect_with(orphan).is_empty() {
            continue;
        }
        let Some(orphan_centroid) = orphan.make_centroid(grid, false) else {
            continue;
        };
        let Some(largest_nearest) =
            largest.find_closest(grid, grid.pos(orphan_centroid))
        else {
            continue;
        };
        let Some(closest_in_orphan) =
            orphan.find_closest(grid, grid.pos(largest_nearest))
        else {
            continue;
        };

        let mut walkable = zone.inner_usable.inner_area.clone();
        walkable.insert(closest_in_orphan);
        walkable.insert(largest_nearest);
        match crate::roads::astar_region(grid, &walkable, closest_in_orphan, largest_nearest, false)
        {
            Some(path) => {
                for tile in path {
                    zone.road_potential.insert(tile);
                }
            }
            None => warn!(
                "zone [{}]: failed to reconnect a road-potential island of {} tiles",
                zone.id,
                orphan.len()
            ),
        }
    }
}

/// Re-smooth the segments after roads claimed their strip.
pub fn refine_segments(grid: &mut TileGrid, zone: &mut TileZone) {
    let mut inner_without_roads = zone.inner_usable.inner_area.clone();
    inner_without_roads.erase_region(&zone.roads.all);

    for seg in &mut zone.segments {
        seg.area.inner_area.erase_region(&zone.roads.all);
        seg.area.make_edge_from_inner_area(grid);
        seg.area
            .refine_edge_remove_spikes(grid, &mut inner_without_roads);
    }
    for seg in &mut zone.segments {
        seg.area
            .refine_edge_remove_hollows(grid, &mut inner_without_roads);
    }
    for seg in &mut zone.segments {
        seg.area.refine_edge_expand(grid, &mut inner_without_roads);
    }
    for seg in &mut zone.segments {
        seg.area
            .refine_edge_remove_spikes(grid, &mut inner_without_roads);
    }
    for seg in &mut zone.segments {
        seg.area
            .refine_edge_remove_hollows(grid, &mut inner_without_roads);
    }
    zone.update_segment_index(grid);
}

// ---------------------------------------------------------------------------

fn chop_heat(src: &[TileId], dest: &mut crate::zone::LevelMap<i32>, heat: i32, max_heat: i32) {
    let total = src.len();
    let start = heat as usize * total / max_heat as usize;
    let end = (heat as usize + 1) * total / max_heat as usize;
    for &tile in &src[start..end] {
        dest.add(tile, heat);
    }
}

/// Distance classes from the towns (fallback: exits, then the centroid),
/// quantized into `max_heat` equal-count buckets separately for road and
/// segment tiles.
pub fn make_heat_map(grid: &TileGrid, zone: &mut TileZone) {
    let costs = zone.make_move_costs(grid, true);

    let mut completed: BTreeSet<TileId> = zone.nodes.region(NodeLevel::Towns).iter().collect();
    if completed.is_empty() {
        completed = zone.nodes.region(NodeLevel::Exits).iter().collect();
    }
    if completed.is_empty() {
        completed.insert(zone.centroid);
    }

    let remaining: BTreeSet<TileId> = zone
        .inner_usable
        .inner_area
        .iter()
        .filter(|t| !completed.contains(t))
        .collect();

    let by_distance = TileZone::compute_distances(grid, &costs, &completed, &remaining, -1);

    let mut road_tiles: Vec<TileId> = Vec::new();
    let mut segment_tiles: Vec<TileId> = Vec::new();
    for (distance, tiles) in by_distance {
        for tile in tiles {
            zone.distances.insert(tile, distance);
            if zone.roads.all.contains(tile) {
                road_tiles.push(tile);
            } else {
                segment_tiles.push(tile);
            }
        }
    }

    let max_heat = zone.settings.max_heat.max(1);
    for heat in 0..max_heat {
        chop_heat(&road_tiles, &mut zone.heat_roads, heat, max_heat);
        chop_heat(&segment_tiles, &mut zone.heat_segments, heat, max_heat);
        chop_heat(&road_tiles, &mut zone.heat_all, heat, max_heat);
        chop_heat(&segment_tiles, &mut zone.heat_all, heat, max_heat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pos::Pos;
    use crate::template::ZoneSettings;

    fn two_zone_setup(size: i32) -> (TileGrid, Vec<TileZone>) {
        let grid = TileGrid::new(size, size, 1);
        let quarter = size / 4;
        let mut zones = Vec::new();
        for (index, x) in [quarter, size - quarter].into_iter().enumerate() {
            let start = grid.find(Pos::new(x, size / 2, 0)).unwrap();
            let mut zone = TileZone::new(
                index,
                format!("z{index}"),
                ZoneSettings::default(),
                start,
            );
            zone.relative_area = 100;
            zones.push(zone);
        }
        (grid, zones)
    }

    #[test]
    fn equal_zones_split_evenly() {
        let (mut grid, mut zones) = two_zone_setup(72);
        let mut state = make_initial_zones(&grid, &mut zones).unwrap();
        refine_zone_areas(&grid, &zones, &mut state).unwrap();
        commit_zone_areas(&mut grid, &mut zones, state);

        let half = (72 * 72 / 2) as i64;
        for zone in &zones {
            assert!(
                (zone.placed_area() - half).abs() <= 10,
                "zone {} has {} tiles, want ~{half}",
                zone.id,
                zone.placed_area()
            );
        }
        // Partition: no tile unassigned, no overlap.
        let union = zones[0].area.inner_area.union_with(&zones[1].area.inner_area);
        assert_eq!(union.len(), 72 * 72);
        assert!(zones[0]
            .area
            .inner_area
            .intersect_with(&zones[1].area.inner_area)
            .is_empty());
    }

    #[test]
    fn borders_give_disjoint_usable_areas() {
        let (mut grid, mut zones) = two_zone_setup(48);
        let mut state = make_initial_zones(&grid, &mut zones).unwrap();
        refine_zone_areas(&grid, &zones, &mut state).unwrap();
        commit_zone_areas(&mut grid, &mut zones, state);

        let connections = BTreeMap::new();
        make_borders(&grid, &mut zones, &connections, Some(RoadType::Dirt)).unwrap();

        for zone in &zones {
            assert!(!zone.protection_border.is_empty());
            assert!(!zone.inner_usable.inner_area.is_empty());
            // The usable area excludes the whole obstacle belt.
            assert!(zone
                .inner_usable
                .inner_area
                .intersect_with(&zone.need_obstacles)
                .is_empty());
            assert!(zone
                .inner_usable
                .inner_area
                .intersect_with(&zone.need_obstacles_tentative)
                .is_empty());
        }
    }

    #[test]
    fn connection_places_guard_and_exits() {
        let (mut grid, mut zones) = two_zone_setup(48);
        let mut state = make_initial_zones(&grid, &mut zones).unwrap();
        refine_zone_areas(&grid, &zones, &mut state).unwrap();
        commit_zone_areas(&mut grid, &mut zones, state);

        let mut connections = BTreeMap::new();
        let mut connection = Connection {
            from: "z0".to_string(),
            to: "z1".to_string(),
            paths: BTreeMap::new(),
        };
        connection.paths.insert(
            "main".to_string(),
            crate::template::ConnectionPath {
                guard: 500,
                mirror_guard: String::new(),
                road: Some(RoadType::Cobblestone),
                radius: 2,
            },
        );
        connections.insert("c1".to_string(), connection);

        let guards = make_borders(&grid, &mut zones, &connections, None).unwrap();
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].value, 500);
        assert_eq!(guards[0].id, "main");
        // The guard sits on the from-side of the border.
        let guard_tile = guards[0].pos.unwrap();
        assert_eq!(grid.zone_of(guard_tile), Some(0));

        for zone in &zones {
            assert_eq!(zone.named_tiles.len(), 1);
            assert!(!zone.nodes.region(NodeLevel::Exits).is_empty());
            assert!(!zone.roads.all.is_empty());
        }
    }

    #[test]
    fn segments_and_heat() {
        let (mut grid, mut zones) = two_zone_setup(48);
        let mut state = make_initial_zones(&grid, &mut zones).unwrap();
        refine_zone_areas(&grid, &zones, &mut state).unwrap();
        commit_zone_areas(&mut grid, &mut zones, state);
        let connections = BTreeMap::new();
        make_borders(&grid, &mut zones, &connections, None).unwrap();

        let zone = &mut zones[0];
        zone.settings.segment_area_size = 100;
        zone.settings.max_heat = 5;
        make_segments(&mut grid, zone).unwrap();
        assert!(zone.segments.len() >= 2);
        for seg in &zone.segments {
            assert!(!seg.area.inner_area.is_empty());
        }
        // Segments plus the road potential strip cover the usable area.
        assert!(zone
            .inner_usable
            .inner_area
            .diff_with(&zone.segments_united.union_with(&zone.road_potential))
            .is_empty());

        make_heat_map(&grid, zone);
        assert!(!zone.distances.is_empty());
        let mut heat_tiles = 0;
        for heat in 0..5 {
            heat_tiles += zone.heat_all.region(heat).len();
        }
        assert!(heat_tiles > 0);
        // Heat never exceeds the configured bucket count.
        assert!(zone.heat_all.levels().all(|(h, _)| h < 5));
    }
}
