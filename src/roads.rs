//! Road realization: A* between road nodes over the road-potential strip,
//! road-level assignment, diagonal patching and loop cleanup.

use crate::error::{FailureKind, GenerationError};
use crate::grid::{Dir, TileGrid, TileId};
use crate::region::Region;
use crate::zone::{NodeLevel, RoadType, TileZone};
use log::debug;
use pathfinding::directed::astar::astar;

/// A* between two tiles constrained to `walkable`. Orthogonal steps cost
/// 10; with `diagonal` set, diagonal steps cost 14. Heuristic is Chebyshev
/// distance, admissible for both modes.
pub fn astar_region(
    grid: &TileGrid,
    walkable: &Region,
    start: TileId,
    goal: TileId,
    diagonal: bool,
) -> Option<Vec<TileId>> {
    if !walkable.contains(start) || !walkable.contains(goal) {
        return None;
    }
    let goal_pos = grid.pos(goal);
    let result = astar(
        &start,
        |&tile| {
            let t = grid.tile(tile);
            let mut successors: Vec<(TileId, u64)> = Vec::with_capacity(8);
            for &n in &t.orth {
                if walkable.contains(n) {
                    successors.push((n, 10));
                }
            }
            if diagonal {
                for &n in &t.diag {
                    if walkable.contains(n) {
                        successors.push((n, 14));
                    }
                }
            }
            successors
        },
        |&tile| crate::pos::chebyshev_distance(grid.pos(tile), goal_pos) as u64 * 10,
        |&tile| tile == goal,
    );
    result.map(|(path, _cost)| path)
}

/// Patch diagonal steps with one of the two orthogonal in-between tiles so
/// the rendered road stays 4-connected. A tile already claimed by a road is
/// preferred; otherwise the first candidate wins.
pub fn patch_diagonal_steps(grid: &TileGrid, path: &[TileId], existing: &Region) -> Vec<TileId> {
    let mut extra = Vec::new();
    for pair in path.windows(2) {
        let prev = grid.pos(pair[0]);
        let cur = grid.pos(pair[1]);
        if prev.x == cur.x || prev.y == cur.y {
            continue;
        }
        let candidate1 = grid.find(crate::pos::Pos::new(prev.x, cur.y, prev.z));
        let candidate2 = grid.find(crate::pos::Pos::new(cur.x, prev.y, prev.z));
        let patched = match (candidate1, candidate2) {
            (Some(a), Some(b)) => {
                if existing.contains(b) && !existing.contains(a) {
                    b
                } else {
                    a
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => continue,
        };
        extra.push(patched);
    }
    let mut out = path.to_vec();
    out.extend(extra);
    out
}

fn requested_level(zone: &TileZone, node: TileId, default_road: RoadType) -> RoadType {
    zone.node_road_types
        .get(&node)
        .copied()
        .unwrap_or(default_road)
}

fn add_road_tile(zone: &mut TileZone, tile: TileId, level: RoadType) {
    match zone.roads.level_of(tile) {
        Some(existing) if existing >= level => {}
        _ => zone.roads.add(tile, level),
    }
}

/// Link every road node of the zone into one connected road net.
pub fn place_zone_roads(
    grid: &TileGrid,
    zone: &mut TileZone,
    default_road: Option<RoadType>,
) -> Result<(), GenerationError> {
    const STAGE: &str = "RoadsPlacement";
    let default_road = default_road.unwrap_or(RoadType::Trail);

    let node_list: Vec<TileId> = zone.nodes.all.iter().collect();
    if node_list.len() <= 1 {
        return Ok(());
    }

    let high_priority: Region = zone
        .nodes
        .region(NodeLevel::Towns)
        .union_with(&zone.nodes.region(NodeLevel::Exits));

    // Make sure every town/exit can reach another node through the road
    // potential area; bridge across the usable area when it cannot.
    for node in high_priority.iter() {
        let components =
            crate::segmentation::split_by_flood_fill(grid, &zone.road_potential, true, Some(node));
        let component = &components[0];
        let mut other_nodes = zone.nodes.all.clone();
        other_nodes.erase(node);
        if !component.intersect_with(&other_nodes).is_empty() {
            continue;
        }
        let candidates = zone.road_potential.diff_with(component);
        if candidates.is_empty() {
            break;
        }
        let Some(closest) = candidates.find_closest(grid, grid.pos(node)) else {
            continue;
        };
        let mut walkable = zone.inner_usable.inner_area.union_with(&zone.road_potential);
        walkable.insert(node);
        walkable.insert(closest);
        if let Some(path) = astar_region(grid, &walkable, node, closest, true) {
            let patched = patch_diagonal_steps(grid, &path, &zone.roads.all);
            for tile in patched {
                zone.road_potential.insert(tile);
            }
        }
    }

    // Connect nodes most-important-first; each new node routes to the
    // closest already-connected one. Border nodes are 3x as expensive to
    // route to, which keeps trunks away from the zone rim.
    let mut unconnected = node_list;
    let usable_edge = zone.inner_usable.inner_edge.clone();
    unconnected.sort_by_key(|&n| {
        (
            high_priority.contains(n),
            !usable_edge.contains(n),
            grid.pos(n),
        )
    });

    let mut connected: Vec<TileId> = Vec::new();
    let first = unconnected.pop().expect("at least two nodes");
    connected.push(first);

    while let Some(cell) = unconnected.pop() {
        let cell_pos = grid.pos(cell);
        let closest = *connected
            .iter()
            .min_by_key(|&&c| {
                let mult = if usable_edge.contains(c) { 3 } else { 1 };
                crate::pos::pos_distance(cell_pos, grid.pos(c), 100) * mult
            })
            .expect("connected list is never empty");

        // 4-neighbor first; the strip can be diagonal-connected only, in
        // which case the diagonal pass (patched below) still yields a
        // continuous road.
        let path = astar_region(grid, &zone.road_potential, cell, closest, false)
            .or_else(|| astar_region(grid, &zone.road_potential, cell, closest, true))
            .ok_or_else(|| {
                GenerationError::in_zone(
                    STAGE,
                    zone.id.clone(),
                    FailureKind::InfeasibleLayout(format!(
                        "no road path between nodes {} and {}",
                        grid.pos(cell),
                        grid.pos(closest)
                    )),
                )
            })?;

        connected.push(cell);

        let level = requested_level(zone, cell, default_road)
            .max(requested_level(zone, closest, default_road));
        let patched = patch_diagonal_steps(grid, &path, &zone.roads.all);
        for tile in patched {
            add_road_tile(zone, tile, level);
        }
    }

    let removed = redundant_cleanup(grid, zone);
    if removed > 0 {
        debug!("zone [{}]: removed {removed} redundant road tiles", zone.id);
    }
    Ok(())
}

/// Remove road tiles forming 2x2 blocks (spurious loops), repeating until
/// stable. Only pure square corners are removed so connectivity survives.
fn redundant_cleanup(grid: &TileGrid, zone: &mut TileZone) -> usize {
    let mut removed = 0usize;
    loop {
        let mut to_remove: Option<TileId> = None;
        for tile in zone.roads.all.iter() {
            if zone.nodes.all.contains(tile) {
                continue;
            }
            let t = grid.tile(tile);
            let road = |dir: Dir| zone.roads.all.contains_opt(t.neighbor(dir));
            let square = road(Dir::R) && road(Dir::B) && road(Dir::BR);
            if square && !road(Dir::L) && !road(Dir::T) && !road(Dir::TL) {
                to_remove = Some(tile);
                break;
            }
        }
        match to_remove {
            Some(tile) => {
                zone.roads.erase(tile);
                removed += 1;
            }
            None => return removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pos::Pos;
    use crate::template::ZoneSettings;

    fn grid_and_zone(size: i32) -> (TileGrid, TileZone) {
        let grid = TileGrid::new(size, size, 1);
        let start = grid.find(Pos::new(size / 2, size / 2, 0)).unwrap();
        let mut zone = TileZone::new(0, "z".to_string(), ZoneSettings::default(), start);
        zone.area.inner_area = grid.all_region();
        zone.area.make_edge_from_inner_area(&grid);
        zone.inner_usable.inner_area = grid.all_region();
        zone.inner_usable.make_edge_from_inner_area(&grid);
        (grid, zone)
    }

    #[test]
    fn astar_prefers_straight_paths() {
        let (grid, _zone) = grid_and_zone(10);
        let all = grid.all_region();
        let a = grid.find(Pos::new(1, 1, 0)).unwrap();
        let b = grid.find(Pos::new(8, 1, 0)).unwrap();
        let path = astar_region(&grid, &all, a, b, false).unwrap();
        assert_eq!(path.len(), 8);
        assert!(path.iter().all(|&t| grid.pos(t).y == 1));
    }

    #[test]
    fn astar_respects_walls() {
        let grid = TileGrid::new(5, 5, 1);
        // Leave only a U-shaped corridor.
        let mut walkable = grid.all_region();
        for y in 0..4 {
            walkable.erase(grid.find(Pos::new(2, y, 0)).unwrap());
        }
        let a = grid.find(Pos::new(0, 0, 0)).unwrap();
        let b = grid.find(Pos::new(4, 0, 0)).unwrap();
        let path = astar_region(&grid, &walkable, a, b, false).unwrap();
        assert!(path.len() > 9);
        assert!(path.iter().any(|&t| grid.pos(t).y == 4));
    }

    #[test]
    fn diagonal_patching_keeps_roads_connected() {
        let grid = TileGrid::new(6, 6, 1);
        let all = grid.all_region();
        let a = grid.find(Pos::new(0, 0, 0)).unwrap();
        let b = grid.find(Pos::new(4, 4, 0)).unwrap();
        let path = astar_region(&grid, &all, a, b, true).unwrap();
        let patched = patch_diagonal_steps(&grid, &path, &Region::new());
        let region = Region::from_unsorted(patched);
        // Every consecutive pair of the original path is now bridged by an
        // orthogonal neighbor inside the patched set.
        for pair in path.windows(2) {
            let prev = grid.pos(pair[0]);
            let cur = grid.pos(pair[1]);
            if prev.x != cur.x && prev.y != cur.y {
                let via1 = grid.find(Pos::new(prev.x, cur.y, 0)).unwrap();
                let via2 = grid.find(Pos::new(cur.x, prev.y, 0)).unwrap();
                assert!(region.contains(via1) || region.contains(via2));
            }
        }
    }

    #[test]
    fn nodes_get_linked_by_roads() {
        let (grid, mut zone) = grid_and_zone(16);
        zone.road_potential = grid.all_region();
        let n1 = grid.find(Pos::new(2, 2, 0)).unwrap();
        let n2 = grid.find(Pos::new(13, 2, 0)).unwrap();
        let n3 = grid.find(Pos::new(8, 13, 0)).unwrap();
        zone.nodes.add(n1, NodeLevel::Towns);
        zone.nodes.add(n2, NodeLevel::Exits);
        zone.nodes.add(n3, NodeLevel::InnerPoints);
        zone.node_road_types.insert(n2, RoadType::Cobblestone);

        place_zone_roads(&grid, &mut zone, Some(RoadType::Dirt)).unwrap();
        assert!(!zone.roads.all.is_empty());

        // All three nodes live in one connected road component.
        let parts =
            crate::segmentation::split_by_flood_fill(&grid, &zone.roads.all, true, None);
        let with_nodes: Vec<_> = parts
            .iter()
            .filter(|p| !p.intersect_with(&zone.nodes.all).is_empty())
            .collect();
        assert_eq!(with_nodes.len(), 1);

        // The exit requested cobblestone; the strongest level won somewhere.
        assert!(!zone.roads.region(RoadType::Cobblestone).is_empty());
    }

    #[test]
    fn cleanup_removes_square_loops() {
        let (grid, mut zone) = grid_and_zone(8);
        for (x, y) in [(2, 2), (3, 2), (2, 3), (3, 3), (4, 2)] {
            zone.roads
                .add(grid.find(Pos::new(x, y, 0)).unwrap(), RoadType::Dirt);
        }
        let removed = redundant_cleanup(&grid, &mut zone);
        assert_eq!(removed, 1);
        assert!(!zone
            .roads
            .all
            .contains(grid.find(Pos::new(2, 2, 0)).unwrap()));
    }
}
