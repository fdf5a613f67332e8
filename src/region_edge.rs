//! A region together with its materialized inner and outer edges, plus the
//! edge refinement passes and the collision shift oracle used by placement.

use crate::grid::{Dir, TileGrid, TileId};
use crate::pos::Pos;
use crate::region::Region;
use crate::segmentation;

#[derive(Clone, Default, Debug)]
pub struct RegionWithEdge {
    pub diagonal_growth: bool,
    pub inner_area: Region,
    /// Subset of `inner_area`.
    pub inner_edge: Region,
    /// Not a subset of `inner_area`.
    pub outside_edge: Region,
}

/// Result of probing an object region against an obstacle region.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CollisionResult {
    InvalidInputs,
    NoCollision,
    /// The object is fully covered; no shift direction exists.
    ImpossibleShift,
    /// Nudge the object by the contained vector to escape the collision.
    HasShift(i32, i32),
}

impl RegionWithEdge {
    pub fn from_region(inner_area: Region, grid: &TileGrid) -> Self {
        let mut out = RegionWithEdge {
            diagonal_growth: false,
            inner_area,
            inner_edge: Region::new(),
            outside_edge: Region::new(),
        };
        out.make_edge_from_inner_area(grid);
        out
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.inner_area.contains(id)
    }

    pub fn make_edge_from_inner_area(&mut self, grid: &TileGrid) {
        let (inner, outer) = self
            .inner_area
            .make_inner_and_outer_edge(grid, self.diagonal_growth);
        self.inner_edge = inner;
        self.outside_edge = outer;
    }

    /// Fill 1-tile hollows: outside-edge tiles with 3+ orthogonal neighbors
    /// inside get absorbed. The absorbed tiles are removed from
    /// `allowed_area`.
    pub fn refine_edge_remove_hollows(&mut self, grid: &TileGrid, allowed_area: &mut Region) {
        let mut additional: Vec<TileId> = Vec::new();
        for id in self.outside_edge.iter() {
            if !allowed_area.contains(id) {
                continue;
            }
            let tile = grid.tile(id);
            let adjacent = [Dir::B, Dir::T, Dir::R, Dir::L]
                .into_iter()
                .filter(|&d| self.inner_area.contains_opt(tile.neighbor(d)))
                .count();
            if adjacent >= 3 {
                additional.push(id);
            }
        }
        for &id in &additional {
            allowed_area.erase(id);
            self.inner_area.insert(id);
        }
        self.make_edge_from_inner_area(grid);
    }

    /// Remove 1-tile spikes: inner-edge tiles with at most one orthogonal
    /// neighbor inside get released into `allowed_area`.
    pub fn refine_edge_remove_spikes(&mut self, grid: &TileGrid, allowed_area: &mut Region) {
        let mut removal: Vec<TileId> = Vec::new();
        for id in self.inner_edge.iter() {
            let tile = grid.tile(id);
            let adjacent = [Dir::B, Dir::T, Dir::R, Dir::L]
                .into_iter()
                .filter(|&d| self.inner_area.contains_opt(tile.neighbor(d)))
                .count();
            if adjacent <= 1 {
                removal.push(id);
            }
        }
        for &id in &removal {
            allowed_area.insert(id);
            self.inner_area.erase(id);
        }
        self.make_edge_from_inner_area(grid);
    }

    /// Grow into every allowed outside-edge tile.
    pub fn refine_edge_expand(&mut self, grid: &TileGrid, allowed_area: &mut Region) {
        let additional = allowed_area.intersect_with(&self.outside_edge);
        allowed_area.erase_region(&additional);
        self.inner_area.insert_region(&additional);
        self.make_edge_from_inner_area(grid);
    }

    /// Release the whole inner edge into `allowed_area`.
    pub fn refine_edge_shrink(&mut self, grid: &TileGrid, allowed_area: &mut Region) {
        allowed_area.insert_region(&self.inner_edge);
        self.inner_area.erase_region(&self.inner_edge.clone());
        self.make_edge_from_inner_area(grid);
    }

    /// Inner-edge tiles with fewer than two of the B / BL / BR neighbors in
    /// the area. In-game objects need a free tile below them to stay
    /// clickable, so these rows are excluded from the usable area.
    pub fn bottom_edge(&self, grid: &TileGrid) -> Region {
        let mut result = Region::new();
        for id in self.inner_edge.iter() {
            let tile = grid.tile(id);
            let has_b = self.inner_area.contains_opt(tile.neighbor(Dir::B)) as u8;
            let has_br = self.inner_area.contains_opt(tile.neighbor(Dir::BR)) as u8;
            let has_bl = self.inner_area.contains_opt(tile.neighbor(Dir::BL)) as u8;
            if has_b + has_br + has_bl < 2 {
                result.insert(id);
            }
        }
        result
    }

    /// Diagonal flood-fill restricted to the inner edge, starting at
    /// `start`. Returns the connected component containing `start`.
    pub fn flood_fill_diagonal_by_inner_edge(
        &self,
        grid: &TileGrid,
        start: TileId,
    ) -> Region {
        if !self.inner_edge.contains(start) {
            return Region::new();
        }
        let parts = segmentation::split_by_flood_fill(grid, &self.inner_edge, true, Some(start));
        parts.into_iter().next().unwrap_or_default()
    }

    pub fn make_edge_list(grid: &TileGrid, regions: Vec<Region>) -> Vec<RegionWithEdge> {
        regions
            .into_iter()
            .map(|r| RegionWithEdge::from_region(r, grid))
            .collect()
    }

    /// Tiles shared between neighboring segments: each segment's inner edge
    /// intersected with every other segment's outside edge.
    pub fn inner_border_net(areas: &[RegionWithEdge]) -> Region {
        let mut result = Region::new();
        for i in 0..areas.len() {
            for k in (i + 1)..areas.len() {
                result.insert_region(
                    &areas[i].inner_edge.intersect_with(&areas[k].outside_edge),
                );
            }
        }
        result
    }

    /// Closed-form collision probe: where should `object` move to escape
    /// `obstacle`? With `invert_obstacle` the obstacle region is treated as
    /// the *free* area and the collision is everything outside it.
    ///
    /// The shift is derived from the offset between the centroid of the
    /// colliding cells and the centroid of the remaining object cells,
    /// clamped into the object's half-extents.
    pub fn collision_shift(
        grid: &TileGrid,
        object: &Region,
        obstacle: &Region,
        invert_obstacle: bool,
    ) -> CollisionResult {
        if object.is_empty() || obstacle.is_empty() {
            return CollisionResult::InvalidInputs;
        }

        let intersection = if invert_obstacle {
            object.diff_with(obstacle)
        } else {
            object.intersect_with(obstacle)
        };
        if intersection.is_empty() {
            return CollisionResult::NoCollision;
        }
        if intersection == *object {
            return CollisionResult::ImpossibleShift;
        }

        let collision_centroid = intersection
            .make_centroid(grid, false)
            .expect("non-empty intersection");

        let mut object_without_collision = object.clone();
        object_without_collision.erase(collision_centroid);

        let boundary = object.boundary(grid).expect("non-empty object");
        // 1x1 => 0, 2x2 => 1, 3x3 => 1, 4x4 => 2
        let hor_radius = boundary.width as i32 / 2;
        let vert_radius = boundary.height as i32 / 2;

        let object_centroid = object_without_collision
            .make_centroid(grid, false)
            .expect("object minus one tile is non-empty");

        let offset: Pos = grid.pos(object_centroid) - grid.pos(collision_centroid);
        let mut cx = offset.x;
        let mut cy = offset.y;
        if cx == 0 && cy == 0 {
            return CollisionResult::ImpossibleShift;
        }

        if cx > 0 && hor_radius > 1 {
            cx = hor_radius - cx + 1;
        }
        if cx < 0 && hor_radius > 1 {
            cx = -hor_radius - cx - 1;
        }
        if cy > 0 && vert_radius > 1 {
            cy = vert_radius - cy + 1;
        }
        if cy < 0 && hor_radius > 1 {
            cy = -vert_radius - cy - 1;
        }
        CollisionResult::HasShift(cx, cy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileGrid;
    use crate::segmentation::AsciiRegionMap;

    struct CollisionCase {
        id: &'static str,
        object: &'static str,
        expected: CollisionResult,
    }

    /// `O` object, `X` object+obstacle, `-` obstacle only.
    fn run_collision(case: &CollisionCase) {
        let grid = TileGrid::new(5, 5, 1);
        let map = AsciiRegionMap::load(&grid, 0, case.object);
        let object = map.region('O').union_with(&map.region('X'));
        let obstacle = map.region('-').union_with(&map.region('X'));
        let result = RegionWithEdge::collision_shift(&grid, &object, &obstacle, false);
        assert_eq!(result, case.expected, "case {}", case.id);
    }

    #[test]
    fn collision_oracle_fixtures() {
        let cases = [
            CollisionCase {
                id: "invalid",
                object: ".....\
                         ..OO.\
                         ..OO.\
                         .....\
                         .....",
                expected: CollisionResult::InvalidInputs,
            },
            CollisionCase {
                id: "simple1",
                object: ".....\
                         ..OO.\
                         ..XO.\
                         .....\
                         .....",
                expected: CollisionResult::HasShift(1, -1),
            },
            CollisionCase {
                id: "simple2",
                object: "....O\
                         ..OO.\
                         ..XO.\
                         .....\
                         .....",
                expected: CollisionResult::HasShift(1, -1),
            },
            CollisionCase {
                id: "no_collide",
                object: ".....\
                         ..OO.\
                         ..-O.\
                         .....\
                         .....",
                expected: CollisionResult::NoCollision,
            },
            CollisionCase {
                id: "compensated1",
                object: ".....\
                         .OOO.\
                         .OXO.\
                         .OOO.\
                         .....",
                expected: CollisionResult::ImpossibleShift,
            },
            CollisionCase {
                id: "compensated2",
                object: ".....\
                         .OOO.\
                         .XOX.\
                         .OOO.\
                         .....",
                expected: CollisionResult::ImpossibleShift,
            },
            CollisionCase {
                id: "compensated3",
                object: ".....\
                         .XXO.\
                         .OOO.\
                         .OXX.\
                         .....",
                expected: CollisionResult::ImpossibleShift,
            },
            CollisionCase {
                id: "large1",
                object: ".OOO.\
                         OOOOO\
                         XOOOO\
                         OOOOO\
                         .OOO.",
                expected: CollisionResult::HasShift(1, 0),
            },
            CollisionCase {
                id: "large2",
                object: ".OOO.\
                         OOOOO\
                         OXOOO\
                         OOOOO\
                         .OOO.",
                expected: CollisionResult::HasShift(2, 0),
            },
            CollisionCase {
                id: "large3",
                object: ".XOX.\
                         OOOOO\
                         OXOOO\
                         OOOOO\
                         .OOO.",
                expected: CollisionResult::HasShift(2, 1),
            },
            CollisionCase {
                id: "large4",
                object: ".OOO.\
                         OOOXO\
                         OOOOO\
                         OOOOO\
                         .OOO.",
                expected: CollisionResult::HasShift(-2, 2),
            },
            CollisionCase {
                id: "partial_compensate",
                object: ".OOX.\
                         OOOOO\
                         OXOOX\
                         OOOOO\
                         .OOO.",
                expected: CollisionResult::HasShift(-2, 2),
            },
        ];
        for case in &cases {
            run_collision(case);
        }
    }

    #[test]
    fn refine_spikes_and_hollows() {
        let grid = TileGrid::new(7, 7, 1);
        // A 3x3 block with a 1-tile spike to the right of the middle row.
        let map = AsciiRegionMap::load(
            &grid,
            0,
            ".......\
             .OOO...\
             .OOOO..\
             .OOO...\
             .......\
             .......\
             .......",
        );
        let mut area = RegionWithEdge::from_region(map.region('O'), &grid);
        let mut allowed = Region::new();
        area.refine_edge_remove_spikes(&grid, &mut allowed);
        assert_eq!(area.inner_area.len(), 9);
        assert_eq!(allowed.len(), 1);

        // Re-adding the released tile as a hollow candidate: a notch
        // surrounded on three sides gets filled back.
        let notch = allowed.at(0);
        let mut hollow_area = area.clone();
        hollow_area.inner_area.insert_region(&Region::from_unsorted(vec![
            grid.find(crate::pos::Pos::new(4, 1, 0)).unwrap(),
            grid.find(crate::pos::Pos::new(4, 3, 0)).unwrap(),
            grid.find(crate::pos::Pos::new(5, 1, 0)).unwrap(),
            grid.find(crate::pos::Pos::new(5, 2, 0)).unwrap(),
            grid.find(crate::pos::Pos::new(5, 3, 0)).unwrap(),
        ]));
        hollow_area.make_edge_from_inner_area(&grid);
        assert!(!hollow_area.inner_area.contains(notch));
        let mut allowed2 = Region::new();
        allowed2.insert(notch);
        hollow_area.refine_edge_remove_hollows(&grid, &mut allowed2);
        assert!(hollow_area.inner_area.contains(notch));
        assert!(allowed2.is_empty());
    }

    #[test]
    fn bottom_edge_of_block() {
        let grid = TileGrid::new(6, 6, 1);
        let map = AsciiRegionMap::load(
            &grid,
            0,
            "......\
             .OOO..\
             .OOO..\
             .OOO..\
             ......\
             ......",
        );
        let area = RegionWithEdge::from_region(map.region('O'), &grid);
        let bottom = area.bottom_edge(&grid);
        // Exactly the lowest row qualifies.
        assert_eq!(bottom.len(), 3);
        for id in bottom.iter() {
            assert_eq!(grid.pos(id).y, 3);
        }
    }
}
