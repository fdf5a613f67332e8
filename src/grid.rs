//! Tile arena. Tiles are allocated once in row-major (z, y, x) order and
//! never move; everything else references them through [`TileId`] indices.
//! Because ids follow allocation order, a sorted id sequence is also sorted
//! by (z, y, x), which keeps all region operations deterministic.

use crate::pos::Pos;
use crate::region::Region;
use fnv::FnvHashMap;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TileId(pub u32);

impl TileId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Neighbor slot indices for [`Tile::neighbor`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Dir {
    T = 0,
    L = 1,
    R = 2,
    B = 3,
    TL = 4,
    TR = 5,
    BL = 6,
    BR = 7,
}

pub struct Tile {
    pub pos: Pos,
    /// Index of the owning zone, written during zone refinement.
    pub zone: Option<u16>,
    /// Index of the owning segment within the zone.
    pub segment: Option<u16>,
    /// Set when the exclave fixer reassigned this tile.
    pub ex_fix: bool,
    neighbors: [Option<TileId>; 8],
    /// Orthogonal neighbors, sorted by id.
    pub orth: Vec<TileId>,
    /// Diagonal neighbors, sorted by id.
    pub diag: Vec<TileId>,
    /// All 8 neighbors, sorted by id.
    pub all: Vec<TileId>,
}

impl Tile {
    #[inline]
    pub fn neighbor(&self, dir: Dir) -> Option<TileId> {
        self.neighbors[dir as usize]
    }

    pub fn neighbors_list(&self, diagonal: bool) -> &[TileId] {
        if diagonal {
            &self.all
        } else {
            &self.orth
        }
    }
}

pub struct TileGrid {
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    tiles: Vec<Tile>,
    index: FnvHashMap<Pos, TileId>,
    pub center: TileId,
}

impl TileGrid {
    pub fn new(width: i32, height: i32, depth: i32) -> Self {
        assert!(width > 0 && height > 0 && depth > 0);
        let count = (width * height * depth) as usize;
        let mut tiles = Vec::with_capacity(count);
        let mut index = FnvHashMap::default();
        for z in 0..depth {
            for y in 0..height {
                for x in 0..width {
                    let id = TileId(tiles.len() as u32);
                    let pos = Pos::new(x, y, z);
                    index.insert(pos, id);
                    tiles.push(Tile {
                        pos,
                        zone: None,
                        segment: None,
                        ex_fix: false,
                        neighbors: [None; 8],
                        orth: Vec::new(),
                        diag: Vec::new(),
                        all: Vec::new(),
                    });
                }
            }
        }

        let mut grid = TileGrid {
            width,
            height,
            depth,
            tiles,
            index,
            center: TileId(0),
        };
        grid.link_neighbors();
        grid.center = grid
            .find(Pos::new(width / 2, height / 2, 0))
            .expect("map center is always in bounds");
        grid
    }

    fn link_neighbors(&mut self) {
        let offsets: [(Dir, i32, i32); 8] = [
            (Dir::T, 0, -1),
            (Dir::L, -1, 0),
            (Dir::R, 1, 0),
            (Dir::B, 0, 1),
            (Dir::TL, -1, -1),
            (Dir::TR, 1, -1),
            (Dir::BL, -1, 1),
            (Dir::BR, 1, 1),
        ];
        for i in 0..self.tiles.len() {
            let pos = self.tiles[i].pos;
            let mut neighbors = [None; 8];
            let mut orth = Vec::with_capacity(4);
            let mut diag = Vec::with_capacity(4);
            for (dir, dx, dy) in offsets {
                if let Some(&id) = self.index.get(&pos.shifted(dx, dy)) {
                    neighbors[dir as usize] = Some(id);
                    if matches!(dir, Dir::T | Dir::L | Dir::R | Dir::B) {
                        orth.push(id);
                    } else {
                        diag.push(id);
                    }
                }
            }
            orth.sort();
            diag.sort();
            let mut all = orth.clone();
            all.extend_from_slice(&diag);
            all.sort();
            let tile = &mut self.tiles[i];
            tile.neighbors = neighbors;
            tile.orth = orth;
            tile.diag = diag;
            tile.all = all;
        }
    }

    #[inline]
    pub fn tile(&self, id: TileId) -> &Tile {
        &self.tiles[id.index()]
    }

    #[inline]
    pub fn pos(&self, id: TileId) -> Pos {
        self.tiles[id.index()].pos
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn find(&self, pos: Pos) -> Option<TileId> {
        self.index.get(&pos).copied()
    }

    /// The tile at `pos` clamped into bounds on its plane.
    pub fn find_clamped(&self, pos: Pos) -> TileId {
        let clamped = Pos::new(
            pos.x.clamp(0, self.width - 1),
            pos.y.clamp(0, self.height - 1),
            pos.z.clamp(0, self.depth - 1),
        );
        self.index[&clamped]
    }

    /// Neighbor at an arbitrary planar offset. Unit offsets resolve through
    /// the precomputed links; anything else falls back to the index.
    pub fn neighbor_by_offset(&self, id: TileId, dx: i32, dy: i32) -> Option<TileId> {
        if dx == 0 && dy == 0 {
            return Some(id);
        }
        let tile = self.tile(id);
        if dx.abs() <= 1 && dy.abs() <= 1 {
            let dir = match (dx, dy) {
                (0, -1) => Dir::T,
                (-1, 0) => Dir::L,
                (1, 0) => Dir::R,
                (0, 1) => Dir::B,
                (-1, -1) => Dir::TL,
                (1, -1) => Dir::TR,
                (-1, 1) => Dir::BL,
                _ => Dir::BR,
            };
            return tile.neighbor(dir);
        }
        self.find(tile.pos.shifted(dx, dy))
    }

    /// Region covering every tile of the grid.
    pub fn all_region(&self) -> Region {
        Region::from_sorted((0..self.tiles.len() as u32).map(TileId).collect())
    }

    /// Region covering one plane.
    pub fn plane_region(&self, z: i32) -> Region {
        let per_plane = (self.width * self.height) as u32;
        let start = z as u32 * per_plane;
        Region::from_sorted((start..start + per_plane).map(TileId).collect())
    }

    pub fn set_zone(&mut self, id: TileId, zone: Option<u16>) {
        self.tiles[id.index()].zone = zone;
    }

    pub fn set_segment(&mut self, id: TileId, segment: Option<u16>) {
        self.tiles[id.index()].segment = segment;
    }

    pub fn zone_of(&self, id: TileId) -> Option<u16> {
        self.tiles[id.index()].zone
    }

    pub fn segment_of(&self, id: TileId) -> Option<u16> {
        self.tiles[id.index()].segment
    }

    /// One pass of exclave repair: reassign tiles whose zone disagrees with
    /// most of their orthogonal neighborhood. Returns true when nothing had
    /// to be fixed.
    pub fn fix_exclaves(&mut self) -> bool {
        let mut fixed_count = 0usize;
        for i in 0..self.tiles.len() {
            let id = TileId(i as u32);
            let tile_zone = self.tiles[i].zone;
            // Off-map neighbors count as same-zone, matching the behavior of
            // treating the map edge as "own territory".
            let zone_at = |slot: Option<TileId>| match slot {
                Some(n) => self.tiles[n.index()].zone,
                None => tile_zone,
            };
            let zt = zone_at(self.tiles[i].neighbor(Dir::T));
            let zl = zone_at(self.tiles[i].neighbor(Dir::L));
            let zr = zone_at(self.tiles[i].neighbor(Dir::R));
            let zb = zone_at(self.tiles[i].neighbor(Dir::B));

            let et = zt == tile_zone;
            let el = zl == tile_zone;
            let er = zr == tile_zone;
            let eb = zb == tile_zone;
            let same_count = et as u8 + el as u8 + er as u8 + eb as u8;

            let new_zone = match same_count {
                // Normal center or border tile.
                3 | 4 => continue,
                2 => {
                    if (et && el) || (et && er) || (eb && el) || (eb && er) {
                        continue; // corner
                    }
                    if et && eb {
                        zl
                    } else {
                        zt
                    }
                }
                1 => {
                    if et {
                        zb
                    } else if el {
                        zr
                    } else if er {
                        zl
                    } else {
                        zt
                    }
                }
                _ => {
                    // 1-tile exclave.
                    if zt == zl || zt == zr {
                        zt
                    } else if zb == zr || zb == zl {
                        zb
                    } else {
                        zt
                    }
                }
            };
            self.tiles[i].zone = new_zone;
            self.tiles[i].ex_fix = true;
            fixed_count += 1;
        }
        fixed_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbor_links() {
        let grid = TileGrid::new(4, 3, 1);
        assert_eq!(grid.len(), 12);
        let corner = grid.find(Pos::new(0, 0, 0)).unwrap();
        assert_eq!(grid.tile(corner).orth.len(), 2);
        assert_eq!(grid.tile(corner).all.len(), 3);
        let mid = grid.find(Pos::new(1, 1, 0)).unwrap();
        assert_eq!(grid.tile(mid).orth.len(), 4);
        assert_eq!(grid.tile(mid).all.len(), 8);
        assert_eq!(
            grid.tile(mid).neighbor(Dir::T),
            grid.find(Pos::new(1, 0, 0))
        );
        assert_eq!(
            grid.tile(mid).neighbor(Dir::BR),
            grid.find(Pos::new(2, 2, 0))
        );
    }

    #[test]
    fn offset_lookup() {
        let grid = TileGrid::new(5, 5, 1);
        let start = grid.find(Pos::new(2, 2, 0)).unwrap();
        assert_eq!(grid.neighbor_by_offset(start, 0, 0), Some(start));
        assert_eq!(
            grid.neighbor_by_offset(start, -2, -2),
            grid.find(Pos::new(0, 0, 0))
        );
        assert_eq!(grid.neighbor_by_offset(start, 3, 0), None);
    }

    #[test]
    fn id_order_is_row_major() {
        let grid = TileGrid::new(3, 2, 2);
        let a = grid.find(Pos::new(2, 0, 0)).unwrap();
        let b = grid.find(Pos::new(0, 1, 0)).unwrap();
        let c = grid.find(Pos::new(0, 0, 1)).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn exclave_single_tile() {
        let mut grid = TileGrid::new(5, 5, 1);
        for i in 0..grid.len() {
            grid.set_zone(TileId(i as u32), Some(0));
        }
        let lonely = grid.find(Pos::new(2, 2, 0)).unwrap();
        grid.set_zone(lonely, Some(1));
        assert!(!grid.fix_exclaves());
        assert_eq!(grid.zone_of(lonely), Some(0));
        assert!(grid.tile(lonely).ex_fix);
        assert!(grid.fix_exclaves());
    }
}
