//! Sorted flat set of tiles plus the set algebra the whole generator is
//! built on. Invariants: always sorted, never a duplicate. Union, diff and
//! intersection are O(n + m) merges over the sorted storage.

use crate::grid::{TileGrid, TileId};
use crate::pos::{pos_distance, Pos};
use itertools::Itertools;

/// Threshold below which bulk insert/erase loops over single elements
/// instead of doing a full merge.
const SMALL_SET: usize = 16;

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Region {
    data: Vec<TileId>,
}

#[derive(Clone, Copy, Debug)]
pub struct BoundaryRect {
    pub top_left: Pos,
    pub bottom_right: Pos,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new() -> Self {
        Region { data: Vec::new() }
    }

    /// Wrap a list that is already sorted and deduplicated.
    pub fn from_sorted(data: Vec<TileId>) -> Self {
        debug_assert!(data.windows(2).all(|w| w[0] < w[1]));
        Region { data }
    }

    pub fn from_unsorted(data: Vec<TileId>) -> Self {
        Region {
            data: data.into_iter().sorted().dedup().collect(),
        }
    }

    pub fn from_iter_unsorted(iter: impl IntoIterator<Item = TileId>) -> Self {
        Region::from_unsorted(iter.into_iter().collect())
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn reserve(&mut self, extra: usize) {
        self.data.reserve(extra);
    }

    pub fn iter(&self) -> impl Iterator<Item = TileId> + '_ {
        self.data.iter().copied()
    }

    pub fn as_slice(&self) -> &[TileId] {
        &self.data
    }

    #[inline]
    pub fn at(&self, index: usize) -> TileId {
        self.data[index]
    }

    pub fn first(&self) -> Option<TileId> {
        self.data.first().copied()
    }

    #[inline]
    pub fn contains(&self, id: TileId) -> bool {
        self.data.binary_search(&id).is_ok()
    }

    /// Membership check for an optional neighbor link; `None` is never a
    /// member.
    #[inline]
    pub fn contains_opt(&self, id: Option<TileId>) -> bool {
        match id {
            Some(id) => self.contains(id),
            None => false,
        }
    }

    pub fn insert(&mut self, id: TileId) {
        match self.data.binary_search(&id) {
            Ok(_) => {}
            Err(pos) => self.data.insert(pos, id),
        }
    }

    pub fn erase(&mut self, id: TileId) {
        if let Ok(pos) = self.data.binary_search(&id) {
            self.data.remove(pos);
        }
    }

    pub fn insert_region(&mut self, other: &Region) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.data = other.data.clone();
            return;
        }
        if other.len() <= SMALL_SET {
            self.data.reserve(other.len());
            for id in other.iter() {
                self.insert(id);
            }
            return;
        }
        self.data = merge_union(&self.data, &other.data);
    }

    pub fn insert_slice(&mut self, ids: &[TileId]) {
        if ids.len() <= SMALL_SET {
            for &id in ids {
                self.insert(id);
            }
        } else {
            self.insert_region(&Region::from_unsorted(ids.to_vec()));
        }
    }

    pub fn erase_region(&mut self, other: &Region) {
        if other.is_empty() || self.is_empty() {
            return;
        }
        if other.len() <= SMALL_SET {
            for id in other.iter() {
                self.erase(id);
            }
            return;
        }
        self.data = merge_diff(&self.data, &other.data);
    }

    pub fn union_with(&self, other: &Region) -> Region {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        Region {
            data: merge_union(&self.data, &other.data),
        }
    }

    pub fn intersect_with(&self, other: &Region) -> Region {
        if self.is_empty() || other.is_empty() {
            return Region::new();
        }
        Region {
            data: merge_intersect(&self.data, &other.data),
        }
    }

    pub fn diff_with(&self, other: &Region) -> Region {
        if self.is_empty() {
            return Region::new();
        }
        if other.is_empty() {
            return self.clone();
        }
        Region {
            data: merge_diff(&self.data, &other.data),
        }
    }

    // -- geometry ----------------------------------------------------------

    /// Tiles of the region missing at least one in-region neighbor.
    pub fn make_inner_edge(&self, grid: &TileGrid, diagonal: bool) -> Region {
        self.make_inner_and_outer_edge(grid, diagonal).0
    }

    /// Out-of-region neighbors of the region.
    pub fn make_outer_edge(&self, grid: &TileGrid, diagonal: bool) -> Region {
        self.make_inner_and_outer_edge(grid, diagonal).1
    }

    pub fn make_inner_and_outer_edge(&self, grid: &TileGrid, diagonal: bool) -> (Region, Region) {
        let mut inner = Region::new();
        let mut outer = Region::new();
        for id in self.iter() {
            let tile = grid.tile(id);
            let surrounded = if diagonal {
                tile.all.len() == 8 && tile.all.iter().all(|&n| self.contains(n))
            } else {
                tile.orth.len() == 4 && tile.orth.iter().all(|&n| self.contains(n))
            };
            if surrounded {
                continue;
            }
            inner.insert(id);
            for &n in tile.neighbors_list(diagonal) {
                if !self.contains(n) {
                    outer.insert(n);
                }
            }
        }
        (inner, outer)
    }

    /// Integer mean of member positions. With `ensure_inbounds` the result
    /// is snapped to the closest member. Either way the pick is refined over
    /// the 8-neighborhood to minimize the summed distance to all members.
    pub fn make_centroid(&self, grid: &TileGrid, ensure_inbounds: bool) -> Option<TileId> {
        if self.is_empty() {
            return None;
        }
        let z = grid.pos(self.at(0)).z;
        let mut sum_x = 0i64;
        let mut sum_y = 0i64;
        for id in self.iter() {
            let pos = grid.pos(id);
            sum_x += pos.x as i64;
            sum_y += pos.y as i64;
        }
        let size = self.len() as i64;
        let mean = Pos::new((sum_x / size) as i32, (sum_y / size) as i32, z);
        let mut centroid = grid
            .find(mean)
            .expect("mean of member positions is inside the grid");
        if ensure_inbounds && !self.contains(centroid) {
            centroid = self.find_closest(grid, mean)?;
        }

        let sum_distance = |tile: TileId| -> i64 {
            let tile_pos = grid.pos(tile);
            self.iter().map(|id| pos_distance(tile_pos, grid.pos(id), 100)).sum()
        };
        let mut best = sum_distance(centroid);
        for &n in &grid.tile(centroid).all.clone() {
            if ensure_inbounds && !self.contains(n) {
                continue;
            }
            let alt = sum_distance(n);
            if alt < best {
                best = alt;
                centroid = n;
            }
        }
        Some(centroid)
    }

    /// Member tile closest to `pos` (the tile itself when it is a member).
    pub fn find_closest(&self, grid: &TileGrid, pos: Pos) -> Option<TileId> {
        if self.is_empty() {
            return None;
        }
        if let Some(id) = grid.find(pos) {
            if self.contains(id) {
                return Some(id);
            }
        }
        self.iter().min_by_key(|&id| pos_distance(pos, grid.pos(id), 100))
    }

    pub fn boundary(&self, grid: &TileGrid) -> Option<BoundaryRect> {
        let first = self.first()?;
        let mut top_left = grid.pos(first);
        let mut bottom_right = top_left;
        for id in self.iter() {
            let pos = grid.pos(id);
            top_left.x = top_left.x.min(pos.x);
            top_left.y = top_left.y.min(pos.y);
            bottom_right.x = bottom_right.x.max(pos.x);
            bottom_right.y = bottom_right.y.max(pos.y);
        }
        Some(BoundaryRect {
            top_left,
            bottom_right,
            width: (1 + bottom_right.x - top_left.x) as usize,
            height: (1 + bottom_right.y - top_left.y) as usize,
        })
    }
}

impl std::ops::Index<usize> for Region {
    type Output = TileId;
    fn index(&self, index: usize) -> &TileId {
        &self.data[index]
    }
}

impl<'a> IntoIterator for &'a Region {
    type Item = TileId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, TileId>>;
    fn into_iter(self) -> Self::IntoIter {
        self.data.iter().copied()
    }
}

fn merge_union(a: &[TileId], b: &[TileId]) -> Vec<TileId> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

fn merge_intersect(a: &[TileId], b: &[TileId]) -> Vec<TileId> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn merge_diff(a: &[TileId], b: &[TileId]) -> Vec<TileId> {
    let mut out = Vec::with_capacity(a.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_of(ids: &[u32]) -> Region {
        Region::from_unsorted(ids.iter().map(|&i| TileId(i)).collect())
    }

    #[test]
    fn set_algebra() {
        let a = region_of(&[1, 2, 3, 5, 8]);
        let b = region_of(&[2, 3, 4, 8, 9]);

        let union = a.union_with(&b);
        let inter = a.intersect_with(&b);
        let diff = a.diff_with(&b);

        assert_eq!(union.len(), a.len() + b.len() - inter.len());
        assert_eq!(union.as_slice().len(), 7);
        assert_eq!(inter.as_slice(), &[TileId(2), TileId(3), TileId(8)]);
        assert_eq!(diff.as_slice(), &[TileId(1), TileId(5)]);
        // (A ∪ B) \ B == A \ B
        assert_eq!(union.diff_with(&b), diff);
    }

    #[test]
    fn insert_erase_keep_sorted() {
        let mut r = Region::new();
        for id in [5u32, 1, 9, 1, 3] {
            r.insert(TileId(id));
        }
        assert_eq!(r.as_slice(), &[TileId(1), TileId(3), TileId(5), TileId(9)]);
        r.erase(TileId(5));
        r.erase(TileId(5));
        assert_eq!(r.len(), 3);

        let mut big = region_of(&(0..100).collect::<Vec<_>>());
        big.erase_region(&region_of(&(0..50).collect::<Vec<_>>()));
        assert_eq!(big.len(), 50);
        assert_eq!(big.at(0), TileId(50));
    }

    #[test]
    fn edges_on_square() {
        let grid = TileGrid::new(6, 6, 1);
        // 3x3 block at (1..3, 1..3)
        let mut block = Region::new();
        for y in 1..4 {
            for x in 1..4 {
                block.insert(grid.find(Pos::new(x, y, 0)).unwrap());
            }
        }
        let (inner, outer) = block.make_inner_and_outer_edge(&grid, false);
        assert_eq!(inner.len(), 8); // all but the center
        assert_eq!(outer.len(), 12); // orthogonal ring
        let (inner_d, outer_d) = block.make_inner_and_outer_edge(&grid, true);
        assert_eq!(inner_d.len(), 8);
        assert_eq!(outer_d.len(), 16); // full ring including corners
    }

    #[test]
    fn centroid_and_closest() {
        let grid = TileGrid::new(10, 10, 1);
        let mut r = Region::new();
        for y in 2..5 {
            for x in 2..5 {
                r.insert(grid.find(Pos::new(x, y, 0)).unwrap());
            }
        }
        let centroid = r.make_centroid(&grid, true).unwrap();
        assert_eq!(grid.pos(centroid), Pos::new(3, 3, 0));

        let closest = r.find_closest(&grid, Pos::new(9, 9, 0)).unwrap();
        assert_eq!(grid.pos(closest), Pos::new(4, 4, 0));
    }

    #[test]
    fn empty_region_queries() {
        let grid = TileGrid::new(3, 3, 1);
        let r = Region::new();
        assert!(r.make_centroid(&grid, true).is_none());
        assert!(r.find_closest(&grid, Pos::new(1, 1, 0)).is_none());
        assert!(r.boundary(&grid).is_none());
    }
}
