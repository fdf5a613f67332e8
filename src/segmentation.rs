//! Region segmentation primitives: flood fill, weighted K-means, grid
//! bucketing, and the ASCII fixture tooling used by the tests.

use crate::grid::{TileGrid, TileId};
use crate::pos::{int_sqrt, Pos};
use crate::region::Region;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// One K-means cluster request.
#[derive(Clone, Debug)]
pub struct KMeansItem {
    pub initial_centroid: TileId,
    pub area_hint: i64,
    pub inside_weight: i64,
    pub outside_weight: i64,
    pub extra_mass_point: Option<TileId>,
    /// Extra anchor mass, in tiles.
    pub extra_mass_weight: i64,
}

impl KMeansItem {
    pub fn new(initial_centroid: TileId, area_hint: i64) -> Self {
        KMeansItem {
            initial_centroid,
            area_hint,
            inside_weight: 2,
            outside_weight: 3,
            extra_mass_point: None,
            extra_mass_weight: 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct KMeansSettings {
    pub items: Vec<KMeansItem>,
}

#[derive(Debug)]
pub struct KMeansError(pub String);

impl std::fmt::Display for KMeansError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "k-means failure: {}", self.0)
    }
}

impl std::error::Error for KMeansError {}

const VERY_BAD_PI: i64 = 314;

/// Radius (in 1/1000 tile) of a circle of the given area.
pub fn radius_promille(area: i64) -> i64 {
    int_sqrt(area * 1_000_000 * 100 / VERY_BAD_PI)
}

/// Inverse of [`radius_promille`].
pub fn area_from_radius(radius_promille: i64) -> i64 {
    radius_promille * radius_promille * VERY_BAD_PI / 100 / 1_000_000
}

// ---------------------------------------------------------------------------

/// BFS partition of a region into connected components. With `hint` the
/// component containing the hint tile comes first.
pub fn split_by_flood_fill(
    grid: &TileGrid,
    region: &Region,
    diagonal: bool,
    hint: Option<TileId>,
) -> Vec<Region> {
    if region.is_empty() {
        return Vec::new();
    }
    if let Some(h) = hint {
        assert!(region.contains(h), "flood fill hint outside the region");
    }

    let mut result = Vec::new();
    let mut remain = region.clone();
    let mut visited = Region::new();
    let mut hint = hint;

    while !remain.is_empty() {
        let start = hint.take().unwrap_or_else(|| remain.at(0));
        let mut current: Vec<TileId> = Vec::new();
        let mut edge: Vec<TileId> = Vec::new();
        visited.insert(start);
        current.push(start);
        edge.push(start);

        while !edge.is_empty() {
            let next_edge = std::mem::take(&mut edge);
            for cell in next_edge {
                for &n in grid.tile(cell).neighbors_list(diagonal) {
                    if visited.contains(n) || !region.contains(n) {
                        continue;
                    }
                    visited.insert(n);
                    current.push(n);
                    edge.push(n);
                }
            }
        }
        let component = Region::from_unsorted(current);
        remain.erase_region(&component);
        result.push(component);
    }
    result
}

// ---------------------------------------------------------------------------

struct Cluster {
    inside_weight: i64,
    outside_weight: i64,
    extra_mass_point: Pos,
    extra_mass_weight: i64,
    centroid: Pos,
    mass_x: i64,
    mass_y: i64,
    points_count: i64,
    radius_promille: i64,
    points: Vec<TileId>,
}

impl Cluster {
    fn distance_to(&self, p: Pos) -> i64 {
        let dx = (self.centroid.x - p.x) as i64 * 1000;
        let dy = (self.centroid.y - p.y) as i64 * 1000;
        let linear = int_sqrt(dx * dx + dy * dy);
        let to_circumference = linear - self.radius_promille;
        if to_circumference <= 0 {
            linear * self.inside_weight
        } else {
            to_circumference * self.outside_weight + self.radius_promille * self.inside_weight
        }
    }

    fn clear_mass(&mut self) {
        self.mass_x = self.extra_mass_weight * self.extra_mass_point.x as i64;
        self.mass_y = self.extra_mass_weight * self.extra_mass_point.y as i64;
        self.points_count = self.extra_mass_weight;
        self.points.clear();
    }

    fn add_to_mass(&mut self, pos: Pos) {
        self.mass_x += pos.x as i64;
        self.mass_y += pos.y as i64;
        self.points_count += 1;
    }

    fn finalize_mass(&mut self) -> Result<(), KMeansError> {
        if self.points_count == 0 {
            return Err(KMeansError("cluster lost all points".to_string()));
        }
        self.centroid = Pos::new(
            (self.mass_x / self.points_count) as i32,
            (self.mass_y / self.points_count) as i32,
            self.centroid.z,
        );
        Ok(())
    }
}

/// Weighted K-means split. The primary segmentation primitive: each cluster
/// scores a tile by linear distance inside its promille circle and by a
/// heavier weighted overshoot outside it, so area hints translate into
/// territory.
pub fn split_by_k_ext(
    grid: &TileGrid,
    region: &Region,
    settings: &KMeansSettings,
    iter_limit: usize,
) -> Result<Vec<Region>, KMeansError> {
    if region.is_empty() || settings.items.is_empty() {
        return Ok(Vec::new());
    }
    if settings.items.len() == 1 {
        return Ok(vec![region.clone()]);
    }

    let z = grid.pos(region.at(0)).z;
    let mut clusters: Vec<Cluster> = settings
        .items
        .iter()
        .map(|item| {
            debug_assert!(item.area_hint > 0);
            Cluster {
                inside_weight: item.inside_weight,
                outside_weight: item.outside_weight,
                extra_mass_point: item
                    .extra_mass_point
                    .map(|t| grid.pos(t))
                    .unwrap_or(Pos::new(0, 0, z)),
                extra_mass_weight: if item.extra_mass_point.is_some() {
                    item.extra_mass_weight
                } else {
                    0
                },
                centroid: grid.pos(item.initial_centroid),
                mass_x: 0,
                mass_y: 0,
                points_count: 0,
                // Halving the circle radius behaves better than the exact
                // value when clusters crowd each other.
                radius_promille: radius_promille(item.area_hint) / 2,
                points: Vec::with_capacity(region.len() / settings.items.len()),
            }
        })
        .collect();

    let mut nearest_index = vec![usize::MAX; region.len()];

    for iter in 0..iter_limit {
        let last = iter + 1 == iter_limit;

        // Repeated or out-of-region centroids get reassigned to distinct
        // closest member tiles before the assignment pass.
        let mut used: BTreeSet<Pos> = BTreeSet::new();
        let mut collided = false;
        for cluster in &clusters {
            let in_region = grid
                .find(cluster.centroid)
                .map(|t| region.contains(t))
                .unwrap_or(false);
            if !in_region || !used.insert(cluster.centroid) {
                collided = true;
                break;
            }
        }
        if collided {
            let mut pool = region.clone();
            for cluster in &mut clusters {
                let tile = pool
                    .find_closest(grid, cluster.centroid)
                    .ok_or_else(|| KMeansError("more clusters than tiles".to_string()))?;
                pool.erase(tile);
                cluster.centroid = grid.pos(tile);
            }
        }

        let mut done = true;
        for (i, tile) in region.iter().enumerate() {
            let pos = grid.pos(tile);
            let mut best = clusters[0].distance_to(pos);
            let mut best_idx = 0usize;
            for (k, cluster) in clusters.iter().enumerate().skip(1) {
                let dist = cluster.distance_to(pos);
                if dist < best {
                    best = dist;
                    best_idx = k;
                }
            }
            if nearest_index[i] != best_idx {
                nearest_index[i] = best_idx;
                done = false;
            }
        }

        for cluster in &mut clusters {
            cluster.clear_mass();
        }
        let collect_points = done || last;
        for (i, tile) in region.iter().enumerate() {
            let pos = grid.pos(tile);
            let cluster = &mut clusters[nearest_index[i]];
            cluster.add_to_mass(pos);
            if collect_points {
                cluster.points.push(tile);
            }
        }
        for cluster in &mut clusters {
            cluster.finalize_mass()?;
        }
        if done {
            break;
        }
    }

    Ok(clusters
        .into_iter()
        .map(|c| Region::from_unsorted(c.points))
        .collect())
}

/// Split into `K = ceil(|region| / max_area)` equal-hint clusters.
pub fn split_by_max_area(
    grid: &TileGrid,
    region: &Region,
    max_area: usize,
    iter_limit: usize,
) -> Result<Vec<Region>, KMeansError> {
    let area = region.len();
    if area == 0 {
        return Ok(Vec::new());
    }
    let k = (area + max_area - 1) / max_area;
    split_by_k(grid, region, k, iter_limit)
}

pub fn split_by_k(
    grid: &TileGrid,
    region: &Region,
    k: usize,
    iter_limit: usize,
) -> Result<Vec<Region>, KMeansError> {
    let area = region.len();
    if area == 0 {
        return Ok(Vec::new());
    }
    if k <= 1 {
        return Ok(vec![region.clone()]);
    }
    let mut settings = KMeansSettings::default();
    for i in 0..k {
        settings.items.push(KMeansItem::new(
            region.at(i * area / k),
            (area / k) as i64,
        ));
    }
    split_by_k_ext(grid, region, &settings, iter_limit)
}

// ---------------------------------------------------------------------------

/// Bucket the region into `(width, height)` rectangles over its bounding
/// box. Rows of columns; buckets may be empty.
pub fn split_by_grid(
    grid: &TileGrid,
    region: &Region,
    width: i32,
    height: i32,
) -> Vec<Vec<Region>> {
    if region.is_empty() {
        return Vec::new();
    }
    let boundary = region.boundary(grid).expect("non-empty region");
    let cols = (boundary.width + width as usize - 1) / width as usize;
    let rows = (boundary.height + height as usize - 1) / height as usize;

    let mut buckets: Vec<Vec<Region>> = vec![vec![Region::new(); cols]; rows];
    for tile in region.iter() {
        let offset = grid.pos(tile) - boundary.top_left;
        let gx = (offset.x / width) as usize;
        let gy = (offset.y / height) as usize;
        buckets[gy][gx].insert(tile);
    }
    buckets
}

/// Flatten grid buckets, keeping only those with at least `threshold` tiles.
pub fn reduce_grid(buckets: Vec<Vec<Region>>, threshold: usize) -> Vec<Region> {
    let mut result = Vec::new();
    for row in buckets {
        for bucket in row {
            if !bucket.is_empty() && bucket.len() >= threshold {
                result.push(bucket);
            }
        }
    }
    result
}

/// Seed a K-means request by bucketing the region into roughly `k` grid
/// cells and using the bucket centroids as initial cluster centers.
pub fn guess_kmeans_by_grid(
    grid: &TileGrid,
    region: &Region,
    k: usize,
) -> Result<KMeansSettings, KMeansError> {
    if region.is_empty() || k == 0 {
        return Ok(KMeansSettings::default());
    }
    let boundary = region.boundary(grid).expect("non-empty region");
    let mut grid_side = int_sqrt(k as i64) as usize;
    if grid_side * grid_side < k {
        grid_side += 1;
    }
    let mut side_x = grid_side;
    let mut side_y = grid_side;

    let calc_cells = |w: i32, h: i32| -> usize {
        let mut coords: BTreeSet<(i32, i32)> = BTreeSet::new();
        for tile in region.iter() {
            let offset = grid.pos(tile) - boundary.top_left;
            coords.insert((offset.x / w, offset.y / h));
        }
        coords.len()
    };

    let mut cell_w = ((boundary.width + grid_side - 1) / side_x) as i32;
    let mut cell_h = ((boundary.height + grid_side - 1) / side_y) as i32;
    let mut cell_count = calc_cells(cell_w, cell_h);
    while cell_count < k {
        if side_x == boundary.width && side_y == boundary.height {
            return Err(KMeansError(
                "cannot derive enough grid cells for the requested k".to_string(),
            ));
        }
        if side_x < boundary.width {
            side_x += 1;
        }
        if side_y < boundary.height {
            side_y += 1;
        }
        cell_w = ((boundary.width + grid_side - 1) / side_x) as i32;
        cell_h = ((boundary.height + grid_side - 1) / side_y) as i32;
        debug_assert!(cell_w > 0 && cell_h > 0);
        cell_count = calc_cells(cell_w, cell_h);
    }

    let reduced = reduce_grid(split_by_grid(grid, region, cell_w, cell_h), 0);
    debug_assert_eq!(reduced.len(), cell_count);

    let mut settings = KMeansSettings::default();
    for i in 0..k {
        let grid_index = i * reduced.len() / k;
        let centroid = reduced[grid_index]
            .make_centroid(grid, true)
            .expect("reduced buckets are non-empty");
        settings.items.push(KMeansItem::new(centroid, 100));
    }
    Ok(settings)
}

// ---------------------------------------------------------------------------

/// Multiple labeled regions sharing one rectangular window, serialized as an
/// ASCII picture (`.` background, one character per region). Used by tests
/// and debug dumps.
pub struct AsciiRegionMap {
    regions: BTreeMap<char, Region>,
    top_left: TileId,
    width: i32,
    height: i32,
}

pub const REGION_LABELS: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

impl AsciiRegionMap {
    pub fn new(grid: &TileGrid, z: i32) -> Self {
        AsciiRegionMap {
            regions: BTreeMap::new(),
            top_left: grid.find(Pos::new(0, 0, z)).expect("plane origin"),
            width: grid.width,
            height: grid.height,
        }
    }

    /// Parse a picture. ASCII whitespace in the input is ignored so fixtures
    /// can be wrapped in source code.
    pub fn load(grid: &TileGrid, z: i32, picture: &str) -> Self {
        let mut map = AsciiRegionMap::new(grid, z);
        map.load_into(grid, picture, '.');
        map
    }

    pub fn load_into(&mut self, grid: &TileGrid, picture: &str, background: char) {
        let cells: Vec<char> = picture.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        assert_eq!(
            cells.len(),
            (self.width * self.height) as usize,
            "picture size must match the map window"
        );
        self.regions.clear();
        for y in 0..self.height {
            for x in 0..self.width {
                let c = cells[(y * self.width + x) as usize];
                if c == background {
                    continue;
                }
                let tile = grid
                    .neighbor_by_offset(self.top_left, x, y)
                    .expect("window cell in bounds");
                self.regions.entry(c).or_default().insert(tile);
            }
        }
    }

    pub fn region(&self, label: char) -> Region {
        self.regions.get(&label).cloned().unwrap_or_default()
    }

    pub fn set_region(&mut self, label: char, region: Region) {
        self.regions.insert(label, region);
    }

    /// Assign labels `0-9A-Za-z` to a region list in order.
    pub fn set_list(&mut self, list: &[Region]) {
        assert!(list.len() <= REGION_LABELS.len(), "too many regions to label");
        self.regions.clear();
        for (i, region) in list.iter().enumerate() {
            self.regions.insert(REGION_LABELS[i] as char, region.clone());
        }
    }

    /// Render back to a picture with rows separated by newlines. Panics on
    /// overlapping regions, which in a test is exactly the failure wanted.
    pub fn dump(&self, grid: &TileGrid, background: char) -> String {
        let mut out = String::with_capacity((self.width * self.height + self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let tile = grid
                    .neighbor_by_offset(self.top_left, x, y)
                    .expect("window cell in bounds");
                let mut c = background;
                for (&label, region) in &self.regions {
                    if region.contains(tile) {
                        assert_eq!(c, background, "regions overlap at ({x}, {y})");
                        c = label;
                    }
                }
                out.push(c);
            }
            out.push('\n');
        }
        out
    }
}

/// Normalize an expected-picture literal: strip whitespace, then re-wrap to
/// `width` columns, so fixtures compare equal to [`AsciiRegionMap::dump`].
pub fn picture_to_lines(picture: &str, width: usize) -> String {
    let cells: Vec<char> = picture.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let mut out = String::new();
    for row in cells.chunks(width) {
        out.extend(row.iter());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn flood_fill_single_block() {
        // A 2x2 block floods to exactly one component of 4 tiles.
        let grid = TileGrid::new(5, 5, 1);
        let map = AsciiRegionMap::load(
            &grid,
            0,
            ".....
             .OO..
             .OO..
             .....
             .....",
        );
        let parts = split_by_flood_fill(&grid, &map.region('O'), true, None);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len(), 4);
    }

    #[test]
    fn flood_fill_two_components() {
        let grid = TileGrid::new(5, 5, 1);
        let map = AsciiRegionMap::load(
            &grid,
            0,
            "O....
             O.OO.
             O.OO.
             O....
             O....",
        );
        let object = map.region('O');
        let parts = split_by_flood_fill(&grid, &object, true, None);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 5);
        assert_eq!(parts[1].len(), 4);

        let mut united = Region::new();
        for p in &parts {
            united.insert_region(p);
        }
        assert_eq!(united, object);
    }

    #[test]
    fn kmeans_seven_fixture() {
        let grid = TileGrid::new(18, 10, 1);
        let object_picture = "...OOOOOOOOOOOOOO.
                              ...OOOOOOOOOOOOOO.
                              ....OOOOOOOOOOOOO.
                              ....OOOOOOOOOOOOO.
                              ....OOOOOOOOOOOOO.
                              ....OOOOOOOOOOOOO.
                              .....OOOOOOOOOOOO.
                              .....OOOOOOOOOOOO.
                              .....OOOOOOOOO....
                              .....OOO..........";
        let parts_picture = "...00003333111111.
                             ...00663333111111.
                             ....6663334411111.
                             ....6663344441111.
                             ....7777444422222.
                             ....7775555222222.
                             .....885555522222.
                             .....899555522222.
                             .....999955522....
                             .....999..........";
        let start_picture = "...0..........1...
                             ............2.....
                             ..........3.......
                             .........4........
                             ........5.........
                             ......6...........
                             ......7...........
                             .....8............
                             .....9............
                             ..................";

        let object_map = AsciiRegionMap::load(&grid, 0, object_picture);
        let object = object_map.region('O');

        let start_map = AsciiRegionMap::load(&grid, 0, start_picture);
        let mut settings = KMeansSettings::default();
        for i in 0..10 {
            let label = REGION_LABELS[i] as char;
            let start = start_map.region(label);
            if start.is_empty() {
                continue;
            }
            settings.items.push(KMeansItem::new(start.at(0), 100));
        }
        assert_eq!(settings.items.len(), 10);

        let parts = split_by_k_ext(&grid, &object, &settings, 100).unwrap();

        let mut result_map = AsciiRegionMap::new(&grid, 0);
        result_map.set_list(&parts);
        assert_eq!(
            result_map.dump(&grid, '.'),
            picture_to_lines(parts_picture, 18)
        );

        let mut united = Region::new();
        for p in &parts {
            united.insert_region(p);
        }
        assert_eq!(united, object);
    }

    #[test]
    fn grid_split_small() {
        let grid = TileGrid::new(5, 5, 1);
        let map = AsciiRegionMap::load(
            &grid,
            0,
            ".OOO.
             OOOOO
             OOOOO
             OOOOO
             .OOO.",
        );
        let object = map.region('O');

        let parts = reduce_grid(split_by_grid(&grid, &object, 3, 3), 0);
        let mut result_map = AsciiRegionMap::new(&grid, 0);
        result_map.set_list(&parts);
        assert_eq!(
            result_map.dump(&grid, '.'),
            picture_to_lines(
                ".001.
                 00011
                 00011
                 22233
                 .223.",
                5
            )
        );

        let thresholded = reduce_grid(split_by_grid(&grid, &object, 3, 3), 5);
        let mut result_map = AsciiRegionMap::new(&grid, 0);
        result_map.set_list(&thresholded);
        assert_eq!(
            result_map.dump(&grid, '.'),
            picture_to_lines(
                ".001.
                 00011
                 00011
                 222..
                 .22..",
                5
            )
        );
    }

    #[test]
    fn grid_guess_full_rect() {
        let grid = TileGrid::new(13, 8, 1);
        let all = grid.all_region();
        let settings = guess_kmeans_by_grid(&grid, &all, 8).unwrap();
        let actual: Vec<Pos> = settings
            .items
            .iter()
            .map(|item| grid.pos(item.initial_centroid))
            .collect();
        let expected = vec![
            Pos::new(2, 1, 0),
            Pos::new(7, 1, 0),
            Pos::new(11, 1, 0),
            Pos::new(2, 4, 0),
            Pos::new(7, 4, 0),
            Pos::new(11, 4, 0),
            Pos::new(2, 6, 0),
            Pos::new(7, 6, 0),
        ];
        assert_eq!(actual, expected);

        let mut settings = settings;
        let areas = [36, 37, 41, 37, 37, 42, 30, 22];
        for (item, area) in settings.items.iter_mut().zip(areas) {
            item.area_hint = area;
        }
        assert!(split_by_k_ext(&grid, &all, &settings, 100).is_ok());
    }

    #[test]
    fn kmeans_handles_duplicate_centroids() {
        let grid = TileGrid::new(20, 18, 1);
        let map = AsciiRegionMap::load(
            &grid,
            0,
            ".........OO.........
             .OOOOOOOOOOO........
             OOOOOOOOOOOOO.......
             OOOOOOOOOOOOOO......
             OOOOOOOOOOOOOO......
             OOOOOOOOOOOOOOO.....
             OOOOOOOOOOOOOOOO....
             OOOOOOOOOOOOOOOOO...
             OOOOOOOOOOOOOOOOOO..
             OOOOOOOOOOOOOOOOOO..
             OOOOOOOOOOOOOOOOO...
             OOOOOOOOOOOOOOOOO...
             ...OOOOOOOOOOOOOO...
             .....OOOOOOOOOOO....
             .......OOOOOOOOO....
             .........OOOOOO.....
             ...........OOOO.....
             ....................",
        );
        let object = map.region('O');
        let mut settings = guess_kmeans_by_grid(&grid, &object, 14).unwrap();
        let areas = [37, 37, 37, 42, 42, 42, 41, 36, 37, 36, 42, 42, 46, 22];
        for (item, area) in settings.items.iter_mut().zip(areas) {
            item.area_hint = area;
        }
        assert!(split_by_k_ext(&grid, &object, &settings, 100).is_ok());

        // Duplicate centroid gets reassigned instead of panicking.
        settings.items[1].initial_centroid = settings.items[0].initial_centroid;
        assert!(split_by_k_ext(&grid, &object, &settings, 100).is_ok());
    }

    #[test]
    fn split_by_max_area_ceiling() {
        let grid = TileGrid::new(10, 10, 1);
        let all = grid.all_region();
        let parts = split_by_max_area(&grid, &all, 30, 100).unwrap();
        assert_eq!(parts.len(), 4); // ceil(100 / 30)
        let mut united = Region::new();
        for p in &parts {
            assert!(!p.is_empty());
            united.insert_region(p);
        }
        assert_eq!(united, all);
    }
}
