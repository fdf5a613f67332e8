//! Object placement: fit every generated object of a zone into its
//! segments, respecting footprint masks, guard geometry, heat gradients and
//! collisions, with an iterative shift ladder for near misses.

use crate::error::FailureKind;
use crate::grid::{Dir, TileGrid, TileId};
use crate::guard::MapGuard;
use crate::objects::generator::radius_vector;
use crate::objects::{ObjectKind, ZoneObjectGeneration, ZoneObjectItem};
use crate::output::GeneratedMap;
use crate::pos::Pos;
use crate::region::Region;
use crate::region_edge::{CollisionResult, RegionWithEdge};
use crate::segmentation;
use crate::template::ZoneObjectType;
use crate::zone::{NodeLevel, TileZone};
use fnv::FnvHashMap;
use log::{debug, warn};
use std::collections::BTreeMap;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PlacementResult {
    Success,
    InsufficientSpaceInSource,
    EstimateOccupiedFailure,
    InvalidShiftValue,
    InvalidCollisionInputs,
    CollisionImpossibleShift,
    CollisionHasShift,
    RunOutOfShiftRetries,
    ShiftLoopDetected,
    Retry,
}

/// One object during placement: the generated item plus its current
/// footprint estimate.
pub struct PlacedObject {
    pub item: ZoneObjectItem,
    pub radius_vector: Option<Pos>,
    pub abs_pos: Option<TileId>,
    pub guard_abs_pos: Option<TileId>,
    pub center_offset: Option<Pos>,

    pub reward_area: Region,
    pub extra_obstacles: Region,
    pub occupied_area: Region,
    pub danger_zone: Region,
    pub occupied_with_danger: Region,
    pub pass_around_edge: Region,
    pub all_area: Region,

    pub placed_heat: i32,
    pub segment_fragment_index: usize,
    pub estimated_area: usize,
    pub abs_pos_valid: bool,
}

impl PlacedObject {
    fn new(item: ZoneObjectItem) -> Self {
        PlacedObject {
            item,
            radius_vector: None,
            abs_pos: None,
            guard_abs_pos: None,
            center_offset: None,
            reward_area: Region::new(),
            extra_obstacles: Region::new(),
            occupied_area: Region::new(),
            danger_zone: Region::new(),
            occupied_with_danger: Region::new(),
            pass_around_edge: Region::new(),
            all_area: Region::new(),
            placed_heat: 0,
            segment_fragment_index: 0,
            estimated_area: 0,
            abs_pos_valid: false,
        }
    }

    /// Compute all derived regions for the object anchored at `pos`.
    /// Fails (false) when any mask cell leaves the map or the footprint
    /// touches the grid border.
    pub fn estimate_occupied(
        &mut self,
        grid: &TileGrid,
        distances: &FnvHashMap<TileId, i64>,
        pos: TileId,
    ) -> bool {
        self.reward_area.clear();
        self.extra_obstacles.clear();
        self.occupied_area.clear();
        self.danger_zone.clear();
        self.occupied_with_danger.clear();
        self.pass_around_edge.clear();
        self.all_area.clear();
        self.guard_abs_pos = None;
        self.abs_pos_valid = false;

        let abs_pos = match self.center_offset {
            Some(offset) => match grid.neighbor_by_offset(pos, -offset.x, -offset.y) {
                Some(tile) => tile,
                None => return false,
            },
            None => pos,
        };
        self.abs_pos = Some(abs_pos);

        let visit_mask = &self.item.object.visitable_mask;
        let block_mask = &self.item.object.blocked_mask;
        debug_assert!(!visit_mask.is_empty());

        let mut visit_region = Region::new();
        for &(dx, dy) in visit_mask {
            match grid.neighbor_by_offset(abs_pos, dx, dy) {
                Some(tile) => visit_region.insert(tile),
                None => return false,
            }
        }
        let mut block_region = Region::new();
        for &(dx, dy) in block_mask {
            match grid.neighbor_by_offset(abs_pos, dx, dy) {
                Some(tile) => block_region.insert(tile),
                None => return false,
            }
        }
        self.reward_area = visit_region.union_with(&block_region);

        let last_visit_tile = visit_region.at(visit_region.len() - 1);
        let reward_outer = self.reward_area.make_outer_edge(grid, true);

        let is_visitable = self.item.object.kind == ObjectKind::Visitable;
        let is_joinable = self.item.object.kind == ObjectKind::Joinable;

        if self.item.use_guards {
            let mut guard_candidates = Region::new();
            if self.item.pickable {
                guard_candidates = reward_outer.clone();
            } else if is_visitable {
                // The guard stands in front of the entrance.
                let t = grid.tile(last_visit_tile);
                for dir in [Dir::L, Dir::R, Dir::BL, Dir::B, Dir::BR] {
                    if let Some(n) = t.neighbor(dir) {
                        guard_candidates.insert(n);
                    }
                }
                guard_candidates.erase_region(&block_region);
            }
            if guard_candidates.is_empty() {
                return false;
            }

            let guard = guard_candidates
                .iter()
                .min_by_key(|&tile| (distances.get(&tile).copied().unwrap_or(-1), tile))
                .expect("non-empty candidate set");
            self.guard_abs_pos = Some(guard);

            self.danger_zone.insert(guard);
            self.danger_zone.insert_slice(&grid.tile(guard).all);

            if self.item.pickable {
                self.extra_obstacles = reward_outer;
                if !is_joinable {
                    self.extra_obstacles.erase_region(&self.danger_zone);
                }
            }
        }

        self.occupied_area.insert_region(&self.extra_obstacles);
        self.occupied_area.insert_region(&self.reward_area);
        if let Some(guard) = self.guard_abs_pos {
            self.occupied_area.insert(guard);
        }

        self.danger_zone.erase_region(&self.occupied_area);

        self.occupied_with_danger = self.occupied_area.union_with(&self.danger_zone);
        for tile in self.occupied_with_danger.iter() {
            if grid.tile(tile).orth.len() != 4 {
                return false;
            }
        }

        // Unguarded pickables do not need breathing space around them.
        let unguarded_pickable = self.item.pickable && !self.item.use_guards;
        if !unguarded_pickable {
            self.pass_around_edge = self.occupied_with_danger.make_outer_edge(grid, false);
        }

        self.all_area = self.occupied_with_danger.union_with(&self.pass_around_edge);

        self.estimated_area = self.occupied_with_danger.len();
        if self.estimated_area <= 2 {
            self.estimated_area += self.pass_around_edge.len() / 2;
        } else {
            self.estimated_area += self.pass_around_edge.len();
        }

        if self.center_offset.is_none() {
            let centroid = self
                .occupied_area
                .make_centroid(grid, true)
                .expect("occupied area is non-empty");
            self.center_offset = Some(grid.pos(centroid) - grid.pos(abs_pos));
        }
        self.abs_pos_valid = true;
        true
    }
}

// ---------------------------------------------------------------------------

pub struct ZoneSegment {
    pub segment_index: usize,
    pub original_area: Region,
    pub free_area: Region,
    pub original_centroid: TileId,
    pub free_by_heat: BTreeMap<i32, i64>,
    pub free_total: i64,
    heat_centroids: BTreeMap<i32, TileId>,
    pub candidates: Vec<usize>,
    pub success: Vec<usize>,
    compact: bool,
}

impl ZoneSegment {
    fn remove_heat_size(&mut self, mut size: i64, starting_heat: i32) {
        debug_assert!(self.free_total >= size);
        self.free_total -= size;
        for (&heat, value) in self.free_by_heat.iter_mut() {
            if heat < starting_heat {
                continue;
            }
            if size <= *value {
                *value -= size;
                break;
            }
            size -= *value;
            *value = 0;
        }
    }

    fn find_best_heat_centroid(&self, heat: i32) -> Option<TileId> {
        self.heat_centroids
            .get(&heat)
            .copied()
            .or_else(|| self.heat_centroids.values().next().copied())
    }
}

fn blur_region(grid: &TileGrid, source: &Region, diagonal: bool) -> Region {
    let mut result = Region::new();
    for tile in source.iter() {
        result.insert(tile);
        result.insert_slice(grid.tile(tile).neighbors_list(diagonal));
    }
    result
}

pub struct DistributionResult {
    pub max_heat: i32,
    pub segments: Vec<ZoneSegment>,
    pub objects: Vec<PlacedObject>,
    pub guards: Vec<MapGuard>,
    pub need_block: Region,
    pub placed_ids: Vec<String>,
    pub all_original_ids: Vec<String>,
    free_pickables: Vec<usize>,
    road_pickables: Vec<usize>,
}

impl DistributionResult {
    /// Snapshot the zone's segments and heat histograms.
    pub fn init(grid: &TileGrid, zone: &TileZone) -> Result<Self, FailureKind> {
        if zone.segments.is_empty() {
            return Err(FailureKind::Internal("no segments in tile zone".to_string()));
        }
        // Town surroundings stay clear of random objects.
        let safe_padding = blur_region(grid, &zone.nodes.region(NodeLevel::Towns), true);

        let mut segments = Vec::with_capacity(zone.segments.len());
        for (index, seg) in zone.segments.iter().enumerate() {
            let mut original = seg.area.inner_area.clone();
            original.erase_region(&safe_padding);
            if original.is_empty() {
                continue;
            }
            let original_centroid = original
                .make_centroid(grid, true)
                .expect("non-empty segment");

            let mut free_by_heat: BTreeMap<i32, i64> = BTreeMap::new();
            let mut heat_fragments: BTreeMap<i32, Region> = BTreeMap::new();
            for tile in original.iter() {
                let heat = zone.heat_segments.level_of(tile).unwrap_or(0);
                *free_by_heat.entry(heat).or_insert(0) += 1;
                heat_fragments.entry(heat).or_default().insert(tile);
            }
            let mut heat_centroids = BTreeMap::new();
            for (heat, region) in heat_fragments {
                if let Some(centroid) = region.make_centroid(grid, false) {
                    heat_centroids.insert(heat, centroid);
                }
            }

            segments.push(ZoneSegment {
                segment_index: index,
                free_total: original.len() as i64,
                free_area: original.clone(),
                original_area: original,
                original_centroid,
                free_by_heat,
                heat_centroids,
                candidates: Vec::new(),
                success: Vec::new(),
                compact: false,
            });
        }

        Ok(DistributionResult {
            max_heat: zone.settings.max_heat,
            segments,
            objects: Vec::new(),
            guards: Vec::new(),
            need_block: Region::new(),
            placed_ids: Vec::new(),
            all_original_ids: Vec::new(),
            free_pickables: Vec::new(),
            road_pickables: Vec::new(),
        })
    }
}

pub struct ZoneObjectDistributor<'a> {
    pub grid: &'a TileGrid,
    pub map_width: i32,
    pub map_height: i32,
}

impl<'a> ZoneObjectDistributor<'a> {
    /// Bin-pack the generated objects into segments by estimated area and
    /// heat availability.
    pub fn make_initial_distribution(
        &self,
        distribution: &mut DistributionResult,
        zone: &TileZone,
        generated: ZoneObjectGeneration,
    ) -> Result<(), FailureKind> {
        distribution.all_original_ids = generated.all_ids;
        let total_size: i64 = distribution
            .segments
            .iter()
            .map(|s| s.original_area.len() as i64)
            .sum();
        if generated.objects.is_empty() {
            return Ok(());
        }

        let ring_radius = zone.absolute_radius / 1000 / 2;
        let mut total_object_size = 0i64;
        let mut segments_normal: Vec<usize> = Vec::new();
        for item in generated.objects {
            let mut wrap = PlacedObject::new(item);
            if wrap.item.random_angle_offset >= 0 && wrap.item.generated_count > 0 {
                wrap.radius_vector = Some(radius_vector(
                    wrap.item.random_angle_offset,
                    wrap.item.generated_index,
                    wrap.item.generated_count,
                    ring_radius,
                    self.map_width,
                    self.map_height,
                ));
            }
            // The first estimate at the map center only sizes the object.
            wrap.estimate_occupied(self.grid, &zone.distances, self.grid.center);
            total_object_size += wrap.estimated_area as i64;

            let index = distribution.objects.len();
            match wrap.item.object_type {
                ZoneObjectType::Segment => {
                    if !wrap.item.use_guards && wrap.item.pickable {
                        distribution.free_pickables.push(index);
                    } else {
                        segments_normal.push(index);
                    }
                }
                ZoneObjectType::SegmentScatter => distribution.free_pickables.push(index),
                ZoneObjectType::RoadScatter => distribution.road_pickables.push(index),
            }
            distribution.objects.push(wrap);
        }

        debug!("object tiles {total_object_size} / zone tiles {total_size}");
        if total_object_size > total_size {
            return Err(FailureKind::PlacementFailure(format!(
                "{total_object_size} object tiles do not fit {total_size} segment tiles"
            )));
        }

        // Largest footprints claim their segments first.
        segments_normal.sort_by_key(|&i| {
            std::cmp::Reverse((distribution.objects[i].estimated_area, usize::MAX - i))
        });

        let mut unfit: Vec<usize> = Vec::new();
        for &object_index in &segments_normal {
            let estimated = distribution.objects[object_index].estimated_area as i64;
            let preferred = distribution.objects[object_index].item.preferred_heat;

            let mut min_heat_available = distribution.max_heat;
            for seg in &distribution.segments {
                if seg.free_total < estimated {
                    continue;
                }
                for (&heat, &count) in &seg.free_by_heat {
                    if count > 0 {
                        min_heat_available = min_heat_available.min(heat);
                        break;
                    }
                }
            }
            if min_heat_available == distribution.max_heat {
                return Err(FailureKind::PlacementFailure(
                    "no heat capacity left in any segment".to_string(),
                ));
            }

            let placed_heat = preferred.max(min_heat_available);
            distribution.objects[object_index].placed_heat = placed_heat;

            let mut seg_candidates: Vec<usize> = Vec::new();
            for (i, seg) in distribution.segments.iter().enumerate() {
                let has_heat = seg
                    .free_by_heat
                    .get(&placed_heat)
                    .map(|&c| c > 0)
                    .unwrap_or(false);
                if has_heat && seg.free_total >= estimated {
                    seg_candidates.push(i);
                }
            }
            if seg_candidates.is_empty() {
                unfit.push(object_index);
                continue;
            }

            let fit_index = match distribution.objects[object_index].radius_vector {
                Some(vector) => {
                    let closest = self.grid.pos(zone.centroid) + vector;
                    seg_candidates
                        .iter()
                        .copied()
                        .min_by_key(|&i| {
                            let seg = &distribution.segments[i];
                            (
                                crate::pos::pos_distance(
                                    self.grid.pos(seg.original_centroid),
                                    closest,
                                    1,
                                ),
                                seg.segment_index,
                            )
                        })
                        .expect("non-empty candidates")
                }
                None => seg_candidates[0],
            };
            let seg = &mut distribution.segments[fit_index];
            seg.remove_heat_size(estimated, placed_heat);
            seg.candidates.push(object_index);
        }

        for object_index in unfit {
            let estimated = distribution.objects[object_index].estimated_area as i64;
            let placed_heat = distribution.objects[object_index].placed_heat;
            let fit = distribution
                .segments
                .iter_mut()
                .find(|seg| seg.free_total >= estimated);
            let Some(seg) = fit else {
                return Err(FailureKind::PlacementFailure(format!(
                    "no free segment can take a {estimated}-tile object"
                )));
            };
            debug!("re-fitting object of size {estimated} ignoring heat");
            seg.remove_heat_size(estimated, placed_heat);
            seg.candidates.push(object_index);
        }
        Ok(())
    }

    /// Concrete placement pass: K-means each segment's area into one
    /// fragment per object, then try, shift, compact and retry.
    pub fn do_place_distribution(
        &self,
        distribution: &mut DistributionResult,
        zone: &TileZone,
        map: &mut GeneratedMap,
    ) -> Result<(), FailureKind> {
        if distribution.objects.is_empty() {
            return Ok(());
        }

        let mut failed_global: Vec<usize> = Vec::new();
        for seg_index in 0..distribution.segments.len() {
            if distribution.segments[seg_index].candidates.is_empty() {
                continue;
            }
            let candidates = distribution.segments[seg_index].candidates.clone();

            let fragments = self.make_object_fragments(
                distribution,
                seg_index,
                &candidates,
                /*use_free=*/ false,
            )?;

            let mut failed_seg: Vec<usize> = Vec::new();
            for &object_index in candidates.iter() {
                let fragment = &fragments[distribution.objects[object_index]
                    .segment_fragment_index
                    .min(fragments.len().saturating_sub(1))];
                let pos_hint = fragment
                    .make_centroid(self.grid, true)
                    .unwrap_or(distribution.segments[seg_index].original_centroid);
                let result = self.place_on_map(
                    distribution,
                    seg_index,
                    object_index,
                    zone,
                    pos_hint,
                    false,
                );
                if result == PlacementResult::Success {
                    let all_area = distribution.objects[object_index].all_area.clone();
                    let seg = &mut distribution.segments[seg_index];
                    seg.free_area.erase_region(&all_area);
                    seg.success.push(object_index);
                } else {
                    failed_seg.push(object_index);
                }
            }

            if failed_seg.is_empty() {
                continue;
            }
            self.compact_segment(distribution, seg_index, zone)?;

            let fragments = self.make_object_fragments(
                distribution,
                seg_index,
                &failed_seg,
                /*use_free=*/ true,
            )?;
            for &object_index in failed_seg.iter() {
                let fragment = &fragments[distribution.objects[object_index]
                    .segment_fragment_index
                    .min(fragments.len().saturating_sub(1))];
                let pos_hint = fragment
                    .make_centroid(self.grid, true)
                    .unwrap_or(distribution.segments[seg_index].original_centroid);
                let result = self.place_on_map(
                    distribution,
                    seg_index,
                    object_index,
                    zone,
                    pos_hint,
                    false,
                );
                if result == PlacementResult::Success {
                    let all_area = distribution.objects[object_index].all_area.clone();
                    let seg = &mut distribution.segments[seg_index];
                    seg.free_area.erase_region(&all_area);
                    seg.success.push(object_index);
                } else {
                    failed_global.push(object_index);
                }
            }
        }

        if !failed_global.is_empty() {
            debug!(
                "placement failed for {} objects, trying alternative segments",
                failed_global.len()
            );
            for object_index in failed_global {
                let estimated = distribution.objects[object_index].estimated_area;
                let seg_index = (0..distribution.segments.len())
                    .max_by_key(|&i| (distribution.segments[i].free_area.len(), usize::MAX - i))
                    .expect("at least one segment");
                if distribution.segments[seg_index].free_area.len() < estimated {
                    return Err(FailureKind::PlacementFailure(format!(
                        "no segment can take object '{}' of {estimated} tiles",
                        distribution.objects[object_index].item.object.id
                    )));
                }
                self.compact_segment(distribution, seg_index, zone)?;
                let pos_hint = distribution.segments[seg_index]
                    .free_area
                    .make_centroid(self.grid, true)
                    .expect("non-empty free area");
                let result = self.place_on_map(
                    distribution,
                    seg_index,
                    object_index,
                    zone,
                    pos_hint,
                    true,
                );
                if result == PlacementResult::Success {
                    let all_area = distribution.objects[object_index].all_area.clone();
                    let seg = &mut distribution.segments[seg_index];
                    seg.free_area.erase_region(&all_area);
                    seg.success.push(object_index);
                    seg.compact = false;
                } else {
                    return Err(FailureKind::PlacementFailure(format!(
                        "object '{}' failed after all fallbacks ({result:?})",
                        distribution.objects[object_index].item.object.id
                    )));
                }
            }
        }

        // Commit everything that stuck.
        for seg_index in 0..distribution.segments.len() {
            let success = distribution.segments[seg_index].success.clone();
            for object_index in success {
                self.commit_placement(distribution, object_index, zone, map);
            }
        }

        self.place_scatter(distribution, zone, map)?;
        Ok(())
    }

    /// K-means the segment area into one fragment per object, assigning
    /// each object the fragment closest to its preferred heat.
    fn make_object_fragments(
        &self,
        distribution: &mut DistributionResult,
        seg_index: usize,
        object_indices: &[usize],
        use_free: bool,
    ) -> Result<Vec<Region>, FailureKind> {
        let count = object_indices.len();
        let area = if use_free {
            distribution.segments[seg_index].free_area.clone()
        } else {
            distribution.segments[seg_index].original_area.clone()
        };
        if area.is_empty() {
            return Err(FailureKind::PlacementFailure(
                "segment has no area left for fragmenting".to_string(),
            ));
        }
        if count <= 1 {
            for &object_index in object_indices {
                distribution.objects[object_index].segment_fragment_index = 0;
            }
            return Ok(vec![area]);
        }
        let k = count.min(area.len());
        let mut settings = segmentation::guess_kmeans_by_grid(self.grid, &area, k)
            .map_err(|e| FailureKind::PlacementFailure(e.to_string()))?;

        let mut remaining: Vec<usize> = (0..settings.items.len()).collect();
        for &object_index in object_indices {
            let preferred = distribution.objects[object_index].item.preferred_heat;
            let heat_centroid = distribution.segments[seg_index]
                .find_best_heat_centroid(preferred)
                .unwrap_or(distribution.segments[seg_index].original_centroid);
            let heat_pos = self.grid.pos(heat_centroid);
            let (slot, &fragment_index) = remaining
                .iter()
                .enumerate()
                .min_by_key(|(_, &frag)| {
                    (
                        crate::pos::pos_distance(
                            self.grid.pos(settings.items[frag].initial_centroid),
                            heat_pos,
                            100,
                        ),
                        frag,
                    )
                })
                .expect("remaining fragments");
            remaining.remove(slot);
            distribution.objects[object_index].segment_fragment_index = fragment_index;
            settings.items[fragment_index].area_hint =
                distribution.objects[object_index].estimated_area.max(1) as i64;
            if remaining.is_empty() {
                break;
            }
        }

        segmentation::split_by_k_ext(self.grid, &area, &settings, 100)
            .map_err(|e| FailureKind::PlacementFailure(e.to_string()))
    }

    /// Re-place every successful object of the segment packed toward lower
    /// travel distance, freeing contiguous space for the stragglers.
    fn compact_segment(
        &self,
        distribution: &mut DistributionResult,
        seg_index: usize,
        zone: &TileZone,
    ) -> Result<(), FailureKind> {
        if distribution.segments[seg_index].compact {
            return Ok(());
        }
        distribution.segments[seg_index].compact = true;

        let mut order = distribution.segments[seg_index].success.clone();
        order.sort_by_key(|&i| {
            let obj = &distribution.objects[i];
            let distance = obj
                .abs_pos
                .and_then(|p| zone.distances.get(&p).copied())
                .unwrap_or(-1);
            (obj.item.preferred_heat, distance, i)
        });
        distribution.segments[seg_index].success = order.clone();

        for object_index in order {
            self.recalc_free(distribution, seg_index, Some(object_index));
            let anchor = {
                let obj = &distribution.objects[object_index];
                let abs = obj.abs_pos.expect("successful object has a position");
                let offset = obj.center_offset.unwrap_or_default();
                self.grid
                    .neighbor_by_offset(abs, offset.x, offset.y)
                    .unwrap_or(abs)
            };
            let result =
                self.place_on_map(distribution, seg_index, object_index, zone, anchor, true);
            if result != PlacementResult::Success {
                return Err(FailureKind::Internal(format!(
                    "compaction re-placement failed with {result:?}"
                )));
            }
        }
        self.recalc_free(distribution, seg_index, None);
        Ok(())
    }

    fn recalc_free(
        &self,
        distribution: &mut DistributionResult,
        seg_index: usize,
        exclude: Option<usize>,
    ) {
        let mut free = distribution.segments[seg_index].original_area.clone();
        for &i in &distribution.segments[seg_index].success {
            if Some(i) == exclude {
                continue;
            }
            free.erase_region(&distribution.objects[i].all_area);
        }
        distribution.segments[seg_index].free_area = free;
    }

    /// The placement ladder: estimate, probe the collision oracle, shift up
    /// to five tiles, fall back to neighbors, optionally pack toward the
    /// heat sources.
    fn place_on_map(
        &self,
        distribution: &mut DistributionResult,
        seg_index: usize,
        object_index: usize,
        zone: &TileZone,
        pos_hint: TileId,
        pack_placement: bool,
    ) -> PlacementResult {
        let free_len = distribution.segments[seg_index].free_area.len();
        if free_len < distribution.objects[object_index].estimated_area {
            return PlacementResult::InsufficientSpaceInSource;
        }

        let mut last_shift = Pos::default();
        let mut pos = pos_hint;

        macro_rules! try_inner {
            ($pos:expr) => {{
                self.try_place_inner(distribution, seg_index, object_index, zone, $pos, &mut last_shift)
            }};
        }

        for _ in 0..3 {
            let mut last_result = try_inner!(pos);

            if last_result == PlacementResult::Success && pack_placement {
                let original_pos = pos;
                let better = self.lower_distance_neighbor(distribution, seg_index, zone, pos);
                if better != pos {
                    let mut used = Region::new();
                    used.insert(pos);
                    used.insert(better);
                    let mut better_prev = pos;
                    let mut better = better;
                    last_result = try_inner!(better);
                    if last_result != PlacementResult::Success {
                        return try_inner!(better_prev);
                    }
                    for _ in 0..10 {
                        better_prev = better;
                        let even_better =
                            self.lower_distance_neighbor(distribution, seg_index, zone, better);
                        if even_better == better || used.contains(even_better) {
                            break;
                        }
                        better = even_better;
                        last_result = try_inner!(better);
                        if last_result != PlacementResult::Success {
                            return try_inner!(better_prev);
                        }
                    }
                    if last_result != PlacementResult::Success {
                        last_result = try_inner!(original_pos);
                    }
                }
                return last_result;
            }
            if last_result == PlacementResult::Success {
                return last_result;
            }

            match last_result {
                PlacementResult::EstimateOccupiedFailure => {
                    // Snap toward the map center until the footprint fits
                    // the grid.
                    let mut retry = PlacementResult::EstimateOccupiedFailure;
                    for _ in 0..5 {
                        let neighborhood =
                            Region::from_unsorted(self.grid.tile(pos).all.clone());
                        let Some(next) = neighborhood
                            .find_closest(self.grid, self.grid.pos(self.grid.center))
                        else {
                            break;
                        };
                        pos = next;
                        let result = try_inner!(pos);
                        if result == PlacementResult::Success {
                            return result;
                        }
                        if result != PlacementResult::EstimateOccupiedFailure {
                            retry = PlacementResult::Retry;
                            break;
                        }
                    }
                    if retry != PlacementResult::Retry {
                        return retry;
                    }
                }
                PlacementResult::CollisionImpossibleShift => {
                    let neighbors = self.grid.tile(pos).all.clone();
                    let mut retry = PlacementResult::CollisionImpossibleShift;
                    for n in neighbors {
                        let result = try_inner!(n);
                        if result == PlacementResult::Success {
                            return result;
                        }
                        if result != PlacementResult::CollisionImpossibleShift {
                            retry = PlacementResult::Retry;
                            break;
                        }
                    }
                    if retry != PlacementResult::Retry {
                        return retry;
                    }
                }
                PlacementResult::CollisionHasShift => {
                    let mut used = Region::new();
                    used.insert(pos);
                    let mut retry = PlacementResult::RunOutOfShiftRetries;
                    for _ in 0..5 {
                        let Some(new_pos) =
                            self.grid
                                .neighbor_by_offset(pos, last_shift.x, last_shift.y)
                        else {
                            return PlacementResult::InvalidShiftValue;
                        };
                        if used.contains(new_pos) {
                            return PlacementResult::ShiftLoopDetected;
                        }
                        pos = new_pos;
                        used.insert(pos);
                        let result = try_inner!(pos);
                        if result == PlacementResult::Success {
                            return result;
                        }
                        if result != PlacementResult::CollisionHasShift {
                            retry = PlacementResult::Retry;
                            break;
                        }
                    }
                    if retry != PlacementResult::Retry {
                        return retry;
                    }
                }
                other => return other,
            }
            // A Retry falls through into the next outer attempt.
        }
        PlacementResult::RunOutOfShiftRetries
    }

    fn try_place_inner(
        &self,
        distribution: &mut DistributionResult,
        seg_index: usize,
        object_index: usize,
        zone: &TileZone,
        pos: TileId,
        last_shift: &mut Pos,
    ) -> PlacementResult {
        let object = &mut distribution.objects[object_index];
        if !object.estimate_occupied(self.grid, &zone.distances, pos) {
            return PlacementResult::EstimateOccupiedFailure;
        }
        let seg = &distribution.segments[seg_index];
        if seg.free_area.len() < object.estimated_area {
            return PlacementResult::InsufficientSpaceInSource;
        }
        match RegionWithEdge::collision_shift(
            self.grid,
            &object.occupied_with_danger,
            &seg.free_area,
            true,
        ) {
            CollisionResult::NoCollision => PlacementResult::Success,
            CollisionResult::InvalidInputs => PlacementResult::InvalidCollisionInputs,
            CollisionResult::ImpossibleShift => PlacementResult::CollisionImpossibleShift,
            CollisionResult::HasShift(dx, dy) => {
                *last_shift = Pos::new(dx, dy, 0);
                PlacementResult::CollisionHasShift
            }
        }
    }

    /// The free neighbor with the lowest travel distance, or `pos` itself.
    fn lower_distance_neighbor(
        &self,
        distribution: &DistributionResult,
        seg_index: usize,
        zone: &TileZone,
        pos: TileId,
    ) -> TileId {
        let current = zone.distances.get(&pos).copied().unwrap_or(-1);
        if current < 0 {
            return pos;
        }
        let mut best = pos;
        let mut best_distance = current;
        for &n in &self.grid.tile(pos).all {
            if !distribution.segments[seg_index].free_area.contains(n) {
                continue;
            }
            if let Some(&d) = zone.distances.get(&n) {
                if d >= 0 && d < best_distance {
                    best_distance = d;
                    best = n;
                }
            }
        }
        best
    }

    fn commit_placement(
        &self,
        distribution: &mut DistributionResult,
        object_index: usize,
        zone: &TileZone,
        map: &mut GeneratedMap,
    ) {
        let (abs_pos, extra_obstacles, id, use_guards, guard_value, guard_pos) = {
            let object = &distribution.objects[object_index];
            (
                object.abs_pos.expect("committed object has a position"),
                object.extra_obstacles.clone(),
                object.item.object.id.clone(),
                object.item.use_guards,
                object.item.object.guard,
                object.guard_abs_pos,
            )
        };
        distribution.objects[object_index]
            .item
            .object
            .place(map, self.grid.pos(abs_pos));

        distribution.need_block.insert_region(&extra_obstacles);
        distribution.placed_ids.push(id);

        if use_guards {
            let guard_pos = guard_pos.expect("guarded object has a guard tile");
            distribution
                .guards
                .push(MapGuard::for_object(guard_value, guard_pos, zone.index));
        }
    }

    /// Scatter the unguarded pickables: road scatter onto road tiles, the
    /// rest onto leftover segment ground, preferring the requested heat.
    fn place_scatter(
        &self,
        distribution: &mut DistributionResult,
        zone: &TileZone,
        map: &mut GeneratedMap,
    ) -> Result<(), FailureKind> {
        let mut used = Region::new();

        let road_list = distribution.road_pickables.clone();
        for object_index in road_list {
            let preferred = distribution.objects[object_index].item.preferred_heat;
            let tile = self
                .pick_heat_tile(&zone.heat_roads, preferred, zone.settings.max_heat, &used)
                .ok_or_else(|| {
                    FailureKind::PlacementFailure(format!(
                        "no road tile left for '{}'",
                        distribution.objects[object_index].item.object.id
                    ))
                })?;
            used.insert(tile);
            distribution.objects[object_index].abs_pos = Some(tile);
            distribution.objects[object_index]
                .item
                .object
                .place(map, self.grid.pos(tile));
            distribution
                .placed_ids
                .push(distribution.objects[object_index].item.object.id.clone());
        }

        // Segment scatter draws from the remaining free area.
        let mut free_all = Region::new();
        for seg in &distribution.segments {
            free_all.insert_region(&seg.free_area);
        }
        let free_list = distribution.free_pickables.clone();
        for object_index in free_list {
            let preferred = distribution.objects[object_index].item.preferred_heat;
            let tile = self
                .pick_heat_tile_in(
                    &zone.heat_segments,
                    preferred,
                    zone.settings.max_heat,
                    &used,
                    &free_all,
                )
                .or_else(|| {
                    free_all
                        .iter()
                        .find(|&t| !used.contains(t))
                })
                .ok_or_else(|| {
                    FailureKind::PlacementFailure(format!(
                        "no free tile left for '{}'",
                        distribution.objects[object_index].item.object.id
                    ))
                })?;
            used.insert(tile);
            distribution.objects[object_index].abs_pos = Some(tile);
            distribution.objects[object_index]
                .item
                .object
                .place(map, self.grid.pos(tile));
            distribution
                .placed_ids
                .push(distribution.objects[object_index].item.object.id.clone());
        }

        if distribution.placed_ids.len() < distribution.all_original_ids.len() {
            warn!(
                "placed {} of {} generated objects",
                distribution.placed_ids.len(),
                distribution.all_original_ids.len()
            );
        }
        Ok(())
    }

    fn pick_heat_tile(
        &self,
        heat_map: &crate::zone::LevelMap<i32>,
        preferred: i32,
        max_heat: i32,
        used: &Region,
    ) -> Option<TileId> {
        for heat in heat_order(preferred, max_heat) {
            let region = heat_map.region(heat);
            let found = region.iter().find(|&t| !used.contains(t));
            if let Some(tile) = found {
                return Some(tile);
            }
        }
        None
    }

    fn pick_heat_tile_in(
        &self,
        heat_map: &crate::zone::LevelMap<i32>,
        preferred: i32,
        max_heat: i32,
        used: &Region,
        allowed: &Region,
    ) -> Option<TileId> {
        for heat in heat_order(preferred, max_heat) {
            let region = heat_map.region(heat);
            let found = region
                .iter()
                .find(|&t| allowed.contains(t) && !used.contains(t));
            if let Some(tile) = found {
                return Some(tile);
            }
        }
        None
    }
}

/// Preferred heat first, then hotter buckets, then cooler ones.
fn heat_order(preferred: i32, max_heat: i32) -> Vec<i32> {
    let mut order: Vec<i32> = (preferred..max_heat).collect();
    order.extend((0..preferred).rev());
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ObjectPayload, ZoneObjectData};
    use crate::pos::Pos as P;
    use crate::score::{Score, ScoreAttr};
    use crate::template::ZoneSettings;

    fn pickable_item(id: &str, guarded: bool) -> ZoneObjectItem {
        let mut data = ZoneObjectData::new(
            id.to_string(),
            ObjectKind::Pickable,
            ObjectPayload::Artifact {
                artifact: id.to_string(),
            },
        );
        data.score = Score::single(ScoreAttr::ArtStat, 100);
        data.guard = 1000;
        let mut item = ZoneObjectItem::new(data);
        item.pickable = true;
        item.use_guards = guarded;
        item
    }

    fn test_zone(grid: &TileGrid) -> TileZone {
        let start = grid.find(P::new(5, 5, 0)).unwrap();
        let mut zone = TileZone::new(0, "z".to_string(), ZoneSettings::default(), start);
        zone.area.inner_area = grid.all_region();
        zone.area.make_edge_from_inner_area(grid);
        zone
    }

    #[test]
    fn estimate_unguarded_pickable() {
        let grid = TileGrid::new(11, 11, 1);
        let zone = test_zone(&grid);
        let mut obj = PlacedObject::new(pickable_item("a", false));
        let center = grid.find(P::new(5, 5, 0)).unwrap();
        assert!(obj.estimate_occupied(&grid, &zone.distances, center));
        // One tile, no guard, no spacing.
        assert_eq!(obj.occupied_with_danger.len(), 1);
        assert!(obj.pass_around_edge.is_empty());
        assert_eq!(obj.estimated_area, 1);
        assert!(obj.abs_pos_valid);
    }

    #[test]
    fn estimate_guarded_pickable_builds_danger_zone() {
        let grid = TileGrid::new(11, 11, 1);
        let zone = test_zone(&grid);
        let mut obj = PlacedObject::new(pickable_item("a", true));
        let center = grid.find(P::new(5, 5, 0)).unwrap();
        assert!(obj.estimate_occupied(&grid, &zone.distances, center));
        assert!(obj.guard_abs_pos.is_some());
        // Reward + extra obstacles + guard + danger, plus breathing space.
        assert!(obj.occupied_with_danger.len() > 1);
        assert!(!obj.pass_around_edge.is_empty());
        assert!(obj.estimated_area > obj.occupied_with_danger.len() / 2);
        // The guard's 8-neighborhood not occupied is all danger.
        assert!(obj
            .danger_zone
            .intersect_with(&obj.occupied_area)
            .is_empty());
    }

    #[test]
    fn estimate_fails_on_map_border() {
        let grid = TileGrid::new(11, 11, 1);
        let zone = test_zone(&grid);
        let mut obj = PlacedObject::new(pickable_item("a", true));
        let corner = grid.find(P::new(0, 0, 0)).unwrap();
        assert!(!obj.estimate_occupied(&grid, &zone.distances, corner));
        assert!(!obj.abs_pos_valid);
    }

    #[test]
    fn heat_order_prefers_requested_bucket() {
        assert_eq!(heat_order(2, 5), vec![2, 3, 4, 1, 0]);
        assert_eq!(heat_order(0, 3), vec![0, 1, 2]);
    }
}
