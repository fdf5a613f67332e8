//! Score-budget-driven object generation: drain every score target of a
//! zone by weighted factory draws, then consolidate guarded pickables into
//! groups and hand the batch to the distributor.

use crate::database::GameDatabase;
use crate::error::FailureKind;
use crate::objects::factories::*;
use crate::objects::pools::{ArtifactPool, FactionPool, Pools, SpellPool};
use crate::objects::{ObjectGroup, ZoneObjectGeneration, ZoneObjectItem};
use crate::pos::{rotate_chebyshev, Pos};
use crate::rng::RandomSource;
use crate::score::Score;
use crate::template::{ScoreSettings, Template, ZoneObjectType, ZoneSettings};
use log::{debug, info};

/// Iteration guard for a single score target; reaching it means the budget
/// cannot be satisfied by the configured generators.
const TARGET_ITER_LIMIT: usize = 100_000;

pub struct ObjectGenerator<'a> {
    pub db: &'a GameDatabase,
    pub template: &'a Template,
    pub army_percent: i64,
    pub gold_percent: i64,
}

impl<'a> ObjectGenerator<'a> {
    /// Generate all objects of one zone.
    pub fn generate(
        &self,
        zone_id: &str,
        zone_settings: &ZoneSettings,
        rewards_faction: &str,
        dwell_faction: &str,
        terrain: &str,
        rng: &mut dyn RandomSource,
    ) -> Result<ZoneObjectGeneration, FailureKind> {
        let mut result = ZoneObjectGeneration::default();
        if zone_settings.score_targets.is_empty() {
            return Ok(result);
        }

        let mut pools = Pools {
            artifacts: ArtifactPool::new(self.db, &self.template.disabled_artifacts),
            spells: SpellPool::new(self.db, &self.template.disabled_spells),
            factions: FactionPool {
                limit: zone_settings.generators.banks.max_unique_factions,
                ..Default::default()
            },
        };

        let mut carried_remainder = Score::new();

        for (score_id, raw_settings) in &zone_settings.score_targets {
            if !raw_settings.is_enabled {
                info!("target '{score_id}' is disabled");
                continue;
            }
            let score_settings = self.scale_settings(raw_settings);

            let mut target_score = score_settings.make_target_score();
            // Fold the carried remainder into attributes this target knows.
            for (attr, value) in carried_remainder.clone().iter() {
                if target_score.contains(attr) {
                    target_score.add_value(attr, value);
                    carried_remainder.0.remove(&attr);
                }
            }

            let mut factories: Vec<Box<dyn ObjectFactory>> = Vec::new();
            {
                let g = &zone_settings.generators;
                let s = &score_settings;
                if !s.is_generator_filtered_out("banks") {
                    factories.push(Box::new(BankFactory::new(
                        self.db,
                        g,
                        s,
                        score_id,
                        &pools,
                        terrain,
                        &self.template.disabled_banks,
                    )));
                }
                if !s.is_generator_filtered_out("artifacts") {
                    factories.push(Box::new(ArtifactFactory::new(
                        self.db, g, s, score_id, &pools,
                    )));
                }
                if !s.is_generator_filtered_out("resources") {
                    factories.push(Box::new(ResourcePileFactory::new(self.db, g, s, score_id)));
                }
                if !s.is_generator_filtered_out("pandoras") {
                    factories.push(Box::new(PandoraFactory::new(
                        self.db,
                        g,
                        s,
                        score_id,
                        rewards_faction,
                        &self.template.disabled_spells,
                    )?));
                }
                if !s.is_generator_filtered_out("shrines") {
                    factories.push(Box::new(ShrineFactory::new(self.db, g, s, score_id, &pools)));
                }
                if !s.is_generator_filtered_out("scrolls") {
                    factories.push(Box::new(ScrollFactory::new(self.db, g, s, score_id, &pools)));
                }
                if !s.is_generator_filtered_out("dwellings") {
                    factories.push(Box::new(DwellingFactory::new(
                        self.db,
                        g,
                        s,
                        score_id,
                        dwell_faction,
                    )));
                }
                if !s.is_generator_filtered_out("visitables") {
                    factories.push(Box::new(VisitableFactory::new(
                        self.db, g, s, score_id, terrain,
                    )?));
                }
                if !s.is_generator_filtered_out("mines") {
                    factories.push(Box::new(MineFactory::new(self.db, g, s, score_id)));
                }
                if !s.is_generator_filtered_out("skillHuts") {
                    factories.push(Box::new(SkillHutFactory::new(
                        self.db,
                        g,
                        s,
                        score_id,
                        &self.template.disabled_skills,
                    )));
                }
                if !s.is_generator_filtered_out("scholars") {
                    factories.push(Box::new(ScholarFactory::new(
                        self.db,
                        g,
                        s,
                        score_id,
                        &pools,
                        &self.template.disabled_skills,
                    )));
                }
                if !s.is_generator_filtered_out("questHuts") {
                    factories.push(Box::new(QuestHutFactory::new(
                        self.db, g, s, score_id, &pools,
                    )?));
                }
            }

            let mut current_score = Score::new();
            let mut object_list: Vec<ZoneObjectItem> = Vec::new();
            let mut iterations = 0usize;
            loop {
                if iterations >= TARGET_ITER_LIMIT {
                    return Err(FailureKind::ObjectBudgetUnmet(format!(
                        "target '{score_id}' of zone '{zone_id}' hit the iteration limit"
                    )));
                }
                iterations += 1;
                if !self.generate_one(
                    &target_score,
                    &mut current_score,
                    &score_settings,
                    &mut factories,
                    &mut object_list,
                    &mut pools,
                    rng,
                )? {
                    break;
                }
            }
            debug!(
                "target '{score_id}': {} objects in {iterations} iterations, score {current_score}",
                object_list.len()
            );

            let guard_group_limit = pick_override(
                score_settings.guard_group_limit,
                zone_settings.guard_group_limit,
            );
            let guard_threshold =
                pick_override(score_settings.guard_threshold, zone_settings.guard_threshold);
            let guard_min_to_group = pick_override(
                score_settings.guard_min_to_group,
                zone_settings.guard_min_to_group,
            );

            for item in &mut object_list {
                item.object_type = score_settings.object_type;
                item.use_guards = !item.is_scatter() && item.object.guard >= guard_threshold;
                item.preferred_heat = 0;
                if !score_settings.preferred_heats.is_empty() {
                    let pick =
                        rng.gen_min_max(0, score_settings.preferred_heats.len() as u64 - 1);
                    item.preferred_heat = score_settings.preferred_heats[pick as usize];
                }
                item.placement_order = if score_settings.placement_order >= -1 {
                    score_settings.placement_order
                } else {
                    item.preferred_heat as i64
                };
                item.pickable = matches!(
                    item.object.kind,
                    crate::objects::ObjectKind::Pickable | crate::objects::ObjectKind::Joinable
                );
                if item.is_scatter() && !item.pickable {
                    return Err(FailureKind::Internal(format!(
                        "target '{score_id}' scatters non-pickable '{}'",
                        item.object.id
                    )));
                }
            }

            self.make_groups(guard_group_limit, guard_min_to_group, &mut object_list, rng);

            // Spread the batch around the zone: guarded objects by a random
            // ring angle, scatter objects evenly.
            let mut by_radius: Vec<usize> = Vec::new();
            let mut equal: Vec<usize> = Vec::new();
            for (i, item) in object_list.iter().enumerate() {
                if item.is_scatter() {
                    equal.push(i);
                } else {
                    by_radius.push(i);
                }
                result.all_ids.push(item.object.id.clone());
            }
            self.shuffle(&mut by_radius, rng);
            self.shuffle(&mut equal, rng);

            let angle_start = rng.gen_min_max(0, 359) as i32;
            let by_radius_count = by_radius.len();
            for (d, &i) in by_radius.iter().enumerate() {
                let item = &mut object_list[i];
                item.random_angle_offset = angle_start;
                item.generated_index = d;
                item.generated_count = by_radius_count;
            }
            let equal_count = equal.len();
            for (d, &i) in equal.iter().enumerate() {
                let item = &mut object_list[i];
                item.generated_index = d;
                item.generated_count = equal_count;
            }

            let remain = target_score.clone() - current_score.clone();
            let mut next_remainder = Score::new();
            for (attr, scope) in &score_settings.score {
                if !remain.contains(*attr) {
                    continue;
                }
                let value = remain.get(*attr);
                if scope.max_remain >= 0 && value > scope.max_remain {
                    return Err(FailureKind::ObjectBudgetUnmet(format!(
                        "target '{score_id}' of zone '{zone_id}' left {value} unconsumed \
                         on {} (max remain {})",
                        attr.as_str(),
                        scope.max_remain
                    )));
                }
                if !scope.consume_remain && value > 0 {
                    next_remainder.set(*attr, value);
                }
            }
            carried_remainder = next_remainder + carried_remainder;

            info!(
                "target '{score_id}': generated {} objects, carrying {carried_remainder} forward",
                object_list.len()
            );
            result.objects.append(&mut object_list);
        }

        result
            .objects
            .sort_by_key(|item| (item.placement_order, item.generated_index));
        result.all_ids.sort();

        let leftover = carried_remainder.total();
        if leftover > 0 {
            return Err(FailureKind::ObjectBudgetUnmet(format!(
                "zone '{zone_id}' finished with {leftover} undistributed score \
                 ({carried_remainder})"
            )));
        }
        Ok(result)
    }

    /// One weighted draw across all factories. Returns false when every
    /// factory ran out of enabled records.
    #[allow(clippy::too_many_arguments)]
    fn generate_one(
        &self,
        target_score: &Score,
        current_score: &mut Score,
        score_settings: &ScoreSettings,
        factories: &mut [Box<dyn ObjectFactory>],
        object_list: &mut Vec<ZoneObjectItem>,
        pools: &mut Pools,
        rng: &mut dyn RandomSource,
    ) -> Result<bool, FailureKind> {
        let total_weight: u64 = factories.iter().map(|f| f.total_freq()).sum();
        if total_weight == 0 {
            return Ok(false);
        }
        let rng_freq = rng.gen(total_weight - 1);

        let mut base_weight = 0u64;
        for factory in factories.iter_mut() {
            let freq = factory.total_freq();
            if freq > 0 && base_weight + freq > rng_freq {
                let factory_freq = rng_freq - base_weight;

                // Narrow the per-object maxima to what is still missing so
                // factories stop producing oversized objects.
                let mut caps = score_settings.clone();
                for (attr, value) in current_score.iter() {
                    let Some(scope) = caps.score.get_mut(&attr) else {
                        continue;
                    };
                    let remain = target_score.get(attr) - value;
                    if remain <= 0 {
                        caps.score.remove(&attr);
                        continue;
                    }
                    if scope.max_single != -1 {
                        scope.max_single = scope.max_single.min(remain);
                    }
                }

                let mut ctx = FactoryContext {
                    db: self.db,
                    rng,
                    pools,
                };
                let produced = factory.make(factory_freq, &caps, &mut ctx)?;
                if produced.object.score.is_empty() {
                    return Err(FailureKind::Internal(format!(
                        "object '{}' has no score",
                        produced.object.id
                    )));
                }

                let candidate = current_score.clone() + produced.object.score.clone();
                if is_score_overflow(&candidate, target_score) {
                    factory.on_reject(&produced, &mut ctx);
                    return Ok(true);
                }
                *current_score = candidate;
                factory.on_accept(&produced, &mut ctx);
                object_list.push(ZoneObjectItem::new(produced.object));
                return Ok(true);
            }
            base_weight += freq;
        }
        Ok(false)
    }

    /// Consolidate guarded pickables into shared-guard groups.
    fn make_groups(
        &self,
        guard_group_limit: i64,
        guard_min_to_group: i64,
        object_list: &mut Vec<ZoneObjectItem>,
        rng: &mut dyn RandomSource,
    ) {
        if guard_min_to_group <= 0 {
            return;
        }

        let mut for_grouping: Vec<ZoneObjectItem> = Vec::new();
        let mut remain: Vec<ZoneObjectItem> = Vec::new();
        for item in object_list.drain(..) {
            let groupable = item.object_type == ZoneObjectType::Segment
                && item.pickable
                && item.use_guards
                && item.object.guard >= guard_min_to_group;
            if groupable {
                for_grouping.push(item);
            } else {
                remain.push(item);
            }
        }
        if for_grouping.is_empty() {
            *object_list = remain;
            return;
        }

        let mut grouped: Vec<ZoneObjectItem> = Vec::new();
        let mut new_group = |rng: &mut dyn RandomSource| {
            let item_limit = rng.gen_min_max(2, 4) as usize;
            ObjectGroup::new(guard_group_limit, item_limit, rng.gen_small(101))
        };
        let mut bundle = new_group(rng);
        let mut last_item: Option<ZoneObjectItem> = None;

        for item in for_grouping {
            if !bundle.is_empty() {
                if bundle.try_push(&item.object) {
                    last_item = Some(item);
                    continue;
                }
                // Full: flush and start over with the current item.
                let finished = std::mem::replace(&mut bundle, new_group(rng));
                let template_item = last_item.take().expect("non-empty bundle has a last item");
                let mut flushed = template_item;
                flushed.object = finished.into_object();
                grouped.push(flushed);
            }
            let pushed = bundle.try_push(&item.object);
            debug_assert!(pushed, "push into an empty bundle never fails");
            last_item = Some(item);
        }
        if !bundle.is_empty() {
            let template_item = last_item.take().expect("non-empty bundle has a last item");
            let mut flushed = template_item;
            flushed.object = bundle.into_object();
            grouped.push(flushed);
        }

        *object_list = remain;
        object_list.append(&mut grouped);
    }

    /// Draw-without-replacement shuffle, spending one RNG word per pick so
    /// ordering is reproducible.
    fn shuffle(&self, list: &mut Vec<usize>, rng: &mut dyn RandomSource) {
        let mut out = Vec::with_capacity(list.len());
        while !list.is_empty() {
            if list.len() == 1 {
                out.push(list[0]);
                break;
            }
            let i = rng.gen_min_max(0, list.len() as u64 - 1) as usize;
            out.push(list.remove(i));
        }
        *list = out;
    }

    /// Army and gold difficulty multipliers rescale the declared targets.
    fn scale_settings(&self, settings: &ScoreSettings) -> ScoreSettings {
        let mut scaled = settings.clone();
        let mut apply = |attr: crate::score::ScoreAttr, percent: i64| {
            if percent == 100 {
                return;
            }
            if let Some(scope) = scaled.score.get_mut(&attr) {
                scope.target = scope.target * percent / 100;
                if percent < 100 && scope.min_single != -1 {
                    scope.min_single = scope.min_single * percent / 100;
                }
            }
        };
        apply(crate::score::ScoreAttr::Army, self.army_percent);
        apply(crate::score::ScoreAttr::Gold, self.gold_percent);
        scaled
    }
}

fn pick_override(target_level: i64, zone_level: i64) -> i64 {
    if target_level >= 0 {
        target_level
    } else {
        zone_level
    }
}

fn is_score_overflow(current: &Score, target: &Score) -> bool {
    for (attr, value) in current.iter() {
        if !target.contains(attr) {
            return true;
        }
        if value > target.get(attr) {
            return true;
        }
    }
    false
}

/// Ring offset used to bias an object batch around the zone centroid: the
/// items of one target fan out on evenly spaced angles starting from a
/// random offset.
pub fn radius_vector(
    angle_offset: i32,
    index: usize,
    count: usize,
    radius_tiles: i64,
    map_width: i32,
    map_height: i32,
) -> Pos {
    if count == 0 || radius_tiles <= 0 {
        return Pos::default();
    }
    let angle = (angle_offset + (360 * index as i32) / count as i32) % 360;
    let center = Pos::new(map_width / 2, map_height / 2, 0);
    let start = Pos::new(center.x + radius_tiles as i32, center.y, 0);
    let rotated = rotate_chebyshev(start, angle, map_width, map_height);
    rotated - center
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::ScoreAttr;

    #[test]
    fn overflow_detection() {
        let target = Score::single(ScoreAttr::Gold, 1000);
        assert!(!is_score_overflow(
            &Score::single(ScoreAttr::Gold, 1000),
            &target
        ));
        assert!(is_score_overflow(
            &Score::single(ScoreAttr::Gold, 1001),
            &target
        ));
        assert!(is_score_overflow(
            &Score::single(ScoreAttr::Army, 1),
            &target
        ));
    }

    #[test]
    fn override_fallback() {
        assert_eq!(pick_override(-1, 500), 500);
        assert_eq!(pick_override(0, 500), 0);
        assert_eq!(pick_override(200, 500), 200);
    }

    #[test]
    fn radius_vectors_fan_out() {
        let a = radius_vector(0, 0, 4, 10, 72, 72);
        let b = radius_vector(0, 2, 4, 10, 72, 72);
        assert_ne!(a, b);
        assert_eq!(radius_vector(0, 0, 0, 10, 72, 72), Pos::default());
    }
}
