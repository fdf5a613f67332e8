//! Per-kind object factories. Each factory owns a weighted record table
//! built from the zone's generator settings plus the database, and knows
//! how to turn one record draw into a concrete object.

use crate::database::{ArtifactFilter, GameDatabase, ObjectMask, RewardSpec, VisitKind};
use crate::error::FailureKind;
use crate::objects::pools::{ArtifactDraw, Pools};
use crate::objects::records::{CommonRecord, CommonRecordList};
use crate::objects::reward::{
    estimate_art_score, estimate_reward, estimate_spell_list_score, estimate_spell_score,
};
use crate::objects::{ObjectKind, ObjectPayload, ZoneObjectData};
use crate::rng::RandomSource;
use crate::score::{Score, ScoreAttr};
use crate::template::{Generators, ScoreSettings};
use std::collections::BTreeMap;

/// A factory's output plus the bookkeeping needed to accept or reject it.
pub struct Produced {
    pub object: ZoneObjectData,
    pub record_index: usize,
    pub drawn_artifacts: Vec<ArtifactDraw>,
}

pub struct FactoryContext<'a> {
    pub db: &'a GameDatabase,
    pub rng: &'a mut dyn RandomSource,
    pub pools: &'a mut Pools,
}

pub trait ObjectFactory {
    fn key(&self) -> &'static str;
    fn total_freq(&self) -> u64;
    fn total_active(&self) -> usize;

    /// Build the object owning cumulative frequency point `rng_freq`.
    /// `caps` is the score settings with per-attribute maxima already
    /// narrowed to the remaining target.
    fn make(
        &mut self,
        rng_freq: u64,
        caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind>;

    fn on_accept(&mut self, produced: &Produced, ctx: &mut FactoryContext);
    fn on_reject(&mut self, produced: &Produced, ctx: &mut FactoryContext);
}

fn apply_mask(object: &mut ZoneObjectData, mask: &ObjectMask) {
    object.visitable_mask = mask.visitable.clone();
    object.blocked_mask = mask.blocked_unvisitable();
}

// ---------------------------------------------------------------------------

struct BankPayload {
    bank: usize,
    guards_variant: usize,
    guard_value: i64,
    repulse_id: String,
}

pub struct BankFactory {
    records: CommonRecordList<BankPayload>,
    score_settings: ScoreSettings,
    score_id: String,
}

impl BankFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        pools: &Pools,
        terrain: &str,
        disabled_banks: &std::collections::BTreeSet<String>,
    ) -> Self {
        let mut records = CommonRecordList::default();
        let settings = &generators.banks;
        if settings.is_enabled {
            let mut overrides = BTreeMap::new();
            for record in settings.records.values() {
                overrides.insert(record.bank.as_str(), record);
            }

            for (bank_index, bank) in db.banks.records().iter().enumerate() {
                if disabled_banks.contains(&bank.id) {
                    continue;
                }
                if !bank.terrain_viable(terrain) {
                    continue;
                }
                let total_rel: u64 = bank.variants.iter().map(|v| v.frequency_rel).sum();
                if total_rel == 0 {
                    continue;
                }

                let mut base_frequency = bank.frequency;
                let mut guard_value = bank.guard_value;
                let mut repulse_id = String::new();
                if let Some(over) = overrides.get(bank.id.as_str()) {
                    if !over.enabled {
                        continue;
                    }
                    if over.frequency != -1 {
                        base_frequency = over.frequency as u64;
                    }
                    if over.guard != -1 {
                        guard_value = over.guard;
                    }
                    repulse_id = over.repulse_id.clone();
                }

                for (variant_index, variant) in bank.variants.iter().enumerate() {
                    let reward = &bank.rewards[variant.reward_index];

                    let first_filter = reward
                        .artifacts
                        .first()
                        .cloned()
                        .unwrap_or_default();
                    let artifacts_ok = reward.artifacts.iter().all(|filter| {
                        !pools
                            .artifacts
                            .is_empty(db, filter, *filter == first_filter, score_settings)
                    });
                    if !artifacts_ok {
                        continue;
                    }

                    let score = estimate_reward(db, reward, ScoreAttr::Army);
                    if !score_settings.is_valid_score(&score) {
                        continue;
                    }

                    // More artifact rewards mean more ways for a later pool
                    // draw to invalidate the pick, so allow more attempts.
                    let attempts = match reward.artifacts.len() {
                        0 => 1,
                        1 => 3,
                        _ => 9,
                    };

                    records.push(
                        CommonRecord::new(BankPayload {
                            bank: bank_index,
                            guards_variant: variant_index,
                            guard_value,
                            repulse_id: repulse_id.clone(),
                        })
                        .with_frequency(base_frequency * variant.frequency_rel / total_rel)
                        .with_attempts(attempts),
                    );
                }
            }
        }
        records.update_frequency();
        BankFactory {
            records,
            score_settings: score_settings.clone(),
            score_id: score_id.to_string(),
        }
    }
}

impl ObjectFactory for BankFactory {
    fn key(&self) -> &'static str {
        "banks"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;
        let bank = ctx.db.banks.get(payload.bank);

        let upgraded = bank.upgraded_stack_index != -1 && ctx.rng.gen_small(3) == 0;
        let reward = &bank.rewards[bank.variants[payload.guards_variant].reward_index];

        let mut score = estimate_reward(ctx.db, reward, ScoreAttr::Army);
        let mut drawn_artifacts = Vec::new();
        let mut artifact_ids = Vec::new();
        let first_filter = reward.artifacts.first().cloned().unwrap_or_default();
        for filter in &reward.artifacts {
            let draw = ctx
                .pools
                .artifacts
                .make(
                    ctx.db,
                    ctx.rng,
                    filter,
                    filter,
                    *filter == first_filter,
                    &self.score_settings,
                )
                .ok_or_else(|| {
                    FailureKind::PoolExhausted(format!(
                        "bank '{}' artifact reward for target '{}'",
                        bank.id, self.score_id
                    ))
                })?;
            let art = ctx.db.artifacts.get(draw.art);
            score = score + estimate_art_score(art);
            artifact_ids.push(art.id.clone());
            drawn_artifacts.push(draw);
        }

        let mut object = ZoneObjectData::new(
            format!("{} [{}]", bank.id, payload.guards_variant + 1),
            ObjectKind::Visitable,
            ObjectPayload::Bank {
                bank: bank.id.clone(),
                guards_variant: payload.guards_variant,
                upgraded_stack: upgraded,
                artifacts: artifact_ids,
            },
        );
        apply_mask(&mut object, &bank.mask);
        object.score = score;
        object.guard = payload.guard_value;
        object.repulse_id = payload.repulse_id.clone();
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts,
        })
    }

    fn on_accept(&mut self, produced: &Produced, ctx: &mut FactoryContext) {
        self.records.on_accept(produced.record_index);
        if let ObjectPayload::Bank { bank, .. } = &produced.object.payload {
            // Track reward factions for the per-zone uniqueness cap.
            if let Some(record) = ctx.db.banks.find(bank) {
                for reward in &record.rewards {
                    for (unit_id, _) in &reward.units {
                        if let Some(unit) = ctx.db.units.find(unit_id) {
                            ctx.pools.factions.add_faction(&unit.faction);
                        }
                    }
                }
            }
        }
    }

    fn on_reject(&mut self, produced: &Produced, ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
        for draw in &produced.drawn_artifacts {
            ctx.pools.artifacts.discard(draw);
        }
    }
}

// ---------------------------------------------------------------------------

struct ArtifactPayload {
    filter: ArtifactFilter,
    pool: ArtifactFilter,
    repulse_id: String,
}

pub struct ArtifactFactory {
    records: CommonRecordList<ArtifactPayload>,
    score_settings: ScoreSettings,
    score_id: String,
}

impl ArtifactFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        pools: &Pools,
    ) -> Self {
        let mut records = CommonRecordList::default();
        let settings = &generators.artifacts;
        if settings.is_enabled {
            for record in settings.records.values() {
                if pools
                    .artifacts
                    .is_empty(db, &record.filter, true, score_settings)
                {
                    continue;
                }
                let pool = if record.pool.is_default() {
                    record.filter.clone()
                } else {
                    record.pool.clone()
                };
                records.push(
                    CommonRecord::new(ArtifactPayload {
                        filter: record.filter.clone(),
                        pool,
                        repulse_id: record.repulse_id.clone(),
                    })
                    .with_frequency(record.frequency)
                    .with_attempts(3),
                );
            }
        }
        records.update_frequency();
        ArtifactFactory {
            records,
            score_settings: score_settings.clone(),
            score_id: score_id.to_string(),
        }
    }
}

impl ObjectFactory for ArtifactFactory {
    fn key(&self) -> &'static str {
        "artifacts"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;

        let draw = ctx
            .pools
            .artifacts
            .make(
                ctx.db,
                ctx.rng,
                &payload.pool,
                &payload.filter,
                true,
                &self.score_settings,
            )
            .ok_or_else(|| {
                FailureKind::PoolExhausted(format!(
                    "artifact pool for target '{}'",
                    self.score_id
                ))
            })?;
        let art = ctx.db.artifacts.get(draw.art);

        let mut object = ZoneObjectData::new(
            art.id.clone(),
            ObjectKind::Pickable,
            ObjectPayload::Artifact {
                artifact: art.id.clone(),
            },
        );
        object.score = estimate_art_score(art);
        object.guard = art.guard;
        object.repulse_id = payload.repulse_id.clone();
        object.prevent_duplicates = true;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: vec![draw],
        })
    }

    fn on_accept(&mut self, _produced: &Produced, _ctx: &mut FactoryContext) {}

    fn on_reject(&mut self, produced: &Produced, ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
        for draw in &produced.drawn_artifacts {
            ctx.pools.artifacts.discard(draw);
        }
    }
}

// ---------------------------------------------------------------------------

struct ResourcePilePayload {
    resource: String,
    amount: i64,
    guard: i64,
    score: Score,
}

pub struct ResourcePileFactory {
    records: CommonRecordList<ResourcePilePayload>,
    score_id: String,
}

impl ResourcePileFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
    ) -> Self {
        let mut records = CommonRecordList::default();
        let settings = &generators.resources;
        if settings.is_enabled {
            for record in settings.records.values() {
                let Some(resource) = db.resources.find(&record.resource) else {
                    continue;
                };
                let attr = match resource.rarity {
                    crate::database::ResourceRarity::Gold => ScoreAttr::Gold,
                    _ => ScoreAttr::Resource,
                };
                for &amount in &record.amounts {
                    let value = resource.value * (amount / resource.pile_size.max(1));
                    if !score_settings.is_valid_value(attr, value) {
                        continue;
                    }
                    records.push(
                        CommonRecord::new(ResourcePilePayload {
                            resource: resource.id.clone(),
                            amount,
                            guard: record.guard,
                            score: Score::single(attr, value),
                        })
                        .with_frequency(record.frequency),
                    );
                }
            }
        }
        records.update_frequency();
        ResourcePileFactory {
            records,
            score_id: score_id.to_string(),
        }
    }
}

impl ObjectFactory for ResourcePileFactory {
    fn key(&self) -> &'static str {
        "resources"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        _ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;

        let mut object = ZoneObjectData::new(
            payload.resource.clone(),
            ObjectKind::Pickable,
            ObjectPayload::Resource {
                resource: payload.resource.clone(),
                amount: payload.amount,
            },
        );
        object.score = payload.score.clone();
        object.guard = payload.guard;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: Vec::new(),
        })
    }

    fn on_accept(&mut self, _produced: &Produced, _ctx: &mut FactoryContext) {}

    fn on_reject(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
    }
}

// ---------------------------------------------------------------------------

struct PandoraPayload {
    key: String,
    reward: RewardSpec,
    score: Score,
    guard: i64,
    repulse_id: String,
    /// Per random-unit reward entry: the viable unit options.
    unit_options: Vec<(Vec<usize>, i64)>,
}

pub struct PandoraFactory {
    records: CommonRecordList<PandoraPayload>,
    score_id: String,
}

impl PandoraFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        rewards_faction: &str,
        disabled_spells: &std::collections::BTreeSet<String>,
    ) -> Result<Self, FailureKind> {
        let mut records = CommonRecordList::default();
        let settings = &generators.pandoras;
        if settings.is_enabled {
            let mut faction_units: BTreeMap<i32, usize> = BTreeMap::new();
            for (i, unit) in db.units.records().iter().enumerate() {
                if unit.faction == rewards_faction {
                    faction_units.insert(unit.level, i);
                }
            }
            let all_spells: Vec<usize> = db
                .spells
                .records()
                .iter()
                .enumerate()
                .filter(|(_, s)| s.teachable && !disabled_spells.contains(&s.id))
                .map(|(i, _)| i)
                .collect();

            for (id, record) in &settings.records {
                let mut reward = record.reward.clone();
                let mut score = estimate_reward(db, &reward, ScoreAttr::Army);

                if !reward.spells.is_default() {
                    let filtered = reward.spells.filter_possible(db, &all_spells);
                    if filtered.is_empty() {
                        return Err(FailureKind::PoolExhausted(format!(
                            "pandora '{id}' spell filter matches nothing"
                        )));
                    }
                    reward.spells = crate::database::SpellFilter {
                        ids: filtered
                            .iter()
                            .map(|&i| db.spells.get(i).id.clone())
                            .collect(),
                        ..Default::default()
                    };
                    score = score + estimate_spell_list_score(db, &filtered, false);
                }

                let max_value = score.max_value();
                if max_value == 0 {
                    return Err(FailureKind::Internal(format!(
                        "pandora '{id}' has no usable reward"
                    )));
                }
                let guard = if record.guard == -1 {
                    max_value * 2
                } else {
                    record.guard
                };

                let mut unit_options = Vec::new();
                let mut viable = true;
                for random in &reward.random_units {
                    let options: Vec<usize> = random
                        .levels
                        .iter()
                        .filter_map(|level| faction_units.get(level).copied())
                        .collect();
                    if options.is_empty() {
                        viable = false;
                    }
                    unit_options.push((options, random.value));
                }
                if !viable {
                    continue;
                }
                reward.random_units.clear();

                if score_settings.is_valid_score(&score) {
                    records.push(
                        CommonRecord::new(PandoraPayload {
                            key: id.clone(),
                            reward,
                            score,
                            guard,
                            repulse_id: record.repulse_id.clone(),
                            unit_options,
                        })
                        .with_frequency(record.frequency),
                    );
                }
            }
        }
        records.update_frequency();
        Ok(PandoraFactory {
            records,
            score_id: score_id.to_string(),
        })
    }
}

impl ObjectFactory for PandoraFactory {
    fn key(&self) -> &'static str {
        "pandoras"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;

        let mut key = format!("pandora_{}", payload.key);
        let mut reward = payload.reward.clone();
        let mut id_changed = false;
        for (options, value) in &payload.unit_options {
            let pick = ctx.rng.gen(options.len() as u64 - 1) as usize;
            let unit = ctx.db.units.get(options[pick]);
            let count = (value / unit.value.max(1)).max(1);
            if !id_changed {
                id_changed = true;
                let up = unit.level % 10;
                let suffix = match up {
                    0 => String::new(),
                    1 => "u".to_string(),
                    _ => "uu".to_string(),
                };
                key.push_str(&format!("{suffix}-{count}"));
            }
            reward.units.push((unit.id.clone(), count));
        }

        let mut object = ZoneObjectData::new(
            key.clone(),
            ObjectKind::Pickable,
            ObjectPayload::Pandora {
                key,
                reward,
            },
        );
        object.score = payload.score.clone();
        object.guard = payload.guard;
        object.repulse_id = payload.repulse_id.clone();
        object.prevent_duplicates = true;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: Vec::new(),
        })
    }

    fn on_accept(&mut self, _produced: &Produced, _ctx: &mut FactoryContext) {}

    fn on_reject(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
    }
}

// ---------------------------------------------------------------------------

struct ShrinePayload {
    filter: crate::database::SpellFilter,
    visitable: usize,
    guard: i64,
    as_any_spell: bool,
    repulse_id: String,
}

pub struct ShrineFactory {
    records: CommonRecordList<ShrinePayload>,
    score_settings: ScoreSettings,
    score_id: String,
}

impl ShrineFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        pools: &Pools,
    ) -> Self {
        let mut records = CommonRecordList::default();
        let settings = &generators.shrines;
        if settings.is_enabled {
            // Visual level -> shrine building; level 4 falls back to 3 when
            // the database has no dedicated fourth tier.
            let mut visitables: BTreeMap<i32, usize> = BTreeMap::new();
            for level in 1..=4 {
                let id = format!("shrine{level}");
                if let Some(index) = db.visitables.find_index(&id) {
                    visitables.insert(level, index);
                } else if level == 4 {
                    if let Some(&fallback) = visitables.get(&3) {
                        visitables.insert(4, fallback);
                    }
                }
            }

            for record in settings.records.values() {
                let Some(&visitable) = visitables.get(&record.visual_level) else {
                    continue;
                };
                for as_any_spell in [false, true] {
                    if pools
                        .spells
                        .is_empty(db, &record.filter, as_any_spell, score_settings)
                    {
                        continue;
                    }
                    records.push(
                        CommonRecord::new(ShrinePayload {
                            filter: record.filter.clone(),
                            visitable,
                            guard: record.guard,
                            as_any_spell,
                            repulse_id: record.repulse_id.clone(),
                        })
                        .with_frequency(record.frequency),
                    );
                }
            }
        }
        records.update_frequency();
        ShrineFactory {
            records,
            score_settings: score_settings.clone(),
            score_id: score_id.to_string(),
        }
    }
}

impl ObjectFactory for ShrineFactory {
    fn key(&self) -> &'static str {
        "shrines"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;

        let spell_index = ctx
            .pools
            .spells
            .make(
                ctx.db,
                ctx.rng,
                &payload.filter,
                payload.as_any_spell,
                &self.score_settings,
            )
            .ok_or_else(|| {
                FailureKind::PoolExhausted(format!("shrine spells for target '{}'", self.score_id))
            })?;
        let spell = ctx.db.spells.get(spell_index);
        let visitable = ctx.db.visitables.get(payload.visitable);

        let mut object = ZoneObjectData::new(
            format!("shrine {}", spell.id),
            ObjectKind::Visitable,
            ObjectPayload::Shrine {
                visitable: visitable.id.clone(),
                spell: spell.id.clone(),
            },
        );
        apply_mask(&mut object, &visitable.mask);
        object.score = estimate_spell_score(spell, payload.as_any_spell);
        // A shrine can be revisited, so it prices at 75% of the scroll.
        object.guard = if payload.guard == -1 {
            spell.value * 2 * 3 / 4
        } else {
            payload.guard
        };
        object.repulse_id = payload.repulse_id.clone();
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: Vec::new(),
        })
    }

    fn on_accept(&mut self, _produced: &Produced, _ctx: &mut FactoryContext) {}

    fn on_reject(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
    }
}

// ---------------------------------------------------------------------------

struct ScrollPayload {
    filter: crate::database::SpellFilter,
    guard: i64,
    as_any_spell: bool,
    repulse_id: String,
}

pub struct ScrollFactory {
    records: CommonRecordList<ScrollPayload>,
    /// spell index -> scroll artifact index
    scroll_mapping: BTreeMap<usize, usize>,
    score_settings: ScoreSettings,
    score_id: String,
}

impl ScrollFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        pools: &Pools,
    ) -> Self {
        let mut scroll_mapping = BTreeMap::new();
        for (art_index, art) in db.artifacts.records().iter().enumerate() {
            if let Some(spell_id) = &art.scroll_spell {
                if let Some(spell_index) = db.spells.find_index(spell_id) {
                    scroll_mapping.insert(spell_index, art_index);
                }
            }
        }

        let mut records = CommonRecordList::default();
        let settings = &generators.scrolls;
        if settings.is_enabled {
            for record in settings.records.values() {
                for as_any_spell in [false, true] {
                    if pools
                        .spells
                        .is_empty(db, &record.filter, as_any_spell, score_settings)
                    {
                        continue;
                    }
                    records.push(
                        CommonRecord::new(ScrollPayload {
                            filter: record.filter.clone(),
                            guard: record.guard,
                            as_any_spell,
                            repulse_id: record.repulse_id.clone(),
                        })
                        .with_frequency(record.frequency),
                    );
                }
            }
        }
        records.update_frequency();
        ScrollFactory {
            records,
            scroll_mapping,
            score_settings: score_settings.clone(),
            score_id: score_id.to_string(),
        }
    }
}

impl ObjectFactory for ScrollFactory {
    fn key(&self) -> &'static str {
        "scrolls"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;

        let spell_index = ctx
            .pools
            .spells
            .make(
                ctx.db,
                ctx.rng,
                &payload.filter,
                payload.as_any_spell,
                &self.score_settings,
            )
            .ok_or_else(|| {
                FailureKind::PoolExhausted(format!("scroll spells for target '{}'", self.score_id))
            })?;
        let spell = ctx.db.spells.get(spell_index);
        let art_index = self.scroll_mapping.get(&spell_index).copied().ok_or_else(|| {
            FailureKind::PoolExhausted(format!("no scroll artifact exists for '{}'", spell.id))
        })?;
        let art = ctx.db.artifacts.get(art_index);

        let mut object = ZoneObjectData::new(
            art.id.clone(),
            ObjectKind::Pickable,
            ObjectPayload::Scroll {
                artifact: art.id.clone(),
                spell: spell.id.clone(),
            },
        );
        object.score = estimate_spell_score(spell, payload.as_any_spell);
        object.guard = if payload.guard == -1 {
            spell.value * 2
        } else {
            payload.guard
        };
        object.repulse_id = payload.repulse_id.clone();
        object.prevent_duplicates = true;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: Vec::new(),
        })
    }

    fn on_accept(&mut self, _produced: &Produced, _ctx: &mut FactoryContext) {}

    fn on_reject(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
    }
}

// ---------------------------------------------------------------------------

struct DwellingPayload {
    dwelling: usize,
    value: i64,
    guard: i64,
}

pub struct DwellingFactory {
    records: CommonRecordList<DwellingPayload>,
    score_id: String,
}

impl DwellingFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        dwell_faction: &str,
    ) -> Self {
        let mut records = CommonRecordList::default();
        let settings = &generators.dwellings;
        if settings.is_enabled {
            let mut by_level: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
            for (index, dwelling) in db.dwellings.records().iter().enumerate() {
                let Some(first_unit) = dwelling
                    .creatures
                    .first()
                    .and_then(|id| db.units.find(id))
                else {
                    continue;
                };
                if first_unit.faction != dwell_faction {
                    continue;
                }
                let level = dwelling
                    .creatures
                    .iter()
                    .filter_map(|id| db.units.find(id))
                    .map(|u| u.level)
                    .max()
                    .unwrap_or(0);
                by_level.entry(level).or_default().push(index);
            }

            for record in settings.records.values() {
                let Some(dwellings) = by_level.get(&record.level) else {
                    continue;
                };
                for &dwelling_index in dwellings {
                    let dwelling = db.dwellings.get(dwelling_index);
                    let value = if record.value == -1 {
                        dwelling
                            .creatures
                            .iter()
                            .filter_map(|id| db.units.find(id))
                            .map(|u| u.growth * u.value)
                            .sum()
                    } else {
                        record.value
                    };
                    let guard = if record.guard == -1 { value * 2 } else { record.guard };
                    if score_settings.is_valid_value(ScoreAttr::ArmyDwelling, value) {
                        records.push(
                            CommonRecord::new(DwellingPayload {
                                dwelling: dwelling_index,
                                value,
                                guard,
                            })
                            .with_frequency(record.frequency),
                        );
                    }
                }
            }
        }
        records.update_frequency();
        DwellingFactory {
            records,
            score_id: score_id.to_string(),
        }
    }
}

impl ObjectFactory for DwellingFactory {
    fn key(&self) -> &'static str {
        "dwellings"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;
        let dwelling = ctx.db.dwellings.get(payload.dwelling);

        let mut object = ZoneObjectData::new(
            dwelling.id.clone(),
            ObjectKind::Visitable,
            ObjectPayload::Dwelling {
                dwelling: dwelling.id.clone(),
            },
        );
        apply_mask(&mut object, &dwelling.mask);
        object.score = Score::single(ScoreAttr::ArmyDwelling, payload.value);
        object.guard = payload.guard;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: Vec::new(),
        })
    }

    fn on_accept(&mut self, _produced: &Produced, _ctx: &mut FactoryContext) {}

    fn on_reject(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
    }
}

// ---------------------------------------------------------------------------

struct VisitablePayload {
    visitable: usize,
    score: Score,
    guard: i64,
    kind: ObjectKind,
}

pub struct VisitableFactory {
    records: CommonRecordList<VisitablePayload>,
    score_id: String,
}

impl VisitableFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        terrain: &str,
    ) -> Result<Self, FailureKind> {
        let mut records = CommonRecordList::default();
        if generators.visitables.is_enabled {
            for (index, visitable) in db.visitables.records().iter().enumerate() {
                let Some(attr) = visitable.attr else {
                    continue;
                };
                if !visitable.terrain_viable(terrain) {
                    continue;
                }
                if visitable.value == 0 {
                    return Err(FailureKind::Internal(format!(
                        "visitable '{}' has a zero score value",
                        visitable.id
                    )));
                }
                if !score_settings.is_valid_value(attr, visitable.value) {
                    continue;
                }
                let kind = match visitable.visit_kind {
                    VisitKind::Normal => ObjectKind::Visitable,
                    VisitKind::Pick => ObjectKind::Pickable,
                    VisitKind::Remove => ObjectKind::Removable,
                };
                let mut record = CommonRecord::new(VisitablePayload {
                    visitable: index,
                    score: Score::single(attr, visitable.value),
                    guard: visitable.value * 2,
                    kind,
                })
                .with_frequency(visitable.frequency);
                record.min_limit = visitable.min_zone;
                record.max_limit = visitable.max_zone;
                records.push(record);
            }
        }
        records.update_frequency();
        Ok(VisitableFactory {
            records,
            score_id: score_id.to_string(),
        })
    }
}

impl ObjectFactory for VisitableFactory {
    fn key(&self) -> &'static str {
        "visitables"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;
        let visitable = ctx.db.visitables.get(payload.visitable);

        let mut object = ZoneObjectData::new(
            visitable.id.clone(),
            payload.kind,
            ObjectPayload::Visitable {
                visitable: visitable.id.clone(),
            },
        );
        apply_mask(&mut object, &visitable.mask);
        object.score = payload.score.clone();
        object.guard = payload.guard;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: Vec::new(),
        })
    }

    fn on_accept(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_accept(produced.record_index);
    }

    fn on_reject(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
    }
}

// ---------------------------------------------------------------------------

struct MinePayload {
    resource: String,
    value: i64,
    guard: i64,
}

pub struct MineFactory {
    records: CommonRecordList<MinePayload>,
    score_id: String,
}

impl MineFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
    ) -> Self {
        let mut records = CommonRecordList::default();
        let settings = &generators.mines;
        if settings.is_enabled {
            for record in settings.records.values() {
                if db.resources.find(&record.resource).is_none() {
                    continue;
                }
                if !score_settings.is_valid_value(ScoreAttr::ResourceGen, record.value) {
                    continue;
                }
                let mut rec = CommonRecord::new(MinePayload {
                    resource: record.resource.clone(),
                    value: record.value,
                    guard: record.guard,
                })
                .with_frequency(record.frequency);
                rec.min_limit = record.min_zone;
                rec.max_limit = record.max_zone;
                records.push(rec);
            }
        }
        records.update_frequency();
        MineFactory {
            records,
            score_id: score_id.to_string(),
        }
    }
}

impl ObjectFactory for MineFactory {
    fn key(&self) -> &'static str {
        "mines"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        _ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;

        let mut object = ZoneObjectData::new(
            format!("mine.{}", payload.resource),
            ObjectKind::Visitable,
            ObjectPayload::Mine {
                resource: payload.resource.clone(),
                def_variant: 0,
            },
        );
        // Mines keep the standard 3x1 blocked row with the entrance at the
        // bottom-right.
        object.visitable_mask = vec![(0, 0)];
        object.blocked_mask = vec![(-2, 0), (-1, 0)];
        object.score = Score::single(ScoreAttr::ResourceGen, payload.value);
        object.guard = payload.guard;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: Vec::new(),
        })
    }

    fn on_accept(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_accept(produced.record_index);
    }

    fn on_reject(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
    }
}

// ---------------------------------------------------------------------------

struct SkillHutPayload {
    visitable: usize,
    skill: String,
    score: Score,
    guard: i64,
}

pub struct SkillHutFactory {
    records: CommonRecordList<SkillHutPayload>,
    score_id: String,
}

impl SkillHutFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        disabled_skills: &std::collections::BTreeSet<String>,
    ) -> Self {
        let mut records = CommonRecordList::default();
        let settings = &generators.skill_huts;
        if settings.is_enabled {
            if let Some(visitable) = db.visitables.find_index("witch_hut") {
                for skill in db.skills.records() {
                    if !skill.teachable || disabled_skills.contains(&skill.id) {
                        continue;
                    }
                    if skill.value == 0 {
                        continue;
                    }
                    if !score_settings.is_valid_value(ScoreAttr::Upgrade, skill.value) {
                        continue;
                    }
                    records.push(
                        CommonRecord::new(SkillHutPayload {
                            visitable,
                            skill: skill.id.clone(),
                            score: Score::single(ScoreAttr::Upgrade, skill.value),
                            guard: settings.guard,
                        })
                        .with_frequency(settings.frequency),
                    );
                }
            }
        }
        records.update_frequency();
        SkillHutFactory {
            records,
            score_id: score_id.to_string(),
        }
    }
}

impl ObjectFactory for SkillHutFactory {
    fn key(&self) -> &'static str {
        "skillHuts"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;
        let visitable = ctx.db.visitables.get(payload.visitable);

        let mut object = ZoneObjectData::new(
            format!("{} {}", visitable.id, payload.skill),
            ObjectKind::Visitable,
            ObjectPayload::SkillHut {
                visitable: visitable.id.clone(),
                skill: payload.skill.clone(),
            },
        );
        apply_mask(&mut object, &visitable.mask);
        object.score = payload.score.clone();
        object.guard = payload.guard;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: Vec::new(),
        })
    }

    fn on_accept(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_accept(produced.record_index);
    }

    fn on_reject(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
    }
}

// ---------------------------------------------------------------------------

struct ScholarPayload {
    visitable: usize,
    kind: crate::template::ScholarKind,
    filter: crate::database::SpellFilter,
    /// Set for skill scholars; spell scholars draw from the pool.
    skill: Option<String>,
    score: Score,
    guard: i64,
}

pub struct ScholarFactory {
    records: CommonRecordList<ScholarPayload>,
    score_settings: ScoreSettings,
    score_id: String,
}

impl ScholarFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        pools: &Pools,
        disabled_skills: &std::collections::BTreeSet<String>,
    ) -> Self {
        use crate::template::ScholarKind;

        let mut records = CommonRecordList::default();
        let settings = &generators.scholars;
        if settings.is_enabled {
            if let Some(visitable) = db.visitables.find_index("scholar") {
                for record in settings.records.values() {
                    match record.kind {
                        ScholarKind::Spell => {
                            if pools
                                .spells
                                .is_empty(db, &record.filter, false, score_settings)
                            {
                                continue;
                            }
                            records.push(
                                CommonRecord::new(ScholarPayload {
                                    visitable,
                                    kind: record.kind,
                                    filter: record.filter.clone(),
                                    skill: None,
                                    score: Score::new(),
                                    guard: record.guard,
                                })
                                .with_frequency(record.frequency),
                            );
                        }
                        ScholarKind::Skill => {
                            for skill in db.skills.records() {
                                if !skill.teachable || disabled_skills.contains(&skill.id) {
                                    continue;
                                }
                                if skill.value == 0 {
                                    continue;
                                }
                                if !score_settings
                                    .is_valid_value(ScoreAttr::Upgrade, skill.value)
                                {
                                    continue;
                                }
                                // A scholar is consumed on use, so it prices
                                // like the scroll, not like the hut.
                                let guard = if record.guard == -1 {
                                    skill.value * 2
                                } else {
                                    record.guard
                                };
                                records.push(
                                    CommonRecord::new(ScholarPayload {
                                        visitable,
                                        kind: record.kind,
                                        filter: record.filter.clone(),
                                        skill: Some(skill.id.clone()),
                                        score: Score::single(ScoreAttr::Upgrade, skill.value),
                                        guard,
                                    })
                                    .with_frequency(record.frequency),
                                );
                            }
                        }
                    }
                }
            }
        }
        records.update_frequency();
        ScholarFactory {
            records,
            score_settings: score_settings.clone(),
            score_id: score_id.to_string(),
        }
    }
}

impl ObjectFactory for ScholarFactory {
    fn key(&self) -> &'static str {
        "scholars"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        use crate::template::ScholarKind;

        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;
        let visitable = ctx.db.visitables.get(payload.visitable);

        let (id, spell, skill, score, guard) = match payload.kind {
            ScholarKind::Spell => {
                let spell_index = ctx
                    .pools
                    .spells
                    .make(ctx.db, ctx.rng, &payload.filter, false, &self.score_settings)
                    .ok_or_else(|| {
                        FailureKind::PoolExhausted(format!(
                            "scholar spells for target '{}'",
                            self.score_id
                        ))
                    })?;
                let spell = ctx.db.spells.get(spell_index);
                let guard = if payload.guard == -1 {
                    spell.value * 2
                } else {
                    payload.guard
                };
                (
                    format!("{} {}", visitable.id, spell.id),
                    Some(spell.id.clone()),
                    None,
                    estimate_spell_score(spell, false),
                    guard,
                )
            }
            ScholarKind::Skill => {
                let skill = payload.skill.clone().expect("skill scholar has a skill");
                (
                    format!("{} {}", visitable.id, skill),
                    None,
                    Some(skill),
                    payload.score.clone(),
                    payload.guard,
                )
            }
        };

        let mut object = ZoneObjectData::new(
            id,
            ObjectKind::Pickable,
            ObjectPayload::Scholar {
                visitable: visitable.id.clone(),
                spell,
                skill,
            },
        );
        apply_mask(&mut object, &visitable.mask);
        object.score = score;
        object.guard = guard;
        object.prevent_duplicates = true;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: Vec::new(),
        })
    }

    fn on_accept(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_accept(produced.record_index);
    }

    fn on_reject(&mut self, produced: &Produced, _ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
    }
}

// ---------------------------------------------------------------------------

struct QuestHutPayload {
    visitable: usize,
    reward: RewardSpec,
    quest_artifact: ArtifactFilter,
    score: Score,
    guard: i64,
}

pub struct QuestHutFactory {
    records: CommonRecordList<QuestHutPayload>,
    score_settings: ScoreSettings,
    score_id: String,
}

impl QuestHutFactory {
    pub fn new(
        db: &GameDatabase,
        generators: &Generators,
        score_settings: &ScoreSettings,
        score_id: &str,
        pools: &Pools,
    ) -> Result<Self, FailureKind> {
        let mut records = CommonRecordList::default();
        let settings = &generators.quest_huts;
        if settings.is_enabled {
            if let Some(visitable) = db.visitables.find_index("quest_hut") {
                for (id, record) in &settings.records {
                    // The quest artifact is fetched by the player, not
                    // granted, so the score covers the reward only.
                    let score = estimate_reward(db, &record.reward, ScoreAttr::Army);
                    if score.max_value() == 0 {
                        return Err(FailureKind::Internal(format!(
                            "quest hut '{id}' has no usable reward"
                        )));
                    }
                    if pools
                        .artifacts
                        .is_empty(db, &record.quest_artifact, false, score_settings)
                    {
                        continue;
                    }
                    if !score_settings.is_valid_score(&score) {
                        continue;
                    }
                    let guard = if record.guard == -1 { 0 } else { record.guard };
                    records.push(
                        CommonRecord::new(QuestHutPayload {
                            visitable,
                            reward: record.reward.clone(),
                            quest_artifact: record.quest_artifact.clone(),
                            score,
                            guard,
                        })
                        .with_frequency(record.frequency)
                        .with_attempts(3),
                    );
                }
            }
        }
        records.update_frequency();
        Ok(QuestHutFactory {
            records,
            score_settings: score_settings.clone(),
            score_id: score_id.to_string(),
        })
    }
}

impl ObjectFactory for QuestHutFactory {
    fn key(&self) -> &'static str {
        "questHuts"
    }

    fn total_freq(&self) -> u64 {
        self.records.frequency
    }

    fn total_active(&self) -> usize {
        self.records.active
    }

    fn make(
        &mut self,
        rng_freq: u64,
        _caps: &ScoreSettings,
        ctx: &mut FactoryContext,
    ) -> Result<Produced, FailureKind> {
        let record_index = self.records.freq_index(rng_freq);
        let payload = &self.records.records[record_index].payload;
        let visitable = ctx.db.visitables.get(payload.visitable);

        // The wanted artifact still comes from the shared pool so two huts
        // never ask for the same item.
        let draw = ctx
            .pools
            .artifacts
            .make(
                ctx.db,
                ctx.rng,
                &payload.quest_artifact,
                &payload.quest_artifact,
                false,
                &self.score_settings,
            )
            .ok_or_else(|| {
                FailureKind::PoolExhausted(format!(
                    "quest artifacts for target '{}'",
                    self.score_id
                ))
            })?;
        let art = ctx.db.artifacts.get(draw.art);

        let mut object = ZoneObjectData::new(
            format!("{} {}", visitable.id, art.id),
            ObjectKind::Visitable,
            ObjectPayload::QuestHut {
                visitable: visitable.id.clone(),
                quest_artifact: art.id.clone(),
                reward: payload.reward.clone(),
            },
        );
        apply_mask(&mut object, &visitable.mask);
        object.score = payload.score.clone();
        object.guard = payload.guard;
        object.generation_id = self.score_id.clone();

        Ok(Produced {
            object,
            record_index,
            drawn_artifacts: vec![draw],
        })
    }

    fn on_accept(&mut self, _produced: &Produced, _ctx: &mut FactoryContext) {}

    fn on_reject(&mut self, produced: &Produced, ctx: &mut FactoryContext) {
        self.records.on_disable(produced.record_index);
        for draw in &produced.drawn_artifacts {
            ctx.pools.artifacts.discard(draw);
        }
    }
}
