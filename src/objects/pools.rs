//! Candidate pools with duplicate avoidance across draws.
//!
//! A pool drains per-filter sub-pools so repeated draws avoid duplicates
//! until the sub-pool runs dry, then resets from its master list. Artifacts
//! rejected after a draw go to a high-priority carry-over queue consulted
//! first on later draws, keeping frequencies fair under cascading filters.

use crate::database::{ArtifactFilter, GameDatabase, SpellFilter};
use crate::objects::reward::{estimate_art_score, estimate_spell_score};
use crate::rng::RandomSource;
use crate::template::ScoreSettings;
use std::collections::{BTreeMap, BTreeSet};

type PoolKey = Vec<usize>;

/// A successful artifact draw. Hand it back via
/// [`ArtifactPool::discard`] when the object carrying it gets rejected.
#[derive(Clone, Debug)]
pub struct ArtifactDraw {
    pub art: usize,
    pool_key: PoolKey,
}

#[derive(Default)]
struct ArtSubPool {
    master: Vec<usize>,
    current: Vec<usize>,
    current_high: Vec<usize>,
}

enum DrawOutcome {
    Got(usize),
    Rejected,
    NeedReset,
}

impl ArtSubPool {
    fn make(
        &mut self,
        db: &GameDatabase,
        rng: &mut dyn RandomSource,
        filter: &ArtifactFilter,
        enable_filter: bool,
        settings: &ScoreSettings,
    ) -> Option<usize> {
        let mut has_reset = false;
        if self.current.is_empty() {
            self.current = self.master.clone();
            has_reset = true;
        }
        let mut outcome = self.make_one(db, rng, filter, enable_filter, settings);
        loop {
            match outcome {
                DrawOutcome::Got(art) => return Some(art),
                DrawOutcome::Rejected | DrawOutcome::NeedReset => {
                    let need_reset =
                        self.current.is_empty() || matches!(outcome, DrawOutcome::NeedReset);
                    if need_reset {
                        if has_reset {
                            return None;
                        }
                        self.current = self.master.clone();
                        has_reset = true;
                    }
                    outcome = self.make_one(db, rng, filter, enable_filter, settings);
                }
            }
        }
    }

    fn make_one(
        &mut self,
        db: &GameDatabase,
        rng: &mut dyn RandomSource,
        filter: &ArtifactFilter,
        enable_filter: bool,
        settings: &ScoreSettings,
    ) -> DrawOutcome {
        // The carry-over queue goes first; a hit there never forces a reset.
        if !self.current_high.is_empty() {
            if let DrawOutcome::Got(art) =
                draw_from(&mut self.current_high, db, rng, filter, enable_filter, settings)
            {
                return DrawOutcome::Got(art);
            }
        }
        draw_from(&mut self.current, db, rng, filter, enable_filter, settings)
    }
}

fn draw_from(
    list: &mut Vec<usize>,
    db: &GameDatabase,
    rng: &mut dyn RandomSource,
    filter: &ArtifactFilter,
    enable_filter: bool,
    settings: &ScoreSettings,
) -> DrawOutcome {
    let filtered = filter.filter_possible(db, list);
    if filtered.is_empty() {
        return DrawOutcome::NeedReset;
    }
    let index = rng.gen(filtered.len() as u64 - 1) as usize;
    let art = filtered[index];
    let position = list
        .iter()
        .position(|&a| a == art)
        .expect("drawn artifact comes from the list");
    list.remove(position);

    if !artifact_ok(db, art, enable_filter, settings) {
        return DrawOutcome::Rejected;
    }
    DrawOutcome::Got(art)
}

fn artifact_ok(
    db: &GameDatabase,
    art: usize,
    enable_filter: bool,
    settings: &ScoreSettings,
) -> bool {
    if !enable_filter {
        return true;
    }
    settings.is_valid_score(&estimate_art_score(db.artifacts.get(art)))
}

pub struct ArtifactPool {
    master: Vec<usize>,
    pools: BTreeMap<PoolKey, ArtSubPool>,
}

impl ArtifactPool {
    pub fn new(db: &GameDatabase, disabled: &BTreeSet<String>) -> Self {
        let master = db
            .artifacts
            .records()
            .iter()
            .enumerate()
            .filter(|(_, art)| !disabled.contains(&art.id))
            .map(|(i, _)| i)
            .collect();
        ArtifactPool {
            master,
            pools: BTreeMap::new(),
        }
    }

    /// Draw an artifact from the `pool` subset, validated against `filter`
    /// and (optionally) the score bounds.
    pub fn make(
        &mut self,
        db: &GameDatabase,
        rng: &mut dyn RandomSource,
        pool: &ArtifactFilter,
        filter: &ArtifactFilter,
        enable_filter: bool,
        settings: &ScoreSettings,
    ) -> Option<ArtifactDraw> {
        let key = pool.filter_possible(db, &self.master);
        if key.is_empty() {
            return None;
        }
        let sub = self.pools.entry(key.clone()).or_default();
        sub.master = key.clone();
        let art = sub.make(db, rng, filter, enable_filter, settings)?;
        Some(ArtifactDraw { art, pool_key: key })
    }

    /// Return a drawn artifact after its object was rejected. Queued draws
    /// are consulted first on subsequent calls.
    pub fn discard(&mut self, draw: &ArtifactDraw) {
        if let Some(sub) = self.pools.get_mut(&draw.pool_key) {
            sub.current_high.push(draw.art);
        }
    }

    /// True when nothing matching `filter` (and the score bounds) exists.
    pub fn is_empty(
        &self,
        db: &GameDatabase,
        filter: &ArtifactFilter,
        enable_filter: bool,
        settings: &ScoreSettings,
    ) -> bool {
        let candidates = filter.filter_possible(db, &self.master);
        candidates
            .iter()
            .all(|&art| !artifact_ok(db, art, enable_filter, settings))
    }
}

// ---------------------------------------------------------------------------

#[derive(Default)]
struct SpellSubPool {
    master: Vec<usize>,
    current: Vec<usize>,
}

impl SpellSubPool {
    fn make(
        &mut self,
        db: &GameDatabase,
        rng: &mut dyn RandomSource,
        as_any_spell: bool,
        settings: &ScoreSettings,
    ) -> Option<usize> {
        let mut has_reset = false;
        if self.current.is_empty() {
            self.current = self.master.clone();
            has_reset = true;
        }
        loop {
            if self.current.is_empty() {
                if has_reset {
                    return None;
                }
                self.current = self.master.clone();
                has_reset = true;
            }
            let index = rng.gen(self.current.len() as u64 - 1) as usize;
            let spell = self.current.remove(index);
            if spell_ok(db, spell, as_any_spell, settings) {
                return Some(spell);
            }
        }
    }
}

fn spell_ok(db: &GameDatabase, spell: usize, as_any_spell: bool, settings: &ScoreSettings) -> bool {
    settings.is_valid_score(&estimate_spell_score(db.spells.get(spell), as_any_spell))
}

pub struct SpellPool {
    master: Vec<usize>,
    pools: BTreeMap<PoolKey, SpellSubPool>,
}

impl SpellPool {
    pub fn new(db: &GameDatabase, disabled: &BTreeSet<String>) -> Self {
        let master = db
            .spells
            .records()
            .iter()
            .enumerate()
            .filter(|(_, spell)| spell.teachable && !disabled.contains(&spell.id))
            .map(|(i, _)| i)
            .collect();
        SpellPool {
            master,
            pools: BTreeMap::new(),
        }
    }

    pub fn make(
        &mut self,
        db: &GameDatabase,
        rng: &mut dyn RandomSource,
        filter: &SpellFilter,
        as_any_spell: bool,
        settings: &ScoreSettings,
    ) -> Option<usize> {
        let key = filter.filter_possible(db, &self.master);
        if key.is_empty() {
            return None;
        }
        let sub = self.pools.entry(key.clone()).or_default();
        sub.master = key;
        sub.make(db, rng, as_any_spell, settings)
    }

    pub fn is_empty(
        &self,
        db: &GameDatabase,
        filter: &SpellFilter,
        as_any_spell: bool,
        settings: &ScoreSettings,
    ) -> bool {
        let candidates = filter.filter_possible(db, &self.master);
        candidates
            .iter()
            .all(|&spell| !spell_ok(db, spell, as_any_spell, settings))
    }
}

// ---------------------------------------------------------------------------

/// Caps how many distinct factions contribute bank rewards to one zone.
#[derive(Default)]
pub struct FactionPool {
    pub(crate) factions: BTreeSet<String>,
    /// 0 means unlimited.
    pub limit: usize,
}

impl FactionPool {
    pub fn add_faction(&mut self, faction: &str) {
        self.factions.insert(faction.to_string());
    }

    pub fn is_allowed(&self, factions: &[&str]) -> bool {
        if self.limit == 0 {
            return true;
        }
        let non_existent = factions
            .iter()
            .filter(|f| !self.factions.contains(**f))
            .collect::<BTreeSet<_>>()
            .len();
        self.factions.len() + non_existent <= self.limit
    }
}

/// All draw pools of one zone's generation run.
pub struct Pools {
    pub artifacts: ArtifactPool,
    pub spells: SpellPool,
    pub factions: FactionPool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ArtifactClass, ArtifactKind, ArtifactRecord, Catalog};
    use crate::rng::ChaChaSource;

    fn art_db(count: usize) -> GameDatabase {
        let mut db = GameDatabase::default();
        db.artifacts = Catalog::from_records(
            (0..count)
                .map(|i| ArtifactRecord {
                    id: format!("art{i}"),
                    legacy_id: None,
                    value: 1000,
                    guard: 2000,
                    class: ArtifactClass::Treasure,
                    kind: ArtifactKind::Stat,
                    tags: vec![],
                    scroll_spell: None,
                })
                .collect(),
        );
        db
    }

    #[test]
    fn pool_avoids_duplicates_until_exhausted() {
        let db = art_db(4);
        let mut rng = ChaChaSource::new(17);
        let mut pool = ArtifactPool::new(&db, &BTreeSet::new());
        let filter = ArtifactFilter::default();
        let settings = ScoreSettings::default();

        let mut seen = BTreeSet::new();
        for _ in 0..4 {
            let draw = pool
                .make(&db, &mut rng, &filter, &filter, false, &settings)
                .unwrap();
            seen.insert(draw.art);
        }
        // Four draws from a four-artifact pool hit each artifact once.
        assert_eq!(seen.len(), 4);

        // The fifth draw resets the iteration and succeeds again.
        assert!(pool
            .make(&db, &mut rng, &filter, &filter, false, &settings)
            .is_some());
    }

    #[test]
    fn discarded_artifact_comes_back_first() {
        let db = art_db(3);
        let mut rng = ChaChaSource::new(3);
        let mut pool = ArtifactPool::new(&db, &BTreeSet::new());
        let filter = ArtifactFilter::default();
        let settings = ScoreSettings::default();

        let draw = pool
            .make(&db, &mut rng, &filter, &filter, false, &settings)
            .unwrap();
        let rejected = draw.art;
        pool.discard(&draw);

        let next = pool
            .make(&db, &mut rng, &filter, &filter, false, &settings)
            .unwrap();
        assert_eq!(next.art, rejected);
    }

    #[test]
    fn empty_check_respects_filter() {
        let db = art_db(2);
        let pool = ArtifactPool::new(&db, &BTreeSet::new());
        let settings = ScoreSettings::default();
        let none = ArtifactFilter {
            ids: vec!["missing".to_string()],
            ..Default::default()
        };
        assert!(pool.is_empty(&db, &none, false, &settings));
        assert!(!pool.is_empty(&db, &ArtifactFilter::default(), false, &settings));
    }

    #[test]
    fn faction_pool_limit() {
        let mut pool = FactionPool {
            limit: 2,
            ..Default::default()
        };
        assert!(pool.is_allowed(&["castle"]));
        pool.add_faction("castle");
        assert!(pool.is_allowed(&["castle"]));
        assert!(pool.is_allowed(&["rampart"]));
        pool.add_faction("rampart");
        assert!(!pool.is_allowed(&["tower"]));
        assert!(pool.is_allowed(&["castle", "rampart"]));
    }
}
