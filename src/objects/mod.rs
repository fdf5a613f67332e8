//! Zone objects: everything the budget loop can produce, one sum type
//! instead of a class hierarchy. An object knows its footprint masks, its
//! score and guard, and how to commit itself into the output map.

pub mod factories;
pub mod generator;
pub mod pools;
pub mod records;
pub mod reward;

use crate::database::RewardSpec;
use crate::output::{
    FhArtifact, FhBank, FhDwelling, FhMine, FhPandora, FhQuestHut, FhResource, FhScholar,
    FhShrine, FhSkillHut, FhVisitable, GeneratedMap, ObjectCommon,
};
use crate::pos::Pos;
use crate::score::Score;
use crate::template::ZoneObjectType;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ObjectKind {
    Visitable,
    Pickable,
    /// Monster join offer; placed like a pickable.
    Joinable,
    /// Removed after one visit (e.g. a prison).
    Removable,
}

#[derive(Clone, Debug)]
pub enum ObjectPayload {
    Bank {
        bank: String,
        guards_variant: usize,
        upgraded_stack: bool,
        artifacts: Vec<String>,
    },
    Artifact {
        artifact: String,
    },
    Resource {
        resource: String,
        amount: i64,
    },
    Pandora {
        key: String,
        reward: RewardSpec,
    },
    Shrine {
        visitable: String,
        spell: String,
    },
    Scroll {
        artifact: String,
        spell: String,
    },
    Dwelling {
        dwelling: String,
    },
    Visitable {
        visitable: String,
    },
    Mine {
        resource: String,
        def_variant: usize,
    },
    SkillHut {
        visitable: String,
        skill: String,
    },
    Scholar {
        visitable: String,
        spell: Option<String>,
        skill: Option<String>,
    },
    QuestHut {
        visitable: String,
        quest_artifact: String,
        reward: RewardSpec,
    },
    /// One guard protecting several pickables, laid out in compact rows.
    Group {
        items: Vec<(Pos, ZoneObjectData)>,
    },
}

#[derive(Clone, Debug)]
pub struct ZoneObjectData {
    pub id: String,
    pub kind: ObjectKind,
    pub score: Score,
    pub guard: i64,
    pub repulse_id: String,
    pub prevent_duplicates: bool,
    /// Offsets of visitable cells, bottom-right anchored.
    pub visitable_mask: Vec<(i32, i32)>,
    /// Offsets of blocked-but-unvisitable cells.
    pub blocked_mask: Vec<(i32, i32)>,
    pub generation_id: String,
    pub payload: ObjectPayload,
}

impl ZoneObjectData {
    /// Commit the object into the output map at `pos`.
    pub fn place(&self, map: &mut GeneratedMap, pos: Pos) {
        let common = ObjectCommon {
            pos,
            guard: self.guard,
            score: self.score.clone(),
            generation_id: self.generation_id.clone(),
        };
        match &self.payload {
            ObjectPayload::Bank {
                bank,
                guards_variant,
                upgraded_stack,
                artifacts,
            } => {
                map.register_object_def(bank);
                map.objects.banks.push(FhBank {
                    common,
                    bank: bank.clone(),
                    guards_variant: *guards_variant,
                    upgraded_stack: *upgraded_stack,
                    artifacts: artifacts.clone(),
                });
            }
            ObjectPayload::Artifact { artifact } | ObjectPayload::Scroll { artifact, .. } => {
                map.register_object_def(artifact);
                map.objects.artifacts.push(FhArtifact {
                    common,
                    artifact: artifact.clone(),
                });
            }
            ObjectPayload::Resource { resource, amount } => {
                map.register_object_def(resource);
                map.objects.resources.push(FhResource {
                    common,
                    resource: resource.clone(),
                    amount: *amount,
                });
            }
            ObjectPayload::Pandora { key, reward } => {
                map.objects.pandoras.push(FhPandora {
                    common,
                    key: key.clone(),
                    reward: reward.clone(),
                });
            }
            ObjectPayload::Shrine { visitable, spell } => {
                map.register_object_def(visitable);
                map.objects.shrines.push(FhShrine {
                    common,
                    visitable: visitable.clone(),
                    spell: spell.clone(),
                });
            }
            ObjectPayload::Dwelling { dwelling } => {
                map.register_object_def(dwelling);
                map.objects.dwellings.push(FhDwelling {
                    common,
                    dwelling: dwelling.clone(),
                    player: None,
                });
            }
            ObjectPayload::Visitable { visitable } => {
                map.register_object_def(visitable);
                map.objects.visitables.push(FhVisitable {
                    common,
                    visitable: visitable.clone(),
                });
            }
            ObjectPayload::Mine {
                resource,
                def_variant,
            } => {
                map.register_object_def(resource);
                map.objects.mines.push(FhMine {
                    common,
                    resource: resource.clone(),
                    player: None,
                    def_variant: *def_variant,
                });
            }
            ObjectPayload::SkillHut { visitable, skill } => {
                map.register_object_def(visitable);
                map.objects.skill_huts.push(FhSkillHut {
                    common,
                    visitable: visitable.clone(),
                    skills: vec![skill.clone()],
                });
            }
            ObjectPayload::Scholar {
                visitable,
                spell,
                skill,
            } => {
                map.register_object_def(visitable);
                map.objects.scholars.push(FhScholar {
                    common,
                    visitable: visitable.clone(),
                    spell: spell.clone(),
                    skill: skill.clone(),
                });
            }
            ObjectPayload::QuestHut {
                visitable,
                quest_artifact,
                reward,
            } => {
                map.register_object_def(visitable);
                map.objects.quest_huts.push(FhQuestHut {
                    common,
                    visitable: visitable.clone(),
                    quest_artifact: quest_artifact.clone(),
                    reward: reward.clone(),
                });
            }
            ObjectPayload::Group { items } => {
                for (rel, item) in items {
                    item.place(map, pos + *rel);
                }
            }
        }
    }

    pub fn new(id: String, kind: ObjectKind, payload: ObjectPayload) -> Self {
        ZoneObjectData {
            id,
            kind,
            score: Score::new(),
            guard: 0,
            repulse_id: String::new(),
            prevent_duplicates: false,
            visitable_mask: vec![(0, 0)],
            blocked_mask: Vec::new(),
            generation_id: String::new(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------

/// Builder for a guarded pickable group. Items are pushed until one does
/// not fit, then the group is flushed as a single synthetic object.
pub struct ObjectGroup {
    pub max_guard: i64,
    pub item_limit: usize,
    /// Random salt reserved for layout variety.
    pub rng_mask: u8,
    guard: i64,
    repulse_id: String,
    id: String,
    items: Vec<ZoneObjectData>,
}

impl ObjectGroup {
    pub fn new(max_guard: i64, item_limit: usize, rng_mask: u8) -> Self {
        ObjectGroup {
            max_guard,
            item_limit,
            rng_mask,
            guard: 0,
            repulse_id: String::new(),
            id: String::new(),
            items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn try_push(&mut self, item: &ZoneObjectData) -> bool {
        if item.kind != ObjectKind::Pickable {
            return false;
        }
        if self.items.len() >= self.item_limit {
            return false;
        }
        let new_guard = self.guard + item.guard;
        if !self.items.is_empty() && new_guard > self.max_guard {
            return false;
        }
        if item.prevent_duplicates && self.items.iter().any(|i| i.id == item.id) {
            return false;
        }
        // Two repulsing items never share a pile.
        if !self.repulse_id.is_empty() && !item.repulse_id.is_empty() {
            return false;
        }
        self.guard = new_guard;
        self.repulse_id = item.repulse_id.clone();
        if !self.id.is_empty() {
            self.id.push('+');
        }
        self.id.push_str(&item.id);
        self.items.push(item.clone());
        true
    }

    /// Lay the items out in compact rows (width 3 from six items up, else
    /// 2) anchored at the group's bottom-right, and produce the combined
    /// object.
    pub fn into_object(self) -> ZoneObjectData {
        let item_count = self.items.len();
        let max_row = if item_count >= 6 { 3 } else { 2 };
        let row_width = max_row.min(item_count.max(1));

        let mut mask: Vec<(i32, i32)> = Vec::with_capacity(item_count);
        let mut placed: Vec<(Pos, ZoneObjectData)> = Vec::with_capacity(item_count);
        let mut score = Score::new();
        for (index, item) in self.items.into_iter().enumerate() {
            let offset = (
                -((index % row_width) as i32),
                -((index / row_width) as i32),
            );
            mask.push(offset);
            let child_visit = item.visitable_mask[0];
            let rel = Pos::new(offset.0 - child_visit.0, offset.1 - child_visit.1, 0);
            score = score + item.score.clone();
            placed.push((rel, item));
        }
        mask.sort();

        ZoneObjectData {
            id: self.id,
            kind: ObjectKind::Pickable,
            score,
            guard: self.guard,
            repulse_id: self.repulse_id,
            prevent_duplicates: false,
            visitable_mask: mask,
            blocked_mask: Vec::new(),
            generation_id: String::new(),
            payload: ObjectPayload::Group { items: placed },
        }
    }
}

// ---------------------------------------------------------------------------

/// One generated object plus its scheduling metadata.
#[derive(Clone, Debug)]
pub struct ZoneObjectItem {
    pub object: ZoneObjectData,
    pub object_type: ZoneObjectType,
    pub preferred_heat: i32,
    pub placement_order: i64,
    pub use_guards: bool,
    pub pickable: bool,
    pub random_angle_offset: i32,
    pub generated_index: usize,
    pub generated_count: usize,
}

impl ZoneObjectItem {
    pub fn new(object: ZoneObjectData) -> Self {
        ZoneObjectItem {
            object,
            object_type: ZoneObjectType::Segment,
            preferred_heat: 0,
            placement_order: 0,
            use_guards: false,
            pickable: false,
            random_angle_offset: -1,
            generated_index: 0,
            generated_count: 0,
        }
    }

    pub fn is_scatter(&self) -> bool {
        matches!(
            self.object_type,
            ZoneObjectType::SegmentScatter | ZoneObjectType::RoadScatter
        )
    }
}

/// Everything one zone's budget loop produced.
#[derive(Default)]
pub struct ZoneObjectGeneration {
    pub objects: Vec<ZoneObjectItem>,
    /// Sorted id list for post-generation accounting.
    pub all_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::ScoreAttr;

    fn pickable(id: &str, guard: i64) -> ZoneObjectData {
        let mut obj = ZoneObjectData::new(
            id.to_string(),
            ObjectKind::Pickable,
            ObjectPayload::Artifact {
                artifact: id.to_string(),
            },
        );
        obj.guard = guard;
        obj.score = Score::single(ScoreAttr::ArtStat, 100);
        obj
    }

    #[test]
    fn group_capacity_and_guard_cap() {
        let mut group = ObjectGroup::new(1000, 4, 0);
        assert!(group.try_push(&pickable("a", 400)));
        assert!(group.try_push(&pickable("b", 500)));
        // Guard cap exceeded.
        assert!(!group.try_push(&pickable("c", 200)));
        let obj = group.into_object();
        assert_eq!(obj.guard, 900);
        assert_eq!(obj.id, "a+b");
        assert_eq!(obj.visitable_mask.len(), 2);
        assert_eq!(obj.score.get(ScoreAttr::ArtStat), 200);
    }

    #[test]
    fn group_rejects_duplicates_and_repulse() {
        let mut group = ObjectGroup::new(10000, 4, 0);
        let mut a = pickable("a", 100);
        a.prevent_duplicates = true;
        assert!(group.try_push(&a));
        assert!(!group.try_push(&a));

        let mut r1 = pickable("r1", 100);
        r1.repulse_id = "gold".to_string();
        let mut r2 = pickable("r2", 100);
        r2.repulse_id = "gold".to_string();
        assert!(group.try_push(&r1));
        assert!(!group.try_push(&r2));
    }

    #[test]
    fn group_rejects_visitables() {
        let mut group = ObjectGroup::new(10000, 4, 0);
        let mut v = pickable("v", 100);
        v.kind = ObjectKind::Visitable;
        assert!(!group.try_push(&v));
    }

    #[test]
    fn group_row_layout() {
        let mut group = ObjectGroup::new(100000, 8, 0);
        for i in 0..6 {
            assert!(group.try_push(&pickable(&format!("o{i}"), 10)));
        }
        let obj = group.into_object();
        // Six items use rows of three: x in 0..-2, y in 0..-1.
        assert!(obj.visitable_mask.contains(&(-2, -1)));
        assert!(obj.visitable_mask.contains(&(0, 0)));
        assert_eq!(obj.visitable_mask.len(), 6);
    }
}
