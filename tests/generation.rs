//! End-to-end pipeline scenarios on a small synthetic database.

mod common;

use common::{test_database, two_zone_template, with_connection};
use std::collections::BTreeSet;
use tileforge::pos::Pos;
use tileforge::rng::ChaChaSource;
use tileforge::score::ScoreAttr;
use tileforge::{generate, Stage};

const SEED: u64 = 0xC0FFEE;

#[test]
fn two_runs_are_byte_identical() {
    let template = with_connection(two_zone_template(), 500, false);
    let db = test_database();

    let mut rng_a = ChaChaSource::new(SEED);
    let map_a = generate(&template, &db, &mut rng_a, None).unwrap();
    let mut rng_b = ChaChaSource::new(SEED);
    let map_b = generate(&template, &db, &mut rng_b, None).unwrap();

    let text_a = serde_json::to_string(&map_a).unwrap();
    let text_b = serde_json::to_string(&map_b).unwrap();
    assert_eq!(text_a, text_b);
}

#[test]
fn zones_partition_the_grid_evenly() {
    let template = two_zone_template();
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let map = generate(&template, &db, &mut rng, None).unwrap();

    assert_eq!(map.zones.len(), 2);
    let mut seen: BTreeSet<Pos> = BTreeSet::new();
    for zone in &map.zones {
        // Two equal relative sizes on a 72x72 map: half the tiles each,
        // within the refinement tolerance.
        let half = (72 * 72 / 2) as i64;
        assert!(
            (zone.tiles.len() as i64 - half).abs() <= 10,
            "zone {} covers {} tiles",
            zone.id,
            zone.tiles.len()
        );
        for &pos in &zone.tiles {
            assert!(seen.insert(pos), "tile {pos} is in two zones");
        }
    }
    assert_eq!(seen.len(), 72 * 72);
}

#[test]
fn score_targets_are_met_exactly() {
    let template = two_zone_template();
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let map = generate(&template, &db, &mut rng, None).unwrap();

    // Gold target 5000 out of 500-piles: exactly ten piles.
    assert_eq!(map.objects.resources.len(), 10);
    let gold: i64 = map
        .objects
        .resources
        .iter()
        .map(|r| r.common.score.get(ScoreAttr::Gold))
        .sum();
    assert_eq!(gold, 5000);

    // Army target 4000 out of 2000-value banks: exactly two banks.
    assert_eq!(map.objects.banks.len(), 2);
    let army: i64 = map
        .objects
        .banks
        .iter()
        .map(|b| b.common.score.get(ScoreAttr::Army))
        .sum();
    assert_eq!(army, 4000);

    // No two objects share a tile.
    let mut positions: BTreeSet<Pos> = BTreeSet::new();
    for pos in map
        .objects
        .resources
        .iter()
        .map(|r| r.common.pos)
        .chain(map.objects.banks.iter().map(|b| b.common.pos))
    {
        assert!(positions.insert(pos), "two objects share tile {pos}");
    }
}

#[test]
fn town_and_hero_are_placed() {
    let template = two_zone_template();
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let map = generate(&template, &db, &mut rng, None).unwrap();

    assert_eq!(map.objects.towns.len(), 1);
    let town = &map.objects.towns[0];
    assert_eq!(town.faction, "castle");
    assert_eq!(town.player.as_deref(), Some("red"));
    assert!(town.is_main);

    assert_eq!(map.objects.heroes.len(), 1);
    let hero = &map.objects.heroes[0];
    assert_eq!(hero.hero, "sir_roland");
    // The hero spawns right below the town gate.
    assert_eq!(hero.common.pos.x, town.common.pos.x);
    assert_eq!(hero.common.pos.y, town.common.pos.y + 1);
}

#[test]
fn connection_guard_becomes_a_monster() {
    let template = with_connection(two_zone_template(), 500, false);
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let map = generate(&template, &db, &mut rng, None).unwrap();

    // Guard difficulty is 100%, zone guard percent disperses by 5%.
    let border_guards: Vec<_> = map
        .objects
        .monsters
        .iter()
        .filter(|m| (450..=550).contains(&m.common.guard))
        .collect();
    assert_eq!(border_guards.len(), 1);
    let guard = border_guards[0];
    // Strongest affordable castle unit is the 300-value swordsman.
    assert_eq!(guard.unit, "swordsman");
    assert!(guard.count >= 1);
    // The guard stands near the vertical border between the two zones.
    assert!((guard.common.pos.x - 36).abs() <= 8);
}

#[test]
fn mirrored_guard_copies_the_referent() {
    let template = with_connection(two_zone_template(), 500, true);
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let map = generate(&template, &db, &mut rng, None).unwrap();

    let border_guards: Vec<_> = map
        .objects
        .monsters
        .iter()
        .filter(|m| (450..=550).contains(&m.common.guard))
        .collect();
    assert_eq!(border_guards.len(), 2);
    assert_eq!(border_guards[0].common.guard, border_guards[1].common.guard);
    assert_ne!(border_guards[0].common.pos, border_guards[1].common.pos);
}

#[test]
fn bank_guards_are_resolved() {
    let template = two_zone_template();
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let map = generate(&template, &db, &mut rng, None).unwrap();

    // Two banks, each guarded with 1500 before the +-5% zone dispersion.
    let bank_guards: Vec<_> = map
        .objects
        .monsters
        .iter()
        .filter(|m| (1350..=1650).contains(&m.common.guard))
        .collect();
    assert_eq!(bank_guards.len(), 2);
}

#[test]
fn obstacles_fill_the_border_belts() {
    let template = two_zone_template();
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let map = generate(&template, &db, &mut rng, None).unwrap();

    // The inter-zone border belt alone is dozens of tiles; all of it must
    // be tiled with obstacle sprites.
    assert!(map.objects.obstacles.len() >= 10);
    for obstacle in &map.objects.obstacles {
        assert!(obstacle.common.pos.x >= 0 && obstacle.common.pos.x < 72);
        assert!(obstacle.common.pos.y >= 0 && obstacle.common.pos.y < 72);
    }
}

#[test]
fn roads_are_written_to_tiles() {
    let template = with_connection(two_zone_template(), 0, false);
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let map = generate(&template, &db, &mut rng, None).unwrap();

    assert!(!map.roads.is_empty());
    let road_tiles: usize = map.roads.iter().map(|r| r.tiles.len()).sum();
    assert!(road_tiles > 0);
    for road in &map.roads {
        for pos in &road.tiles {
            let tile = &map.tiles[map.tile_index(*pos)];
            assert!(tile.road.is_some(), "road tile {pos} not painted");
        }
    }
}

#[test]
fn stop_after_short_circuits() {
    let template = two_zone_template();
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let map = generate(
        &template,
        &db,
        &mut rng,
        Some(Stage::ZoneTilesRefinement),
    )
    .unwrap();

    // Terrain zones exist, nothing further was generated.
    assert_eq!(map.zones.len(), 2);
    assert!(map.objects.towns.is_empty());
    assert!(map.objects.resources.is_empty());
    assert!(map.objects.obstacles.is_empty());
    assert!(map.roads.is_empty());
}

#[test]
fn unknown_entity_is_a_template_error() {
    let mut template = two_zone_template();
    template.zones.get_mut("a").unwrap().terrain = "swamp".to_string();
    let db = test_database();
    let mut rng = ChaChaSource::new(SEED);
    let result = generate(&template, &db, &mut rng, None);
    assert!(matches!(
        result,
        Err(tileforge::GenerateError::Template(_))
    ));
}
