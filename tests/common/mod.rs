//! Shared fixtures: a small synthetic game database and a two-zone
//! template with gold and army budgets.

use tileforge::database::*;
use tileforge::pos::Pos;
use tileforge::score::ScoreAttr;
use tileforge::template::*;
use tileforge::zone::RoadType;

pub fn test_database() -> GameDatabase {
    let mut db = GameDatabase::default();

    db.terrains = Catalog::from_records(vec![TerrainRecord {
        id: "grass".to_string(),
        legacy_id: Some(0),
    }]);

    db.factions = Catalog::from_records(vec![FactionRecord {
        id: "castle".to_string(),
        legacy_id: Some(0),
    }]);

    db.players = Catalog::from_records(vec![PlayerRecord {
        id: "red".to_string(),
        legacy_id: Some(0),
    }]);

    db.heroes = Catalog::from_records(vec![HeroRecord {
        id: "sir_roland".to_string(),
        legacy_id: None,
        faction: "castle".to_string(),
    }]);

    db.units = Catalog::from_records(vec![
        UnitRecord {
            id: "pikeman".to_string(),
            legacy_id: None,
            faction: "castle".to_string(),
            level: 10,
            value: 80,
            growth: 14,
        },
        UnitRecord {
            id: "swordsman".to_string(),
            legacy_id: None,
            faction: "castle".to_string(),
            level: 40,
            value: 300,
            growth: 6,
        },
        UnitRecord {
            id: "angel".to_string(),
            legacy_id: None,
            faction: "castle".to_string(),
            level: 70,
            value: 5000,
            growth: 1,
        },
    ]);

    db.resources = Catalog::from_records(vec![
        ResourceRecord {
            id: "gold".to_string(),
            legacy_id: None,
            value: 1,
            pile_size: 1,
            rarity: ResourceRarity::Gold,
        },
        ResourceRecord {
            id: "wood".to_string(),
            legacy_id: None,
            value: 100,
            pile_size: 1,
            rarity: ResourceRarity::Common,
        },
    ]);

    db.banks = Catalog::from_records(vec![BankRecord {
        id: "griffin_tower".to_string(),
        legacy_id: None,
        frequency: 1000,
        guard_value: 1500,
        upgraded_stack_index: -1,
        variants: vec![BankVariant {
            frequency_rel: 1,
            reward_index: 0,
        }],
        rewards: vec![RewardSpec {
            army_value: 2000,
            ..Default::default()
        }],
        mask: ObjectMask::single_tile(),
        terrains: vec![],
    }]);

    db.obstacles = Catalog::from_records(vec![
        obstacle("rock_a", &[&[1]]),
        obstacle("rock_b", &[&[1]]),
        obstacle("stump", &[&[1]]),
        obstacle("trees_pair", &[&[1, 1]]),
        obstacle("trees_block", &[&[1, 1], &[1, 1]]),
    ]);

    db
}

fn obstacle(id: &str, rows: &[&[u8]]) -> ObstacleRecord {
    ObstacleRecord {
        id: id.to_string(),
        legacy_id: None,
        mask: PlanarMask {
            width: rows[0].len(),
            height: rows.len(),
            rows: rows.iter().map(|r| r.to_vec()).collect(),
        },
        terrains: vec![],
    }
}

fn base_zone(center: Pos) -> ZoneSettings {
    ZoneSettings {
        center_avg: center,
        terrain: "grass".to_string(),
        main_town_faction: "castle".to_string(),
        rewards_faction: "castle".to_string(),
        ..Default::default()
    }
}

fn gold_target(target: i64) -> ScoreSettings {
    let mut settings = ScoreSettings {
        is_enabled: true,
        ..Default::default()
    };
    settings.score.insert(
        ScoreAttr::Gold,
        ScoreScope {
            target,
            min_single: -1,
            max_single: -1,
            max_remain: -1,
            consume_remain: false,
        },
    );
    settings
}

fn army_target(target: i64) -> ScoreSettings {
    let mut settings = ScoreSettings {
        is_enabled: true,
        ..Default::default()
    };
    settings.score.insert(
        ScoreAttr::Army,
        ScoreScope {
            target,
            min_single: -1,
            max_single: -1,
            max_remain: -1,
            consume_remain: false,
        },
    );
    settings
}

/// 72x72 map, two equal zones side by side. Zone "a" owns a player town,
/// a gold budget (resource piles) and an army budget (creature banks).
pub fn two_zone_template() -> Template {
    let mut template = Template {
        width: 72,
        height: 72,
        ..Default::default()
    };

    let mut zone_a = base_zone(Pos::new(18, 36, 0));
    zone_a.player = Some("red".to_string());
    zone_a.towns.push(TownSettings {
        player_controlled: true,
        use_zone_faction: true,
        faction: None,
        has_fort: true,
        is_main: true,
    });
    zone_a.generators.resources.is_enabled = true;
    zone_a.generators.resources.records.insert(
        "gold_piles".to_string(),
        ResourcePileGenRecord {
            resource: "gold".to_string(),
            amounts: vec![500],
            frequency: 1000,
            guard: 0,
        },
    );
    zone_a.generators.banks.is_enabled = true;
    zone_a
        .score_targets
        .insert("t1_gold".to_string(), gold_target(5000));
    zone_a
        .score_targets
        .insert("t2_army".to_string(), army_target(4000));

    let zone_b = base_zone(Pos::new(54, 36, 0));

    template.zones.insert("a".to_string(), zone_a);
    template.zones.insert("b".to_string(), zone_b);
    template
}

pub fn with_connection(mut template: Template, guard: i64, mirrored: bool) -> Template {
    let mut connection = Connection {
        from: "a".to_string(),
        to: "b".to_string(),
        paths: std::collections::BTreeMap::new(),
    };
    connection.paths.insert(
        "main".to_string(),
        ConnectionPath {
            guard,
            mirror_guard: String::new(),
            road: Some(RoadType::Cobblestone),
            radius: 2,
        },
    );
    if mirrored {
        connection.paths.insert(
            "second".to_string(),
            ConnectionPath {
                guard: 0,
                mirror_guard: "main".to_string(),
                road: Some(RoadType::Dirt),
                radius: 2,
            },
        );
    }
    template.connections.insert("a_b".to_string(), connection);
    template
}
