//! Abstract guard stacks. Guards are collected during border and object
//! placement and resolved into concrete monsters at the very end, so that
//! mirrored guards can copy an army that is only known after all placement.

use crate::grid::TileId;

#[derive(Clone, Debug, Default)]
pub struct MapGuard {
    /// Connection path id or empty for object guards.
    pub id: String,
    pub value: i64,
    /// When set, this guard's army copies the guard with the named id.
    pub mirror_from_id: String,
    pub pos: Option<TileId>,
    pub zone_index: Option<usize>,
    pub joinable: bool,
}

impl MapGuard {
    pub fn for_object(value: i64, pos: TileId, zone_index: usize) -> Self {
        MapGuard {
            id: String::new(),
            value,
            mirror_from_id: String::new(),
            pos: Some(pos),
            zone_index: Some(zone_index),
            joinable: false,
        }
    }
}
