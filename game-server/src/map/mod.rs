//! Maps: the tile grid, the zone index and the Tiled reader.

pub mod composite;
pub mod grid;
mod path;
pub mod reader;

use std::collections::HashMap;

pub use composite::{MapComposite, PvpRule, WarpArea, ZoneBucket, ZONE_PIXELS};
pub use grid::{BlockMask, BlockType, MapGrid};
pub use reader::{read_map, LoadedMap, MapReadError, NpcSeed, ScriptSeed};

/// The set of maps this runtime hosts, keyed by map id.
#[derive(Default)]
pub struct MapManager {
    maps: HashMap<u16, MapComposite>,
}

impl MapManager {
    pub fn new() -> MapManager {
        MapManager::default()
    }

    pub fn insert(&mut self, map: MapComposite) {
        log::info!("Hosting map {} '{}'", map.id, map.name);
        self.maps.insert(map.id, map);
    }

    pub fn get(&self, id: u16) -> Option<&MapComposite> {
        self.maps.get(&id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut MapComposite> {
        self.maps.get_mut(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.maps.contains_key(&id)
    }

    /// Hosted map ids, sorted so tick iteration order is stable.
    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.maps.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
