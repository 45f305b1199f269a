//! A playable map: the tile grid plus the zone-partitioned entity index.
//!
//! Zones cut the map into fixed-size squares, each holding the ids of the
//! entities inside it, split into three sets: characters, moving
//! non-characters and fixed objects. All the "who is near X" queries the
//! simulation needs are unions of zone sets, produced lazily.

use std::collections::HashMap;

use common::defines::{TILE_SIZE, ZONE_TILES};

use super::grid::MapGrid;
use crate::entity::EntityId;
use crate::point::{Point, Rectangle};
use crate::spawn::SpawnArea;

/// Zone edge length in pixels.
pub const ZONE_PIXELS: i32 = ZONE_TILES * TILE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PvpRule {
    /// Character-on-character attacks are forbidden.
    None,
    /// Anything goes.
    Free,
}

/// Which zone set an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneBucket {
    Character,
    Mover,
    Fixed,
}

#[derive(Debug, Default)]
struct MapZone {
    characters: Vec<EntityId>,
    movers: Vec<EntityId>,
    fixed: Vec<EntityId>,
}

impl MapZone {
    fn bucket(&self, bucket: ZoneBucket) -> &Vec<EntityId> {
        match bucket {
            ZoneBucket::Character => &self.characters,
            ZoneBucket::Mover => &self.movers,
            ZoneBucket::Fixed => &self.fixed,
        }
    }

    fn bucket_mut(&mut self, bucket: ZoneBucket) -> &mut Vec<EntityId> {
        match bucket {
            ZoneBucket::Character => &mut self.characters,
            ZoneBucket::Mover => &mut self.movers,
            ZoneBucket::Fixed => &mut self.fixed,
        }
    }
}

/// A warp trigger area on a map.
#[derive(Debug, Clone, Copy)]
pub struct WarpArea {
    pub area: Rectangle,
    pub dest_map: u16,
    pub dest: Point,
}

pub struct MapComposite {
    pub id: u16,
    pub name: String,
    pub grid: MapGrid,
    pub pvp: PvpRule,
    pub warps: Vec<WarpArea>,
    pub spawns: Vec<SpawnArea>,
    zones: Vec<MapZone>,
    zones_w: i32,
    zones_h: i32,
    memberships: HashMap<EntityId, (usize, ZoneBucket)>,
    public_ids: HashMap<u16, EntityId>,
    next_public_id: u16,
}

impl MapComposite {
    pub fn new(id: u16, name: &str, grid: MapGrid) -> MapComposite {
        let zones_w = (grid.width() * TILE_SIZE + ZONE_PIXELS - 1) / ZONE_PIXELS;
        let zones_h = (grid.height() * TILE_SIZE + ZONE_PIXELS - 1) / ZONE_PIXELS;
        let mut zones = Vec::with_capacity((zones_w * zones_h) as usize);
        for _ in 0..zones_w * zones_h {
            zones.push(MapZone::default());
        }
        MapComposite {
            id,
            name: name.to_string(),
            grid,
            pvp: PvpRule::None,
            warps: Vec::new(),
            spawns: Vec::new(),
            zones,
            zones_w,
            zones_h,
            memberships: HashMap::new(),
            public_ids: HashMap::new(),
            next_public_id: 1,
        }
    }

    fn zone_index(&self, pos: Point) -> usize {
        let zx = (pos.x / ZONE_PIXELS).clamp(0, self.zones_w - 1);
        let zy = (pos.y / ZONE_PIXELS).clamp(0, self.zones_h - 1);
        (zx + zy * self.zones_w) as usize
    }

    /// Hands out a public id unique within this map, or None when the
    /// 16-bit space is exhausted.
    fn allocate_public_id(&mut self, id: EntityId) -> Option<u16> {
        for _ in 0..u16::MAX {
            let candidate = self.next_public_id;
            self.next_public_id = self.next_public_id.wrapping_add(1).max(1);
            if !self.public_ids.contains_key(&candidate) {
                self.public_ids.insert(candidate, id);
                return Some(candidate);
            }
        }
        None
    }

    /// Registers an entity at `pos`. Beings get a public id, returned here;
    /// fixed objects return 0.
    pub fn insert(&mut self, id: EntityId, pos: Point, bucket: ZoneBucket) -> Option<u16> {
        debug_assert!(!self.memberships.contains_key(&id), "double insert {}", id);
        let public_id = match bucket {
            ZoneBucket::Fixed => 0,
            _ => self.allocate_public_id(id)?,
        };
        let zone = self.zone_index(pos);
        self.zones[zone].bucket_mut(bucket).push(id);
        self.memberships.insert(id, (zone, bucket));
        Some(public_id)
    }

    /// Unregisters an entity. The caller passes the public id so the map
    /// can release it (0 for fixed objects).
    pub fn remove(&mut self, id: EntityId, public_id: u16) {
        if let Some((zone, bucket)) = self.memberships.remove(&id) {
            self.zones[zone].bucket_mut(bucket).retain(|&e| e != id);
        }
        if public_id != 0 {
            self.public_ids.remove(&public_id);
        }
    }

    /// Moves an entity's id between zone sets after motion was applied.
    pub fn update_zone(&mut self, id: EntityId, new_pos: Point) {
        let Some(&(old_zone, bucket)) = self.memberships.get(&id) else {
            return;
        };
        let new_zone = self.zone_index(new_pos);
        if new_zone == old_zone {
            return;
        }
        self.zones[old_zone].bucket_mut(bucket).retain(|&e| e != id);
        self.zones[new_zone].bucket_mut(bucket).push(id);
        self.memberships.insert(id, (new_zone, bucket));
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.memberships.contains_key(&id)
    }

    pub fn entity_by_public_id(&self, public_id: u16) -> Option<EntityId> {
        self.public_ids.get(&public_id).copied()
    }

    // ---- regions ------------------------------------------------------

    fn region_for_rect(&self, rect: Rectangle) -> Vec<usize> {
        let zx0 = (rect.x / ZONE_PIXELS).clamp(0, self.zones_w - 1);
        let zy0 = (rect.y / ZONE_PIXELS).clamp(0, self.zones_h - 1);
        let zx1 = ((rect.x + rect.w) / ZONE_PIXELS).clamp(0, self.zones_w - 1);
        let zy1 = ((rect.y + rect.h) / ZONE_PIXELS).clamp(0, self.zones_h - 1);
        let mut region = Vec::new();
        for zy in zy0..=zy1 {
            for zx in zx0..=zx1 {
                region.push((zx + zy * self.zones_w) as usize);
            }
        }
        region
    }

    fn region_around_point(&self, p: Point, radius: i32) -> Vec<usize> {
        self.region_for_rect(Rectangle::new(
            p.x - radius,
            p.y - radius,
            2 * radius,
            2 * radius,
        ))
    }

    /// The union of the zones around two points, deduplicated; used for
    /// "who entered or left this character's vision this tick".
    fn region_around_pair(&self, a: Point, b: Point, radius: i32) -> Vec<usize> {
        let mut region = self.region_around_point(a, radius);
        for zone in self.region_around_point(b, radius) {
            if !region.contains(&zone) {
                region.push(zone);
            }
        }
        region
    }

    fn iter_region(
        &self,
        region: Vec<usize>,
        buckets: &'static [ZoneBucket],
    ) -> impl Iterator<Item = EntityId> + '_ {
        region.into_iter().flat_map(move |zone| {
            buckets
                .iter()
                .flat_map(move |&b| self.zones[zone].bucket(b).iter().copied())
        })
    }

    // ---- iteration contracts ------------------------------------------

    const ALL: &'static [ZoneBucket] =
        &[ZoneBucket::Character, ZoneBucket::Mover, ZoneBucket::Fixed];
    const BEINGS: &'static [ZoneBucket] = &[ZoneBucket::Character, ZoneBucket::Mover];
    const CHARACTERS: &'static [ZoneBucket] = &[ZoneBucket::Character];
    const FIXED: &'static [ZoneBucket] = &[ZoneBucket::Fixed];

    /// Every entity on the map.
    pub fn iter_whole_map(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_region((0..self.zones.len()).collect(), Self::ALL)
    }

    /// Entities in zones intersecting `rect`.
    pub fn iter_inside_rectangle(
        &self,
        rect: Rectangle,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_region(self.region_for_rect(rect), Self::ALL)
    }

    /// Entities in zones within `radius` pixels of `p`.
    pub fn iter_around_point(
        &self,
        p: Point,
        radius: i32,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_region(self.region_around_point(p, radius), Self::ALL)
    }

    /// Beings (characters + movers) in zones within `radius` of `p`.
    pub fn iter_beings_around(
        &self,
        p: Point,
        radius: i32,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_region(self.region_around_point(p, radius), Self::BEINGS)
    }

    /// Characters only, around a point.
    pub fn iter_characters_around(
        &self,
        p: Point,
        radius: i32,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_region(self.region_around_point(p, radius), Self::CHARACTERS)
    }

    /// Fixed objects (ground items) around a point.
    pub fn iter_fixed_around(
        &self,
        p: Point,
        radius: i32,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_region(self.region_around_point(p, radius), Self::FIXED)
    }

    /// The around-character contract: union of the zones around the old
    /// and new positions of a character that may have moved this tick.
    pub fn iter_around_character(
        &self,
        old_pos: Point,
        new_pos: Point,
        radius: i32,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_region(self.region_around_pair(old_pos, new_pos, radius), Self::ALL)
    }

    /// Beings variant of the around-character contract.
    pub fn iter_beings_around_character(
        &self,
        old_pos: Point,
        new_pos: Point,
        radius: i32,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_region(
            self.region_around_pair(old_pos, new_pos, radius),
            Self::BEINGS,
        )
    }

    /// All characters on the map; visibility assembly walks this.
    pub fn iter_all_characters(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.iter_region((0..self.zones.len()).collect(), Self::CHARACTERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::grid::MapGrid;

    fn map() -> MapComposite {
        // 64x64 tiles = 8x8 zones of 8 tiles.
        MapComposite::new(1, "testland", MapGrid::new(64, 64))
    }

    #[test]
    fn insert_assigns_distinct_public_ids() {
        let mut m = map();
        let a = m
            .insert(EntityId(1), Point::new(16, 16), ZoneBucket::Character)
            .unwrap();
        let b = m
            .insert(EntityId(2), Point::new(16, 16), ZoneBucket::Mover)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(m.entity_by_public_id(a), Some(EntityId(1)));
        let c = m
            .insert(EntityId(3), Point::new(16, 16), ZoneBucket::Fixed)
            .unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn around_point_sees_same_zone_and_neighbors_only() {
        let mut m = map();
        m.insert(EntityId(1), Point::new(16, 16), ZoneBucket::Character);
        m.insert(EntityId(2), Point::new(300, 16), ZoneBucket::Mover);
        m.insert(EntityId(3), Point::new(2000, 2000), ZoneBucket::Mover);

        let near: Vec<_> = m.iter_around_point(Point::new(20, 20), 256).collect();
        assert!(near.contains(&EntityId(1)));
        assert!(near.contains(&EntityId(2)));
        assert!(!near.contains(&EntityId(3)));
    }

    #[test]
    fn zone_update_relocates_ids() {
        let mut m = map();
        m.insert(EntityId(1), Point::new(16, 16), ZoneBucket::Mover);
        m.update_zone(EntityId(1), Point::new(1000, 1000));
        let old: Vec<_> = m.iter_around_point(Point::new(16, 16), 128).collect();
        assert!(old.is_empty());
        let new: Vec<_> = m.iter_around_point(Point::new(1000, 1000), 128).collect();
        assert_eq!(new, vec![EntityId(1)]);
    }

    #[test]
    fn around_character_unions_old_and_new() {
        let mut m = map();
        m.insert(EntityId(1), Point::new(16, 16), ZoneBucket::Mover);
        m.insert(EntityId(2), Point::new(1500, 1500), ZoneBucket::Mover);
        let seen: Vec<_> = m
            .iter_around_character(Point::new(16, 16), Point::new(1500, 1500), 256)
            .collect();
        assert!(seen.contains(&EntityId(1)));
        assert!(seen.contains(&EntityId(2)));
    }

    #[test]
    fn remove_releases_public_id() {
        let mut m = map();
        let pid = m
            .insert(EntityId(1), Point::new(16, 16), ZoneBucket::Character)
            .unwrap();
        m.remove(EntityId(1), pid);
        assert!(!m.contains_entity(EntityId(1)));
        assert_eq!(m.entity_by_public_id(pid), None);
        assert_eq!(m.iter_whole_map().count(), 0);
    }

    #[test]
    fn filtered_iterators_respect_buckets() {
        let mut m = map();
        m.insert(EntityId(1), Point::new(16, 16), ZoneBucket::Character);
        m.insert(EntityId(2), Point::new(20, 20), ZoneBucket::Mover);
        m.insert(EntityId(3), Point::new(24, 24), ZoneBucket::Fixed);

        let chars: Vec<_> = m.iter_characters_around(Point::new(16, 16), 64).collect();
        assert_eq!(chars, vec![EntityId(1)]);
        let fixed: Vec<_> = m.iter_fixed_around(Point::new(16, 16), 64).collect();
        assert_eq!(fixed, vec![EntityId(3)]);
        let beings: Vec<_> = m
            .iter_beings_around(Point::new(16, 16), 64)
            .collect();
        assert_eq!(beings.len(), 2);
    }
}
