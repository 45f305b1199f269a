//! The world entity arena and the tagged entity model.
//!
//! Entities are stored in a slot arena and referenced by stable integer
//! handles. Anything that wants to remember another entity keeps its
//! [`EntityId`] and tolerates absence on lookup; nothing owns an entity but
//! the arena itself, and a map owns the membership of the entities on it.

use std::collections::VecDeque;

use bitflags::bitflags;

use common::defines::{BASE_ATTR_HP, BASE_ATTR_HP_REGEN, TICKS_PER_HP_REGEN};

use crate::attributes::AttributeSet;
use crate::character::Character;
use crate::items::GroundItem;
use crate::map::grid::BlockMask;
use crate::monster::Monster;
use crate::point::{Point, TilePos};

/// Stable handle into the world arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Per-tick update flags, cleared after visibility assembly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateFlags: u8 {
        const NEW_ON_MAP       = 0x01;
        const NEW_DESTINATION  = 0x02;
        const ATTACK           = 0x04;
        const ACTION_CHANGE    = 0x08;
        const LOOKS_CHANGE     = 0x10;
        const DIRECTION_CHANGE = 0x20;
        const HEALTH_CHANGE    = 0x40;
        const REMOVE           = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    Stand = 0,
    Walk = 1,
    Attack = 2,
    Sit = 3,
    Dead = 4,
    Hurt = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Down = 0,
    Up = 1,
    Left = 2,
    Right = 3,
}

impl Direction {
    pub fn from_u8(v: u8) -> Direction {
        match v {
            1 => Direction::Up,
            2 => Direction::Left,
            3 => Direction::Right,
            _ => Direction::Down,
        }
    }
}

/// Wire-visible entity type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityType {
    Item = 0,
    Npc = 1,
    Monster = 2,
    Character = 3,
}

/// Everything that can fight and move: the shared component of NPCs,
/// monsters and characters.
#[derive(Debug, Clone)]
pub struct Being {
    /// Public id, unique within the map the being stands on. Assigned by
    /// the map on insert.
    pub public_id: u16,
    pub action: Action,
    pub direction: Direction,
    /// Movement speed, inverted: milliseconds per tile.
    pub speed: u32,
    /// Bounding radius in pixels.
    pub size: i32,
    pub old_pos: Point,
    pub dst: Point,
    /// Residual milliseconds of the current action (walk step or attack).
    pub action_time: u32,
    pub path: VecDeque<TilePos>,
    pub walk_mask: BlockMask,
    pub attributes: AttributeSet,
    /// Current hit points, clamped to [0, modified max HP].
    pub hp: i32,
    pub hits_taken: Vec<u16>,
    hp_regen_timer: u32,
}

impl Being {
    pub fn new(walk_mask: BlockMask) -> Being {
        Being {
            public_id: 0,
            action: Action::Stand,
            direction: Direction::Down,
            speed: 300,
            size: 8,
            old_pos: Point::default(),
            dst: Point::default(),
            action_time: 0,
            path: VecDeque::new(),
            walk_mask,
            attributes: AttributeSet::new(),
            hp: 1,
            hits_taken: Vec::new(),
            hp_regen_timer: 0,
        }
    }

    pub fn max_hp(&self) -> i32 {
        self.attributes.modified(BASE_ATTR_HP)
    }

    pub fn fill_hitpoints(&mut self) {
        self.hp = self.max_hp();
    }

    pub fn is_dead(&self) -> bool {
        self.action == Action::Dead
    }

    /// Per-tick upkeep shared by every being: modifier timers and HP
    /// regeneration. Returns the attribute indices whose modified value
    /// changed, plus whether HP moved.
    pub fn upkeep(&mut self) -> (Vec<usize>, bool) {
        let changed = self.attributes.tick();

        let mut hp_changed = false;
        if !self.is_dead() {
            self.hp_regen_timer += 1;
            if self.hp_regen_timer >= TICKS_PER_HP_REGEN {
                self.hp_regen_timer = 0;
                let regen = self.attributes.modified(BASE_ATTR_HP_REGEN);
                if regen > 0 && self.hp < self.max_hp() {
                    self.hp = (self.hp + regen).min(self.max_hp());
                    hp_changed = true;
                }
            }
        }
        // A max-HP change re-clamps current HP.
        if self.hp > self.max_hp() {
            self.hp = self.max_hp();
            hp_changed = true;
        }

        (changed, hp_changed)
    }
}

/// A scripted non-player being.
#[derive(Debug, Clone)]
pub struct Npc {
    pub being: Being,
    pub npc_id: u16,
    pub name: String,
    /// Script function driving this NPC, if any.
    pub script_function: Option<String>,
}

impl Npc {
    pub fn new(npc_id: u16, name: &str, script_function: Option<String>) -> Npc {
        let mut being = Being::new(
            BlockMask::WALL | BlockMask::MONSTER | BlockMask::CHARACTER,
        );
        // NPCs are not targetable, but the health invariants still hold.
        being.attributes.set_base(BASE_ATTR_HP, 100);
        being.fill_hitpoints();
        Npc {
            being,
            npc_id,
            name: name.to_string(),
            script_function,
        }
    }
}

/// The world object: position, owning map, per-tick flags and the kind tag.
#[derive(Debug, Clone)]
pub struct Entity {
    pub map_id: u16,
    pub pos: Point,
    pub flags: UpdateFlags,
    pub kind: EntityKind,
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    Item(GroundItem),
    Npc(Npc),
    Monster(Monster),
    Character(Box<Character>),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self.kind {
            EntityKind::Item(_) => EntityType::Item,
            EntityKind::Npc(_) => EntityType::Npc,
            EntityKind::Monster(_) => EntityType::Monster,
            EntityKind::Character(_) => EntityType::Character,
        }
    }

    pub fn is_character(&self) -> bool {
        matches!(self.kind, EntityKind::Character(_))
    }

    pub fn being(&self) -> Option<&Being> {
        match &self.kind {
            EntityKind::Item(_) => None,
            EntityKind::Npc(n) => Some(&n.being),
            EntityKind::Monster(m) => Some(&m.being),
            EntityKind::Character(c) => Some(&c.being),
        }
    }

    pub fn being_mut(&mut self) -> Option<&mut Being> {
        match &mut self.kind {
            EntityKind::Item(_) => None,
            EntityKind::Npc(n) => Some(&mut n.being),
            EntityKind::Monster(m) => Some(&mut m.being),
            EntityKind::Character(c) => Some(&mut c.being),
        }
    }

    pub fn character(&self) -> Option<&Character> {
        match &self.kind {
            EntityKind::Character(c) => Some(c),
            _ => None,
        }
    }

    pub fn character_mut(&mut self) -> Option<&mut Character> {
        match &mut self.kind {
            EntityKind::Character(c) => Some(c),
            _ => None,
        }
    }

    pub fn monster(&self) -> Option<&Monster> {
        match &self.kind {
            EntityKind::Monster(m) => Some(m),
            _ => None,
        }
    }

    pub fn monster_mut(&mut self) -> Option<&mut Monster> {
        match &mut self.kind {
            EntityKind::Monster(m) => Some(m),
            _ => None,
        }
    }

    pub fn public_id(&self) -> u16 {
        self.being().map(|b| b.public_id).unwrap_or(0)
    }

    /// Sets a new travel destination, invalidating the cached path.
    pub fn set_destination(&mut self, dst: Point) {
        if let Some(being) = self.being_mut() {
            being.dst = dst;
            being.path.clear();
        }
        self.flags |= UpdateFlags::NEW_DESTINATION;
    }

    pub fn clear_destination(&mut self) {
        let pos = self.pos;
        if let Some(being) = self.being_mut() {
            being.dst = pos;
            being.path.clear();
            being.action_time = 0;
        }
    }

    pub fn set_action(&mut self, action: Action) {
        if let Some(being) = self.being_mut() {
            being.action = action;
            being.action_time = 0;
        }
        // Attack and walk are reported through their own messages.
        if action != Action::Attack && action != Action::Walk {
            self.flags |= UpdateFlags::ACTION_CHANGE;
        }
    }
}

/// The entity arena: a slot vector with a free list.
#[derive(Default)]
pub struct World {
    slots: Vec<Option<Entity>>,
    free: Vec<u32>,
}

impl World {
    pub fn new() -> World {
        World::default()
    }

    pub fn insert(&mut self, entity: Entity) -> EntityId {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(entity);
                EntityId(idx)
            }
            None => {
                self.slots.push(Some(entity));
                EntityId(self.slots.len() as u32 - 1)
            }
        }
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        let entity = slot.take();
        if entity.is_some() {
            self.free.push(id.0);
        }
        entity
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots.get_mut(id.0 as usize)?.as_mut()
    }

    /// Temporarily removes an entity so it can be mutated while the rest
    /// of the world stays borrowable. Pair with [`World::put_back`].
    pub fn take(&mut self, id: EntityId) -> Option<Entity> {
        self.slots.get_mut(id.0 as usize)?.take()
    }

    pub fn put_back(&mut self, id: EntityId, entity: Entity) {
        self.slots[id.0 as usize] = Some(entity);
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| EntityId(i as u32))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::GroundItem;

    fn item_entity() -> Entity {
        Entity {
            map_id: 1,
            pos: Point::new(16, 16),
            flags: UpdateFlags::empty(),
            kind: EntityKind::Item(GroundItem {
                item_id: 7,
                amount: 1,
            }),
        }
    }

    #[test]
    fn arena_reuses_slots() {
        let mut world = World::new();
        let a = world.insert(item_entity());
        let b = world.insert(item_entity());
        assert_ne!(a, b);
        world.remove(a);
        assert!(!world.contains(a));
        let c = world.insert(item_entity());
        assert_eq!(c, a);
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn take_and_put_back() {
        let mut world = World::new();
        let id = world.insert(item_entity());
        let entity = world.take(id).unwrap();
        assert!(!world.contains(id));
        world.put_back(id, entity);
        assert!(world.contains(id));
    }

    #[test]
    fn items_are_not_beings() {
        let entity = item_entity();
        assert!(entity.being().is_none());
        assert_eq!(entity.entity_type(), EntityType::Item);
        assert_eq!(entity.public_id(), 0);
    }
}
