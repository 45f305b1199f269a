//! The game world state and the per-tick update pass.
//!
//! Tick order is fixed: update every thing, resolve attacks, move movers,
//! collect deaths, map housekeeping (zones, spawns, scripts), visibility
//! assembly, flag clearing, then the deferred-event drain. Damage therefore
//! uses pre-movement positions, and a death on tick N yields drops and
//! experience that clients observe on tick N+1.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::defines::{DamageType, Element, BASE_ATTR_HIT, BASE_ATTR_PHY_ATK_DELTA, BASE_ATTR_PHY_ATK_MIN, TICK_MS};
use common::net::MessageOut;
use common::protocol::*;

use crate::buysell::BuySell;
use crate::character::Transaction;
use crate::combat::{self, AttackShape, AttackZone, Damage};
use crate::entity::{
    Action, Entity, EntityId, EntityKind, EntityType, UpdateFlags, World,
};
use crate::inventory;
use crate::items::{GroundItem, ItemManager};
use crate::map::{MapManager, ZoneBucket};
use crate::monster::MonsterManager;
use crate::movement;
use crate::point::Point;
use crate::script::{ScriptContext, ScriptHost};
use crate::sync;
use crate::trade::Trade;

/// Milliseconds between two swings of a character's weapon.
const CHAR_ATTACK_PERIOD_MS: u32 = 1000;

/// The default melee zone for characters.
const CHAR_MELEE_ZONE: AttackZone = AttackZone {
    shape: AttackShape::Cone,
    multi_target: false,
    range: 48,
    angle: 60,
};

/// Structural world changes deferred to the end of the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredEvent {
    Insert,
    Remove,
    Warp { map_id: u16, dest: Point },
}

/// The deferred-event queue. Events execute in insertion order; a remove
/// colliding with any other event for the same entity wins.
#[derive(Default)]
pub struct EventQueue {
    events: Vec<(EntityId, DeferredEvent)>,
}

impl EventQueue {
    pub fn new() -> EventQueue {
        EventQueue::default()
    }

    pub fn enqueue(&mut self, id: EntityId, event: DeferredEvent) {
        if let Some(existing) = self.events.iter_mut().find(|(eid, _)| *eid == id) {
            if event == DeferredEvent::Remove {
                existing.1 = DeferredEvent::Remove;
            }
            return;
        }
        self.events.push((id, event));
    }

    pub fn drain(&mut self) -> Vec<(EntityId, DeferredEvent)> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

pub struct GameState {
    pub maps: MapManager,
    pub world: World,
    pub items: ItemManager,
    pub monsters: MonsterManager,
    pub queue: EventQueue,
    pub scripts: HashMap<u16, Box<dyn ScriptHost>>,
    /// Outbound messages per connected character, drained by the server
    /// shell after each tick.
    pub outbox: Vec<(EntityId, MessageOut)>,
    /// Outbound messages for the account server link.
    pub account_outbox: Vec<MessageOut>,
    /// Character sessions to close after their outbox drains.
    pub closing: Vec<EntityId>,
    /// Characters waiting for the account server's redirect response,
    /// keyed by database id.
    pub pending_redirects: Vec<(u32, EntityId)>,
    pub trades: HashMap<u32, Trade>,
    pub shops: HashMap<u32, BuySell>,
    next_transaction_id: u32,
    pub tick: u64,
    rng: StdRng,
}

impl GameState {
    pub fn new() -> GameState {
        GameState::with_seed(rand::thread_rng().gen())
    }

    /// Deterministic state for tests.
    pub fn with_seed(seed: u64) -> GameState {
        GameState {
            maps: MapManager::new(),
            world: World::new(),
            items: ItemManager::new(),
            monsters: MonsterManager::new(),
            queue: EventQueue::new(),
            scripts: HashMap::new(),
            outbox: Vec::new(),
            account_outbox: Vec::new(),
            closing: Vec::new(),
            pending_redirects: Vec::new(),
            trades: HashMap::new(),
            shops: HashMap::new(),
            next_transaction_id: 1,
            tick: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_transaction_id(&mut self) -> u32 {
        let id = self.next_transaction_id;
        self.next_transaction_id += 1;
        id
    }

    pub fn send_to(&mut self, id: EntityId, msg: MessageOut) {
        self.outbox.push((id, msg));
    }

    pub fn send_to_account(&mut self, msg: MessageOut) {
        self.account_outbox.push(msg);
    }

    // ---- structural operations ---------------------------------------

    /// Adds an entity to the world and its map. Only call outside the
    /// update pass; inside a tick, enqueue instead.
    pub fn insert_entity(&mut self, entity: Entity) -> Option<EntityId> {
        let id = self.world.insert(entity);
        if self.place_on_map(id) {
            Some(id)
        } else {
            self.world.remove(id);
            None
        }
    }

    pub fn enqueue_insert(&mut self, id: EntityId) {
        self.queue.enqueue(id, DeferredEvent::Insert);
    }

    pub fn enqueue_remove(&mut self, id: EntityId) {
        self.queue.enqueue(id, DeferredEvent::Remove);
    }

    pub fn enqueue_warp(&mut self, id: EntityId, map_id: u16, dest: Point) {
        self.queue.enqueue(id, DeferredEvent::Warp { map_id, dest });
    }

    /// Registers an already-inserted world entity with its map: zone set,
    /// public id, block map, new-on-map flag and the initial map-change
    /// message for characters.
    fn place_on_map(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.world.get(id) else {
            return false;
        };
        let map_id = entity.map_id;
        let pos = entity.pos;
        let bucket = match entity.entity_type() {
            EntityType::Character => ZoneBucket::Character,
            EntityType::Item => ZoneBucket::Fixed,
            _ => ZoneBucket::Mover,
        };
        let block = movement::block_type(entity);

        let Some(map) = self.maps.get_mut(map_id) else {
            log::warn!("Insert of {} on unhosted map {}", id, map_id);
            return false;
        };
        let Some(public_id) = map.insert(id, pos, bucket) else {
            log::error!("Map {} has no free public ids", map_id);
            return false;
        };
        if let Some(kind) = block {
            map.grid.block_tile(pos.tile(), kind);
        }
        let map_name = map.name.clone();

        let entity = self.world.get_mut(id).unwrap();
        entity.flags |= UpdateFlags::NEW_ON_MAP;
        if let Some(being) = entity.being_mut() {
            being.public_id = public_id;
            being.old_pos = pos;
            being.dst = pos;
        }

        if entity.is_character() {
            let mut msg = MessageOut::new(GC_MAP_CHANGE);
            msg.write_string(&map_name);
            msg.write_u16(pos.x as u16);
            msg.write_u16(pos.y as u16);
            self.send_to(id, msg);
        }
        true
    }

    /// Unregisters an entity from its map, announcing the departure to
    /// characters that can see it.
    fn remove_from_map(&mut self, id: EntityId) {
        let Some(entity) = self.world.get(id) else {
            return;
        };
        let map_id = entity.map_id;
        let pos = entity.pos;
        let public_id = entity.public_id();
        let is_being = entity.being().is_some();
        let is_character = entity.is_character();
        let item_id = match &entity.kind {
            EntityKind::Item(i) => Some(i.item_id),
            _ => None,
        };
        let block = movement::block_type(entity);

        if is_character {
            self.cancel_transaction(id);
        }

        let Some(map) = self.maps.get_mut(map_id) else {
            return;
        };

        let witnesses: Vec<EntityId> = map
            .iter_characters_around(pos, common::defines::AROUND_AREA)
            .filter(|&w| w != id)
            .collect();

        if let Some(kind) = block {
            map.grid.free_tile(pos.tile(), kind);
        }
        map.remove(id, public_id);

        if is_being {
            for w in witnesses {
                let in_range = self
                    .world
                    .get(w)
                    .map(|e| e.pos.in_range_of(pos, common::defines::AROUND_AREA))
                    .unwrap_or(false);
                if in_range {
                    let mut msg = MessageOut::new(GC_BEING_LEAVE);
                    msg.write_u16(public_id);
                    self.send_to(w, msg);
                }
            }
        } else if item_id.is_some() {
            for w in witnesses {
                let mut msg = MessageOut::new(GC_ITEMS);
                msg.write_u16(0);
                msg.write_u16(pos.x as u16);
                msg.write_u16(pos.y as u16);
                self.send_to(w, msg);
            }
        }

        if let Some(being) = self.world.get_mut(id).and_then(|e| e.being_mut()) {
            being.public_id = 0;
        }
    }

    /// Cancels whatever transaction the character is in.
    pub fn cancel_transaction(&mut self, id: EntityId) {
        let Some(transaction) = self
            .world
            .get_mut(id)
            .and_then(|e| e.character_mut())
            .map(|c| c.begin_transaction(Transaction::None))
        else {
            return;
        };
        match transaction {
            Transaction::None => {}
            Transaction::Trade(tid) => crate::trade::cancel(self, tid),
            Transaction::BuySell(sid) => {
                self.shops.remove(&sid);
            }
        }
    }

    /// Ships the character's snapshot to the gateway. Projectiles must be
    /// returned beforehand when this precedes a departure.
    pub fn flush_character(&mut self, id: EntityId) {
        let Some(entity) = self.world.get(id) else {
            return;
        };
        let (map_id, pos) = (entity.map_id, entity.pos);
        let Some(character) = entity.character() else {
            return;
        };
        let mut msg = MessageOut::new(GA_PLAYER_DATA);
        msg.write_u32(character.db_id);
        character.to_data(map_id, pos).serialize(&mut msg);
        self.send_to_account(msg);
        if let Some(c) = self.world.get_mut(id).and_then(|e| e.character_mut()) {
            c.save_pending = false;
        }
    }

    /// Admits a character delivered by the account server. Returns the
    /// entity id on success.
    pub fn admit_character(
        &mut self,
        db_id: u32,
        name: &str,
        data: &common::character_data::CharacterData,
    ) -> Option<EntityId> {
        let character = crate::character::Character::from_data(db_id, name, data);
        let entity = Entity {
            map_id: data.map_id,
            pos: Point::new(data.x as i32, data.y as i32),
            flags: UpdateFlags::empty(),
            kind: EntityKind::Character(Box::new(character)),
        };
        let id = self.insert_entity(entity)?;
        log::info!("Character '{}' ({}) entered map {}", name, db_id, data.map_id);
        Some(id)
    }

    /// Tears a character down on logout or disconnect: projectiles back,
    /// snapshot flushed, entity gone. In-flight transactions die with it.
    pub fn logout_character(&mut self, id: EntityId) {
        self.cancel_transaction(id);
        if let Some(c) = self.world.get_mut(id).and_then(|e| e.character_mut()) {
            inventory::return_projectiles(c, &self.items);
        }
        self.flush_character(id);
        self.remove_from_map(id);
        if let Some(entity) = self.world.remove(id) {
            if let Some(c) = entity.character() {
                log::info!("Character '{}' left", c.name);
            }
        }
        self.pending_redirects.retain(|&(_, e)| e != id);
    }

    // ---- the tick -----------------------------------------------------

    pub fn update(&mut self) {
        self.tick += 1;
        for map_id in self.maps.ids() {
            self.update_map(map_id);
        }
        self.drain_queue();
    }

    fn update_map(&mut self, map_id: u16) {
        let Some(map) = self.maps.get(map_id) else {
            return;
        };
        let ids: Vec<EntityId> = map.iter_whole_map().collect();

        // 1. Update every thing.
        for &id in &ids {
            self.update_thing(id, map_id);
        }

        // 2. Perform attacks, on pre-movement positions.
        for &id in &ids {
            let attacking = self
                .world
                .get(id)
                .map(|e| e.flags.contains(UpdateFlags::ATTACK))
                .unwrap_or(false);
            if attacking {
                self.perform_attack(id, map_id);
            }
        }

        // 3. Move everything that moves.
        for &id in &ids {
            let Some(mut entity) = self.world.take(id) else {
                continue;
            };
            if entity.being().is_some() {
                if let Some(map) = self.maps.get_mut(map_id) {
                    movement::move_tick(&mut entity, &mut map.grid);
                }
            }
            self.world.put_back(id, entity);
        }

        // 4. Collect removals raised during the pass.
        for &id in &ids {
            let remove = self
                .world
                .get(id)
                .map(|e| e.flags.contains(UpdateFlags::REMOVE))
                .unwrap_or(false);
            if remove {
                self.enqueue_remove(id);
            }
        }

        // 5. Map housekeeping: zones follow motion, warps trigger, spawns
        //    replenish, the map script runs.
        self.update_zones(map_id, &ids);
        self.check_warps(map_id, &ids);
        self.update_spawns(map_id);
        self.run_map_script(map_id);

        // 6. Visibility and client synchronization.
        let characters: Vec<EntityId> = self
            .maps
            .get(map_id)
            .map(|m| m.iter_all_characters().collect())
            .unwrap_or_default();
        for p in characters {
            sync::inform_player(self, map_id, p);
        }

        // 7. Clear per-tick state.
        for &id in &ids {
            if let Some(entity) = self.world.get_mut(id) {
                entity.flags = UpdateFlags::empty();
                if let Some(being) = entity.being_mut() {
                    being.hits_taken.clear();
                }
                if let Some(c) = entity.character_mut() {
                    c.dirty_attributes.clear();
                    c.dirty_experience.clear();
                    c.leveled_up = false;
                }
            }
        }
    }

    fn update_thing(&mut self, id: EntityId, map_id: u16) {
        let Some(entity) = self.world.get_mut(id) else {
            return;
        };

        // Shared being upkeep: modifier timers, regeneration, death check.
        if let Some(being) = entity.being_mut() {
            let (changed, hp_changed) = being.upkeep();
            let newly_dead = being.hp <= 0 && !being.is_dead();
            if hp_changed {
                entity.flags |= UpdateFlags::HEALTH_CHANGE;
            }
            if let Some(c) = entity.character_mut() {
                for attr in changed {
                    c.mark_attribute_dirty(attr);
                }
            }
            if newly_dead {
                self.handle_death(id, None, 0);
                return;
            }
        }

        match self
            .world
            .get(id)
            .map(|e| e.entity_type())
            .unwrap_or(EntityType::Item)
        {
            EntityType::Monster => self.update_monster(id, map_id),
            EntityType::Character => self.update_character_combat(id),
            _ => {}
        }
    }

    /// Character swing timing: while the action is attack, a swing lands
    /// whenever the residual runs out, then rearms.
    fn update_character_combat(&mut self, id: EntityId) {
        let Some(entity) = self.world.get_mut(id) else {
            return;
        };
        let Some(being) = entity.being_mut() else {
            return;
        };
        if being.action != Action::Attack || being.is_dead() {
            return;
        }
        if being.action_time > TICK_MS {
            being.action_time -= TICK_MS;
        } else {
            being.action_time = CHAR_ATTACK_PERIOD_MS;
            entity.flags |= UpdateFlags::ATTACK;
        }
    }

    fn update_monster(&mut self, id: EntityId, map_id: u16) {
        let Some(mut entity) = self.world.take(id) else {
            return;
        };
        self.drive_monster(id, &mut entity, map_id);
        self.world.put_back(id, entity);
    }

    fn drive_monster(&mut self, id: EntityId, entity: &mut Entity, map_id: u16) {
        let pos = entity.pos;
        let Some(monster) = entity.monster_mut() else {
            return;
        };

        // Dead monsters only rot.
        if monster.being.is_dead() {
            monster.countdown -= 1;
            if monster.countdown <= 0 {
                entity.flags |= UpdateFlags::REMOVE;
            }
            return;
        }

        // An attack in progress runs to completion.
        if monster.attack_timer > 0 {
            monster.attack_timer -= 1;
            let strike_at = monster
                .current_attack
                .and_then(|i| monster.class.attacks.get(i))
                .map(|a| a.post_delay)
                .unwrap_or(0);
            let strikes = monster.attack_timer == strike_at;
            if strikes {
                monster.being.action = Action::Attack;
            }
            if monster.attack_timer == 0 && monster.being.action == Action::Attack {
                monster.being.action = Action::Stand;
            }
            if strikes {
                entity.flags |= UpdateFlags::ATTACK;
            }
            return;
        }

        let class = monster.class.clone();
        let track_range = class.track_range as i32;
        let track_px = track_range * common::defines::TILE_SIZE;
        let old_pos = monster.being.old_pos;
        let walk_mask = monster.being.walk_mask;

        // Gather candidate characters within tracking range.
        let candidates: Vec<(EntityId, Point)> = {
            let Some(map) = self.maps.get(map_id) else {
                return;
            };
            map.iter_beings_around_character(old_pos, pos, track_px)
                .filter(|&cid| cid != id)
                .filter_map(|cid| self.world.get(cid).map(|e| (cid, e)))
                .filter(|(_, e)| e.is_character())
                .filter(|(_, e)| !e.being().map(|b| b.is_dead()).unwrap_or(true))
                .map(|(cid, e)| (cid, e.pos))
                .collect()
        };

        let mut best_priority = 0;
        let mut best_position = None;

        for (cid, cpos) in candidates {
            let target_priority = match entity.monster().unwrap().anger.get(&cid) {
                Some(&anger) => anger,
                None if class.aggressive => 1,
                None => continue,
            };

            for attack_pos in &class.attack_positions {
                let candidate = Point::new(cpos.x + attack_pos.dx, cpos.y + attack_pos.dy);
                let priority = if candidate.tile() == pos.tile() {
                    target_priority * track_range
                } else {
                    let Some(map) = self.maps.get_mut(map_id) else {
                        return;
                    };
                    let path =
                        map.grid
                            .find_path(pos.tile(), candidate.tile(), walk_mask, track_range);
                    if path.is_empty() || path.len() as i32 >= track_range {
                        0
                    } else {
                        target_priority * (track_range - path.len() as i32)
                    }
                };
                if priority > best_priority {
                    best_priority = priority;
                    best_position = Some((candidate, attack_pos.facing()));
                }
            }
        }

        let monster = entity.monster_mut().unwrap();
        match best_position {
            Some((target, facing)) if target.tile() == pos.tile() => {
                // In position: face the victim and wind up an attack.
                if monster.being.direction != facing {
                    monster.being.direction = facing;
                    entity.flags |= UpdateFlags::DIRECTION_CHANGE;
                }
                let attack_index = if class.attacks.is_empty() {
                    None
                } else {
                    Some(self.rng.gen_range(0..class.attacks.len()))
                };
                let monster = entity.monster_mut().unwrap();
                if let Some(i) = attack_index {
                    let attack = &class.attacks[i];
                    monster.current_attack = Some(i);
                    monster.attack_timer = attack.pre_delay + attack.post_delay;
                }
            }
            Some((target, _)) => {
                entity.set_destination(target);
            }
            None => {
                // Idle: wander the stroll range now and then.
                let monster = entity.monster_mut().unwrap();
                monster.countdown -= 1;
                if monster.countdown <= 0 {
                    let stroll = class.stroll_range.max(1);
                    let dest = Point::new(
                        pos.x + self.rng.gen_range(-stroll..=stroll),
                        pos.y + self.rng.gen_range(-stroll..=stroll),
                    );
                    let countdown = 10 + self.rng.gen_range(0..10);
                    let monster = entity.monster_mut().unwrap();
                    monster.countdown = countdown;
                    entity.set_destination(dest);
                }
            }
        }
    }

    /// Resolves one flagged attack: candidate selection over the spatial
    /// index, zone membership, then damage application.
    fn perform_attack(&mut self, attacker_id: EntityId, map_id: u16) {
        let Some(attacker) = self.world.get(attacker_id) else {
            return;
        };
        let att_pos = attacker.pos;
        let att_type = attacker.entity_type();
        let Some(att_being) = attacker.being() else {
            return;
        };
        let direction = att_being.direction;

        let (damage, zone) = match &attacker.kind {
            EntityKind::Monster(m) => {
                let Some(attack) = m
                    .current_attack
                    .and_then(|i| m.class.attacks.get(i))
                    .copied()
                else {
                    return;
                };
                (
                    Damage {
                        base: (m.being.attributes.modified(BASE_ATTR_PHY_ATK_MIN) as f64
                            * attack.damage_factor) as i32,
                        delta: m.being.attributes.modified(BASE_ATTR_PHY_ATK_DELTA),
                        cth: m.being.attributes.modified(BASE_ATTR_HIT),
                        element: attack.element,
                        damage_type: DamageType::Physical,
                        skill: 0,
                    },
                    AttackZone {
                        shape: attack.shape,
                        multi_target: attack.multi_target,
                        range: attack.range,
                        angle: attack.angle,
                    },
                )
            }
            EntityKind::Character(c) => (
                Damage {
                    base: c.being.attributes.modified(BASE_ATTR_PHY_ATK_MIN),
                    delta: c.being.attributes.modified(BASE_ATTR_PHY_ATK_DELTA),
                    cth: c.being.attributes.modified(BASE_ATTR_HIT),
                    element: Element::Neutral,
                    damage_type: DamageType::Physical,
                    skill: c.attack_skill(&self.items),
                },
                CHAR_MELEE_ZONE,
            ),
            _ => return,
        };

        let pvp = self
            .maps
            .get(map_id)
            .map(|m| m.pvp)
            .unwrap_or(crate::map::PvpRule::None);

        let candidates: Vec<EntityId> = {
            let Some(map) = self.maps.get(map_id) else {
                return;
            };
            map.iter_beings_around(att_pos, zone.range)
                .filter(|&cid| cid != attacker_id)
                .collect()
        };

        let mut victims: Vec<(EntityId, Point)> = Vec::new();
        for cid in candidates {
            let Some(candidate) = self.world.get(cid) else {
                continue;
            };
            let ctype = candidate.entity_type();
            if ctype != EntityType::Character && ctype != EntityType::Monster {
                continue;
            }
            if pvp == crate::map::PvpRule::None
                && ctype == EntityType::Character
                && att_type == EntityType::Character
            {
                continue;
            }
            let Some(cbeing) = candidate.being() else {
                continue;
            };
            if cbeing.is_dead() {
                continue;
            }
            if combat::in_attack_zone(att_pos, direction, &zone, candidate.pos, cbeing.size) {
                victims.push((cid, candidate.pos));
            }
        }

        if !zone.multi_target {
            // The single closest candidate by Manhattan distance takes the
            // damage; ties break by iteration order.
            victims = victims
                .into_iter()
                .min_by_key(|(_, p)| p.manhattan(att_pos))
                .into_iter()
                .collect();
        }

        for (vid, _) in victims {
            self.damage_entity(vid, attacker_id, &damage);
        }
    }

    /// Applies one damage record to one victim, with anger bookkeeping and
    /// death handling.
    pub fn damage_entity(&mut self, victim_id: EntityId, source: EntityId, damage: &Damage) {
        let source_is_character = self
            .world
            .get(source)
            .map(|e| e.is_character())
            .unwrap_or(false);

        let Some(victim) = self.world.get_mut(victim_id) else {
            return;
        };
        let Some(being) = victim.being_mut() else {
            return;
        };
        if being.is_dead() {
            return;
        }

        let loss = combat::roll_damage(&mut self.rng, damage, being);
        let killed = combat::apply_damage(being, loss);
        victim.flags |= UpdateFlags::HEALTH_CHANGE;

        if loss > 0 && source_is_character {
            if let Some(monster) = victim.monster_mut() {
                monster.note_damage(source, loss);
            }
        }

        if killed {
            self.handle_death(victim_id, Some(source), damage.skill);
        }
    }

    /// The died() transition; fires exactly once per life.
    fn handle_death(&mut self, id: EntityId, killer: Option<EntityId>, skill: usize) {
        let Some(entity) = self.world.get_mut(id) else {
            return;
        };
        if entity.being().map(|b| b.is_dead()).unwrap_or(true) {
            return;
        }
        let map_id = entity.map_id;
        let pos = entity.pos;
        entity.set_action(Action::Dead);
        entity.clear_destination();

        let mut drop_item = None;
        let mut experience = 0;
        if let Some(monster) = entity.monster_mut() {
            monster.on_died();
            experience = monster.experience_reward();
            let class = monster.class.clone();
            drop_item = class.random_drop(&mut self.rng);
        } else if let Some(c) = entity.character() {
            log::info!("Character '{}' died", c.name);
        }

        // Grudges referencing the dead being are dropped map-wide; the
        // observer side of the listener graph tolerates the absence.
        let on_map: Vec<EntityId> = self
            .maps
            .get(map_id)
            .map(|m| m.iter_whole_map().collect())
            .unwrap_or_default();
        for other in on_map {
            if other == id {
                continue;
            }
            if let Some(m) = self.world.get_mut(other).and_then(|e| e.monster_mut()) {
                m.forget_target(id);
            }
        }

        if let Some(item_id) = drop_item {
            let drop = Entity {
                map_id,
                pos,
                flags: UpdateFlags::empty(),
                kind: EntityKind::Item(GroundItem { item_id, amount: 1 }),
            };
            let drop_id = self.world.insert(drop);
            self.enqueue_insert(drop_id);
        }

        if let (Some(killer_id), true) = (killer, experience > 0) {
            let party_id = self
                .world
                .get(killer_id)
                .and_then(|e| e.character())
                .map(|c| c.party_id)
                .unwrap_or(0);

            if party_id == 0 {
                if let Some(c) = self.world.get_mut(killer_id).and_then(|e| e.character_mut()) {
                    c.award_experience(skill, experience);
                }
                return;
            }

            // Party members near the kill split the reward.
            let sharers: Vec<EntityId> = self
                .maps
                .get(map_id)
                .map(|m| {
                    m.iter_characters_around(pos, common::defines::AROUND_AREA)
                        .filter(|&cid| {
                            self.world
                                .get(cid)
                                .and_then(|e| e.character())
                                .map(|c| c.party_id == party_id && !c.being.is_dead())
                                .unwrap_or(false)
                        })
                        .collect()
                })
                .unwrap_or_default();
            let share = (experience / sharers.len().max(1) as u32).max(1);
            for sharer in sharers {
                if let Some(c) = self.world.get_mut(sharer).and_then(|e| e.character_mut()) {
                    // Only the killer's weapon skill is credited.
                    let credited = if sharer == killer_id { skill } else { 0 };
                    c.award_experience(credited, share);
                }
            }
        }
    }

    fn update_zones(&mut self, map_id: u16, ids: &[EntityId]) {
        for &id in ids {
            let Some(entity) = self.world.get(id) else {
                continue;
            };
            if entity.being().is_none() {
                continue;
            }
            let pos = entity.pos;
            if let Some(map) = self.maps.get_mut(map_id) {
                map.update_zone(id, pos);
            }
        }
    }

    /// Characters stepping into a warp area get queued for the jump. The
    /// warp cancels any active destination.
    fn check_warps(&mut self, map_id: u16, ids: &[EntityId]) {
        let Some(map) = self.maps.get(map_id) else {
            return;
        };
        let mut jumps: Vec<(EntityId, u16, Point)> = Vec::new();
        for &id in ids {
            let Some(entity) = self.world.get(id) else {
                continue;
            };
            if !entity.is_character() || entity.being().map(|b| b.is_dead()).unwrap_or(true) {
                continue;
            }
            if entity.pos != entity.being().unwrap().old_pos {
                if let Some(warp) = map.warps.iter().find(|w| w.area.contains(entity.pos)) {
                    jumps.push((id, warp.dest_map, warp.dest));
                }
            }
        }
        for (id, dest_map, dest) in jumps {
            if let Some(entity) = self.world.get_mut(id) {
                entity.clear_destination();
            }
            self.enqueue_warp(id, dest_map, dest);
        }
    }

    fn update_spawns(&mut self, map_id: u16) {
        // Phase one: decide, with the map borrowed.
        let mut wanted: Vec<(usize, u16, Point)> = Vec::new();
        {
            let Some(map) = self.maps.get_mut(map_id) else {
                return;
            };
            let world = &self.world;
            let rng = &mut self.rng;
            let grid = &map.grid;
            for (i, spawn) in map.spawns.iter_mut().enumerate() {
                if !spawn.tick(|id| world.contains(id)) {
                    continue;
                }
                // A few placement attempts; a crowded area just waits.
                for _ in 0..10 {
                    let x = spawn.area.x + rng.gen_range(0..spawn.area.w.max(1));
                    let y = spawn.area.y + rng.gen_range(0..spawn.area.h.max(1));
                    let p = Point::new(x, y);
                    if grid.is_perm_walkable(p.tile()) {
                        wanted.push((i, spawn.monster_id, p));
                        break;
                    }
                }
            }
        }

        // Phase two: create the monsters and record them.
        for (spawn_index, monster_id, pos) in wanted {
            let Some(class) = self.monsters.get(monster_id) else {
                log::warn!("Spawn area references unknown monster {}", monster_id);
                continue;
            };
            let monster = crate::monster::Monster::new(class);
            let entity = Entity {
                map_id,
                pos,
                flags: UpdateFlags::empty(),
                kind: EntityKind::Monster(monster),
            };
            let id = self.world.insert(entity);
            self.enqueue_insert(id);
            if let Some(map) = self.maps.get_mut(map_id) {
                if let Some(spawn) = map.spawns.get_mut(spawn_index) {
                    spawn.record_spawn(id);
                }
            }
        }
    }

    /// Runs one named script function with the subject entity pushed as
    /// its argument. Returns the script's int result (0 without a host).
    pub fn run_script_function(&mut self, map_id: u16, function: &str, subject: EntityId) -> i32 {
        let Some(mut script) = self.scripts.remove(&map_id) else {
            return 0;
        };
        let mut ctx = ScriptContext {
            world: &mut self.world,
            queue: &mut self.queue,
            map_id,
            tick: self.tick,
        };
        script.prepare(function);
        script.push_entity(subject);
        let result = script.execute(&mut ctx);
        self.scripts.insert(map_id, script);
        result
    }

    fn run_map_script(&mut self, map_id: u16) {
        let Some(mut script) = self.scripts.remove(&map_id) else {
            return;
        };
        let mut ctx = ScriptContext {
            world: &mut self.world,
            queue: &mut self.queue,
            map_id,
            tick: self.tick,
        };
        script.update(&mut ctx);
        self.scripts.insert(map_id, script);
    }

    // ---- deferred events ----------------------------------------------

    fn drain_queue(&mut self) {
        for (id, event) in self.queue.drain() {
            match event {
                DeferredEvent::Insert => {
                    if !self.place_on_map(id) {
                        self.world.remove(id);
                    }
                }
                DeferredEvent::Remove => {
                    self.remove_from_map(id);
                    if let Some(entity) = self.world.remove(id) {
                        if entity.is_character() {
                            self.closing.push(id);
                        }
                    }
                }
                DeferredEvent::Warp { map_id, dest } => self.execute_warp(id, map_id, dest),
            }
        }
    }

    /// A warp to a hosted map is a local move; a warp elsewhere starts the
    /// redirect dialogue with the account server.
    fn execute_warp(&mut self, id: EntityId, dest_map: u16, dest: Point) {
        self.remove_from_map(id);

        if let Some(c) = self.world.get_mut(id).and_then(|e| e.character_mut()) {
            inventory::return_projectiles(c, &self.items);
        }

        let Some(entity) = self.world.get_mut(id) else {
            return;
        };
        entity.map_id = dest_map;
        entity.pos = dest;
        entity.clear_destination();

        if self.maps.contains(dest_map) {
            // Persist on every map change so a crash respawns the
            // character where it last was.
            self.flush_character(id);
            if !self.place_on_map(id) {
                log::error!("Local warp of {} to map {} failed", id, dest_map);
                self.world.remove(id);
                self.closing.push(id);
            }
        } else {
            self.flush_character(id);
            let Some(db_id) = self
                .world
                .get(id)
                .and_then(|e| e.character())
                .map(|c| c.db_id)
            else {
                // Only characters cross runtimes.
                self.world.remove(id);
                return;
            };
            let mut msg = MessageOut::new(GA_REDIRECT);
            msg.write_u32(db_id);
            self.send_to_account(msg);
            self.pending_redirects.push((db_id, id));
            log::info!("Requested redirect for character {}", db_id);
        }
    }

    /// Completes a cross-runtime warp when the account server answers:
    /// forwards address, port and token to the client, then closes.
    pub fn finish_redirect(&mut self, db_id: u32, address: &str, port: u16, token: &[u8]) {
        let Some(pos) = self
            .pending_redirects
            .iter()
            .position(|&(d, _)| d == db_id)
        else {
            log::warn!("Redirect response for unknown character {}", db_id);
            return;
        };
        let (_, id) = self.pending_redirects.remove(pos);
        let mut msg = MessageOut::new(GC_REDIRECT);
        msg.write_string(address);
        msg.write_u16(port);
        msg.write_bytes(token);
        self.send_to(id, msg);
        self.world.remove(id);
        self.closing.push(id);
    }

    /// Radius-limited speech on the game map.
    pub fn say_around(&mut self, id: EntityId, text: &str) {
        let Some(entity) = self.world.get(id) else {
            return;
        };
        let (map_id, pos, public_id) = (entity.map_id, entity.pos, entity.public_id());
        let hearers: Vec<EntityId> = self
            .maps
            .get(map_id)
            .map(|m| {
                m.iter_characters_around(pos, common::defines::AROUND_AREA)
                    .collect()
            })
            .unwrap_or_default();
        for h in hearers {
            let mut msg = MessageOut::new(GC_SAY);
            msg.write_u16(public_id);
            msg.write_string(text);
            self.send_to(h, msg);
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        GameState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::GroundItem;
    use crate::map::{MapComposite, MapGrid};
    use common::character_data::CharacterData;

    #[test]
    fn queue_preserves_order_and_remove_wins() {
        let mut queue = EventQueue::new();
        queue.enqueue(EntityId(1), DeferredEvent::Insert);
        queue.enqueue(EntityId(2), DeferredEvent::Insert);
        queue.enqueue(EntityId(1), DeferredEvent::Remove);
        queue.enqueue(
            EntityId(2),
            DeferredEvent::Warp {
                map_id: 3,
                dest: Point::new(1, 1),
            },
        );
        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![
                (EntityId(1), DeferredEvent::Remove),
                (EntityId(2), DeferredEvent::Insert),
            ]
        );
        assert!(queue.is_empty());
    }

    fn state_with_map() -> GameState {
        let mut state = GameState::with_seed(11);
        state
            .maps
            .insert(MapComposite::new(1, "yard", MapGrid::new(32, 32)));
        state
    }

    fn admit(state: &mut GameState, db_id: u32, name: &str, x: u16, y: u16) -> EntityId {
        let mut data = CharacterData::default();
        data.attributes = [10, 10, 10, 10, 10, 10];
        data.map_id = 1;
        data.x = x;
        data.y = y;
        let id = state.admit_character(db_id, name, &data).unwrap();
        state.outbox.clear();
        id
    }

    #[test]
    fn say_reaches_only_nearby_characters() {
        let mut state = state_with_map();
        let speaker = admit(&mut state, 1, "ann", 100, 100);
        let near = admit(&mut state, 2, "ben", 200, 100);
        let far = admit(&mut state, 3, "cid", 900, 900);
        state.update();
        state.outbox.clear();

        state.say_around(speaker, "hello");
        let heard: Vec<EntityId> = state.outbox.iter().map(|&(id, _)| id).collect();
        assert!(heard.contains(&speaker));
        assert!(heard.contains(&near));
        assert!(!heard.contains(&far));
    }

    #[test]
    fn ground_item_insert_defers_until_end_of_tick() {
        let mut state = state_with_map();
        admit(&mut state, 1, "ann", 100, 100);
        let drop = state.world.insert(Entity {
            map_id: 1,
            pos: Point::new(120, 120),
            flags: UpdateFlags::empty(),
            kind: EntityKind::Item(GroundItem {
                item_id: 9,
                amount: 1,
            }),
        });
        state.enqueue_insert(drop);
        // Not on the map until the queue drains.
        assert!(!state.maps.get(1).unwrap().contains_entity(drop));
        state.update();
        assert!(state.maps.get(1).unwrap().contains_entity(drop));
    }

    #[test]
    fn map_script_update_runs_every_tick() {
        use crate::script::testing::RecordingScript;
        use std::sync::atomic::Ordering;

        let mut state = state_with_map();
        let script = RecordingScript::default();
        let updates = script.updates.clone();
        state.scripts.insert(1, Box::new(script));
        state.update();
        state.update();
        assert_eq!(updates.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn logout_flushes_a_snapshot() {
        let mut state = state_with_map();
        let ann = admit(&mut state, 1, "ann", 100, 100);
        state.update();
        state.account_outbox.clear();
        state.logout_character(ann);
        assert!(state.account_outbox.iter().any(|m| m.id() == GA_PLAYER_DATA));
        assert!(!state.world.contains(ann));
    }
}
