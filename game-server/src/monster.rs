//! Monster classes, the monster catalogue and the monster runtime state.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::Deserialize;

use common::defines::{
    Element, BASE_ATTR_EVADE, BASE_ATTR_HIT, BASE_ATTR_HP, BASE_ATTR_PHY_ATK_DELTA,
    BASE_ATTR_PHY_ATK_MIN, NB_BEING_ATTRIBUTES, ROT_TICKS,
};

use crate::combat::AttackShape;
use crate::entity::{Being, Direction, EntityId};
use crate::map::grid::BlockMask;

/// One drop-table entry: probability is per 10000.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MonsterDrop {
    pub item_id: u16,
    pub probability: u16,
}

/// One attack in a monster's repertoire. Delays are in ticks.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MonsterAttack {
    pub range: i32,
    pub angle: i32,
    pub pre_delay: u32,
    pub post_delay: u32,
    pub damage_factor: f64,
    pub element: Element,
    pub shape: AttackShape,
    #[serde(default)]
    pub multi_target: bool,
}

/// A facing-specific offset from the target that puts the monster at its
/// preferred attack distance.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AttackPosition {
    pub dx: i32,
    pub dy: i32,
    pub direction: u8,
}

impl AttackPosition {
    pub fn facing(&self) -> Direction {
        Direction::from_u8(self.direction)
    }
}

/// Read-only description of a monster species.
#[derive(Debug, Clone, Deserialize)]
pub struct MonsterClass {
    pub id: u16,
    pub name: String,
    #[serde(default)]
    pub drops: Vec<MonsterDrop>,
    /// Base attribute vector, `BASE_ATTR_*` order.
    pub attributes: Vec<i32>,
    pub speed: u32,
    pub size: i32,
    pub experience: u32,
    #[serde(default)]
    pub aggressive: bool,
    /// How far, in tiles, the monster will chase a target.
    pub track_range: u32,
    /// How far, in pixels, the monster wanders from its position.
    pub stroll_range: i32,
    #[serde(default)]
    pub attacks: Vec<MonsterAttack>,
    #[serde(default = "default_attack_positions")]
    pub attack_positions: Vec<AttackPosition>,
}

fn default_attack_positions() -> Vec<AttackPosition> {
    // One tile away on each side, facing back at the target.
    vec![
        AttackPosition { dx: 32, dy: 0, direction: Direction::Left as u8 },
        AttackPosition { dx: -32, dy: 0, direction: Direction::Right as u8 },
        AttackPosition { dx: 0, dy: 32, direction: Direction::Up as u8 },
        AttackPosition { dx: 0, dy: -32, direction: Direction::Down as u8 },
    ]
}

impl MonsterClass {
    /// Walks the drop table with a uniform roll in [0, 10000); the first
    /// entry whose running probability sum crosses the roll drops.
    pub fn random_drop(&self, rng: &mut impl Rng) -> Option<u16> {
        let mut p = rng.gen_range(0..10000) as i32;
        for drop in &self.drops {
            p -= drop.probability as i32;
            if p < 0 {
                return Some(drop.item_id);
            }
        }
        None
    }
}

/// The monster species catalogue.
#[derive(Default)]
pub struct MonsterManager {
    classes: HashMap<u16, Arc<MonsterClass>>,
}

impl MonsterManager {
    pub fn new() -> MonsterManager {
        MonsterManager::default()
    }

    pub fn register(&mut self, class: MonsterClass) {
        self.classes.insert(class.id, Arc::new(class));
    }

    pub fn get(&self, id: u16) -> Option<Arc<MonsterClass>> {
        self.classes.get(&id).cloned()
    }

    pub fn load_json(&mut self, text: &str) -> Result<usize, serde_json::Error> {
        let defs: Vec<MonsterClass> = serde_json::from_str(text)?;
        let count = defs.len();
        for def in defs {
            self.register(def);
        }
        Ok(count)
    }
}

/// A live monster.
#[derive(Debug, Clone)]
pub struct Monster {
    pub being: Being,
    pub class: Arc<MonsterClass>,
    /// Accumulated grudge per attacker. Entries are dropped when the
    /// target dies or leaves the map; absence on lookup is tolerated.
    pub anger: HashMap<EntityId, i32>,
    /// Remaining ticks of the attack in progress (pre + post delay).
    pub attack_timer: u32,
    /// Index into `class.attacks` of the attack being delivered.
    pub current_attack: Option<usize>,
    /// Wander countdown while idle; rot countdown once dead.
    pub countdown: i32,
}

impl Monster {
    pub fn new(class: Arc<MonsterClass>) -> Monster {
        let mut being = Being::new(BlockMask::WALL | BlockMask::MONSTER | BlockMask::CHARACTER);
        being.speed = class.speed;
        being.size = class.size;
        for (i, &value) in class.attributes.iter().enumerate().take(NB_BEING_ATTRIBUTES) {
            being.attributes.set_base(i, value);
        }
        being.fill_hitpoints();
        Monster {
            being,
            class,
            anger: HashMap::new(),
            attack_timer: 0,
            current_attack: None,
            countdown: 0,
        }
    }

    /// Remembers a character that hurt this monster; grudge scales with
    /// the damage dealt.
    pub fn note_damage(&mut self, source: EntityId, loss: u16) {
        if loss == 0 {
            return;
        }
        *self.anger.entry(source).or_insert(0) += loss as i32;
    }

    pub fn forget_target(&mut self, target: EntityId) {
        self.anger.remove(&target);
    }

    /// Switches to the dead state bookkeeping: grudges are dropped and the
    /// corpse is given its rot countdown.
    pub fn on_died(&mut self) {
        self.anger.clear();
        self.attack_timer = 0;
        self.current_attack = None;
        self.countdown = ROT_TICKS as i32;
    }

    /// Splits the experience reward over the skill the killer used.
    pub fn experience_reward(&self) -> u32 {
        self.class.experience
    }
}

/// A plain melee attack for classes defined without an attack list.
pub fn default_attack() -> MonsterAttack {
    MonsterAttack {
        range: 32,
        angle: 20,
        pre_delay: 10,
        post_delay: 10,
        damage_factor: 1.0,
        element: Element::Neutral,
        shape: AttackShape::Cone,
        multi_target: false,
    }
}

/// Builds a usable default class for tests and seeding.
pub fn test_class(id: u16, aggressive: bool) -> MonsterClass {
    let mut attributes = vec![0; NB_BEING_ATTRIBUTES];
    attributes[BASE_ATTR_HP] = 100;
    attributes[BASE_ATTR_PHY_ATK_MIN] = 20;
    attributes[BASE_ATTR_PHY_ATK_DELTA] = 2;
    attributes[BASE_ATTR_HIT] = 10;
    attributes[BASE_ATTR_EVADE] = 10;
    for e in 0..common::defines::BASE_ELEM_NB {
        attributes[common::defines::BASE_ELEM_BEGIN + e] = 100;
    }
    MonsterClass {
        id,
        name: format!("maggot-{}", id),
        drops: Vec::new(),
        attributes,
        speed: 300,
        size: 8,
        experience: 10,
        aggressive,
        track_range: 10,
        stroll_range: 80,
        attacks: vec![default_attack()],
        attack_positions: default_attack_positions(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn drop_table_walk_respects_declaration_order() {
        let mut class = test_class(1, false);
        class.drops = vec![
            MonsterDrop { item_id: 1, probability: 10000 },
            MonsterDrop { item_id: 2, probability: 10000 },
        ];
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            // The first entry absorbs the whole roll space.
            assert_eq!(class.random_drop(&mut rng), Some(1));
        }
    }

    #[test]
    fn empty_drop_table_never_drops() {
        let class = test_class(1, false);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            assert_eq!(class.random_drop(&mut rng), None);
        }
    }

    #[test]
    fn drop_rates_are_roughly_proportional() {
        let mut class = test_class(1, false);
        class.drops = vec![MonsterDrop { item_id: 9, probability: 5000 }];
        let mut rng = StdRng::seed_from_u64(99);
        let hits = (0..2000)
            .filter(|_| class.random_drop(&mut rng) == Some(9))
            .count();
        assert!((800..1200).contains(&hits), "got {} hits", hits);
    }

    #[test]
    fn anger_accumulates_and_clears_on_death() {
        let mut monster = Monster::new(Arc::new(test_class(1, false)));
        monster.note_damage(EntityId(4), 10);
        monster.note_damage(EntityId(4), 5);
        monster.note_damage(EntityId(7), 0);
        assert_eq!(monster.anger.get(&EntityId(4)), Some(&15));
        assert!(!monster.anger.contains_key(&EntityId(7)));
        monster.on_died();
        assert!(monster.anger.is_empty());
        assert_eq!(monster.countdown, ROT_TICKS as i32);
    }

    #[test]
    fn new_monster_takes_class_stats() {
        let monster = Monster::new(Arc::new(test_class(3, true)));
        assert_eq!(monster.being.speed, 300);
        assert_eq!(monster.being.hp, 100);
        assert_eq!(monster.being.max_hp(), 100);
    }
}
