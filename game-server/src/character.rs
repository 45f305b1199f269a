//! The player-owned being: persistent data made live.

use std::collections::HashMap;

use common::character_data::CharacterData;
use common::defines::{
    Gender, BASE_ATTR_EVADE, BASE_ATTR_HIT, BASE_ATTR_HP, BASE_ATTR_HP_REGEN, BASE_ATTR_MAG_ATK,
    BASE_ATTR_MAG_RES, BASE_ATTR_PHY_ATK_DELTA, BASE_ATTR_PHY_ATK_MIN, CHAR_ATTR_AGILITY,
    CHAR_ATTR_DEXTERITY, CHAR_ATTR_INTELLIGENCE, CHAR_ATTR_NB, CHAR_ATTR_STRENGTH,
    CHAR_ATTR_VITALITY, CHAR_ATTR_WILLPOWER, CHAR_SKILL_NB,
};

use crate::entity::Being;
use crate::map::grid::BlockMask;
use crate::point::Point;

/// Attribute points granted per level gained.
pub const CHARPOINTS_PER_LEVELUP: u16 = 5;
/// Correction points granted per level gained.
pub const CORRECTIONPOINTS_PER_LEVELUP: u16 = 2;

/// Total experience needed to reach `level`.
pub fn exp_for_level(level: u16) -> u32 {
    let l = level as u32;
    100 * l * l
}

/// The number of looks-relevant equipment slots (main hand, head, torso,
/// legs), in wire order.
pub const LOOKS_SLOTS: usize = 4;

// Experience skill indices.
pub const SKILL_UNARMED: usize = 0;
pub const SKILL_WEAPON: usize = 1;
pub const SKILL_TWOHAND: usize = 2;
pub const SKILL_BOW: usize = 3;
pub const SKILL_MAGIC: usize = 4;

/// A character participates in at most one transaction at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction {
    None,
    Trade(u32),
    BuySell(u32),
}

#[derive(Debug, Clone)]
pub struct Character {
    pub being: Being,
    pub db_id: u32,
    pub name: String,
    pub account_level: u8,
    pub gender: Gender,
    pub hair_style: u8,
    pub hair_color: u8,
    pub level: u16,
    pub stats: [u8; CHAR_ATTR_NB],
    pub experience: [u32; CHAR_SKILL_NB],
    pub character_points: u16,
    pub correction_points: u16,
    pub possessions: common::character_data::Possessions,
    pub party_id: u32,
    pub transaction: Transaction,
    /// Quest variables known to this runtime; misses are resolved through
    /// the account server and cached here.
    pub quest_cache: HashMap<String, String>,
    /// Sprite ids last reported for the looks slots.
    pub last_looks: [u16; LOOKS_SLOTS],
    /// Being-attribute indices with changes to report this tick.
    pub dirty_attributes: Vec<usize>,
    /// Skills with experience changes to report this tick.
    pub dirty_experience: Vec<usize>,
    /// Set when a level-up must be reported this tick.
    pub leveled_up: bool,
    /// Set whenever a mutation of consequence should reach the gateway.
    pub save_pending: bool,
}

impl Character {
    /// Builds the live character from its snapshot. Position is taken from
    /// the snapshot too; the caller inserts the entity at that point.
    pub fn from_data(db_id: u32, name: &str, data: &CharacterData) -> Character {
        let mut character = Character {
            being: Being::new(BlockMask::WALL),
            db_id,
            name: name.to_string(),
            account_level: data.account_level,
            gender: Gender::from_u8(data.gender),
            hair_style: data.hair_style,
            hair_color: data.hair_color,
            level: data.level.max(1),
            stats: data.attributes,
            experience: data.experience,
            character_points: data.character_points,
            correction_points: data.correction_points,
            possessions: data.possessions.clone(),
            party_id: 0,
            transaction: Transaction::None,
            quest_cache: HashMap::new(),
            last_looks: [0; LOOKS_SLOTS],
            dirty_attributes: Vec::new(),
            dirty_experience: Vec::new(),
            leveled_up: false,
            save_pending: false,
        };
        character.being.speed = 150;
        character.recalculate_base_attributes();
        character.being.fill_hitpoints();
        character
    }

    /// The snapshot of the current state. `pos` is the live map position.
    /// Equipped projectiles must have been returned to the inventory
    /// before this is called; the snapshot has no slot for their count.
    pub fn to_data(&self, map_id: u16, pos: Point) -> CharacterData {
        CharacterData {
            account_level: self.account_level,
            gender: self.gender as u8,
            hair_style: self.hair_style,
            hair_color: self.hair_color,
            level: self.level,
            character_points: self.character_points,
            correction_points: self.correction_points,
            attributes: self.stats,
            experience: self.experience,
            map_id,
            x: pos.x.clamp(0, u16::MAX as i32) as u16,
            y: pos.y.clamp(0, u16::MAX as i32) as u16,
            possessions: self.possessions.clone(),
        }
    }

    /// Derives the being attribute bases from stats and level. Equipment
    /// and spell modifiers layer on top of these bases.
    pub fn recalculate_base_attributes(&mut self) {
        let stat = |i: usize| self.stats[i] as i32;
        let attrs = &mut self.being.attributes;
        attrs.set_base(
            BASE_ATTR_HP,
            20 + 4 * stat(CHAR_ATTR_VITALITY) + 2 * self.level as i32,
        );
        attrs.set_base(BASE_ATTR_HP_REGEN, stat(CHAR_ATTR_VITALITY) / 5);
        attrs.set_base(BASE_ATTR_PHY_ATK_MIN, stat(CHAR_ATTR_STRENGTH));
        attrs.set_base(BASE_ATTR_PHY_ATK_DELTA, stat(CHAR_ATTR_STRENGTH) / 2);
        attrs.set_base(BASE_ATTR_MAG_ATK, stat(CHAR_ATTR_WILLPOWER));
        attrs.set_base(BASE_ATTR_HIT, stat(CHAR_ATTR_DEXTERITY));
        attrs.set_base(BASE_ATTR_EVADE, stat(CHAR_ATTR_AGILITY));
        attrs.set_base(BASE_ATTR_MAG_RES, stat(CHAR_ATTR_INTELLIGENCE) / 5);
    }

    pub fn total_experience(&self) -> u32 {
        self.experience.iter().sum()
    }

    /// Credits experience to a skill and applies any level-ups it earns.
    pub fn award_experience(&mut self, skill: usize, amount: u32) {
        if skill >= CHAR_SKILL_NB || amount == 0 {
            return;
        }
        self.experience[skill] = self.experience[skill].saturating_add(amount);
        if !self.dirty_experience.contains(&skill) {
            self.dirty_experience.push(skill);
        }
        self.save_pending = true;

        while self.total_experience() >= exp_for_level(self.level + 1) {
            self.level += 1;
            self.character_points += CHARPOINTS_PER_LEVELUP;
            self.correction_points += CORRECTIONPOINTS_PER_LEVELUP;
            self.leveled_up = true;
            self.recalculate_base_attributes();
            log::info!("Character '{}' reached level {}", self.name, self.level);
        }
    }

    /// Progress within the current level, in per-mille, for the client's
    /// level bar.
    pub fn level_progress(&self) -> u16 {
        let floor = exp_for_level(self.level);
        let ceil = exp_for_level(self.level + 1);
        let span = (ceil - floor).max(1);
        let into = self.total_experience().saturating_sub(floor).min(span);
        (into * 1000 / span) as u16
    }

    /// Starting a new transaction cancels the previous one; the caller
    /// tears down whatever the old handle referenced.
    pub fn begin_transaction(&mut self, transaction: Transaction) -> Transaction {
        std::mem::replace(&mut self.transaction, transaction)
    }

    pub fn mark_attribute_dirty(&mut self, attr: usize) {
        if !self.dirty_attributes.contains(&attr) {
            self.dirty_attributes.push(attr);
        }
    }

    /// The skill credited for damage with the current main-hand weapon.
    pub fn attack_skill(&self, items: &crate::items::ItemManager) -> usize {
        use crate::items::EquipCategory;
        use common::defines::{EQUIP_FIGHT1_SLOT, EQUIP_PROJECTILE_SLOT};

        if self.possessions.equipment[EQUIP_PROJECTILE_SLOT] != 0 {
            return SKILL_BOW;
        }
        match items
            .get(self.possessions.equipment[EQUIP_FIGHT1_SLOT])
            .and_then(|c| c.equip_category())
        {
            Some(EquipCategory::OneHandWeapon) => SKILL_WEAPON,
            Some(EquipCategory::TwoHandWeapon) => SKILL_TWOHAND,
            _ => SKILL_UNARMED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Character {
        let mut data = CharacterData::default();
        data.attributes = [10, 10, 10, 10, 10, 10];
        data.level = 1;
        Character::from_data(42, "alice", &data)
    }

    #[test]
    fn derived_attributes_follow_stats() {
        let c = fresh();
        assert_eq!(c.being.attributes.base(BASE_ATTR_HP), 20 + 40 + 2);
        assert_eq!(c.being.hp, c.being.max_hp());
        assert_eq!(c.being.attributes.base(BASE_ATTR_EVADE), 10);
    }

    #[test]
    fn experience_levels_up_and_grants_points() {
        let mut c = fresh();
        let points_before = c.character_points;
        c.award_experience(0, exp_for_level(2));
        assert_eq!(c.level, 2);
        assert_eq!(c.character_points, points_before + CHARPOINTS_PER_LEVELUP);
        assert!(c.leveled_up);
        assert_eq!(c.dirty_experience, vec![0]);
    }

    #[test]
    fn multi_level_jump_applies_every_level() {
        let mut c = fresh();
        c.award_experience(1, exp_for_level(4));
        assert_eq!(c.level, 4);
    }

    #[test]
    fn level_progress_is_monotonic() {
        let mut c = fresh();
        let p0 = c.level_progress();
        c.award_experience(0, 150);
        let p1 = c.level_progress();
        assert!(p1 >= p0);
        assert!(p1 <= 1000);
    }

    #[test]
    fn transactions_are_exclusive() {
        let mut c = fresh();
        assert_eq!(c.begin_transaction(Transaction::BuySell(3)), Transaction::None);
        // Starting a trade hands back the buy/sell so it can be cancelled.
        assert_eq!(
            c.begin_transaction(Transaction::Trade(9)),
            Transaction::BuySell(3)
        );
        assert_eq!(c.transaction, Transaction::Trade(9));
    }

    #[test]
    fn snapshot_round_trip_preserves_identity() {
        let c = fresh();
        let data = c.to_data(3, Point::new(330, 336));
        assert_eq!(data.map_id, 3);
        assert_eq!((data.x, data.y), (330, 336));
        let back = Character::from_data(c.db_id, &c.name, &data);
        assert_eq!(back.stats, c.stats);
        assert_eq!(back.level, c.level);
        assert_eq!(back.possessions, c.possessions);
    }
}
