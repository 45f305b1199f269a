//! The character snapshot: canonical serialized form of a character, used
//! both for inter-server transfer and for persistence.
//!
//! The byte layout is fixed and shared by the account and game servers.
//! The character name and database id are deliberately not part of the
//! snapshot; they travel beside it in whichever message carries it.

use serde::{Deserialize, Serialize};

use crate::defines::{CHAR_ATTR_NB, CHAR_SKILL_NB, EQUIPMENT_SLOTS};
use crate::net::{MessageIn, MessageOut};

/// One inventory slot: an item class id and a stack count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub item_id: u16,
    pub amount: u8,
}

/// Everything a character owns: money, worn equipment and the inventory.
/// Equipment is a fixed array of item class ids indexed by the
/// `EQUIP_*_SLOT` constants; 0 means the slot is empty. The projectile
/// stack count is runtime state only: any snapshot is taken after equipped
/// projectiles have been returned to the inventory multiset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Possessions {
    pub money: u32,
    pub equipment: [u16; EQUIPMENT_SLOTS],
    pub inventory: Vec<InventoryItem>,
    #[serde(skip)]
    pub projectile_amount: u8,
}

impl Default for Possessions {
    fn default() -> Self {
        Possessions {
            money: 0,
            equipment: [0; EQUIPMENT_SLOTS],
            inventory: Vec::new(),
            projectile_amount: 0,
        }
    }
}

/// The persistent core of a character, as shipped between servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterData {
    pub account_level: u8,
    pub gender: u8,
    pub hair_style: u8,
    pub hair_color: u8,
    pub level: u16,
    pub character_points: u16,
    pub correction_points: u16,
    pub attributes: [u8; CHAR_ATTR_NB],
    pub experience: [u32; CHAR_SKILL_NB],
    pub map_id: u16,
    pub x: u16,
    pub y: u16,
    pub possessions: Possessions,
}

impl Default for CharacterData {
    fn default() -> Self {
        CharacterData {
            account_level: 0,
            gender: 0,
            hair_style: 0,
            hair_color: 0,
            level: 1,
            character_points: 0,
            correction_points: 0,
            attributes: [0; CHAR_ATTR_NB],
            experience: [0; CHAR_SKILL_NB],
            map_id: 0,
            x: 0,
            y: 0,
            possessions: Possessions::default(),
        }
    }
}

impl CharacterData {
    /// Appends the snapshot to `msg` in declared slot order.
    pub fn serialize(&self, msg: &mut MessageOut) {
        msg.write_u8(self.account_level);
        msg.write_u8(self.gender);
        msg.write_u8(self.hair_style);
        msg.write_u8(self.hair_color);
        msg.write_u16(self.level);
        msg.write_u16(self.character_points);
        msg.write_u16(self.correction_points);

        for &attr in &self.attributes {
            msg.write_u8(attr);
        }
        for &xp in &self.experience {
            msg.write_u32(xp);
        }

        msg.write_u16(self.map_id);
        msg.write_u16(self.x);
        msg.write_u16(self.y);

        msg.write_u32(self.possessions.money);
        for &slot in &self.possessions.equipment {
            msg.write_u16(slot);
        }
        for item in &self.possessions.inventory {
            msg.write_u16(item.item_id);
            msg.write_u8(item.amount);
        }
    }

    /// Reads a snapshot from the rest of `msg`. The inventory runs to the
    /// end of the message; a trailing partial entry is ignored rather than
    /// rejected.
    pub fn deserialize(msg: &mut MessageIn) -> CharacterData {
        let mut data = CharacterData {
            account_level: msg.read_u8(),
            gender: msg.read_u8(),
            hair_style: msg.read_u8(),
            hair_color: msg.read_u8(),
            level: msg.read_u16(),
            character_points: msg.read_u16(),
            correction_points: msg.read_u16(),
            ..CharacterData::default()
        };

        for attr in data.attributes.iter_mut() {
            *attr = msg.read_u8();
        }
        for xp in data.experience.iter_mut() {
            *xp = msg.read_u32();
        }

        data.map_id = msg.read_u16();
        data.x = msg.read_u16();
        data.y = msg.read_u16();

        data.possessions.money = msg.read_u32();
        for slot in data.possessions.equipment.iter_mut() {
            *slot = msg.read_u16();
        }
        while msg.unread_len() >= 3 {
            let item_id = msg.read_u16();
            let amount = msg.read_u8();
            data.possessions.inventory.push(InventoryItem { item_id, amount });
        }

        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CharacterData {
        let mut data = CharacterData {
            account_level: 1,
            gender: 1,
            hair_style: 4,
            hair_color: 9,
            level: 12,
            character_points: 3,
            correction_points: 1,
            map_id: 7,
            x: 330,
            y: 336,
            ..CharacterData::default()
        };
        data.attributes = [10, 10, 10, 12, 9, 9];
        data.experience[0] = 1500;
        data.experience[3] = 42;
        data.possessions.money = 250;
        data.possessions.equipment[crate::defines::EQUIP_HEAD_SLOT] = 501;
        data.possessions.inventory.push(InventoryItem {
            item_id: 17,
            amount: 3,
        });
        data.possessions.inventory.push(InventoryItem {
            item_id: 501,
            amount: 1,
        });
        data
    }

    #[test]
    fn snapshot_round_trips() {
        let data = sample();
        let mut out = MessageOut::new(0);
        data.serialize(&mut out);
        let bytes = out.into_bytes();
        let mut input = MessageIn::new(&bytes).unwrap();
        let back = CharacterData::deserialize(&mut input);
        assert_eq!(back, data);
        assert_eq!(input.unread_len(), 0);
    }

    #[test]
    fn reader_tolerates_trailing_partial_inventory_entry() {
        let data = sample();
        let mut out = MessageOut::new(0);
        data.serialize(&mut out);
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&[0x00, 0x99]); // two bytes of a cut-off entry
        let mut input = MessageIn::new(&bytes).unwrap();
        let back = CharacterData::deserialize(&mut input);
        assert_eq!(back.possessions.inventory, data.possessions.inventory);
    }

    #[test]
    fn fixed_header_width() {
        // 7 scalars (1+1+1+1+2+2+2) + attributes + 4*skills + map/x/y (6)
        // + money (4) + equipment shorts.
        let data = CharacterData::default();
        let mut out = MessageOut::new(0);
        data.serialize(&mut out);
        let expected =
            2 + 10 + CHAR_ATTR_NB + 4 * CHAR_SKILL_NB + 6 + 4 + 2 * EQUIPMENT_SLOTS;
        assert_eq!(out.len(), expected);
    }
}
