//! Item classes and the read-only item catalogue.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use common::defines::{
    EQUIP_ARMS_SLOT, EQUIP_FEET_SLOT, EQUIP_FIGHT1_SLOT, EQUIP_FIGHT2_SLOT, EQUIP_HEAD_SLOT,
    EQUIP_LEGS_SLOT, EQUIP_NECKLACE_SLOT, EQUIP_RING1_SLOT, EQUIP_RING2_SLOT, EQUIP_TORSO_SLOT,
};

/// Equipment categories. Singleton categories map to exactly one slot;
/// weapons, shields and rings contend for slot pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EquipCategory {
    OneHandWeapon,
    TwoHandWeapon,
    Shield,
    Torso,
    Arms,
    Head,
    Legs,
    Feet,
    Ring,
    Necklace,
}

impl EquipCategory {
    /// The slot (or first of the slot pair) this category occupies.
    pub fn first_slot(self) -> usize {
        match self {
            EquipCategory::OneHandWeapon
            | EquipCategory::TwoHandWeapon
            | EquipCategory::Shield => EQUIP_FIGHT1_SLOT,
            EquipCategory::Torso => EQUIP_TORSO_SLOT,
            EquipCategory::Arms => EQUIP_ARMS_SLOT,
            EquipCategory::Head => EQUIP_HEAD_SLOT,
            EquipCategory::Legs => EQUIP_LEGS_SLOT,
            EquipCategory::Feet => EQUIP_FEET_SLOT,
            EquipCategory::Ring => EQUIP_RING1_SLOT,
            EquipCategory::Necklace => EQUIP_NECKLACE_SLOT,
        }
    }

    pub fn second_slot(self) -> Option<usize> {
        match self {
            EquipCategory::OneHandWeapon | EquipCategory::Shield => Some(EQUIP_FIGHT2_SLOT),
            EquipCategory::Ring => Some(EQUIP_RING2_SLOT),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    Usable,
    Equipment(EquipCategory),
    Projectile,
}

/// A stat modifier granted while the item is equipped (or, for usables,
/// applied for `duration` ticks on use).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ItemModifier {
    pub attribute: usize,
    pub value: f64,
    #[serde(default)]
    pub duration: u32,
}

/// Read-only description of an item. Shared between every stack of it.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemClass {
    pub id: u16,
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub weight: u16,
    #[serde(default)]
    pub cost: u32,
    #[serde(default = "default_max_per_slot")]
    pub max_per_slot: u8,
    #[serde(default)]
    pub sprite_id: u16,
    #[serde(default)]
    pub modifiers: Vec<ItemModifier>,
    /// Script function run when the item is used, if any.
    #[serde(default)]
    pub script_function: Option<String>,
}

fn default_max_per_slot() -> u8 {
    1
}

impl ItemClass {
    pub fn equip_category(&self) -> Option<EquipCategory> {
        match self.kind {
            ItemKind::Equipment(cat) => Some(cat),
            _ => None,
        }
    }

    pub fn is_projectile(&self) -> bool {
        matches!(self.kind, ItemKind::Projectile)
    }
}

/// The item catalogue. Populated at startup, read-only afterwards.
#[derive(Default)]
pub struct ItemManager {
    classes: HashMap<u16, Arc<ItemClass>>,
}

impl ItemManager {
    pub fn new() -> ItemManager {
        ItemManager::default()
    }

    pub fn register(&mut self, class: ItemClass) {
        if self.classes.insert(class.id, Arc::new(class)).is_some() {
            log::warn!("Duplicate item class id, keeping the later definition");
        }
    }

    pub fn get(&self, id: u16) -> Option<Arc<ItemClass>> {
        self.classes.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Loads an item catalogue from its JSON definition file.
    pub fn load_json(&mut self, text: &str) -> Result<usize, serde_json::Error> {
        let defs: Vec<ItemClass> = serde_json::from_str(text)?;
        let count = defs.len();
        for def in defs {
            self.register(def);
        }
        Ok(count)
    }
}

/// An item stack lying on a map, waiting to be picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroundItem {
    pub item_id: u16,
    pub amount: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_lookup() {
        let mut mgr = ItemManager::new();
        mgr.register(ItemClass {
            id: 5,
            name: "Candor Herb".into(),
            kind: ItemKind::Usable,
            weight: 1,
            cost: 10,
            max_per_slot: 10,
            sprite_id: 0,
            modifiers: vec![],
            script_function: None,
        });
        assert_eq!(mgr.get(5).unwrap().name, "Candor Herb");
        assert!(mgr.get(6).is_none());
    }

    #[test]
    fn json_catalogue_parses() {
        let text = r#"[
            {"id": 1, "name": "Short Sword",
             "kind": {"equipment": "one-hand-weapon"},
             "cost": 50, "sprite_id": 101,
             "modifiers": [{"attribute": 2, "value": 5.0}]},
            {"id": 2, "name": "Arrow", "kind": "projectile",
             "max_per_slot": 99}
        ]"#;
        let mut mgr = ItemManager::new();
        assert_eq!(mgr.load_json(text).unwrap(), 2);
        let sword = mgr.get(1).unwrap();
        assert_eq!(sword.equip_category(), Some(EquipCategory::OneHandWeapon));
        assert!(mgr.get(2).unwrap().is_projectile());
    }

    #[test]
    fn slot_pairs() {
        assert_eq!(EquipCategory::Ring.first_slot(), EQUIP_RING1_SLOT);
        assert_eq!(EquipCategory::Ring.second_slot(), Some(EQUIP_RING2_SLOT));
        assert_eq!(EquipCategory::TwoHandWeapon.second_slot(), None);
        assert_eq!(EquipCategory::Head.second_slot(), None);
    }
}
