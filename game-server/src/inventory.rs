//! Inventory and equipment operations.
//!
//! The inventory is an ordered list of filled slots bounded by
//! `MAX_SLOTS`; each slot's stack is bounded by the item's max-per-slot.
//! Equipment is the fixed slot array on [`Possessions`]; equipping applies
//! the item's modifier list and unequipping cancels it.

use common::character_data::{InventoryItem, Possessions};
use common::defines::{
    ErrorCode, EQUIP_FIGHT1_SLOT, EQUIP_FIGHT2_SLOT, EQUIP_PROJECTILE_SLOT, MAX_PROJECTILES,
    MAX_SLOTS,
};

use crate::attributes::{Modifier, LAYER_EQUIP};
use crate::character::Character;
use crate::items::{EquipCategory, ItemKind, ItemManager};

/// Fills matching non-full slots in order, then empty slots. Returns the
/// amount that could not be placed.
pub fn insert(poss: &mut Possessions, items: &ItemManager, item_id: u16, amount: u32) -> u32 {
    if amount == 0 || item_id == 0 {
        return 0;
    }
    let Some(class) = items.get(item_id) else {
        log::warn!("Insert of unknown item class {}", item_id);
        return amount;
    };
    let max_per_slot = class.max_per_slot as u32;
    let mut left = amount;

    for slot in poss.inventory.iter_mut() {
        if left == 0 {
            break;
        }
        if slot.item_id == item_id && (slot.amount as u32) < max_per_slot {
            let space = max_per_slot - slot.amount as u32;
            let moved = space.min(left);
            slot.amount += moved as u8;
            left -= moved;
        }
    }
    while left > 0 && poss.inventory.len() < MAX_SLOTS {
        let moved = max_per_slot.min(left);
        poss.inventory.push(InventoryItem {
            item_id,
            amount: moved as u8,
        });
        left -= moved;
    }
    left
}

/// Removes from matching slots in order. Returns the amount that could not
/// be removed.
pub fn remove_by_id(poss: &mut Possessions, item_id: u16, amount: u32) -> u32 {
    let mut left = amount;
    for slot in poss.inventory.iter_mut() {
        if left == 0 {
            break;
        }
        if slot.item_id == item_id {
            let moved = (slot.amount as u32).min(left);
            slot.amount -= moved as u8;
            left -= moved;
        }
    }
    poss.inventory.retain(|s| s.amount > 0);
    left
}

/// Removes up to `amount` from one slot, clamped to its stack. Returns
/// the item id and the amount actually removed.
pub fn remove_by_slot(poss: &mut Possessions, slot: usize, amount: u32) -> (u16, u32) {
    let Some(entry) = poss.inventory.get_mut(slot) else {
        return (0, 0);
    };
    let moved = (entry.amount as u32).min(amount);
    entry.amount -= moved as u8;
    let id = entry.item_id;
    poss.inventory.retain(|s| s.amount > 0);
    (id, moved)
}

pub fn count_item(poss: &Possessions, item_id: u16) -> u32 {
    poss.inventory
        .iter()
        .filter(|s| s.item_id == item_id)
        .map(|s| s.amount as u32)
        .sum()
}

fn modifier_id(slot: usize, item_id: u16) -> u32 {
    ((slot as u32) << 16) | item_id as u32
}

fn apply_equip_modifiers(character: &mut Character, items: &ItemManager, slot: usize) {
    let item_id = character.possessions.equipment[slot];
    let Some(class) = items.get(item_id) else {
        return;
    };
    for m in &class.modifiers {
        character.being.attributes.add_modifier(
            m.attribute,
            LAYER_EQUIP,
            Modifier::permanent(m.value, modifier_id(slot, item_id)),
        );
        character.mark_attribute_dirty(m.attribute);
    }
}

fn cancel_equip_modifiers(character: &mut Character, items: &ItemManager, slot: usize) {
    let item_id = character.possessions.equipment[slot];
    let Some(class) = items.get(item_id) else {
        return;
    };
    for m in &class.modifiers {
        character.being.attributes.remove_modifier(
            m.attribute,
            LAYER_EQUIP,
            m.value,
            modifier_id(slot, item_id),
        );
        character.mark_attribute_dirty(m.attribute);
    }
}

/// Moves the item in `slot` back to the inventory. Fails with
/// `InventoryFull` and leaves the slot untouched when there is no room.
pub fn unequip_slot(
    character: &mut Character,
    items: &ItemManager,
    slot: usize,
) -> Result<(), ErrorCode> {
    let item_id = character.possessions.equipment[slot];
    if item_id == 0 {
        return Ok(());
    }

    if slot == EQUIP_PROJECTILE_SLOT {
        let amount = character.possessions.projectile_amount as u32;
        let rest = insert(&mut character.possessions, items, item_id, amount);
        if rest > 0 {
            // Put the unplaced part back where it was.
            remove_by_id(&mut character.possessions, item_id, amount - rest);
            return Err(ErrorCode::InventoryFull);
        }
        character.possessions.equipment[slot] = 0;
        character.possessions.projectile_amount = 0;
        character.save_pending = true;
        return Ok(());
    }

    if insert(&mut character.possessions, items, item_id, 1) > 0 {
        return Err(ErrorCode::InventoryFull);
    }
    cancel_equip_modifiers(character, items, slot);
    character.possessions.equipment[slot] = 0;
    character.save_pending = true;
    Ok(())
}

fn equip_into(
    character: &mut Character,
    items: &ItemManager,
    item_id: u16,
    slot: usize,
) -> Result<(), ErrorCode> {
    if remove_by_id(&mut character.possessions, item_id, 1) != 0 {
        return Err(ErrorCode::Failure);
    }
    character.possessions.equipment[slot] = item_id;
    apply_equip_modifiers(character, items, slot);
    character.save_pending = true;
    Ok(())
}

fn holds_two_hander(character: &Character, items: &ItemManager) -> bool {
    let id = character.possessions.equipment[EQUIP_FIGHT1_SLOT];
    items
        .get(id)
        .map(|c| c.equip_category() == Some(EquipCategory::TwoHandWeapon))
        .unwrap_or(false)
}

/// Equips one `item_id` from the inventory, following the slot rules of
/// its category.
pub fn equip(
    character: &mut Character,
    items: &ItemManager,
    item_id: u16,
) -> Result<(), ErrorCode> {
    if count_item(&character.possessions, item_id) == 0 {
        return Err(ErrorCode::InvalidArgument);
    }
    let Some(class) = items.get(item_id) else {
        return Err(ErrorCode::InvalidArgument);
    };

    match class.kind {
        ItemKind::Usable => Err(ErrorCode::InvalidArgument),

        ItemKind::Projectile => {
            let poss = &mut character.possessions;
            if poss.equipment[EQUIP_PROJECTILE_SLOT] == item_id {
                // Reloading: top up from the inventory.
                let space = MAX_PROJECTILES - poss.projectile_amount as u32;
                let want = space.min(count_item(poss, item_id));
                remove_by_id(poss, item_id, want);
                poss.projectile_amount += want as u8;
            } else {
                // Switching: prior projectiles go back first.
                if poss.equipment[EQUIP_PROJECTILE_SLOT] != 0 {
                    unequip_slot(character, items, EQUIP_PROJECTILE_SLOT)?;
                }
                let poss = &mut character.possessions;
                let want = MAX_PROJECTILES.min(count_item(poss, item_id));
                remove_by_id(poss, item_id, want);
                poss.equipment[EQUIP_PROJECTILE_SLOT] = item_id;
                poss.projectile_amount = want as u8;
            }
            character.save_pending = true;
            Ok(())
        }

        ItemKind::Equipment(EquipCategory::TwoHandWeapon) => {
            unequip_slot(character, items, EQUIP_FIGHT1_SLOT)?;
            unequip_slot(character, items, EQUIP_FIGHT2_SLOT)?;
            equip_into(character, items, item_id, EQUIP_FIGHT1_SLOT)
        }

        ItemKind::Equipment(category) => {
            let first = category.first_slot();
            match category.second_slot() {
                Some(second) => {
                    // A two-handed weapon blocks both fight slots.
                    if first == EQUIP_FIGHT1_SLOT && holds_two_hander(character, items) {
                        unequip_slot(character, items, first)?;
                        return equip_into(character, items, item_id, first);
                    }
                    if character.possessions.equipment[first] == 0 {
                        equip_into(character, items, item_id, first)
                    } else if character.possessions.equipment[second] == 0 {
                        equip_into(character, items, item_id, second)
                    } else {
                        unequip_slot(character, items, first)?;
                        equip_into(character, items, item_id, first)
                    }
                }
                None => {
                    unequip_slot(character, items, first)?;
                    equip_into(character, items, item_id, first)
                }
            }
        }
    }
}

/// Returns equipped projectiles to the inventory multiset; called on any
/// departure from a map, before the snapshot is flushed. Overflow beyond
/// the inventory's capacity is dropped with a log line rather than lost
/// silently.
pub fn return_projectiles(character: &mut Character, items: &ItemManager) {
    let poss = &mut character.possessions;
    let item_id = poss.equipment[EQUIP_PROJECTILE_SLOT];
    if item_id == 0 {
        return;
    }
    let amount = poss.projectile_amount as u32;
    let rest = insert(poss, items, item_id, amount);
    if rest > 0 {
        log::warn!(
            "Dropped {} projectiles of class {} on departure: inventory full",
            rest,
            item_id
        );
    }
    poss.equipment[EQUIP_PROJECTILE_SLOT] = 0;
    poss.projectile_amount = 0;
}
