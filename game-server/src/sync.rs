//! Visibility diffing and client synchronization.
//!
//! Once per tick, for every connected character, the runtime walks the
//! union of zones around the character's old and new positions and reports
//! what entered, left, moved, attacked or changed within vision range. The
//! character's own attribute, experience and level updates ride along at
//! the end, as do the ground items around it.

use common::defines::{BASE_ATTR_HP, AROUND_AREA, EQUIP_FIGHT1_SLOT, EQUIP_HEAD_SLOT, EQUIP_LEGS_SLOT, EQUIP_TORSO_SLOT};
use common::net::MessageOut;
use common::protocol::*;

use crate::character::{Character, LOOKS_SLOTS};
use crate::entity::{EntityId, EntityKind, EntityType, UpdateFlags};
use crate::items::ItemManager;
use crate::state::GameState;

/// The looks-relevant slots, in wire order.
const LOOKS_SLOT_ORDER: [usize; LOOKS_SLOTS] = [
    EQUIP_FIGHT1_SLOT,
    EQUIP_HEAD_SLOT,
    EQUIP_TORSO_SLOT,
    EQUIP_LEGS_SLOT,
];

/// Bit 8 of the looks mask tells the client to clear all slots first.
const LOOKS_CLEAR_BIT: u16 = 1 << 8;

/// Current sprite ids for the looks slots.
fn looks_sprites(character: &Character, items: &ItemManager) -> [u16; LOOKS_SLOTS] {
    let mut sprites = [0u16; LOOKS_SLOTS];
    for (i, &slot) in LOOKS_SLOT_ORDER.iter().enumerate() {
        let item_id = character.possessions.equipment[slot];
        sprites[i] = items.get(item_id).map(|c| c.sprite_id).unwrap_or(0);
    }
    sprites
}

/// Appends the looks payload: the smaller of the full listing (with the
/// clear bit) and the diff against what was last sent.
fn serialize_looks(
    msg: &mut MessageOut,
    sprites: &[u16; LOOKS_SLOTS],
    last_sent: &[u16; LOOKS_SLOTS],
    force_full: bool,
) {
    let mut mask_full: u16 = 0;
    let mut nb_full = 0;
    let mut mask_diff: u16 = 0;
    let mut nb_diff = 0;
    for i in 0..LOOKS_SLOTS {
        if sprites[i] != 0 {
            mask_full |= 1 << i;
            nb_full += 1;
        }
        if sprites[i] != last_sent[i] {
            mask_diff |= 1 << i;
            nb_diff += 1;
        }
    }

    let full = force_full || nb_full <= nb_diff;
    let mask = if full {
        mask_full | LOOKS_CLEAR_BIT
    } else {
        mask_diff
    };
    msg.write_u16(mask);
    for i in 0..LOOKS_SLOTS {
        if mask & (1 << i) != 0 {
            msg.write_u16(sprites[i]);
        }
    }
}

/// Emits everything character `p` needs to hear about this tick.
pub fn inform_player(state: &mut GameState, map_id: u16, p: EntityId) {
    let Some(p_entity) = state.world.get(p) else {
        return;
    };
    let Some(p_being) = p_entity.being() else {
        return;
    };
    let p_old = p_being.old_pos;
    let p_pos = p_entity.pos;
    let p_flags = p_entity.flags;

    let Some(map) = state.maps.get(map_id) else {
        return;
    };

    let mut out: Vec<MessageOut> = Vec::new();
    let mut move_msg = MessageOut::new(GC_BEINGS_MOVE);
    let mut damage_msg = MessageOut::new(GC_BEINGS_DAMAGE);
    let mut looks_sent: Vec<(EntityId, [u16; LOOKS_SLOTS])> = Vec::new();

    let around: Vec<EntityId> = map
        .iter_beings_around_character(p_old, p_pos, AROUND_AREA)
        .collect();

    for o in around {
        let Some(o_entity) = state.world.get(o) else {
            continue;
        };
        let Some(o_being) = o_entity.being() else {
            continue;
        };
        let o_old = o_being.old_pos;
        let o_pos = o_entity.pos;
        let o_flags = o_entity.flags;
        let o_public = o_being.public_id;
        let o_type = o_entity.entity_type();

        let were_in_range = p_old.in_range_of(o_old, AROUND_AREA)
            && !(p_flags | o_flags).contains(UpdateFlags::NEW_ON_MAP);
        let will_be_in_range = p_pos.in_range_of(o_pos, AROUND_AREA);

        if !were_in_range && !will_be_in_range {
            continue;
        }

        if were_in_range && will_be_in_range {
            if o_flags.contains(UpdateFlags::ATTACK) && o != p {
                let mut msg = MessageOut::new(GC_BEING_ATTACK);
                msg.write_u16(o_public);
                msg.write_u8(o_being.direction as u8);
                out.push(msg);
            }
            if o_flags.contains(UpdateFlags::ACTION_CHANGE) {
                let mut msg = MessageOut::new(GC_BEING_ACTION_CHANGE);
                msg.write_u16(o_public);
                msg.write_u8(o_being.action as u8);
                out.push(msg);
            }
            if o_flags.contains(UpdateFlags::DIRECTION_CHANGE) {
                let mut msg = MessageOut::new(GC_BEING_DIRECTION_CHANGE);
                msg.write_u16(o_public);
                msg.write_u8(o_being.direction as u8);
                out.push(msg);
            }
            if o_flags.contains(UpdateFlags::LOOKS_CHANGE) {
                if let EntityKind::Character(c) = &o_entity.kind {
                    let sprites = looks_sprites(c, &state.items);
                    let mut msg = MessageOut::new(GC_BEING_LOOKS_CHANGE);
                    msg.write_u16(o_public);
                    serialize_looks(&mut msg, &sprites, &c.last_looks, false);
                    out.push(msg);
                    looks_sent.push((o, sprites));
                }
            }
            if o_flags.contains(UpdateFlags::REMOVE) {
                let mut msg = MessageOut::new(GC_BEING_LEAVE);
                msg.write_u16(o_public);
                out.push(msg);
            }
            for &hit in &o_being.hits_taken {
                damage_msg.write_u16(o_public);
                damage_msg.write_u16(hit);
            }
        }

        if !will_be_in_range {
            // o slipped out of vision.
            let mut msg = MessageOut::new(GC_BEING_LEAVE);
            msg.write_u16(o_public);
            out.push(msg);
            continue;
        }

        if !were_in_range {
            // o came into vision.
            let mut msg = MessageOut::new(GC_BEING_ENTER);
            msg.write_u8(o_type as u8);
            msg.write_u16(o_public);
            msg.write_u8(o_being.action as u8);
            msg.write_u16(o_pos.x as u16);
            msg.write_u16(o_pos.y as u16);
            match &o_entity.kind {
                EntityKind::Character(c) => {
                    msg.write_string(&c.name);
                    msg.write_u8(c.hair_style);
                    msg.write_u8(c.hair_color);
                    msg.write_u8(c.gender as u8);
                    let sprites = looks_sprites(c, &state.items);
                    serialize_looks(&mut msg, &sprites, &c.last_looks, true);
                    looks_sent.push((o, sprites));
                }
                EntityKind::Monster(m) => {
                    msg.write_u16(m.class.id);
                }
                EntityKind::Npc(n) => {
                    msg.write_u16(n.npc_id);
                }
                EntityKind::Item(_) => {}
            }
            out.push(msg);
        }

        // Motion report for anything entering or continuing in range.
        let o_dst = o_being.dst;
        if o_pos != o_dst || o_old != o_pos {
            move_msg.write_u16(o_public);
            let tile = o_pos.tile();
            move_msg.write_coordinates(tile.x as u16, tile.y as u16);
            move_msg.write_u8((o_being.speed / 10).min(255) as u8);
            move_msg.write_u16(o_dst.x as u16);
            move_msg.write_u16(o_dst.y as u16);
        }
    }

    // Ground items around the character: appearing, entering or leaving
    // vision.
    let mut item_msg = MessageOut::new(GC_ITEMS);
    let fixed: Vec<EntityId> = map
        .iter_around_character(p_old, p_pos, AROUND_AREA)
        .collect();
    for o in fixed {
        let Some(o_entity) = state.world.get(o) else {
            continue;
        };
        let EntityKind::Item(item) = &o_entity.kind else {
            continue;
        };
        let o_pos = o_entity.pos;
        let o_flags = o_entity.flags;
        let will_be_in_range = p_pos.in_range_of(o_pos, AROUND_AREA);
        let were_in_range = p_old.in_range_of(o_pos, AROUND_AREA)
            && !(p_flags | o_flags).contains(UpdateFlags::NEW_ON_MAP);
        if will_be_in_range != were_in_range {
            if o_flags.contains(UpdateFlags::NEW_ON_MAP) {
                // Out-of-nowhere appearance gets its own message so the
                // client can play a sound or animation.
                let mut msg = MessageOut::new(GC_ITEM_APPEAR);
                msg.write_u16(item.item_id);
                msg.write_u16(o_pos.x as u16);
                msg.write_u16(o_pos.y as u16);
                out.push(msg);
            } else {
                item_msg.write_u16(if will_be_in_range { item.item_id } else { 0 });
                item_msg.write_u16(o_pos.x as u16);
                item_msg.write_u16(o_pos.y as u16);
            }
        }
    }

    // The character's own status updates.
    if let Some(character) = state.world.get(p).and_then(|e| e.character()) {
        let mut attr_msg = MessageOut::new(GC_ATTRIBUTE_UPDATE);
        let mut reported_hp = false;
        for &attr in &character.dirty_attributes {
            attr_msg.write_u8(attr as u8);
            attr_msg.write_u32(character.being.attributes.base(attr) as u32);
            attr_msg.write_u32(character.being.attributes.modified(attr) as u32);
            reported_hp |= attr == BASE_ATTR_HP;
        }
        if p_flags.contains(UpdateFlags::HEALTH_CHANGE) && !reported_hp {
            attr_msg.write_u8(BASE_ATTR_HP as u8);
            attr_msg.write_u32(character.being.max_hp() as u32);
            attr_msg.write_u32(character.being.hp.max(0) as u32);
        }
        if !attr_msg.is_empty() {
            out.push(attr_msg);
        }

        if !character.dirty_experience.is_empty() {
            let mut msg = MessageOut::new(GC_EXPERIENCE_UPDATE);
            for &skill in &character.dirty_experience {
                msg.write_u8(skill as u8);
                msg.write_u32(character.experience[skill]);
            }
            out.push(msg);
            let mut progress = MessageOut::new(GC_LEVEL_PROGRESS);
            progress.write_u16(character.level_progress());
            out.push(progress);
        }

        if character.leveled_up {
            let mut msg = MessageOut::new(GC_LEVEL_UP);
            msg.write_u16(character.level);
            msg.write_u16(character.character_points);
            msg.write_u16(character.correction_points);
            out.push(msg);
        }
    }

    // Batched messages only go out when they carry entries.
    if !move_msg.is_empty() {
        out.push(move_msg);
    }
    if !damage_msg.is_empty() {
        out.push(damage_msg);
    }
    if !item_msg.is_empty() {
        out.push(item_msg);
    }

    for (o, sprites) in looks_sent {
        if let Some(c) = state.world.get_mut(o).and_then(|e| e.character_mut()) {
            c.last_looks = sprites;
        }
    }
    for msg in out {
        state.send_to(p, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::net::MessageIn;

    #[test]
    fn full_looks_lists_filled_slots_with_clear_bit() {
        let sprites = [11, 0, 13, 0];
        let last = [0; LOOKS_SLOTS];
        let mut msg = MessageOut::new(0);
        serialize_looks(&mut msg, &sprites, &last, true);
        let bytes = msg.into_bytes();
        let mut input = MessageIn::new(&bytes).unwrap();
        let mask = input.read_u16();
        assert_ne!(mask & LOOKS_CLEAR_BIT, 0);
        assert_eq!(mask & 0xff, 0b0101);
        assert_eq!(input.read_u16(), 11);
        assert_eq!(input.read_u16(), 13);
    }

    #[test]
    fn diff_looks_wins_when_smaller() {
        // Three slots filled, only one changed: the diff is smaller.
        let sprites = [11, 12, 13, 0];
        let last = [11, 12, 9, 0];
        let mut msg = MessageOut::new(0);
        serialize_looks(&mut msg, &sprites, &last, false);
        let bytes = msg.into_bytes();
        let mut input = MessageIn::new(&bytes).unwrap();
        let mask = input.read_u16();
        assert_eq!(mask & LOOKS_CLEAR_BIT, 0);
        assert_eq!(mask & 0xff, 0b0100);
        assert_eq!(input.read_u16(), 13);
        assert_eq!(input.unread_len(), 0);
    }

    #[test]
    fn full_looks_wins_when_fewer_filled_than_changed() {
        // One slot filled, two changed: full listing is smaller.
        let sprites = [11, 0, 0, 0];
        let last = [9, 8, 0, 0];
        let mut msg = MessageOut::new(0);
        serialize_looks(&mut msg, &sprites, &last, false);
        let bytes = msg.into_bytes();
        let mut input = MessageIn::new(&bytes).unwrap();
        let mask = input.read_u16();
        assert_ne!(mask & LOOKS_CLEAR_BIT, 0);
        assert_eq!(mask & 0xff, 0b0001);
    }
}
