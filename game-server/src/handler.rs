//! Dispatch of client messages for an admitted character.
//!
//! Protocol violations (unknown ids, short payloads) are logged and the
//! packet dropped; every other failure answers with the request's message
//! id and an error code byte.

use common::defines::{ErrorCode, TILE_SIZE};
use common::net::{MessageIn, MessageOut};
use common::protocol::*;

use crate::attributes::{Modifier, LAYER_BUFF};
use crate::buysell;
use crate::commands;
use crate::entity::{Action, Direction, Entity, EntityId, EntityKind, UpdateFlags};
use crate::inventory;
use crate::items::{GroundItem, ItemKind};
use crate::point::Point;
use crate::state::GameState;
use crate::trade;

fn respond(state: &mut GameState, id: EntityId, msg_id: u16, code: ErrorCode) {
    let mut msg = MessageOut::new(msg_id);
    msg.write_u8(code as u8);
    state.send_to(id, msg);
}

/// Sends the full inventory and money; cheap enough to be the answer to
/// every inventory mutation.
pub fn send_inventory(state: &mut GameState, id: EntityId) {
    let Some(character) = state.world.get(id).and_then(|e| e.character()) else {
        return;
    };
    let mut msg = MessageOut::new(GC_INVENTORY_UPDATE);
    msg.write_u32(character.possessions.money);
    for (slot, item) in character.possessions.inventory.iter().enumerate() {
        msg.write_u8(slot as u8);
        msg.write_u16(item.item_id);
        msg.write_u8(item.amount);
    }
    state.send_to(id, msg);
}

fn send_equipment(state: &mut GameState, id: EntityId) {
    let Some(character) = state.world.get(id).and_then(|e| e.character()) else {
        return;
    };
    let mut msg = MessageOut::new(GC_EQUIP_UPDATE);
    for &slot in character.possessions.equipment.iter() {
        msg.write_u16(slot);
    }
    msg.write_u8(character.possessions.projectile_amount);
    state.send_to(id, msg);
}

/// Handles one message from the client owning `id`.
pub fn handle(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    match msg.id() {
        CG_WALK => on_walk(state, id, msg),
        CG_ATTACK => on_attack(state, id, msg),
        CG_ACTION_CHANGE => on_action_change(state, id, msg),
        CG_DIRECTION_CHANGE => on_direction_change(state, id, msg),
        CG_SAY => on_say(state, id, msg),
        CG_ITEM_PICKUP => on_pickup(state, id, msg),
        CG_ITEM_DROP => on_drop(state, id, msg),
        CG_ITEM_USE => on_use(state, id, msg),
        CG_ITEM_EQUIP => on_equip(state, id, msg),
        CG_ITEM_UNEQUIP => on_unequip(state, id, msg),
        CG_TRADE_REQUEST => {
            let target = msg.read_u16();
            let code = trade::request(state, id, target);
            if code != ErrorCode::Ok {
                respond(state, id, CG_TRADE_REQUEST, code);
            }
        }
        CG_TRADE_START => {
            let code = trade::start(state, id);
            if code != ErrorCode::Ok {
                respond(state, id, CG_TRADE_START, code);
            }
        }
        CG_TRADE_ADD_ITEM => {
            let slot = msg.read_u8() as usize;
            let amount = msg.read_u32();
            let code = trade::add_item(state, id, slot, amount);
            if code != ErrorCode::Ok {
                respond(state, id, CG_TRADE_ADD_ITEM, code);
            }
        }
        CG_TRADE_SET_MONEY => {
            let amount = msg.read_u32();
            let code = trade::set_money(state, id, amount);
            if code != ErrorCode::Ok {
                respond(state, id, CG_TRADE_SET_MONEY, code);
            }
        }
        CG_TRADE_CONFIRM => {
            trade::confirm(state, id);
        }
        CG_TRADE_AGREE => {
            trade::agree(state, id);
        }
        CG_TRADE_CANCEL => {
            state.cancel_transaction(id);
        }
        CG_BUYSELL_PERFORM => {
            let item_id = msg.read_u16();
            let amount = msg.read_u32();
            let code = buysell::perform(state, id, item_id, amount);
            if code == ErrorCode::Ok {
                send_inventory(state, id);
            } else {
                respond(state, id, CG_BUYSELL_PERFORM, code);
            }
        }
        other => {
            log::debug!("Dropping unknown message 0x{:04x} from {}", other, id);
        }
    }
    if msg.overrun() {
        log::warn!("Short payload in message 0x{:04x} from {}", msg.id(), id);
    }
}

fn on_walk(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let x = msg.read_u16() as i32;
    let y = msg.read_u16() as i32;
    let Some(entity) = state.world.get_mut(id) else {
        return;
    };
    let Some(being) = entity.being() else {
        return;
    };
    if being.is_dead() {
        return;
    }
    // A fresh move request replaces any prior unconsumed destination, and
    // walking breaks off an attack stance.
    if being.action == Action::Attack {
        entity.set_action(Action::Stand);
    }
    entity.set_destination(Point::new(x, y));
}

fn on_attack(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let direction = Direction::from_u8(msg.read_u8());
    let Some(entity) = state.world.get_mut(id) else {
        return;
    };
    let Some(being) = entity.being_mut() else {
        return;
    };
    if being.is_dead() {
        return;
    }
    being.direction = direction;
    being.action = Action::Attack;
    being.action_time = 0;
    entity.clear_destination();
}

fn on_action_change(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let action = msg.read_u8();
    let Some(entity) = state.world.get_mut(id) else {
        return;
    };
    if entity.being().map(|b| b.is_dead()).unwrap_or(true) {
        return;
    }
    // Clients may only request the passive stances.
    let action = match action {
        0 => Action::Stand,
        3 => Action::Sit,
        _ => {
            respond(state, id, CG_ACTION_CHANGE, ErrorCode::InvalidArgument);
            return;
        }
    };
    let Some(entity) = state.world.get_mut(id) else {
        return;
    };
    entity.set_action(action);
    entity.clear_destination();
}

fn on_direction_change(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let direction = Direction::from_u8(msg.read_u8());
    let Some(entity) = state.world.get_mut(id) else {
        return;
    };
    if let Some(being) = entity.being_mut() {
        if being.direction != direction {
            being.direction = direction;
            entity.flags |= UpdateFlags::DIRECTION_CHANGE;
        }
    }
}

fn on_say(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let text = msg.read_string();
    if text.is_empty() {
        return;
    }
    if let Some(rest) = text.strip_prefix('@') {
        commands::handle(state, id, rest);
        return;
    }
    state.say_around(id, &text);
}

fn on_pickup(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let x = msg.read_u16() as i32;
    let y = msg.read_u16() as i32;
    let want = Point::new(x, y);

    let Some(entity) = state.world.get(id) else {
        return;
    };
    let (map_id, pos) = (entity.map_id, entity.pos);
    // Reach: the character's tile and its neighbors.
    if (pos.tile().x - want.tile().x).abs() > 1 || (pos.tile().y - want.tile().y).abs() > 1 {
        respond(state, id, CG_ITEM_PICKUP, ErrorCode::InvalidArgument);
        return;
    }

    let found = state.maps.get(map_id).and_then(|map| {
        map.iter_fixed_around(want, TILE_SIZE)
            .filter_map(|iid| state.world.get(iid).map(|e| (iid, e)))
            .find(|(_, e)| e.pos.tile() == want.tile())
            .map(|(iid, e)| match &e.kind {
                EntityKind::Item(item) => Some((iid, *item)),
                _ => None,
            })
            .flatten()
    });
    let Some((ground_id, item)) = found else {
        respond(state, id, CG_ITEM_PICKUP, ErrorCode::InvalidArgument);
        return;
    };

    let rest = {
        let Some(c) = state.world.get_mut(id).and_then(|e| e.character_mut()) else {
            return;
        };
        let rest = inventory::insert(&mut c.possessions, &state.items, item.item_id, item.amount as u32);
        c.save_pending = true;
        rest
    };

    if rest == item.amount as u32 {
        respond(state, id, CG_ITEM_PICKUP, ErrorCode::InventoryFull);
        return;
    }
    if rest == 0 {
        state.enqueue_remove(ground_id);
    } else if let Some(EntityKind::Item(ground)) =
        state.world.get_mut(ground_id).map(|e| &mut e.kind)
    {
        ground.amount = rest as u8;
    }
    send_inventory(state, id);
}

fn on_drop(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let slot = msg.read_u8() as usize;
    let amount = msg.read_u8() as u32;
    if amount == 0 {
        respond(state, id, CG_ITEM_DROP, ErrorCode::InvalidArgument);
        return;
    }
    let Some(entity) = state.world.get(id) else {
        return;
    };
    let (map_id, pos) = (entity.map_id, entity.pos);

    let (item_id, dropped) = {
        let Some(c) = state.world.get_mut(id).and_then(|e| e.character_mut()) else {
            return;
        };
        let result = inventory::remove_by_slot(&mut c.possessions, slot, amount);
        c.save_pending = true;
        result
    };
    if dropped == 0 {
        respond(state, id, CG_ITEM_DROP, ErrorCode::InvalidArgument);
        return;
    }

    let ground = Entity {
        map_id,
        pos,
        flags: UpdateFlags::empty(),
        kind: EntityKind::Item(GroundItem {
            item_id,
            amount: dropped as u8,
        }),
    };
    let ground_id = state.world.insert(ground);
    state.enqueue_insert(ground_id);
    send_inventory(state, id);
}

fn on_use(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let slot = msg.read_u8() as usize;
    let Some(item_id) = state
        .world
        .get(id)
        .and_then(|e| e.character())
        .and_then(|c| c.possessions.inventory.get(slot))
        .map(|s| s.item_id)
    else {
        respond(state, id, CG_ITEM_USE, ErrorCode::InvalidArgument);
        return;
    };
    let Some(class) = state.items.get(item_id) else {
        respond(state, id, CG_ITEM_USE, ErrorCode::Failure);
        return;
    };
    if !matches!(class.kind, ItemKind::Usable) {
        respond(state, id, CG_ITEM_USE, ErrorCode::InvalidArgument);
        return;
    }

    {
        let Some(c) = state.world.get_mut(id).and_then(|e| e.character_mut()) else {
            return;
        };
        inventory::remove_by_slot(&mut c.possessions, slot, 1);
        for m in &class.modifiers {
            if m.duration > 0 {
                c.being.attributes.add_modifier(
                    m.attribute,
                    LAYER_BUFF,
                    Modifier::timed(m.value, m.duration, item_id as u32),
                );
            } else if m.attribute == common::defines::BASE_ATTR_HP {
                // Instant heal.
                let max = c.being.max_hp();
                c.being.hp = (c.being.hp + m.value as i32).clamp(0, max);
            } else {
                c.being.attributes.add_modifier(
                    m.attribute,
                    LAYER_BUFF,
                    Modifier::permanent(m.value, item_id as u32),
                );
            }
            c.mark_attribute_dirty(m.attribute);
        }
        c.save_pending = true;
    }
    if let Some(entity) = state.world.get_mut(id) {
        entity.flags |= UpdateFlags::HEALTH_CHANGE;
    }

    if let Some(function) = state.items.get(item_id).and_then(|c| c.script_function.clone()) {
        let map_id = state.world.get(id).map(|e| e.map_id).unwrap_or(0);
        state.run_script_function(map_id, &function, id);
    }
    send_inventory(state, id);
}

fn on_equip(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let slot = msg.read_u8() as usize;
    let Some(item_id) = state
        .world
        .get(id)
        .and_then(|e| e.character())
        .and_then(|c| c.possessions.inventory.get(slot))
        .map(|s| s.item_id)
    else {
        respond(state, id, CG_ITEM_EQUIP, ErrorCode::InvalidArgument);
        return;
    };

    let code = {
        let items = &state.items;
        match state.world.get_mut(id).and_then(|e| e.character_mut()) {
            Some(c) => inventory::equip(c, items, item_id).err().unwrap_or(ErrorCode::Ok),
            None => ErrorCode::Failure,
        }
    };
    respond(state, id, CG_ITEM_EQUIP, code);
    if code == ErrorCode::Ok {
        if let Some(entity) = state.world.get_mut(id) {
            entity.flags |= UpdateFlags::LOOKS_CHANGE;
        }
        send_inventory(state, id);
        send_equipment(state, id);
    }
}

fn on_unequip(state: &mut GameState, id: EntityId, msg: &mut MessageIn) {
    let slot = msg.read_u8() as usize;
    if slot >= common::defines::EQUIPMENT_SLOTS {
        respond(state, id, CG_ITEM_UNEQUIP, ErrorCode::InvalidArgument);
        return;
    }
    let code = {
        let items = &state.items;
        match state.world.get_mut(id).and_then(|e| e.character_mut()) {
            Some(c) => inventory::unequip_slot(c, items, slot)
                .err()
                .unwrap_or(ErrorCode::Ok),
            None => ErrorCode::Failure,
        }
    };
    respond(state, id, CG_ITEM_UNEQUIP, code);
    if code == ErrorCode::Ok {
        if let Some(entity) = state.world.get_mut(id) {
            entity.flags |= UpdateFlags::LOOKS_CHANGE;
        }
        send_inventory(state, id);
        send_equipment(state, id);
    }
}
