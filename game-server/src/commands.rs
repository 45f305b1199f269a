//! Administrative commands.
//!
//! Commands are chat lines starting with `@`. Each has a small typed
//! argument grammar; `#` stands for the caller or the current map.
//! Unknown commands and insufficient rights answer with a quiet error
//! line rather than any echo of the attempt.

use common::net::MessageOut;
use common::protocol::{GC_SAY, GA_BAN_PLAYER};

use crate::entity::{Action, Entity, EntityId, EntityKind, UpdateFlags};
use crate::inventory;
use crate::point::Point;
use crate::state::GameState;

/// Account level required for world-altering commands.
const GM_LEVEL: u8 = 50;

/// Public id used for the server's own voice.
const SERVER_VOICE: u16 = 0xffff;

fn reply(state: &mut GameState, id: EntityId, text: &str) {
    let mut msg = MessageOut::new(GC_SAY);
    msg.write_u16(SERVER_VOICE);
    msg.write_string(text);
    state.send_to(id, msg);
}

/// Resolves a character argument: `#` is the caller, otherwise a name on
/// this runtime.
fn resolve_character(state: &GameState, caller: EntityId, arg: &str) -> Option<EntityId> {
    if arg == "#" {
        return Some(caller);
    }
    state
        .world
        .ids()
        .find(|&id| {
            state
                .world
                .get(id)
                .and_then(|e| e.character())
                .map(|c| c.name.eq_ignore_ascii_case(arg))
                .unwrap_or(false)
        })
}

/// Resolves a map argument: `#` is the caller's current map.
fn resolve_map(state: &GameState, caller: EntityId, arg: &str) -> Option<u16> {
    if arg == "#" {
        return state.world.get(caller).map(|e| e.map_id);
    }
    arg.parse().ok()
}

pub fn handle(state: &mut GameState, caller: EntityId, line: &str) {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return;
    };
    let args: Vec<&str> = parts.collect();

    let level = state
        .world
        .get(caller)
        .and_then(|e| e.character())
        .map(|c| c.account_level)
        .unwrap_or(0);

    match command {
        "where" => {
            if let Some(entity) = state.world.get(caller) {
                let text = format!(
                    "Map {} at ({}, {})",
                    entity.map_id, entity.pos.x, entity.pos.y
                );
                reply(state, caller, &text);
            }
            return;
        }
        _ => {}
    }

    if level < GM_LEVEL {
        reply(state, caller, "Error: insufficient rights");
        return;
    }

    match command {
        "warp" => {
            // @warp <char|#> <map|#> <x> <y>
            let (Some(&who), Some(&map_arg), Some(x), Some(y)) = (
                args.first(),
                args.get(1),
                args.get(2).and_then(|v| v.parse::<i32>().ok()),
                args.get(3).and_then(|v| v.parse::<i32>().ok()),
            ) else {
                reply(state, caller, "Error: usage: @warp <char> <map> <x> <y>");
                return;
            };
            let (Some(target), Some(map_id)) = (
                resolve_character(state, caller, who),
                resolve_map(state, caller, map_arg),
            ) else {
                reply(state, caller, "Error: no such character or map");
                return;
            };
            state.enqueue_warp(target, map_id, Point::new(x, y));
        }
        "item" => {
            // @item <char|#> <item-class> [amount]
            let (Some(&who), Some(item_id)) = (
                args.first(),
                args.get(1).and_then(|v| v.parse::<u16>().ok()),
            ) else {
                reply(state, caller, "Error: usage: @item <char> <class> [n]");
                return;
            };
            let amount = args.get(2).and_then(|v| v.parse::<u32>().ok()).unwrap_or(1);
            if amount == 0 || state.items.get(item_id).is_none() {
                reply(state, caller, "Error: invalid item");
                return;
            }
            let Some(target) = resolve_character(state, caller, who) else {
                reply(state, caller, "Error: no such character");
                return;
            };
            let rest = {
                let items = &state.items;
                match state.world.get_mut(target).and_then(|e| e.character_mut()) {
                    Some(c) => inventory::insert(&mut c.possessions, items, item_id, amount),
                    None => amount,
                }
            };
            crate::handler::send_inventory(state, target);
            if rest > 0 {
                reply(state, caller, "Error: inventory full");
            }
        }
        "money" => {
            // @money <char|#> <amount>
            let (Some(&who), Some(amount)) = (
                args.first(),
                args.get(1).and_then(|v| v.parse::<i64>().ok()),
            ) else {
                reply(state, caller, "Error: usage: @money <char> <amount>");
                return;
            };
            let Some(target) = resolve_character(state, caller, who) else {
                reply(state, caller, "Error: no such character");
                return;
            };
            if let Some(c) = state.world.get_mut(target).and_then(|e| e.character_mut()) {
                let money = c.possessions.money as i64 + amount;
                c.possessions.money = money.clamp(0, u32::MAX as i64) as u32;
                c.save_pending = true;
            }
            crate::handler::send_inventory(state, target);
        }
        "spawn" => {
            // @spawn <monster-class> [count]
            let Some(class_id) = args.first().and_then(|v| v.parse::<u16>().ok()) else {
                reply(state, caller, "Error: usage: @spawn <class> [n]");
                return;
            };
            let count = args.get(1).and_then(|v| v.parse::<u32>().ok()).unwrap_or(1);
            let Some(class) = state.monsters.get(class_id) else {
                reply(state, caller, "Error: no such monster class");
                return;
            };
            let Some((map_id, pos)) = state.world.get(caller).map(|e| (e.map_id, e.pos)) else {
                return;
            };
            for _ in 0..count.min(32) {
                let monster = crate::monster::Monster::new(class.clone());
                let entity = Entity {
                    map_id,
                    pos,
                    flags: UpdateFlags::empty(),
                    kind: EntityKind::Monster(monster),
                };
                let id = state.world.insert(entity);
                state.enqueue_insert(id);
            }
        }
        "revive" => {
            // @revive <char|#>
            let who = args.first().copied().unwrap_or("#");
            let Some(target) = resolve_character(state, caller, who) else {
                reply(state, caller, "Error: no such character");
                return;
            };
            if let Some(entity) = state.world.get_mut(target) {
                if let Some(being) = entity.being_mut() {
                    if being.is_dead() {
                        being.fill_hitpoints();
                        entity.set_action(Action::Stand);
                        entity.flags |= UpdateFlags::HEALTH_CHANGE;
                    }
                }
            }
        }
        "ban" => {
            // @ban <char> <hours>
            let (Some(&who), Some(hours)) = (
                args.first(),
                args.get(1).and_then(|v| v.parse::<u32>().ok()),
            ) else {
                reply(state, caller, "Error: usage: @ban <char> <hours>");
                return;
            };
            let Some(target) = resolve_character(state, caller, who) else {
                reply(state, caller, "Error: no such character");
                return;
            };
            let Some(db_id) = state
                .world
                .get(target)
                .and_then(|e| e.character())
                .map(|c| c.db_id)
            else {
                return;
            };
            let mut msg = MessageOut::new(GA_BAN_PLAYER);
            msg.write_u32(db_id);
            msg.write_u32(hours * 60);
            state.send_to_account(msg);
            state.logout_character(target);
            state.closing.push(target);
        }
        "announce" => {
            let text = args.join(" ");
            if text.is_empty() {
                reply(state, caller, "Error: usage: @announce <text>");
                return;
            }
            let everyone: Vec<EntityId> = state
                .world
                .ids()
                .filter(|&id| {
                    state
                        .world
                        .get(id)
                        .map(|e| e.is_character())
                        .unwrap_or(false)
                })
                .collect();
            for id in everyone {
                reply(state, id, &text);
            }
        }
        _ => {
            reply(state, caller, "Error: unknown command");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::character_data::CharacterData;
    use crate::map::{MapComposite, MapGrid};

    fn state_with_character(account_level: u8) -> (GameState, EntityId) {
        let mut state = GameState::with_seed(5);
        state
            .maps
            .insert(MapComposite::new(1, "arena", MapGrid::new(32, 32)));
        let mut data = CharacterData::default();
        data.account_level = account_level;
        data.attributes = [10, 10, 10, 10, 10, 10];
        data.map_id = 1;
        data.x = 100;
        data.y = 100;
        let id = state.admit_character(7, "gm", &data).unwrap();
        state.outbox.clear();
        (state, id)
    }

    #[test]
    fn unknown_commands_answer_with_an_error() {
        let (mut state, id) = state_with_character(60);
        handle(&mut state, id, "frobnicate");
        assert_eq!(state.outbox.len(), 1);
    }

    #[test]
    fn rights_are_checked() {
        let (mut state, id) = state_with_character(0);
        handle(&mut state, id, "money # 100");
        let money = state
            .world
            .get(id)
            .and_then(|e| e.character())
            .map(|c| c.possessions.money)
            .unwrap();
        assert_eq!(money, 0);
    }

    #[test]
    fn money_applies_to_self_with_hash() {
        let (mut state, id) = state_with_character(60);
        handle(&mut state, id, "money # 250");
        let money = state
            .world
            .get(id)
            .and_then(|e| e.character())
            .map(|c| c.possessions.money)
            .unwrap();
        assert_eq!(money, 250);
    }

    #[test]
    fn warp_with_hash_map_queues_a_local_jump() {
        let (mut state, id) = state_with_character(60);
        handle(&mut state, id, "warp # # 200 200");
        assert_eq!(state.queue.len(), 1);
        state.update();
        let entity = state.world.get(id).unwrap();
        assert_eq!(entity.pos, Point::new(200, 200));
    }

    #[test]
    fn where_needs_no_rights() {
        let (mut state, id) = state_with_character(0);
        handle(&mut state, id, "where");
        assert_eq!(state.outbox.len(), 1);
    }
}
