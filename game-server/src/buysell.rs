//! NPC shop transactions (buy or sell lists).

use common::defines::ErrorCode;
use common::net::MessageOut;
use common::protocol::*;

use crate::character::Transaction;
use crate::entity::EntityId;
use crate::inventory;
use crate::state::GameState;

/// One open buy-or-sell session between a character and an NPC's list.
#[derive(Debug, Clone)]
pub struct BuySell {
    pub id: u32,
    pub character: EntityId,
    pub npc: EntityId,
    /// true: the character sells to the list; false: buys from it.
    pub sell_mode: bool,
    /// (item id, remaining amount, unit cost)
    pub items: Vec<(u16, u32, u32)>,
}

/// Opens a session and ships the list to the client.
pub fn start(
    state: &mut GameState,
    character: EntityId,
    npc: EntityId,
    sell_mode: bool,
    items: Vec<(u16, u32, u32)>,
) -> Option<u32> {
    state.world.get(character)?.character()?;
    let id = state.next_transaction_id();

    state.cancel_transaction(character);
    if let Some(c) = state
        .world
        .get_mut(character)
        .and_then(|e| e.character_mut())
    {
        c.begin_transaction(Transaction::BuySell(id));
    }

    let mut msg = MessageOut::new(GC_BUYSELL_LIST);
    msg.write_u8(sell_mode as u8);
    for &(item_id, amount, cost) in &items {
        msg.write_u16(item_id);
        msg.write_u16(amount.min(u16::MAX as u32) as u16);
        msg.write_u32(cost);
    }
    state.send_to(character, msg);

    state.shops.insert(
        id,
        BuySell {
            id,
            character,
            npc,
            sell_mode,
            items,
        },
    );
    Some(id)
}

/// Performs one purchase or sale against the open list.
pub fn perform(state: &mut GameState, who: EntityId, item_id: u16, amount: u32) -> ErrorCode {
    let Some(shop_id) = state
        .world
        .get(who)
        .and_then(|e| e.character())
        .and_then(|c| match c.transaction {
            Transaction::BuySell(id) => Some(id),
            _ => None,
        })
    else {
        return ErrorCode::InvalidArgument;
    };
    let Some(shop) = state.shops.get(&shop_id) else {
        return ErrorCode::Failure;
    };
    let Some(&(_, available, cost)) = shop.items.iter().find(|e| e.0 == item_id) else {
        return ErrorCode::InvalidArgument;
    };
    if amount == 0 || amount > available {
        return ErrorCode::InvalidArgument;
    }
    let sell_mode = shop.sell_mode;
    let total = cost.saturating_mul(amount);
    let moved;

    if sell_mode {
        // The character sells: goods out, money in.
        let Some(c) = state.world.get_mut(who).and_then(|e| e.character_mut()) else {
            return ErrorCode::Failure;
        };
        if inventory::count_item(&c.possessions, item_id) < amount {
            return ErrorCode::InvalidArgument;
        }
        inventory::remove_by_id(&mut c.possessions, item_id, amount);
        c.possessions.money = c.possessions.money.saturating_add(total);
        c.save_pending = true;
        moved = amount;
    } else {
        // The character buys: money out, goods in.
        let Some(c) = state.world.get_mut(who).and_then(|e| e.character_mut()) else {
            return ErrorCode::Failure;
        };
        if c.possessions.money < total {
            return ErrorCode::Failure;
        }
        let rest = inventory::insert(&mut c.possessions, &state.items, item_id, amount);
        let bought = amount - rest;
        if bought == 0 {
            return ErrorCode::InventoryFull;
        }
        c.possessions.money -= cost.saturating_mul(bought);
        c.save_pending = true;
        moved = bought;
    }

    if let Some(shop) = state.shops.get_mut(&shop_id) {
        if let Some(entry) = shop.items.iter_mut().find(|e| e.0 == item_id) {
            entry.1 -= moved.min(entry.1);
        }
    }

    let mut msg = MessageOut::new(GC_BUYSELL_RESPONSE);
    msg.write_u8(ErrorCode::Ok as u8);
    msg.write_u16(item_id);
    msg.write_u32(moved);
    state.send_to(who, msg);
    ErrorCode::Ok
}
