//! Player-to-player trading.
//!
//! A trade walks through request → run → confirm → agree. Any offer
//! change while confirming drops both confirmations; agreement by both
//! sides executes the exchange. The transaction handle on each character
//! enforces exclusivity, and canceling tears both sides down.

use common::defines::ErrorCode;
use common::net::MessageOut;
use common::protocol::*;

use crate::character::Transaction;
use crate::entity::EntityId;
use crate::inventory;
use crate::state::GameState;

// Trade event codes shared with the client.
pub const TRADE_EVENT_ITEM_ADDED: u8 = 0;
pub const TRADE_EVENT_MONEY_SET: u8 = 1;
pub const TRADE_EVENT_CONFIRMED: u8 = 2;
pub const TRADE_EVENT_AGREED: u8 = 3;
pub const TRADE_EVENT_CANCELLED: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    /// Waiting for the other party to accept.
    Requested,
    /// Both parties adjust their offers.
    Run,
    /// Offers locked; waiting for final agreement.
    Confirmed,
}

#[derive(Debug, Clone, Default)]
pub struct Offer {
    pub items: Vec<(u16, u32)>,
    pub money: u32,
    pub confirmed: bool,
    pub agreed: bool,
}

#[derive(Debug, Clone)]
pub struct Trade {
    pub id: u32,
    pub a: EntityId,
    pub b: EntityId,
    pub state: TradeState,
    pub offer_a: Offer,
    pub offer_b: Offer,
}

impl Trade {
    fn offer_of(&mut self, who: EntityId) -> Option<&mut Offer> {
        if who == self.a {
            Some(&mut self.offer_a)
        } else if who == self.b {
            Some(&mut self.offer_b)
        } else {
            None
        }
    }

    fn partner_of(&self, who: EntityId) -> Option<EntityId> {
        if who == self.a {
            Some(self.b)
        } else if who == self.b {
            Some(self.a)
        } else {
            None
        }
    }
}

fn event(kind: u8) -> MessageOut {
    let mut msg = MessageOut::new(GC_TRADE_EVENT);
    msg.write_u8(kind);
    msg
}

/// A asks B (by public id) to trade. B gets the request; nothing binds
/// until B accepts.
pub fn request(state: &mut GameState, a: EntityId, target_public: u16) -> ErrorCode {
    let Some(a_entity) = state.world.get(a) else {
        return ErrorCode::Failure;
    };
    let map_id = a_entity.map_id;
    let a_public = a_entity.public_id();
    let Some(b) = state
        .maps
        .get(map_id)
        .and_then(|m| m.entity_by_public_id(target_public))
    else {
        return ErrorCode::InvalidArgument;
    };
    if b == a || !state.world.get(b).map(|e| e.is_character()).unwrap_or(false) {
        return ErrorCode::InvalidArgument;
    }

    let id = state.next_transaction_id();
    let trade = Trade {
        id,
        a,
        b,
        state: TradeState::Requested,
        offer_a: Offer::default(),
        offer_b: Offer::default(),
    };
    state.trades.insert(id, trade);

    // Starting a trade cancels whatever A was doing.
    state.cancel_transaction(a);
    if let Some(c) = state.world.get_mut(a).and_then(|e| e.character_mut()) {
        c.begin_transaction(Transaction::Trade(id));
    }

    let mut msg = MessageOut::new(GC_TRADE_REQUEST);
    msg.write_u16(a_public);
    state.send_to(b, msg);
    ErrorCode::Ok
}

/// B accepts the trade it was offered.
pub fn start(state: &mut GameState, b: EntityId) -> ErrorCode {
    let Some(trade_id) = state
        .trades
        .values()
        .find(|t| t.b == b && t.state == TradeState::Requested)
        .map(|t| t.id)
    else {
        return ErrorCode::InvalidArgument;
    };

    state.cancel_transaction(b);
    // Canceling B's old transaction must not have torn down this trade.
    if !state.trades.contains_key(&trade_id) {
        return ErrorCode::Failure;
    }
    if let Some(c) = state.world.get_mut(b).and_then(|e| e.character_mut()) {
        c.begin_transaction(Transaction::Trade(trade_id));
    }

    let trade = state.trades.get_mut(&trade_id).unwrap();
    trade.state = TradeState::Run;
    let (a, b) = (trade.a, trade.b);
    state.send_to(a, MessageOut::new(GC_TRADE_START));
    state.send_to(b, MessageOut::new(GC_TRADE_START));
    ErrorCode::Ok
}

fn trade_id_of(state: &GameState, who: EntityId) -> Option<u32> {
    match state.world.get(who)?.character()?.transaction {
        Transaction::Trade(id) => Some(id),
        _ => None,
    }
}

/// Any offer change reopens the negotiation.
fn unconfirm(trade: &mut Trade) {
    trade.state = TradeState::Run;
    trade.offer_a.confirmed = false;
    trade.offer_a.agreed = false;
    trade.offer_b.confirmed = false;
    trade.offer_b.agreed = false;
}

/// Adds `amount` of the item in inventory slot `slot` to the caller's
/// offer. The goods stay in the inventory until completion.
pub fn add_item(state: &mut GameState, who: EntityId, slot: usize, amount: u32) -> ErrorCode {
    let Some(trade_id) = trade_id_of(state, who) else {
        return ErrorCode::InvalidArgument;
    };
    let Some((item_id, available)) = state
        .world
        .get(who)
        .and_then(|e| e.character())
        .and_then(|c| c.possessions.inventory.get(slot))
        .map(|s| (s.item_id, s.amount as u32))
    else {
        return ErrorCode::InvalidArgument;
    };
    if amount == 0 || amount > available {
        return ErrorCode::InvalidArgument;
    }

    let Some(trade) = state.trades.get_mut(&trade_id) else {
        return ErrorCode::Failure;
    };
    if trade.state == TradeState::Requested {
        return ErrorCode::Failure;
    }
    unconfirm(trade);
    trade.offer_of(who).unwrap().items.push((item_id, amount));
    let partner = trade.partner_of(who).unwrap();

    let mut msg = event(TRADE_EVENT_ITEM_ADDED);
    msg.write_u16(item_id);
    msg.write_u32(amount);
    state.send_to(partner, msg);
    ErrorCode::Ok
}

pub fn set_money(state: &mut GameState, who: EntityId, amount: u32) -> ErrorCode {
    let Some(trade_id) = trade_id_of(state, who) else {
        return ErrorCode::InvalidArgument;
    };
    let has = state
        .world
        .get(who)
        .and_then(|e| e.character())
        .map(|c| c.possessions.money)
        .unwrap_or(0);
    if amount > has {
        return ErrorCode::InvalidArgument;
    }
    let Some(trade) = state.trades.get_mut(&trade_id) else {
        return ErrorCode::Failure;
    };
    if trade.state == TradeState::Requested {
        return ErrorCode::Failure;
    }
    unconfirm(trade);
    trade.offer_of(who).unwrap().money = amount;
    let partner = trade.partner_of(who).unwrap();

    let mut msg = event(TRADE_EVENT_MONEY_SET);
    msg.write_u32(amount);
    state.send_to(partner, msg);
    ErrorCode::Ok
}

/// Locks the caller's offer. When both are locked the trade waits for the
/// final agreement round.
pub fn confirm(state: &mut GameState, who: EntityId) -> ErrorCode {
    let Some(trade_id) = trade_id_of(state, who) else {
        return ErrorCode::InvalidArgument;
    };
    let Some(trade) = state.trades.get_mut(&trade_id) else {
        return ErrorCode::Failure;
    };
    if trade.state == TradeState::Requested {
        return ErrorCode::Failure;
    }
    trade.offer_of(who).unwrap().confirmed = true;
    if trade.offer_a.confirmed && trade.offer_b.confirmed {
        trade.state = TradeState::Confirmed;
    }
    let partner = trade.partner_of(who).unwrap();
    state.send_to(partner, event(TRADE_EVENT_CONFIRMED));
    ErrorCode::Ok
}

/// The final yes. When both sides agree, goods and money change hands.
pub fn agree(state: &mut GameState, who: EntityId) -> ErrorCode {
    let Some(trade_id) = trade_id_of(state, who) else {
        return ErrorCode::InvalidArgument;
    };
    let Some(trade) = state.trades.get_mut(&trade_id) else {
        return ErrorCode::Failure;
    };
    if trade.state != TradeState::Confirmed {
        return ErrorCode::Failure;
    }
    trade.offer_of(who).unwrap().agreed = true;
    let partner = trade.partner_of(who).unwrap();
    let both_agreed = trade.offer_a.agreed && trade.offer_b.agreed;
    state.send_to(partner, event(TRADE_EVENT_AGREED));

    if both_agreed {
        complete(state, trade_id);
    }
    ErrorCode::Ok
}

/// Executes the exchange. Offers that no longer hold (goods or money
/// spent since they were made) cancel the trade instead.
fn complete(state: &mut GameState, trade_id: u32) {
    let Some(trade) = state.trades.get(&trade_id).cloned() else {
        return;
    };

    // Validate both offers before anything moves.
    for (giver, offer) in [(trade.a, &trade.offer_a), (trade.b, &trade.offer_b)] {
        let Some(c) = state.world.get(giver).and_then(|e| e.character()) else {
            cancel(state, trade_id);
            return;
        };
        if c.possessions.money < offer.money {
            cancel(state, trade_id);
            return;
        }
        for &(item_id, amount) in &offer.items {
            if inventory::count_item(&c.possessions, item_id) < amount {
                cancel(state, trade_id);
                return;
            }
        }
    }

    for (giver, taker, offer) in [
        (trade.a, trade.b, &trade.offer_a),
        (trade.b, trade.a, &trade.offer_b),
    ] {
        for &(item_id, amount) in &offer.items {
            if let Some(c) = state.world.get_mut(giver).and_then(|e| e.character_mut()) {
                inventory::remove_by_id(&mut c.possessions, item_id, amount);
                c.save_pending = true;
            }
            if let Some(c) = state.world.get_mut(taker).and_then(|e| e.character_mut()) {
                let rest = inventory::insert(&mut c.possessions, &state.items, item_id, amount);
                c.save_pending = true;
                if rest > 0 {
                    // No room on the receiving side; the remainder goes
                    // back where it came from.
                    if let Some(g) =
                        state.world.get_mut(giver).and_then(|e| e.character_mut())
                    {
                        let lost =
                            inventory::insert(&mut g.possessions, &state.items, item_id, rest);
                        if lost > 0 {
                            log::warn!("Trade overflow dropped {} of item {}", lost, item_id);
                        }
                    }
                }
            }
        }
        if offer.money > 0 {
            if let Some(c) = state.world.get_mut(giver).and_then(|e| e.character_mut()) {
                c.possessions.money -= offer.money;
            }
            if let Some(c) = state.world.get_mut(taker).and_then(|e| e.character_mut()) {
                c.possessions.money = c.possessions.money.saturating_add(offer.money);
            }
        }
    }

    state.trades.remove(&trade_id);
    for who in [trade.a, trade.b] {
        if let Some(c) = state.world.get_mut(who).and_then(|e| e.character_mut()) {
            c.begin_transaction(Transaction::None);
        }
        state.send_to(who, MessageOut::new(GC_TRADE_COMPLETE));
    }
    log::info!("Trade {} completed", trade_id);
}

/// Tears a trade down, clearing both transaction handles directly (this is
/// what `GameState::cancel_transaction` delegates to, so it must not call
/// back into it).
pub fn cancel(state: &mut GameState, trade_id: u32) {
    let Some(trade) = state.trades.remove(&trade_id) else {
        return;
    };
    for who in [trade.a, trade.b] {
        if let Some(c) = state.world.get_mut(who).and_then(|e| e.character_mut()) {
            if c.transaction == Transaction::Trade(trade_id) {
                c.begin_transaction(Transaction::None);
            }
        }
        state.send_to(who, event(TRADE_EVENT_CANCELLED));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{ItemClass, ItemKind};
    use crate::map::{MapComposite, MapGrid};
    use common::character_data::CharacterData;

    fn state_with_traders() -> (GameState, EntityId, EntityId) {
        let mut state = GameState::with_seed(3);
        state
            .maps
            .insert(MapComposite::new(1, "market", MapGrid::new(32, 32)));
        state.items.register(ItemClass {
            id: 5,
            name: "Iron Ore".into(),
            kind: ItemKind::Usable,
            weight: 10,
            cost: 3,
            max_per_slot: 20,
            sprite_id: 0,
            modifiers: vec![],
            script_function: None,
        });

        let mut admit = |db_id: u32, name: &str, x: u16| {
            let mut data = CharacterData::default();
            data.attributes = [10, 10, 10, 10, 10, 10];
            data.map_id = 1;
            data.x = x;
            data.y = 100;
            state.admit_character(db_id, name, &data).unwrap()
        };
        let a = admit(1, "seller", 100);
        let b = admit(2, "buyer", 132);
        (state, a, b)
    }

    fn give(state: &mut GameState, who: EntityId, item_id: u16, amount: u32, money: u32) {
        let items = &state.items;
        if let Some(c) = state.world.get_mut(who).and_then(|e| e.character_mut()) {
            crate::inventory::insert(&mut c.possessions, items, item_id, amount);
            c.possessions.money = money;
        }
    }

    fn run_full_trade(state: &mut GameState, a: EntityId, b: EntityId) {
        let b_public = state.world.get(b).unwrap().public_id();
        assert_eq!(request(state, a, b_public), ErrorCode::Ok);
        assert_eq!(start(state, b), ErrorCode::Ok);
        assert_eq!(add_item(state, a, 0, 5), ErrorCode::Ok);
        assert_eq!(set_money(state, b, 15), ErrorCode::Ok);
        assert_eq!(confirm(state, a), ErrorCode::Ok);
        assert_eq!(confirm(state, b), ErrorCode::Ok);
        assert_eq!(agree(state, a), ErrorCode::Ok);
        assert_eq!(agree(state, b), ErrorCode::Ok);
    }

    #[test]
    fn goods_and_money_change_hands() {
        let (mut state, a, b) = state_with_traders();
        give(&mut state, a, 5, 10, 0);
        give(&mut state, b, 0, 0, 100);
        run_full_trade(&mut state, a, b);

        let a_char = state.world.get(a).unwrap().character().unwrap();
        assert_eq!(crate::inventory::count_item(&a_char.possessions, 5), 5);
        assert_eq!(a_char.possessions.money, 15);
        assert_eq!(a_char.transaction, Transaction::None);

        let b_char = state.world.get(b).unwrap().character().unwrap();
        assert_eq!(crate::inventory::count_item(&b_char.possessions, 5), 5);
        assert_eq!(b_char.possessions.money, 85);
    }

    #[test]
    fn offer_change_drops_confirmations() {
        let (mut state, a, b) = state_with_traders();
        give(&mut state, a, 5, 10, 0);
        give(&mut state, b, 0, 0, 100);
        let b_public = state.world.get(b).unwrap().public_id();
        request(&mut state, a, b_public);
        start(&mut state, b);
        confirm(&mut state, a);
        confirm(&mut state, b);
        // A sweetens the deal; the lock is gone.
        assert_eq!(add_item(&mut state, a, 0, 1), ErrorCode::Ok);
        assert_eq!(agree(&mut state, a), ErrorCode::Failure);
    }

    #[test]
    fn cancel_clears_both_handles() {
        let (mut state, a, b) = state_with_traders();
        let b_public = state.world.get(b).unwrap().public_id();
        request(&mut state, a, b_public);
        start(&mut state, b);
        let trade_id = match state.world.get(a).unwrap().character().unwrap().transaction {
            Transaction::Trade(id) => id,
            other => panic!("unexpected transaction {:?}", other),
        };
        cancel(&mut state, trade_id);
        for who in [a, b] {
            assert_eq!(
                state.world.get(who).unwrap().character().unwrap().transaction,
                Transaction::None
            );
        }
        assert!(state.trades.is_empty());
    }

    #[test]
    fn overdrawn_offer_cancels_at_completion() {
        let (mut state, a, b) = state_with_traders();
        give(&mut state, a, 5, 10, 0);
        give(&mut state, b, 0, 0, 100);
        let b_public = state.world.get(b).unwrap().public_id();
        request(&mut state, a, b_public);
        start(&mut state, b);
        add_item(&mut state, a, 0, 5);
        set_money(&mut state, b, 15);
        // The seller's goods vanish before completion.
        if let Some(c) = state.world.get_mut(a).and_then(|e| e.character_mut()) {
            crate::inventory::remove_by_id(&mut c.possessions, 5, 10);
        }
        confirm(&mut state, a);
        confirm(&mut state, b);
        agree(&mut state, a);
        agree(&mut state, b);

        // Nothing moved; the trade is gone.
        assert!(state.trades.is_empty());
        let b_char = state.world.get(b).unwrap().character().unwrap();
        assert_eq!(b_char.possessions.money, 100);
    }

    #[test]
    fn new_trade_cancels_buy_sell() {
        let (mut state, a, b) = state_with_traders();
        let shop_id = crate::buysell::start(&mut state, a, b, false, vec![(5, 10, 3)]).unwrap();
        assert!(state.shops.contains_key(&shop_id));
        let b_public = state.world.get(b).unwrap().public_id();
        request(&mut state, a, b_public);
        // The buy/sell died when the trade began.
        assert!(!state.shops.contains_key(&shop_id));
        assert!(matches!(
            state.world.get(a).unwrap().character().unwrap().transaction,
            Transaction::Trade(_)
        ));
    }
}
