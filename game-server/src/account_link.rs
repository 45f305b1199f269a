//! The runtime's link to the account server.
//!
//! One reliable connection carries registration, character handoffs,
//! snapshot flushes, redirects and quest variables. Incoming characters
//! land in the token collector as pending connects; the matching client
//! may already be parked there or arrive later.

use common::character_data::CharacterData;
use common::net::{Connection, MessageIn, MessageOut};
use common::protocol::*;
use common::token::{Token, TokenCollector};

use crate::entity::EntityId;
use crate::state::GameState;

/// The server-side payload of a pending handoff.
#[derive(Debug, Clone)]
pub struct PlayerEnter {
    pub db_id: u32,
    pub name: String,
    pub data: CharacterData,
}

pub struct AccountLink {
    address: String,
    connection: Option<Connection>,
    registered: bool,
}

impl AccountLink {
    pub fn new(address: &str) -> AccountLink {
        AccountLink {
            address: address.to_string(),
            connection: None,
            registered: false,
        }
    }

    pub fn is_up(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// (Re)connects and registers this runtime with the account server.
    pub fn connect(
        &mut self,
        public_address: &str,
        public_port: u16,
        password: &str,
        map_ids: &[u16],
    ) {
        if self.connection.is_some() {
            return;
        }
        match Connection::connect(&self.address) {
            Ok(mut conn) => {
                let mut msg = MessageOut::new(GA_REGISTER);
                msg.write_string(public_address);
                msg.write_u16(public_port);
                msg.write_string(password);
                msg.write_u16(map_ids.len() as u16);
                for &id in map_ids {
                    msg.write_u16(id);
                }
                conn.send(&msg);
                conn.flush();
                log::info!("Registering with account server at {}", self.address);
                self.connection = Some(conn);
            }
            Err(e) => {
                log::warn!("Account server unreachable ({}): {}", self.address, e);
            }
        }
    }

    /// Sends queued state→account traffic and processes replies. Returns
    /// the handoffs whose client was already parked and can be admitted.
    pub fn pump(
        &mut self,
        state: &mut GameState,
        collector: &mut TokenCollector<usize, PlayerEnter>,
    ) -> Vec<(usize, PlayerEnter)> {
        let mut matched = Vec::new();
        let Some(conn) = self.connection.as_mut() else {
            state.account_outbox.clear();
            return matched;
        };

        for msg in state.account_outbox.drain(..) {
            conn.send(&msg);
        }
        conn.flush();

        let frames = conn.receive();
        if conn.is_closed() {
            log::error!("Lost the account server connection");
            self.connection = None;
            self.registered = false;
            return matched;
        }
        for frame in frames {
            let Some(mut msg) = MessageIn::new(&frame) else {
                continue;
            };
            self.dispatch(state, collector, &mut msg, &mut matched);
        }
        matched
    }

    fn dispatch(
        &mut self,
        state: &mut GameState,
        collector: &mut TokenCollector<usize, PlayerEnter>,
        msg: &mut MessageIn,
        matched: &mut Vec<(usize, PlayerEnter)>,
    ) {
        match msg.id() {
            AG_REGISTER_RESPONSE => {
                let code = msg.read_u8();
                if code == 0 {
                    self.registered = true;
                    log::info!("Account server accepted our registration");
                } else {
                    log::error!("Account server rejected us (code {})", code);
                }
            }
            AG_PLAYER_ENTER => {
                let token_bytes = msg.read_bytes(common::token::TOKEN_LENGTH);
                let db_id = msg.read_u32();
                let name = msg.read_string();
                let data = CharacterData::deserialize(msg);
                let Some(token) = Token::from_bytes(&token_bytes) else {
                    log::warn!("Player-enter with malformed token");
                    return;
                };
                let payload = PlayerEnter { db_id, name, data };
                if let Ok(pair) = collector.insert_connect(token, payload) {
                    // The client beat its data here; admit it now.
                    matched.push(pair);
                }
            }
            AG_REDIRECT_RESPONSE => {
                let db_id = msg.read_u32();
                let address = msg.read_string();
                let port = msg.read_u16();
                let token = msg.read_bytes(common::token::TOKEN_LENGTH);
                state.finish_redirect(db_id, &address, port, &token);
            }
            AG_QUEST_VAR => {
                let db_id = msg.read_u32();
                let name = msg.read_string();
                let value = msg.read_string();
                set_cached_quest_var(state, db_id, &name, &value);
            }
            AG_PARTY_CHANGE => {
                let db_id = msg.read_u32();
                let party_id = msg.read_u32();
                set_party(state, db_id, party_id);
            }
            other => {
                log::debug!("Unhandled account message 0x{:04x}", other);
            }
        }
    }
}

fn character_by_db_id(state: &GameState, db_id: u32) -> Option<EntityId> {
    state.world.ids().find(|&id| {
        state
            .world
            .get(id)
            .and_then(|e| e.character())
            .map(|c| c.db_id == db_id)
            .unwrap_or(false)
    })
}

fn set_cached_quest_var(state: &mut GameState, db_id: u32, name: &str, value: &str) {
    let Some(id) = character_by_db_id(state, db_id) else {
        return;
    };
    if let Some(c) = state.world.get_mut(id).and_then(|e| e.character_mut()) {
        c.quest_cache.insert(name.to_string(), value.to_string());
    }
}

fn set_party(state: &mut GameState, db_id: u32, party_id: u32) {
    let Some(id) = character_by_db_id(state, db_id) else {
        return;
    };
    if let Some(c) = state.world.get_mut(id).and_then(|e| e.character_mut()) {
        c.party_id = party_id;
    }
}

/// Reads a quest variable through the cache; a miss asks the account
/// server and returns None until the answer lands in the cache.
pub fn quest_var(state: &mut GameState, id: EntityId, name: &str) -> Option<String> {
    let character = state.world.get(id)?.character()?;
    if let Some(value) = character.quest_cache.get(name) {
        return Some(value.clone());
    }
    let db_id = character.db_id;
    let mut msg = MessageOut::new(GA_QUEST_GET_VAR);
    msg.write_u32(db_id);
    msg.write_string(name);
    state.send_to_account(msg);
    None
}

/// Writes a quest variable through to the gateway and the local cache.
pub fn set_quest_var(state: &mut GameState, id: EntityId, name: &str, value: &str) {
    let Some(db_id) = state
        .world
        .get(id)
        .and_then(|e| e.character())
        .map(|c| c.db_id)
    else {
        return;
    };
    if let Some(c) = state.world.get_mut(id).and_then(|e| e.character_mut()) {
        c.quest_cache.insert(name.to_string(), value.to_string());
    }
    let mut msg = MessageOut::new(GA_QUEST_SET_VAR);
    msg.write_u32(db_id);
    msg.write_string(name);
    msg.write_string(value);
    state.send_to_account(msg);
}
