//! The game-server registry and the inter-server message family.

use common::net::{MessageIn, MessageOut};
use common::protocol::*;
use common::token::Token;

use crate::storage::{Storage, StorageError};

use super::BrokerState;

/// One registered game-world runtime.
#[derive(Debug, Clone)]
pub struct GameServerEntry {
    pub address: String,
    pub port: u16,
    pub maps: Vec<u16>,
}

impl BrokerState {
    pub(super) fn on_game_register(&mut self, game_slot: usize, msg: &mut MessageIn) {
        let address = msg.read_string();
        let port = msg.read_u16();
        let password = msg.read_string();
        let count = msg.read_u16() as usize;
        let mut maps = Vec::with_capacity(count);
        for _ in 0..count {
            maps.push(msg.read_u16());
        }

        let mut reply = MessageOut::new(AG_REGISTER_RESPONSE);
        if password != self.net_password {
            log::warn!("Game server {} presented a bad password", address);
            reply.write_u8(1);
            self.send_to_game(game_slot, reply);
            return;
        }

        log::info!(
            "Game server registered: {}:{} hosting {:?}",
            address,
            port,
            maps
        );
        while self.games.len() <= game_slot {
            self.games.push(None);
        }
        self.games[game_slot] = Some(GameServerEntry {
            address,
            port,
            maps,
        });
        reply.write_u8(0);
        self.send_to_game(game_slot, reply);
    }

    /// Snapshot flush from a runtime: the gateway write. Transient backend
    /// failures are retried a bounded number of times.
    pub(super) fn on_player_data(&mut self, _game_slot: usize, msg: &mut MessageIn) {
        let db_id = msg.read_u32();
        let data = common::character_data::CharacterData::deserialize(msg);
        for attempt in 1..=3 {
            match self.storage.update_character(db_id, &data) {
                Ok(()) => return,
                Err(StorageError::NotFound) => {
                    log::error!("Flush for unknown character {}", db_id);
                    return;
                }
                Err(e) => {
                    log::warn!(
                        "Character {} flush failed (attempt {}): {}",
                        db_id,
                        attempt,
                        e
                    );
                }
            }
        }
        log::error!("Giving up on character {} flush", db_id);
    }

    /// Cross-runtime warp: re-mint, ship the snapshot to the destination,
    /// answer the origin with the client's new coordinates.
    pub(super) fn on_redirect(&mut self, game_slot: usize, msg: &mut MessageIn) {
        let db_id = msg.read_u32();
        let record = match self.storage.get_character_by_id(db_id) {
            Ok(record) => record,
            Err(e) => {
                log::error!("Redirect for unknown character {}: {}", db_id, e);
                return;
            }
        };
        let Some(dest_slot) = self.game_for_map(record.data.map_id) else {
            log::error!(
                "Redirect of '{}' to unhosted map {}",
                record.name,
                record.data.map_id
            );
            return;
        };
        let (address, port) = {
            let entry = self.games[dest_slot].as_ref().unwrap();
            (entry.address.clone(), entry.port)
        };

        let token = Token::generate();

        // Snapshot to the destination runtime first, then the origin gets
        // its answer; the ordered links keep the client's token behind
        // the data it authorizes.
        let mut enter = MessageOut::new(AG_PLAYER_ENTER);
        enter.write_bytes(token.as_bytes());
        enter.write_u32(record.id);
        enter.write_string(&record.name);
        record.data.serialize(&mut enter);
        self.send_to_game(dest_slot, enter);

        let mut reply = MessageOut::new(AG_REDIRECT_RESPONSE);
        reply.write_u32(db_id);
        reply.write_string(&address);
        reply.write_u16(port);
        reply.write_bytes(token.as_bytes());
        self.send_to_game(game_slot, reply);

        if let Some(online) = self.online.get_mut(&db_id) {
            online.game_slot = dest_slot;
        }
        log::info!(
            "Redirecting '{}' to {}:{} (map {})",
            record.name,
            address,
            port,
            record.data.map_id
        );
    }

    pub(super) fn on_player_reconnect(&mut self, game_slot: usize, msg: &mut MessageIn) {
        let db_id = msg.read_u32();
        if let Some(online) = self.online.get_mut(&db_id) {
            online.game_slot = game_slot;
        }
    }

    pub(super) fn on_quest_get_var(&mut self, game_slot: usize, msg: &mut MessageIn) {
        let db_id = msg.read_u32();
        let name = msg.read_string();
        let value = self
            .storage
            .get_quest_var(db_id, &name)
            .unwrap_or_default()
            .unwrap_or_default();
        let mut reply = MessageOut::new(AG_QUEST_VAR);
        reply.write_u32(db_id);
        reply.write_string(&name);
        reply.write_string(&value);
        self.send_to_game(game_slot, reply);
    }

    pub(super) fn on_quest_set_var(&mut self, _game_slot: usize, msg: &mut MessageIn) {
        let db_id = msg.read_u32();
        let name = msg.read_string();
        let value = msg.read_string();
        if let Err(e) = self.storage.set_quest_var(db_id, &name, &value) {
            log::error!("Quest var write failed for {}: {}", db_id, e);
        }
    }

    pub(super) fn on_ban_player(&mut self, _game_slot: usize, msg: &mut MessageIn) {
        let db_id = msg.read_u32();
        let minutes = msg.read_u32();
        let record = match self.storage.get_character_by_id(db_id) {
            Ok(record) => record,
            Err(e) => {
                log::error!("Ban for unknown character {}: {}", db_id, e);
                return;
            }
        };
        match self.storage.get_account_by_id(record.account_id) {
            Ok(mut account) => {
                account.banned_until =
                    chrono::Utc::now().timestamp() + (minutes as i64) * 60;
                if let Err(e) = self.storage.update_account(&account) {
                    log::error!("Ban write failed: {}", e);
                } else {
                    log::info!(
                        "Banned account '{}' for {} minutes",
                        account.name,
                        minutes
                    );
                }
            }
            Err(e) => log::error!("Ban for unknown account: {}", e),
        }
    }

    pub(super) fn on_statistics(&mut self, game_slot: usize, msg: &mut MessageIn) {
        let online = msg.read_u32();
        log::debug!("Game server {} reports {} players online", game_slot, online);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CharacterRecord, MemoryStorage};
    use common::character_data::CharacterData;

    fn broker() -> BrokerState {
        BrokerState::new(Box::new(MemoryStorage::new()), "pw")
    }

    fn register_game(state: &mut BrokerState, slot: usize, maps: &[u16]) {
        let mut msg = MessageOut::new(GA_REGISTER);
        msg.write_string("10.0.0.5");
        msg.write_u16(9601 + slot as u16);
        msg.write_string("pw");
        msg.write_u16(maps.len() as u16);
        for &m in maps {
            msg.write_u16(m);
        }
        let bytes = msg.into_bytes();
        state.on_game_register(slot, &mut MessageIn::new(&bytes).unwrap());
    }

    #[test]
    fn registration_maps_route_by_map_id() {
        let mut state = broker();
        register_game(&mut state, 0, &[1, 2]);
        register_game(&mut state, 1, &[3]);
        assert_eq!(state.game_for_map(2), Some(0));
        assert_eq!(state.game_for_map(3), Some(1));
        assert_eq!(state.game_for_map(9), None);
    }

    #[test]
    fn bad_password_is_refused() {
        let mut state = broker();
        let slot = 0;
        let mut msg = MessageOut::new(GA_REGISTER);
        msg.write_string("10.0.0.6");
        msg.write_u16(9700);
        msg.write_string("wrong");
        msg.write_u16(0);
        let bytes = msg.into_bytes();
        state.on_game_register(slot, &mut MessageIn::new(&bytes).unwrap());
        assert!(state.games.get(slot).map(|g| g.is_none()).unwrap_or(true));
        let (_, reply) = state.game_outbox.last().unwrap();
        assert_eq!(reply.as_bytes()[2], 1);
    }

    #[test]
    fn redirect_ships_snapshot_then_response() {
        let mut state = broker();
        let origin = 0;
        register_game(&mut state, origin, &[1]);
        let dest = 1;
        register_game(&mut state, dest, &[2]);

        let mut record = CharacterRecord {
            id: 0,
            account_id: 0,
            name: "Wanderer".into(),
            data: CharacterData {
                map_id: 2,
                ..CharacterData::default()
            },
        };
        // Account 0 does not exist; add the character record directly.
        state.storage.add_character(&mut record).unwrap();
        state.game_outbox.clear();

        let mut msg = MessageOut::new(GA_REDIRECT);
        msg.write_u32(record.id);
        let bytes = msg.into_bytes();
        state.on_redirect(origin, &mut MessageIn::new(&bytes).unwrap());

        assert_eq!(state.game_outbox.len(), 2);
        let (first_to, first) = &state.game_outbox[0];
        let (second_to, second) = &state.game_outbox[1];
        assert_eq!((*first_to, first.id()), (dest, AG_PLAYER_ENTER));
        assert_eq!((*second_to, second.id()), (origin, AG_REDIRECT_RESPONSE));

        // Both carry the same token.
        let token_a = &first.as_bytes()[2..34];
        let reply_bytes = second.as_bytes();
        let token_b = &reply_bytes[reply_bytes.len() - 32..];
        assert_eq!(token_a, token_b);
    }
}
