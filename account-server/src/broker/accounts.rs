//! Account and character management: the session message family.

use chrono::Utc;

use common::character_data::CharacterData;
use common::defines::{
    ErrorCode, CHAR_ATTR_NB, MAX_CHARS_PER_ACCOUNT, POINTS_TO_DISTRIBUTE_AT_LVL1,
};
use common::net::{MessageIn, MessageOut};
use common::protocol::*;
use common::token::Token;

use crate::storage::{AccountRecord, CharacterRecord, Storage, StorageError};

use super::{BrokerState, ChatEnter, OnlineCharacter};

const MIN_NAME_LEN: usize = 4;
const MAX_NAME_LEN: usize = 16;
const MIN_PASSWORD_LEN: usize = 6;

fn valid_name(name: &str) -> bool {
    (MIN_NAME_LEN..=MAX_NAME_LEN).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl BrokerState {
    pub(super) fn on_login(&mut self, slot: usize, msg: &mut MessageIn) {
        let name = msg.read_string();
        let password = msg.read_string();

        if self.session(slot).map(|s| s.account.is_some()).unwrap_or(true) {
            self.respond(slot, AC_LOGIN_RESPONSE, ErrorCode::Failure);
            return;
        }

        let account = match self.storage.get_account_by_name(&name) {
            Ok(account) => account,
            Err(StorageError::NotFound) => {
                self.respond(slot, AC_LOGIN_RESPONSE, ErrorCode::InvalidArgument);
                return;
            }
            Err(e) => {
                log::error!("Login lookup failed: {}", e);
                self.respond(slot, AC_LOGIN_RESPONSE, ErrorCode::Failure);
                return;
            }
        };

        if account.password != password {
            self.respond(slot, AC_LOGIN_RESPONSE, ErrorCode::WrongPassword);
            return;
        }
        if account.banned_until > Utc::now().timestamp() {
            self.respond(slot, AC_LOGIN_RESPONSE, ErrorCode::InsufficientRights);
            return;
        }

        let mut characters = Vec::new();
        for &id in &account.characters {
            match self.storage.get_character_by_id(id) {
                Ok(record) => characters.push(record),
                Err(e) => log::error!("Dangling character {} on account {}: {}", id, account.id, e),
            }
        }

        log::info!("Account '{}' logged in", account.name);
        self.respond(slot, AC_LOGIN_RESPONSE, ErrorCode::Ok);
        for (index, record) in characters.iter().enumerate() {
            let mut info = MessageOut::new(AC_CHAR_INFO);
            info.write_u8(index as u8);
            info.write_string(&record.name);
            info.write_u8(record.data.gender);
            info.write_u8(record.data.hair_style);
            info.write_u8(record.data.hair_color);
            info.write_u16(record.data.level);
            info.write_u32(record.data.possessions.money);
            self.send_to_client(slot, info);
        }

        if let Some(session) = self.session_mut(slot) {
            session.account = Some(account);
            session.characters = characters;
        }
    }

    pub(super) fn on_logout(&mut self, slot: usize) {
        self.leave_all_channels(slot);
        let chat_character = self.session_mut(slot).and_then(|s| s.chat_character.take());
        if let Some((character_id, _)) = chat_character {
            self.online.remove(&character_id);
        }
        if let Some(session) = self.session_mut(slot) {
            session.account = None;
            session.characters.clear();
        }
        self.respond(slot, AC_LOGOUT_RESPONSE, ErrorCode::Ok);
    }

    pub(super) fn on_register(&mut self, slot: usize, msg: &mut MessageIn) {
        let name = msg.read_string();
        let password = msg.read_string();
        let email = msg.read_string();

        if !valid_name(&name) || password.len() < MIN_PASSWORD_LEN || !email.contains('@') {
            self.respond(slot, AC_REGISTER_RESPONSE, ErrorCode::InvalidArgument);
            return;
        }
        if self.storage.get_account_by_name(&name).is_ok() {
            self.respond(slot, AC_REGISTER_RESPONSE, ErrorCode::AlreadyTaken);
            return;
        }
        match self.storage.does_email_exist(&email) {
            Ok(true) => {
                self.respond(slot, AC_REGISTER_RESPONSE, ErrorCode::AlreadyTaken);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                log::error!("Email check failed: {}", e);
                self.respond(slot, AC_REGISTER_RESPONSE, ErrorCode::Failure);
                return;
            }
        }

        let mut record = AccountRecord {
            id: 0,
            name: name.clone(),
            password,
            email,
            level: 0,
            banned_until: 0,
            registration_date: Utc::now().timestamp(),
            characters: Vec::new(),
        };
        match self.storage.add_account(&mut record) {
            Ok(()) => {
                log::info!("Registered account '{}'", name);
                self.respond(slot, AC_REGISTER_RESPONSE, ErrorCode::Ok);
            }
            Err(e) => {
                log::error!("Account creation failed: {}", e);
                self.respond(slot, AC_REGISTER_RESPONSE, ErrorCode::Failure);
            }
        }
    }

    pub(super) fn on_unregister(&mut self, slot: usize, msg: &mut MessageIn) {
        let password = msg.read_string();
        let Some(account) = self.session(slot).and_then(|s| s.account.clone()) else {
            self.respond(slot, AC_UNREGISTER_RESPONSE, ErrorCode::NoLogin);
            return;
        };
        if account.password != password {
            self.respond(slot, AC_UNREGISTER_RESPONSE, ErrorCode::WrongPassword);
            return;
        }
        match self.storage.del_account(account.id) {
            Ok(()) => {
                log::info!("Deleted account '{}'", account.name);
                if let Some(session) = self.session_mut(slot) {
                    session.account = None;
                    session.characters.clear();
                }
                self.respond(slot, AC_UNREGISTER_RESPONSE, ErrorCode::Ok);
            }
            Err(e) => {
                log::error!("Account deletion failed: {}", e);
                self.respond(slot, AC_UNREGISTER_RESPONSE, ErrorCode::Failure);
            }
        }
    }

    pub(super) fn on_email_change(&mut self, slot: usize, msg: &mut MessageIn) {
        let email = msg.read_string();
        let Some(mut account) = self.session(slot).and_then(|s| s.account.clone()) else {
            self.respond(slot, AC_EMAIL_CHANGE_RESPONSE, ErrorCode::NoLogin);
            return;
        };
        if !email.contains('@') {
            self.respond(slot, AC_EMAIL_CHANGE_RESPONSE, ErrorCode::InvalidArgument);
            return;
        }
        if self.storage.does_email_exist(&email).unwrap_or(false) {
            self.respond(slot, AC_EMAIL_CHANGE_RESPONSE, ErrorCode::AlreadyTaken);
            return;
        }
        account.email = email;
        match self.storage.update_account(&account) {
            Ok(()) => {
                if let Some(session) = self.session_mut(slot) {
                    session.account = Some(account);
                }
                self.respond(slot, AC_EMAIL_CHANGE_RESPONSE, ErrorCode::Ok);
            }
            Err(e) => {
                log::error!("Email change failed: {}", e);
                self.respond(slot, AC_EMAIL_CHANGE_RESPONSE, ErrorCode::Failure);
            }
        }
    }

    pub(super) fn on_password_change(&mut self, slot: usize, msg: &mut MessageIn) {
        let old_password = msg.read_string();
        let new_password = msg.read_string();
        let Some(mut account) = self.session(slot).and_then(|s| s.account.clone()) else {
            self.respond(slot, AC_PASSWORD_CHANGE_RESPONSE, ErrorCode::NoLogin);
            return;
        };
        if account.password != old_password {
            self.respond(slot, AC_PASSWORD_CHANGE_RESPONSE, ErrorCode::WrongPassword);
            return;
        }
        if new_password.len() < MIN_PASSWORD_LEN {
            self.respond(slot, AC_PASSWORD_CHANGE_RESPONSE, ErrorCode::InvalidArgument);
            return;
        }
        account.password = new_password;
        match self.storage.update_account(&account) {
            Ok(()) => {
                if let Some(session) = self.session_mut(slot) {
                    session.account = Some(account);
                }
                self.respond(slot, AC_PASSWORD_CHANGE_RESPONSE, ErrorCode::Ok);
            }
            Err(e) => {
                log::error!("Password change failed: {}", e);
                self.respond(slot, AC_PASSWORD_CHANGE_RESPONSE, ErrorCode::Failure);
            }
        }
    }

    pub(super) fn on_char_create(&mut self, slot: usize, msg: &mut MessageIn) {
        let name = msg.read_string();
        let hair_style = msg.read_u8();
        let hair_color = msg.read_u8();
        let gender = msg.read_u8();
        let mut attributes = [0u8; CHAR_ATTR_NB];
        for a in attributes.iter_mut() {
            *a = msg.read_u8();
        }

        let Some(account) = self.session(slot).and_then(|s| s.account.clone()) else {
            self.respond(slot, AC_CHAR_CREATE_RESPONSE, ErrorCode::NoLogin);
            return;
        };
        if !valid_name(&name) {
            self.respond(slot, AC_CHAR_CREATE_RESPONSE, ErrorCode::InvalidArgument);
            return;
        }
        if account.characters.len() >= MAX_CHARS_PER_ACCOUNT {
            self.respond(slot, AC_CHAR_CREATE_RESPONSE, ErrorCode::LimitReached);
            return;
        }
        if self.storage.does_character_name_exist(&name).unwrap_or(true) {
            self.respond(slot, AC_CHAR_CREATE_RESPONSE, ErrorCode::AlreadyTaken);
            return;
        }
        // The distributed total must equal the level-1 budget exactly.
        let total: u32 = attributes.iter().map(|&a| a as u32).sum();
        if total != POINTS_TO_DISTRIBUTE_AT_LVL1 || attributes.iter().any(|&a| a == 0) {
            self.respond(slot, AC_CHAR_CREATE_RESPONSE, ErrorCode::InvalidArgument);
            return;
        }

        let mut data = CharacterData {
            gender,
            hair_style,
            hair_color,
            level: 1,
            attributes,
            map_id: self.start_map,
            x: self.start_x,
            y: self.start_y,
            ..CharacterData::default()
        };
        data.account_level = account.level;
        let mut record = CharacterRecord {
            id: 0,
            account_id: account.id,
            name: name.clone(),
            data,
        };
        match self.storage.add_character(&mut record) {
            Ok(()) => {
                log::info!("Created character '{}' on account '{}'", name, account.name);
                if let Some(session) = self.session_mut(slot) {
                    session.characters.push(record);
                    if let Some(account) = session.account.as_mut() {
                        account.characters.push(session.characters.last().unwrap().id);
                    }
                }
                self.respond(slot, AC_CHAR_CREATE_RESPONSE, ErrorCode::Ok);
            }
            Err(e) => {
                log::error!("Character creation failed: {}", e);
                self.respond(slot, AC_CHAR_CREATE_RESPONSE, ErrorCode::Failure);
            }
        }
    }

    pub(super) fn on_char_delete(&mut self, slot: usize, msg: &mut MessageIn) {
        let index = msg.read_u8() as usize;
        let Some(record) = self
            .session(slot)
            .filter(|s| s.account.is_some())
            .and_then(|s| s.characters.get(index).cloned())
        else {
            self.respond(slot, AC_CHAR_DELETE_RESPONSE, ErrorCode::InvalidArgument);
            return;
        };
        match self.storage.del_character(record.id) {
            Ok(()) => {
                if let Some(session) = self.session_mut(slot) {
                    session.characters.remove(index);
                    if let Some(account) = session.account.as_mut() {
                        account.characters.retain(|&c| c != record.id);
                    }
                }
                log::info!("Deleted character '{}'", record.name);
                self.respond(slot, AC_CHAR_DELETE_RESPONSE, ErrorCode::Ok);
            }
            Err(e) => {
                log::error!("Character deletion failed: {}", e);
                self.respond(slot, AC_CHAR_DELETE_RESPONSE, ErrorCode::Failure);
            }
        }
    }

    /// Character select: pick the runtime hosting the character's map,
    /// mint the game and chat tokens, ship the snapshot, redirect the
    /// client.
    pub(super) fn on_char_select(&mut self, slot: usize, msg: &mut MessageIn) {
        let index = msg.read_u8() as usize;
        let Some(record) = self
            .session(slot)
            .filter(|s| s.account.is_some())
            .and_then(|s| s.characters.get(index).cloned())
        else {
            self.respond(slot, AC_CHAR_SELECT_RESPONSE, ErrorCode::InvalidArgument);
            return;
        };

        let Some(game_slot) = self.game_for_map(record.data.map_id) else {
            log::warn!(
                "No game server hosts map {} for '{}'",
                record.data.map_id,
                record.name
            );
            self.respond(slot, AC_CHAR_SELECT_RESPONSE, ErrorCode::ServerFull);
            return;
        };
        let (address, port) = {
            let entry = self.games[game_slot].as_ref().unwrap();
            (entry.address.clone(), entry.port)
        };

        let game_token = Token::generate();
        let chat_token = Token::generate();

        // Snapshot first: the in-order link guarantees it reaches the
        // runtime before any later message about this character.
        let mut enter = MessageOut::new(AG_PLAYER_ENTER);
        enter.write_bytes(game_token.as_bytes());
        enter.write_u32(record.id);
        enter.write_string(&record.name);
        record.data.serialize(&mut enter);
        self.send_to_game(game_slot, enter);

        let _ = self.chat_tokens.insert_connect(
            chat_token,
            ChatEnter {
                character_id: record.id,
                character_name: record.name.clone(),
            },
        );

        self.online.insert(
            record.id,
            OnlineCharacter {
                client_slot: slot,
                game_slot,
                name: record.name.clone(),
            },
        );

        let mut reply = MessageOut::new(AC_CHAR_SELECT_RESPONSE);
        reply.write_u8(ErrorCode::Ok as u8);
        reply.write_bytes(game_token.as_bytes());
        reply.write_string(&address);
        reply.write_u16(port);
        reply.write_bytes(chat_token.as_bytes());
        self.send_to_client(slot, reply);
        log::info!(
            "Character '{}' dispatched to {}:{}",
            record.name,
            address,
            port
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn broker() -> BrokerState {
        BrokerState::new(Box::new(MemoryStorage::new()), "pw")
    }

    fn register(state: &mut BrokerState, slot: usize, name: &str) {
        let mut msg = MessageOut::new(CA_REGISTER);
        msg.write_string(name);
        msg.write_string("hunter22");
        msg.write_string(&format!("{}@example.org", name));
        let bytes = msg.into_bytes();
        let mut input = MessageIn::new(&bytes).unwrap();
        state.on_register(slot, &mut input);
    }

    fn login(state: &mut BrokerState, slot: usize, name: &str, password: &str) {
        let mut msg = MessageOut::new(CA_LOGIN);
        msg.write_string(name);
        msg.write_string(password);
        let bytes = msg.into_bytes();
        let mut input = MessageIn::new(&bytes).unwrap();
        state.on_login(slot, &mut input);
    }

    fn last_code(state: &BrokerState) -> u8 {
        let (_, msg) = state.outbox.last().unwrap();
        msg.as_bytes()[2]
    }

    #[test]
    fn register_then_login() {
        let mut state = broker();
        let slot = state.open_client();
        register(&mut state, slot, "alice");
        assert_eq!(last_code(&state), ErrorCode::Ok as u8);

        login(&mut state, slot, "alice", "hunter22");
        assert_eq!(last_code(&state), ErrorCode::Ok as u8);
        assert!(state.session(slot).unwrap().account.is_some());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let mut state = broker();
        let slot = state.open_client();
        register(&mut state, slot, "carol");
        login(&mut state, slot, "carol", "wrong");
        assert_eq!(last_code(&state), ErrorCode::WrongPassword as u8);
    }

    fn create_character(state: &mut BrokerState, slot: usize, name: &str, stats: [u8; 6]) {
        let mut msg = MessageOut::new(CA_CHAR_CREATE);
        msg.write_string(name);
        msg.write_u8(2);
        msg.write_u8(5);
        msg.write_u8(0);
        for s in stats {
            msg.write_u8(s);
        }
        let bytes = msg.into_bytes();
        let mut input = MessageIn::new(&bytes).unwrap();
        state.on_char_create(slot, &mut input);
    }

    #[test]
    fn character_creation_requires_exact_stat_total() {
        let mut state = broker();
        let slot = state.open_client();
        register(&mut state, slot, "dave");
        login(&mut state, slot, "dave", "hunter22");

        // 60 exactly: accepted.
        create_character(&mut state, slot, "Daveling", [10, 10, 10, 10, 10, 10]);
        assert_eq!(last_code(&state), ErrorCode::Ok as u8);
        // 59: rejected.
        create_character(&mut state, slot, "Davelet", [10, 10, 10, 10, 10, 9]);
        assert_eq!(last_code(&state), ErrorCode::InvalidArgument as u8);
        // 61: rejected.
        create_character(&mut state, slot, "Davelot", [10, 10, 10, 10, 10, 11]);
        assert_eq!(last_code(&state), ErrorCode::InvalidArgument as u8);
    }
}
