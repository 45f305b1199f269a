//! The broker: sessions, token minting, chat, guilds and parties.
//!
//! `BrokerState` holds everything the account process owns; the handler
//! families live in the submodules as further `impl` blocks. The network
//! shell feeds messages in by slot index and drains the outboxes.

mod accounts;
mod chat;
mod games;
mod guilds;
mod parties;

pub use chat::{ChatChannel, ChatChannelManager};
pub use games::GameServerEntry;
pub use guilds::GuildManager;
pub use parties::PartyManager;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use common::defines::ErrorCode;
use common::net::{MessageIn, MessageOut};
use common::protocol::*;
use common::token::TokenCollector;

use crate::storage::{AccountRecord, CharacterRecord, Storage};

/// Payload parked in the chat token collector until the client presents
/// its token.
#[derive(Debug, Clone)]
pub struct ChatEnter {
    pub character_id: u32,
    pub character_name: String,
}

/// One connected client's session state.
#[derive(Default)]
pub struct ClientSession {
    pub account: Option<AccountRecord>,
    /// Characters of the logged-in account, loaded at login.
    pub characters: Vec<CharacterRecord>,
    /// Set once the chat handshake completed.
    pub chat_character: Option<(u32, String)>,
    pub joined_channels: Vec<u16>,
}

/// Where an online character lives.
#[derive(Debug, Clone)]
pub struct OnlineCharacter {
    pub client_slot: usize,
    pub game_slot: usize,
    pub name: String,
}

pub struct BrokerState {
    pub storage: Box<dyn Storage>,
    pub clients: Vec<Option<ClientSession>>,
    pub games: Vec<Option<GameServerEntry>>,
    pub channels: ChatChannelManager,
    pub guilds: GuildManager,
    pub parties: PartyManager,
    pub chat_tokens: TokenCollector<usize, ChatEnter>,
    pub online: HashMap<u32, OnlineCharacter>,
    pub outbox: Vec<(usize, MessageOut)>,
    pub game_outbox: Vec<(usize, MessageOut)>,
    /// Shared secret game servers must present.
    pub net_password: String,
    /// Where fresh characters start.
    pub start_map: u16,
    pub start_x: u16,
    pub start_y: u16,
}

impl BrokerState {
    pub fn new(storage: Box<dyn Storage>, net_password: &str) -> BrokerState {
        let mut state = BrokerState {
            storage,
            clients: Vec::new(),
            games: Vec::new(),
            channels: ChatChannelManager::new(),
            guilds: GuildManager::new(),
            parties: PartyManager::new(),
            chat_tokens: TokenCollector::new(
                Duration::from_secs(10),
                Duration::from_secs(40),
            ),
            online: HashMap::new(),
            outbox: Vec::new(),
            game_outbox: Vec::new(),
            net_password: net_password.to_string(),
            start_map: 1,
            start_x: 336,
            start_y: 336,
        };
        state.load_persisted();
        state
    }

    fn load_persisted(&mut self) {
        match self.storage.get_channel_list() {
            Ok(channels) => self.channels.restore(channels),
            Err(e) => log::warn!("Could not restore channels: {}", e),
        }
        match self.storage.get_guild_list() {
            Ok(guilds) => {
                let count = guilds.len();
                self.guilds.restore(guilds, &mut self.channels);
                log::info!("Restored {} guilds", count);
            }
            Err(e) => log::warn!("Could not restore guilds: {}", e),
        }
    }

    // ---- slot plumbing ------------------------------------------------

    pub fn open_client(&mut self) -> usize {
        for (i, slot) in self.clients.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(ClientSession::default());
                return i;
            }
        }
        self.clients.push(Some(ClientSession::default()));
        self.clients.len() - 1
    }

    pub fn session(&self, slot: usize) -> Option<&ClientSession> {
        self.clients.get(slot)?.as_ref()
    }

    pub fn session_mut(&mut self, slot: usize) -> Option<&mut ClientSession> {
        self.clients.get_mut(slot)?.as_mut()
    }

    pub fn send_to_client(&mut self, slot: usize, msg: MessageOut) {
        self.outbox.push((slot, msg));
    }

    pub fn send_to_game(&mut self, slot: usize, msg: MessageOut) {
        self.game_outbox.push((slot, msg));
    }

    pub fn respond(&mut self, slot: usize, msg_id: u16, code: ErrorCode) {
        let mut msg = MessageOut::new(msg_id);
        msg.write_u8(code as u8);
        self.send_to_client(slot, msg);
    }

    /// The registered game server hosting `map_id`.
    pub fn game_for_map(&self, map_id: u16) -> Option<usize> {
        self.games
            .iter()
            .enumerate()
            .find(|(_, g)| {
                g.as_ref()
                    .map(|g| g.maps.contains(&map_id))
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
    }

    // ---- dispatch -----------------------------------------------------

    pub fn handle_client_message(&mut self, slot: usize, msg: &mut MessageIn) {
        match msg.id() {
            CA_LOGIN => self.on_login(slot, msg),
            CA_LOGOUT => self.on_logout(slot),
            CA_REGISTER => self.on_register(slot, msg),
            CA_UNREGISTER => self.on_unregister(slot, msg),
            CA_EMAIL_CHANGE => self.on_email_change(slot, msg),
            CA_PASSWORD_CHANGE => self.on_password_change(slot, msg),
            CA_CHAR_CREATE => self.on_char_create(slot, msg),
            CA_CHAR_DELETE => self.on_char_delete(slot, msg),
            CA_CHAR_SELECT => self.on_char_select(slot, msg),

            CA_CHAT_CONNECT => self.on_chat_connect(slot, msg),
            CA_CHANNEL_ENTER => self.on_channel_enter(slot, msg),
            CA_CHANNEL_QUIT => self.on_channel_quit(slot, msg),
            CA_CHANNEL_LIST => self.on_channel_list(slot),
            CA_CHANNEL_USERS => self.on_channel_users(slot, msg),
            CA_CHANNEL_TOPIC => self.on_channel_topic(slot, msg),
            CA_CHANNEL_MODE => self.on_channel_mode(slot, msg),
            CA_CHANNEL_KICK => self.on_channel_kick(slot, msg),
            CA_CHAT => self.on_chat(slot, msg),
            CA_PRIVMSG => self.on_privmsg(slot, msg),

            CA_GUILD_CREATE => self.on_guild_create(slot, msg),
            CA_GUILD_INVITE => self.on_guild_invite(slot, msg),
            CA_GUILD_ACCEPT => self.on_guild_accept(slot, msg),
            CA_GUILD_GET_MEMBERS => self.on_guild_get_members(slot, msg),
            CA_GUILD_PROMOTE => self.on_guild_promote(slot, msg),
            CA_GUILD_KICK => self.on_guild_kick(slot, msg),
            CA_GUILD_QUIT => self.on_guild_quit(slot, msg),

            CA_PARTY_INVITE => self.on_party_invite(slot, msg),
            CA_PARTY_ACCEPT => self.on_party_accept(slot, msg),
            CA_PARTY_QUIT => self.on_party_quit(slot),

            other => {
                log::debug!("Dropping unknown client message 0x{:04x}", other);
            }
        }
        if msg.overrun() {
            log::warn!("Short payload in client message 0x{:04x}", msg.id());
        }
    }

    pub fn handle_game_message(&mut self, game_slot: usize, msg: &mut MessageIn) {
        match msg.id() {
            GA_REGISTER => self.on_game_register(game_slot, msg),
            GA_PLAYER_DATA => self.on_player_data(game_slot, msg),
            GA_REDIRECT => self.on_redirect(game_slot, msg),
            GA_PLAYER_RECONNECT => self.on_player_reconnect(game_slot, msg),
            GA_QUEST_GET_VAR => self.on_quest_get_var(game_slot, msg),
            GA_QUEST_SET_VAR => self.on_quest_set_var(game_slot, msg),
            GA_BAN_PLAYER => self.on_ban_player(game_slot, msg),
            GA_STATISTICS => self.on_statistics(game_slot, msg),
            GA_UPDATE_EXPERIENCE => { /* absorbed by GA_PLAYER_DATA flushes */ }
            other => {
                log::debug!("Dropping unknown game message 0x{:04x}", other);
            }
        }
    }

    /// Client socket went away: leave channels, update guild presence,
    /// drop the session.
    pub fn close_client(&mut self, slot: usize) {
        self.leave_all_channels(slot);
        self.party_drop_client(slot);
        if let Some(session) = self.clients.get_mut(slot).and_then(|s| s.take()) {
            if let Some((character_id, _)) = session.chat_character {
                self.online.remove(&character_id);
            }
            if let Some(account) = session.account {
                log::info!("Account '{}' disconnected", account.name);
            }
        }
        self.chat_tokens.remove_client_where(|&s| s == slot);
    }

    /// A game server connection dropped; its maps are gone until it
    /// re-registers.
    pub fn close_game(&mut self, game_slot: usize) {
        if let Some(Some(entry)) = self.games.get(game_slot) {
            log::warn!(
                "Game server {}:{} unregistered ({} maps)",
                entry.address,
                entry.port,
                entry.maps.len()
            );
        }
        if let Some(slot) = self.games.get_mut(game_slot) {
            *slot = None;
        }
        self.online.retain(|_, o| o.game_slot != game_slot);
    }

    /// Periodic sweep of expired chat tokens.
    pub fn sweep(&mut self, now: Instant) {
        let (dead_clients, dead_connects) = self.chat_tokens.sweep(now);
        for slot in dead_clients {
            self.respond(slot, AC_CHAT_CONNECT_RESPONSE, ErrorCode::Timeout);
        }
        for payload in dead_connects {
            log::debug!(
                "Expired chat token for character '{}'",
                payload.character_name
            );
        }
    }
}
