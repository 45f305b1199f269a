//! The chat hub: channel registry and the chat message family.
//!
//! Channel ids are partitioned: ids below `PRIVATE_CHANNEL_START` are
//! public and persisted through the gateway, ids above are private (guild
//! channels among them). A channel whose last member leaves is destroyed,
//! unless a guild owns it — the guild's destruction reaps it instead.

use std::collections::HashMap;

use common::defines::{
    ErrorCode, MAX_PRIVATE_CHANNELS, MAX_PUBLIC_CHANNELS, PRIVATE_CHANNEL_START,
};
use common::net::{MessageIn, MessageOut};
use common::protocol::*;
use common::token::Token;

use crate::storage::{ChannelRecord, Storage};

use super::BrokerState;

// Channel event codes for AC_CHANNEL_EVENT.
pub const CHANNEL_EVENT_NEW_PLAYER: u8 = 0;
pub const CHANNEL_EVENT_LEAVING_PLAYER: u8 = 1;
pub const CHANNEL_EVENT_TOPIC_CHANGE: u8 = 2;
pub const CHANNEL_EVENT_MODE_CHANGE: u8 = 3;
pub const CHANNEL_EVENT_KICKED: u8 = 4;

#[derive(Debug, Clone)]
pub struct ChatChannel {
    pub id: u16,
    pub name: String,
    pub topic: String,
    pub password: String,
    /// Client slots currently joined, with their mode string.
    pub members: Vec<(usize, String)>,
    /// Guild channels are reaped by the guild, not by the last leave.
    pub guild_owned: bool,
}

impl ChatChannel {
    pub fn is_private(&self) -> bool {
        self.id >= PRIVATE_CHANNEL_START
    }

    pub fn has_member(&self, slot: usize) -> bool {
        self.members.iter().any(|&(s, _)| s == slot)
    }
}

#[derive(Default)]
pub struct ChatChannelManager {
    channels: HashMap<u16, ChatChannel>,
    next_public: u16,
    next_private: u16,
}

impl ChatChannelManager {
    pub fn new() -> ChatChannelManager {
        ChatChannelManager {
            channels: HashMap::new(),
            next_public: 1,
            next_private: PRIVATE_CHANNEL_START,
        }
    }

    /// Rebuilds the public channel registry from persistence.
    pub fn restore(&mut self, records: Vec<ChannelRecord>) {
        for record in records {
            self.next_public = self.next_public.max(record.id + 1);
            self.channels.insert(
                record.id,
                ChatChannel {
                    id: record.id,
                    name: record.name,
                    topic: record.topic,
                    password: record.password,
                    members: Vec::new(),
                    guild_owned: false,
                },
            );
        }
    }

    /// The public channels in persistable form.
    pub fn persistable(&self) -> Vec<ChannelRecord> {
        let mut records: Vec<ChannelRecord> = self
            .channels
            .values()
            .filter(|c| !c.is_private())
            .map(|c| ChannelRecord {
                id: c.id,
                name: c.name.clone(),
                topic: c.topic.clone(),
                password: c.password.clone(),
            })
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn get(&self, id: u16) -> Option<&ChatChannel> {
        self.channels.get(&id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut ChatChannel> {
        self.channels.get_mut(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<u16> {
        self.channels
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.id)
    }

    pub fn create(&mut self, name: &str, password: &str, private: bool) -> Option<u16> {
        let id = if private {
            if self.channels.len() >= MAX_PRIVATE_CHANNELS {
                return None;
            }
            let id = self.next_private;
            self.next_private = self.next_private.checked_add(1)?;
            id
        } else {
            if self.next_public as usize > MAX_PUBLIC_CHANNELS {
                return None;
            }
            let id = self.next_public;
            self.next_public += 1;
            id
        };
        self.channels.insert(
            id,
            ChatChannel {
                id,
                name: name.to_string(),
                topic: String::new(),
                password: password.to_string(),
                members: Vec::new(),
                guild_owned: false,
            },
        );
        Some(id)
    }

    pub fn remove(&mut self, id: u16) {
        self.channels.remove(&id);
    }

    /// Removes a member; empty non-guild channels are destroyed.
    pub fn leave(&mut self, id: u16, slot: usize) {
        let destroy = match self.channels.get_mut(&id) {
            Some(channel) => {
                channel.members.retain(|&(s, _)| s != slot);
                channel.members.is_empty() && !channel.guild_owned
            }
            None => false,
        };
        if destroy {
            self.channels.remove(&id);
        }
    }

    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.channels.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl BrokerState {
    fn chat_identity(&self, slot: usize) -> Option<(u32, String)> {
        self.session(slot)?.chat_character.clone()
    }

    fn channel_event(&mut self, channel_id: u16, event: u8, detail: &str) {
        let members: Vec<usize> = self
            .channels
            .get(channel_id)
            .map(|c| c.members.iter().map(|&(s, _)| s).collect())
            .unwrap_or_default();
        for member in members {
            let mut msg = MessageOut::new(AC_CHANNEL_EVENT);
            msg.write_u16(channel_id);
            msg.write_u8(event);
            msg.write_string(detail);
            self.send_to_client(member, msg);
        }
    }

    pub(super) fn on_chat_connect(&mut self, slot: usize, msg: &mut MessageIn) {
        let token_bytes = msg.read_bytes(common::token::TOKEN_LENGTH);
        let Some(token) = Token::from_bytes(&token_bytes) else {
            self.respond(slot, AC_CHAT_CONNECT_RESPONSE, ErrorCode::InvalidArgument);
            return;
        };
        match self.chat_tokens.take_connect(&token) {
            Some(enter) => self.finish_chat_connect(slot, enter),
            None => self.chat_tokens.park_client(token, slot),
        }
    }

    pub(super) fn finish_chat_connect(&mut self, slot: usize, enter: super::ChatEnter) {
        if let Some(session) = self.session_mut(slot) {
            session.chat_character =
                Some((enter.character_id, enter.character_name.clone()));
        }
        self.respond(slot, AC_CHAT_CONNECT_RESPONSE, ErrorCode::Ok);
        log::info!("Chat session opened for '{}'", enter.character_name);
        self.guild_rejoin(slot, enter.character_id);
    }

    pub(super) fn on_channel_enter(&mut self, slot: usize, msg: &mut MessageIn) {
        let name = msg.read_string();
        let password = msg.read_string();
        let Some((_, character_name)) = self.chat_identity(slot) else {
            self.respond(slot, AC_CHANNEL_ENTER_RESPONSE, ErrorCode::NoLogin);
            return;
        };
        if name.is_empty() {
            self.respond(slot, AC_CHANNEL_ENTER_RESPONSE, ErrorCode::InvalidArgument);
            return;
        }

        // Find the channel, or create a public one on demand.
        let channel_id = match self.channels.by_name(&name) {
            Some(id) => id,
            None => match self.channels.create(&name, &password, false) {
                Some(id) => {
                    self.persist_channels();
                    id
                }
                None => {
                    self.respond(slot, AC_CHANNEL_ENTER_RESPONSE, ErrorCode::LimitReached);
                    return;
                }
            },
        };

        let channel = self.channels.get(channel_id).unwrap();
        if !channel.password.is_empty() && channel.password != password {
            self.respond(slot, AC_CHANNEL_ENTER_RESPONSE, ErrorCode::WrongPassword);
            return;
        }
        if channel.has_member(slot) {
            self.respond(slot, AC_CHANNEL_ENTER_RESPONSE, ErrorCode::Failure);
            return;
        }

        let topic = channel.topic.clone();
        self.channels
            .get_mut(channel_id)
            .unwrap()
            .members
            .push((slot, String::new()));
        if let Some(session) = self.session_mut(slot) {
            session.joined_channels.push(channel_id);
        }

        let mut reply = MessageOut::new(AC_CHANNEL_ENTER_RESPONSE);
        reply.write_u8(ErrorCode::Ok as u8);
        reply.write_u16(channel_id);
        reply.write_string(&name);
        reply.write_string(&topic);
        self.send_to_client(slot, reply);

        self.channel_event(channel_id, CHANNEL_EVENT_NEW_PLAYER, &character_name);
    }

    pub(super) fn on_channel_quit(&mut self, slot: usize, msg: &mut MessageIn) {
        let channel_id = msg.read_u16();
        let Some((_, character_name)) = self.chat_identity(slot) else {
            return;
        };
        if !self
            .channels
            .get(channel_id)
            .map(|c| c.has_member(slot))
            .unwrap_or(false)
        {
            self.respond(slot, CA_CHANNEL_QUIT, ErrorCode::InvalidArgument);
            return;
        }
        self.channels.leave(channel_id, slot);
        if let Some(session) = self.session_mut(slot) {
            session.joined_channels.retain(|&c| c != channel_id);
        }
        self.channel_event(channel_id, CHANNEL_EVENT_LEAVING_PLAYER, &character_name);
        self.persist_channels();
    }

    pub(super) fn on_channel_list(&mut self, slot: usize) {
        let mut msg = MessageOut::new(AC_CHANNEL_LIST);
        for id in self.channels.ids() {
            let channel = self.channels.get(id).unwrap();
            if channel.is_private() {
                continue;
            }
            msg.write_u16(channel.id);
            msg.write_string(&channel.name);
            msg.write_u16(channel.members.len() as u16);
            msg.write_u8(!channel.password.is_empty() as u8);
        }
        self.send_to_client(slot, msg);
    }

    pub(super) fn on_channel_users(&mut self, slot: usize, msg: &mut MessageIn) {
        let channel_id = msg.read_u16();
        let members: Vec<usize> = self
            .channels
            .get(channel_id)
            .map(|c| c.members.iter().map(|&(s, _)| s).collect())
            .unwrap_or_default();
        let mut reply = MessageOut::new(AC_CHANNEL_USERS);
        reply.write_u16(channel_id);
        for member in members {
            if let Some((_, name)) = self.chat_identity(member) {
                reply.write_string(&name);
                let mode = self
                    .channels
                    .get(channel_id)
                    .and_then(|c| {
                        c.members
                            .iter()
                            .find(|&&(s, _)| s == member)
                            .map(|(_, m)| m.clone())
                    })
                    .unwrap_or_default();
                reply.write_string(&mode);
            }
        }
        self.send_to_client(slot, reply);
    }

    pub(super) fn on_channel_topic(&mut self, slot: usize, msg: &mut MessageIn) {
        let channel_id = msg.read_u16();
        let topic = msg.read_string();
        if self.chat_identity(slot).is_none() {
            self.respond(slot, CA_CHANNEL_TOPIC, ErrorCode::NoLogin);
            return;
        }
        let Some(channel) = self.channels.get_mut(channel_id) else {
            self.respond(slot, CA_CHANNEL_TOPIC, ErrorCode::InvalidArgument);
            return;
        };
        if !channel.has_member(slot) {
            self.respond(slot, CA_CHANNEL_TOPIC, ErrorCode::InsufficientRights);
            return;
        }
        channel.topic = topic.clone();
        self.channel_event(channel_id, CHANNEL_EVENT_TOPIC_CHANGE, &topic);
        self.persist_channels();
    }

    pub(super) fn on_channel_mode(&mut self, slot: usize, msg: &mut MessageIn) {
        let channel_id = msg.read_u16();
        let target = msg.read_string();
        let mode = msg.read_string();
        if self.chat_identity(slot).is_none() {
            return;
        }
        let Some(target_slot) = self.client_by_character_name(&target) else {
            self.respond(slot, CA_CHANNEL_MODE, ErrorCode::InvalidArgument);
            return;
        };
        let Some(channel) = self.channels.get_mut(channel_id) else {
            return;
        };
        if let Some(member) = channel.members.iter_mut().find(|(s, _)| *s == target_slot) {
            member.1 = mode.clone();
            self.channel_event(channel_id, CHANNEL_EVENT_MODE_CHANGE, &mode);
        }
    }

    pub(super) fn on_channel_kick(&mut self, slot: usize, msg: &mut MessageIn) {
        let channel_id = msg.read_u16();
        let target = msg.read_string();
        if self.chat_identity(slot).is_none() {
            return;
        }
        let Some(target_slot) = self.client_by_character_name(&target) else {
            self.respond(slot, CA_CHANNEL_KICK, ErrorCode::InvalidArgument);
            return;
        };
        let is_member = self
            .channels
            .get(channel_id)
            .map(|c| c.has_member(slot) && c.has_member(target_slot))
            .unwrap_or(false);
        if !is_member {
            self.respond(slot, CA_CHANNEL_KICK, ErrorCode::InsufficientRights);
            return;
        }
        self.channels.leave(channel_id, target_slot);
        if let Some(session) = self.session_mut(target_slot) {
            session.joined_channels.retain(|&c| c != channel_id);
        }
        self.channel_event(channel_id, CHANNEL_EVENT_KICKED, &target);
    }

    /// Public channel speech.
    pub(super) fn on_chat(&mut self, slot: usize, msg: &mut MessageIn) {
        let channel_id = msg.read_u16();
        let text = msg.read_string();
        let Some((_, speaker)) = self.chat_identity(slot) else {
            self.respond(slot, CA_CHAT, ErrorCode::NoLogin);
            return;
        };
        let members: Vec<usize> = match self.channels.get(channel_id) {
            Some(channel) if channel.has_member(slot) => {
                channel.members.iter().map(|&(s, _)| s).collect()
            }
            _ => {
                self.respond(slot, CA_CHAT, ErrorCode::InsufficientRights);
                return;
            }
        };
        for member in members {
            let mut out = MessageOut::new(AC_CHAT);
            out.write_u16(channel_id);
            out.write_string(&speaker);
            out.write_string(&text);
            self.send_to_client(member, out);
        }
    }

    /// Private messages scan the client table by character name.
    pub(super) fn on_privmsg(&mut self, slot: usize, msg: &mut MessageIn) {
        let target = msg.read_string();
        let text = msg.read_string();
        let Some((_, speaker)) = self.chat_identity(slot) else {
            self.respond(slot, CA_PRIVMSG, ErrorCode::NoLogin);
            return;
        };
        let Some(target_slot) = self.client_by_character_name(&target) else {
            self.respond(slot, CA_PRIVMSG, ErrorCode::InvalidArgument);
            return;
        };
        let mut out = MessageOut::new(AC_PRIVMSG);
        out.write_string(&speaker);
        out.write_string(&text);
        self.send_to_client(target_slot, out);
    }

    pub(super) fn client_by_character_name(&self, name: &str) -> Option<usize> {
        (0..self.clients.len()).find(|&slot| {
            self.chat_identity(slot)
                .map(|(_, n)| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
    }

    pub(super) fn leave_all_channels(&mut self, slot: usize) {
        let joined = self
            .session(slot)
            .map(|s| s.joined_channels.clone())
            .unwrap_or_default();
        let name = self
            .chat_identity(slot)
            .map(|(_, n)| n)
            .unwrap_or_default();
        for channel_id in joined {
            self.channels.leave(channel_id, slot);
            self.channel_event(channel_id, CHANNEL_EVENT_LEAVING_PLAYER, &name);
        }
        if let Some(session) = self.session_mut(slot) {
            session.joined_channels.clear();
        }
    }

    pub(super) fn persist_channels(&mut self) {
        let records = self.channels.persistable();
        if let Err(e) = self.storage.update_channels(&records) {
            log::error!("Failed to persist channels: {}", e);
        }
    }

    /// A broadcast to every connected chat session.
    pub fn announce(&mut self, text: &str) {
        for slot in 0..self.clients.len() {
            if self.chat_identity(slot).is_some() {
                let mut msg = MessageOut::new(AC_ANNOUNCE);
                msg.write_string(text);
                self.send_to_client(slot, msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn broker_with_chatters(n: usize) -> (BrokerState, Vec<usize>) {
        let mut state = BrokerState::new(Box::new(MemoryStorage::new()), "pw");
        let mut slots = Vec::new();
        for i in 0..n {
            let slot = state.open_client();
            state.finish_chat_connect(
                slot,
                super::super::ChatEnter {
                    character_id: i as u32 + 1,
                    character_name: format!("chatter{}", i),
                },
            );
            slots.push(slot);
        }
        state.outbox.clear();
        (state, slots)
    }

    fn enter_channel(state: &mut BrokerState, slot: usize, name: &str, password: &str) {
        let mut msg = MessageOut::new(CA_CHANNEL_ENTER);
        msg.write_string(name);
        msg.write_string(password);
        let bytes = msg.into_bytes();
        state.on_channel_enter(slot, &mut MessageIn::new(&bytes).unwrap());
    }

    #[test]
    fn join_creates_public_channel_on_demand() {
        let (mut state, slots) = broker_with_chatters(1);
        enter_channel(&mut state, slots[0], "general", "");
        let id = state.channels.by_name("general").unwrap();
        assert!(id < PRIVATE_CHANNEL_START);
        assert!(state.channels.get(id).unwrap().has_member(slots[0]));
    }

    #[test]
    fn wrong_channel_password_is_rejected() {
        let (mut state, slots) = broker_with_chatters(2);
        enter_channel(&mut state, slots[0], "sekrit", "letmein");
        state.outbox.clear();
        enter_channel(&mut state, slots[1], "sekrit", "nope");
        let (_, msg) = state.outbox.last().unwrap();
        assert_eq!(msg.as_bytes()[2], ErrorCode::WrongPassword as u8);
    }

    #[test]
    fn last_leave_destroys_the_channel() {
        let (mut state, slots) = broker_with_chatters(1);
        enter_channel(&mut state, slots[0], "fleeting", "");
        let id = state.channels.by_name("fleeting").unwrap();
        let mut msg = MessageOut::new(CA_CHANNEL_QUIT);
        msg.write_u16(id);
        let bytes = msg.into_bytes();
        state.on_channel_quit(slots[0], &mut MessageIn::new(&bytes).unwrap());
        assert!(state.channels.get(id).is_none());
    }

    #[test]
    fn guild_channels_survive_empty() {
        let mut manager = ChatChannelManager::new();
        let id = manager.create("g1", "", true).unwrap();
        manager.get_mut(id).unwrap().guild_owned = true;
        manager.get_mut(id).unwrap().members.push((0, String::new()));
        manager.leave(id, 0);
        assert!(manager.get(id).is_some());
        manager.remove(id);
        assert!(manager.get(id).is_none());
    }

    #[test]
    fn chat_reaches_members_only() {
        let (mut state, slots) = broker_with_chatters(3);
        enter_channel(&mut state, slots[0], "general", "");
        enter_channel(&mut state, slots[1], "general", "");
        state.outbox.clear();

        let id = state.channels.by_name("general").unwrap();
        let mut msg = MessageOut::new(CA_CHAT);
        msg.write_u16(id);
        msg.write_string("hello");
        let bytes = msg.into_bytes();
        state.on_chat(slots[0], &mut MessageIn::new(&bytes).unwrap());

        let recipients: Vec<usize> = state.outbox.iter().map(|&(s, _)| s).collect();
        assert!(recipients.contains(&slots[0]));
        assert!(recipients.contains(&slots[1]));
        assert!(!recipients.contains(&slots[2]));
    }
}
