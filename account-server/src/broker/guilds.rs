//! Guilds: persistent named member sets with a permission mask and an
//! auto-owned chat channel.

use std::collections::HashMap;

use bitflags::bitflags;

use common::defines::ErrorCode;
use common::net::{MessageIn, MessageOut};
use common::protocol::*;

use crate::storage::{GuildMemberRecord, GuildRecord, Storage};

use super::chat::CHANNEL_EVENT_NEW_PLAYER;
use super::{BrokerState, ChatChannelManager};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GuildPermissions: u8 {
        const INVITE = 0x01;
        const KICK   = 0x02;
        const TOPIC  = 0x04;
        const LEADER = 0x08;
    }
}

pub const GUILD_MEMBER_DEFAULT: u8 = 0;
pub const GUILD_LEADER_MASK: u8 = GuildPermissions::all().bits();

#[derive(Debug, Clone)]
pub struct Guild {
    pub id: u32,
    pub name: String,
    /// (character id, permission mask)
    pub members: Vec<(u32, u8)>,
    pub invited: Vec<u32>,
    pub channel_id: u16,
}

impl Guild {
    pub fn member_permissions(&self, character_id: u32) -> Option<GuildPermissions> {
        self.members
            .iter()
            .find(|&&(id, _)| id == character_id)
            .map(|&(_, p)| GuildPermissions::from_bits_truncate(p))
    }

    fn record(&self) -> GuildRecord {
        GuildRecord {
            id: self.id,
            name: self.name.clone(),
            members: self
                .members
                .iter()
                .map(|&(character_id, permissions)| GuildMemberRecord {
                    character_id,
                    permissions,
                })
                .collect(),
        }
    }
}

#[derive(Default)]
pub struct GuildManager {
    guilds: HashMap<u32, Guild>,
}

impl GuildManager {
    pub fn new() -> GuildManager {
        GuildManager::default()
    }

    /// Rebuilds from persistence, recreating each guild's channel.
    pub fn restore(&mut self, records: Vec<GuildRecord>, channels: &mut ChatChannelManager) {
        for record in records {
            let channel_id = channels
                .create(&record.name, "", true)
                .unwrap_or_default();
            if let Some(channel) = channels.get_mut(channel_id) {
                channel.guild_owned = true;
            }
            self.guilds.insert(
                record.id,
                Guild {
                    id: record.id,
                    name: record.name,
                    members: record
                        .members
                        .iter()
                        .map(|m| (m.character_id, m.permissions))
                        .collect(),
                    invited: Vec::new(),
                    channel_id,
                },
            );
        }
    }

    pub fn get(&self, id: u32) -> Option<&Guild> {
        self.guilds.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Guild> {
        self.guilds.get_mut(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<u32> {
        self.guilds
            .values()
            .find(|g| g.name.eq_ignore_ascii_case(name))
            .map(|g| g.id)
    }

    pub fn guilds_of(&self, character_id: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .guilds
            .values()
            .filter(|g| g.members.iter().any(|&(id, _)| id == character_id))
            .map(|g| g.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn insert(&mut self, guild: Guild) {
        self.guilds.insert(guild.id, guild);
    }

    pub fn remove(&mut self, id: u32) -> Option<Guild> {
        self.guilds.remove(&id)
    }
}

impl BrokerState {
    fn persist_guild(&mut self, guild_id: u32) {
        if let Some(guild) = self.guilds.get(guild_id) {
            let record = guild.record();
            if let Err(e) = self.storage.update_guild(&record) {
                log::error!("Failed to persist guild '{}': {}", record.name, e);
            }
        }
    }

    pub(super) fn on_guild_create(&mut self, slot: usize, msg: &mut MessageIn) {
        let name = msg.read_string();
        let Some((character_id, character_name)) =
            self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            self.respond(slot, AC_GUILD_CREATE_RESPONSE, ErrorCode::NoLogin);
            return;
        };
        if name.len() < 2 || name.len() > 24 {
            self.respond(slot, AC_GUILD_CREATE_RESPONSE, ErrorCode::InvalidArgument);
            return;
        }
        if self.guilds.by_name(&name).is_some() {
            self.respond(slot, AC_GUILD_CREATE_RESPONSE, ErrorCode::AlreadyTaken);
            return;
        }

        let mut record = GuildRecord {
            id: 0,
            name: name.clone(),
            members: vec![GuildMemberRecord {
                character_id,
                permissions: GUILD_LEADER_MASK,
            }],
        };
        if let Err(e) = self.storage.add_guild(&mut record) {
            log::error!("Guild creation failed: {}", e);
            self.respond(slot, AC_GUILD_CREATE_RESPONSE, ErrorCode::Failure);
            return;
        }

        // Every guild owns a channel carrying its name.
        let Some(channel_id) = self.channels.create(&name, "", true) else {
            let _ = self.storage.remove_guild(record.id);
            self.respond(slot, AC_GUILD_CREATE_RESPONSE, ErrorCode::LimitReached);
            return;
        };
        if let Some(channel) = self.channels.get_mut(channel_id) {
            channel.guild_owned = true;
            channel.members.push((slot, String::new()));
        }
        if let Some(session) = self.session_mut(slot) {
            session.joined_channels.push(channel_id);
        }

        self.guilds.insert(Guild {
            id: record.id,
            name: name.clone(),
            members: vec![(character_id, GUILD_LEADER_MASK)],
            invited: Vec::new(),
            channel_id,
        });

        let mut reply = MessageOut::new(AC_GUILD_CREATE_RESPONSE);
        reply.write_u8(ErrorCode::Ok as u8);
        reply.write_u32(record.id);
        reply.write_u8(GUILD_LEADER_MASK);
        reply.write_u16(channel_id);
        self.send_to_client(slot, reply);
        log::info!("Guild '{}' founded by '{}'", name, character_name);
    }

    pub(super) fn on_guild_invite(&mut self, slot: usize, msg: &mut MessageIn) {
        let guild_id = msg.read_u32();
        let target_name = msg.read_string();
        let Some((character_id, character_name)) =
            self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            self.respond(slot, CA_GUILD_INVITE, ErrorCode::NoLogin);
            return;
        };

        let Some(guild) = self.guilds.get(guild_id) else {
            self.respond(slot, CA_GUILD_INVITE, ErrorCode::InvalidArgument);
            return;
        };
        let Some(perms) = guild.member_permissions(character_id) else {
            self.respond(slot, CA_GUILD_INVITE, ErrorCode::InsufficientRights);
            return;
        };
        if !perms.contains(GuildPermissions::INVITE) {
            self.respond(slot, CA_GUILD_INVITE, ErrorCode::InsufficientRights);
            return;
        }

        let Some(target_slot) = self.client_by_character_name(&target_name) else {
            self.respond(slot, CA_GUILD_INVITE, ErrorCode::InvalidArgument);
            return;
        };
        let Some((target_id, _)) = self
            .session(target_slot)
            .and_then(|s| s.chat_character.clone())
        else {
            return;
        };
        let guild_name = {
            let guild = self.guilds.get_mut(guild_id).unwrap();
            if guild.members.iter().any(|&(id, _)| id == target_id) {
                self.respond(slot, CA_GUILD_INVITE, ErrorCode::AlreadyTaken);
                return;
            }
            if !guild.invited.contains(&target_id) {
                guild.invited.push(target_id);
            }
            guild.name.clone()
        };

        let mut invite = MessageOut::new(AC_GUILD_INVITED);
        invite.write_u32(guild_id);
        invite.write_string(&guild_name);
        invite.write_string(&character_name);
        self.send_to_client(target_slot, invite);
    }

    pub(super) fn on_guild_accept(&mut self, slot: usize, msg: &mut MessageIn) {
        let guild_id = msg.read_u32();
        let Some((character_id, character_name)) =
            self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            self.respond(slot, AC_GUILD_ACCEPT_RESPONSE, ErrorCode::NoLogin);
            return;
        };

        let channel_id = {
            let Some(guild) = self.guilds.get_mut(guild_id) else {
                self.respond(slot, AC_GUILD_ACCEPT_RESPONSE, ErrorCode::InvalidArgument);
                return;
            };
            if !guild.invited.contains(&character_id) {
                self.respond(slot, AC_GUILD_ACCEPT_RESPONSE, ErrorCode::InsufficientRights);
                return;
            }
            guild.invited.retain(|&id| id != character_id);
            guild.members.push((character_id, GUILD_MEMBER_DEFAULT));
            guild.channel_id
        };
        self.persist_guild(guild_id);

        if let Some(channel) = self.channels.get_mut(channel_id) {
            channel.members.push((slot, String::new()));
        }
        if let Some(session) = self.session_mut(slot) {
            session.joined_channels.push(channel_id);
        }

        let mut reply = MessageOut::new(AC_GUILD_ACCEPT_RESPONSE);
        reply.write_u8(ErrorCode::Ok as u8);
        reply.write_u32(guild_id);
        reply.write_u16(channel_id);
        self.send_to_client(slot, reply);

        self.channel_event_for_guild(channel_id, CHANNEL_EVENT_NEW_PLAYER, &character_name);
    }

    fn channel_event_for_guild(&mut self, channel_id: u16, event: u8, detail: &str) {
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

    pub(super) fn on_guild_get_members(&mut self, slot: usize, msg: &mut MessageIn) {
        let guild_id = msg.read_u32();
        let Some(guild) = self.guilds.get(guild_id) else {
            self.respond(slot, AC_GUILD_MEMBERS, ErrorCode::InvalidArgument);
            return;
        };
        let members = guild.members.clone();
        let mut reply = MessageOut::new(AC_GUILD_MEMBERS);
        reply.write_u8(ErrorCode::Ok as u8);
        reply.write_u32(guild_id);
        reply.write_u16(members.len() as u16);
        for (character_id, permissions) in members {
            let name = self
                .storage
                .get_character_by_id(character_id)
                .map(|c| c.name)
                .unwrap_or_default();
            reply.write_string(&name);
            reply.write_u8(permissions);
            reply.write_u8(self.online.contains_key(&character_id) as u8);
        }
        self.send_to_client(slot, reply);
    }

    pub(super) fn on_guild_promote(&mut self, slot: usize, msg: &mut MessageIn) {
        let guild_id = msg.read_u32();
        let target_name = msg.read_string();
        let mask = msg.read_u8();
        let Some((character_id, _)) = self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            self.respond(slot, CA_GUILD_PROMOTE, ErrorCode::NoLogin);
            return;
        };
        let has_rights = self
            .guilds
            .get(guild_id)
            .and_then(|g| g.member_permissions(character_id))
            .map(|p| p.contains(GuildPermissions::LEADER))
            .unwrap_or(false);
        if !has_rights {
            self.respond(slot, CA_GUILD_PROMOTE, ErrorCode::InsufficientRights);
            return;
        }
        let Ok(target) = self.storage.get_character_by_name(&target_name) else {
            self.respond(slot, CA_GUILD_PROMOTE, ErrorCode::InvalidArgument);
            return;
        };
        let changed = self
            .guilds
            .get_mut(guild_id)
            .map(|g| {
                for member in g.members.iter_mut() {
                    if member.0 == target.id {
                        member.1 = mask;
                        return true;
                    }
                }
                false
            })
            .unwrap_or(false);
        if changed {
            self.persist_guild(guild_id);
            self.respond(slot, CA_GUILD_PROMOTE, ErrorCode::Ok);
        } else {
            self.respond(slot, CA_GUILD_PROMOTE, ErrorCode::InvalidArgument);
        }
    }

    pub(super) fn on_guild_kick(&mut self, slot: usize, msg: &mut MessageIn) {
        let guild_id = msg.read_u32();
        let target_name = msg.read_string();
        let Some((character_id, _)) = self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            self.respond(slot, CA_GUILD_KICK, ErrorCode::NoLogin);
            return;
        };
        let has_rights = self
            .guilds
            .get(guild_id)
            .and_then(|g| g.member_permissions(character_id))
            .map(|p| p.contains(GuildPermissions::KICK))
            .unwrap_or(false);
        if !has_rights {
            self.respond(slot, CA_GUILD_KICK, ErrorCode::InsufficientRights);
            return;
        }
        let Ok(target) = self.storage.get_character_by_name(&target_name) else {
            self.respond(slot, CA_GUILD_KICK, ErrorCode::InvalidArgument);
            return;
        };
        self.remove_guild_member(guild_id, target.id);
        self.respond(slot, CA_GUILD_KICK, ErrorCode::Ok);
    }

    pub(super) fn on_guild_quit(&mut self, slot: usize, msg: &mut MessageIn) {
        let guild_id = msg.read_u32();
        let Some((character_id, _)) = self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            self.respond(slot, CA_GUILD_QUIT, ErrorCode::NoLogin);
            return;
        };
        if self
            .guilds
            .get(guild_id)
            .and_then(|g| g.member_permissions(character_id))
            .is_none()
        {
            self.respond(slot, CA_GUILD_QUIT, ErrorCode::InvalidArgument);
            return;
        }
        self.remove_guild_member(guild_id, character_id);
        self.respond(slot, CA_GUILD_QUIT, ErrorCode::Ok);
    }

    /// Removes a member; the last member's departure destroys the guild
    /// and reaps its channel. A departing leader hands the mask to the
    /// oldest remaining member.
    fn remove_guild_member(&mut self, guild_id: u32, character_id: u32) {
        let Some(guild) = self.guilds.get_mut(guild_id) else {
            return;
        };
        let was_leader = guild
            .member_permissions(character_id)
            .map(|p| p.contains(GuildPermissions::LEADER))
            .unwrap_or(false);
        guild.members.retain(|&(id, _)| id != character_id);

        if guild.members.is_empty() {
            let channel_id = guild.channel_id;
            let name = guild.name.clone();
            self.guilds.remove(guild_id);
            self.channels.remove(channel_id);
            if let Err(e) = self.storage.remove_guild(guild_id) {
                log::error!("Failed to remove guild '{}': {}", name, e);
            }
            log::info!("Guild '{}' disbanded", name);
            return;
        }
        if was_leader {
            if let Some(first) = guild.members.first_mut() {
                first.1 = GUILD_LEADER_MASK;
            }
        }
        self.persist_guild(guild_id);
    }

    /// On chat connect, re-announce guild memberships so the client can
    /// rejoin its guild channels.
    pub(super) fn guild_rejoin(&mut self, slot: usize, character_id: u32) {
        for guild_id in self.guilds.guilds_of(character_id) {
            let (name, permissions, channel_id) = {
                let guild = self.guilds.get(guild_id).unwrap();
                (
                    guild.name.clone(),
                    guild
                        .member_permissions(character_id)
                        .unwrap_or(GuildPermissions::empty())
                        .bits(),
                    guild.channel_id,
                )
            };
            if let Some(channel) = self.channels.get_mut(channel_id) {
                if !channel.has_member(slot) {
                    channel.members.push((slot, String::new()));
                }
            }
            if let Some(session) = self.session_mut(slot) {
                if !session.joined_channels.contains(&channel_id) {
                    session.joined_channels.push(channel_id);
                }
            }
            let mut msg = MessageOut::new(AC_GUILD_REJOIN);
            msg.write_u32(guild_id);
            msg.write_string(&name);
            msg.write_u8(permissions);
            msg.write_u16(channel_id);
            self.send_to_client(slot, msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ChatEnter;
    use crate::storage::MemoryStorage;

    fn broker_with_chatters(n: usize) -> (BrokerState, Vec<usize>) {
        let mut state = BrokerState::new(Box::new(MemoryStorage::new()), "pw");
        let mut slots = Vec::new();
        for i in 0..n {
            let slot = state.open_client();
            state.finish_chat_connect(
                slot,
                ChatEnter {
                    character_id: i as u32 + 1,
                    character_name: format!("knight{}", i),
                },
            );
            slots.push(slot);
        }
        state.outbox.clear();
        (state, slots)
    }

    fn create_guild(state: &mut BrokerState, slot: usize, name: &str) -> u32 {
        let mut msg = MessageOut::new(CA_GUILD_CREATE);
        msg.write_string(name);
        let bytes = msg.into_bytes();
        state.on_guild_create(slot, &mut MessageIn::new(&bytes).unwrap());
        state.guilds.by_name(name).expect("guild created")
    }

    #[test]
    fn create_grants_leader_and_channel() {
        let (mut state, slots) = broker_with_chatters(1);
        let guild_id = create_guild(&mut state, slots[0], "g1");
        let guild = state.guilds.get(guild_id).unwrap();
        assert_eq!(
            guild.member_permissions(1),
            Some(GuildPermissions::all())
        );
        let channel = state.channels.get(guild.channel_id).unwrap();
        assert!(channel.guild_owned);
        assert!(channel.is_private());
        assert!(channel.has_member(slots[0]));
    }

    #[test]
    fn invite_and_accept_joins_the_channel() {
        let (mut state, slots) = broker_with_chatters(2);
        let guild_id = create_guild(&mut state, slots[0], "g1");

        let mut msg = MessageOut::new(CA_GUILD_INVITE);
        msg.write_u32(guild_id);
        msg.write_string("knight1");
        let bytes = msg.into_bytes();
        state.on_guild_invite(slots[0], &mut MessageIn::new(&bytes).unwrap());

        let mut msg = MessageOut::new(CA_GUILD_ACCEPT);
        msg.write_u32(guild_id);
        let bytes = msg.into_bytes();
        state.outbox.clear();
        state.on_guild_accept(slots[1], &mut MessageIn::new(&bytes).unwrap());

        let guild = state.guilds.get(guild_id).unwrap();
        assert_eq!(guild.members.len(), 2);
        let channel = state.channels.get(guild.channel_id).unwrap();
        assert!(channel.has_member(slots[1]));
        // Both clients heard the new-player channel event.
        let event_targets: Vec<usize> = state
            .outbox
            .iter()
            .filter(|(_, m)| m.id() == AC_CHANNEL_EVENT)
            .map(|&(s, _)| s)
            .collect();
        assert!(event_targets.contains(&slots[0]));
        assert!(event_targets.contains(&slots[1]));
    }

    #[test]
    fn invite_requires_permission() {
        let (mut state, slots) = broker_with_chatters(3);
        let guild_id = create_guild(&mut state, slots[0], "g1");
        // knight1 joins as plain member.
        state.guilds.get_mut(guild_id).unwrap().invited.push(2);
        let mut msg = MessageOut::new(CA_GUILD_ACCEPT);
        msg.write_u32(guild_id);
        let bytes = msg.into_bytes();
        state.on_guild_accept(slots[1], &mut MessageIn::new(&bytes).unwrap());

        // Plain members cannot invite.
        let mut msg = MessageOut::new(CA_GUILD_INVITE);
        msg.write_u32(guild_id);
        msg.write_string("knight2");
        let bytes = msg.into_bytes();
        state.outbox.clear();
        state.on_guild_invite(slots[1], &mut MessageIn::new(&bytes).unwrap());
        let (_, reply) = state.outbox.last().unwrap();
        assert_eq!(reply.as_bytes()[2], ErrorCode::InsufficientRights as u8);
    }

    #[test]
    fn last_quit_disbands_and_reaps_the_channel() {
        let (mut state, slots) = broker_with_chatters(1);
        let guild_id = create_guild(&mut state, slots[0], "g1");
        let channel_id = state.guilds.get(guild_id).unwrap().channel_id;

        let mut msg = MessageOut::new(CA_GUILD_QUIT);
        msg.write_u32(guild_id);
        let bytes = msg.into_bytes();
        state.on_guild_quit(slots[0], &mut MessageIn::new(&bytes).unwrap());

        assert!(state.guilds.get(guild_id).is_none());
        assert!(state.channels.get(channel_id).is_none());
        assert!(state.storage.get_guild_list().unwrap().is_empty());
    }
}
