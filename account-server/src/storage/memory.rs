//! In-memory storage, for tests and standalone runs.

use std::collections::HashMap;

use common::character_data::CharacterData;

use super::{
    AccountRecord, ChannelRecord, CharacterRecord, GuildRecord, Result, Storage, StorageError,
};

#[derive(Default)]
pub struct MemoryStorage {
    accounts: HashMap<u32, AccountRecord>,
    characters: HashMap<u32, CharacterRecord>,
    guilds: HashMap<u32, GuildRecord>,
    channels: Vec<ChannelRecord>,
    quest_vars: HashMap<(u32, String), String>,
    next_account_id: u32,
    next_character_id: u32,
    next_guild_id: u32,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage {
            next_account_id: 1,
            next_character_id: 1,
            next_guild_id: 1,
            ..MemoryStorage::default()
        }
    }
}

impl Storage for MemoryStorage {
    fn get_account_by_name(&mut self, name: &str) -> Result<AccountRecord> {
        self.accounts
            .values()
            .find(|a| a.name == name)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn get_account_by_id(&mut self, id: u32) -> Result<AccountRecord> {
        self.accounts.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    fn add_account(&mut self, record: &mut AccountRecord) -> Result<()> {
        record.id = self.next_account_id;
        self.next_account_id += 1;
        self.accounts.insert(record.id, record.clone());
        Ok(())
    }

    fn update_account(&mut self, record: &AccountRecord) -> Result<()> {
        if !self.accounts.contains_key(&record.id) {
            return Err(StorageError::NotFound);
        }
        self.accounts.insert(record.id, record.clone());
        Ok(())
    }

    fn del_account(&mut self, id: u32) -> Result<()> {
        let Some(account) = self.accounts.remove(&id) else {
            return Err(StorageError::NotFound);
        };
        for character_id in account.characters {
            self.characters.remove(&character_id);
        }
        Ok(())
    }

    fn does_email_exist(&mut self, email: &str) -> Result<bool> {
        Ok(self.accounts.values().any(|a| a.email == email))
    }

    fn does_character_name_exist(&mut self, name: &str) -> Result<bool> {
        Ok(self.characters.values().any(|c| c.name == name))
    }

    fn get_character_by_id(&mut self, id: u32) -> Result<CharacterRecord> {
        self.characters
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn get_character_by_name(&mut self, name: &str) -> Result<CharacterRecord> {
        self.characters
            .values()
            .find(|c| c.name == name)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn add_character(&mut self, record: &mut CharacterRecord) -> Result<()> {
        record.id = self.next_character_id;
        self.next_character_id += 1;
        self.characters.insert(record.id, record.clone());
        if let Some(account) = self.accounts.get_mut(&record.account_id) {
            account.characters.push(record.id);
        }
        Ok(())
    }

    fn update_character(&mut self, id: u32, data: &CharacterData) -> Result<()> {
        let record = self.characters.get_mut(&id).ok_or(StorageError::NotFound)?;
        record.data = data.clone();
        Ok(())
    }

    fn del_character(&mut self, id: u32) -> Result<()> {
        let Some(record) = self.characters.remove(&id) else {
            return Err(StorageError::NotFound);
        };
        if let Some(account) = self.accounts.get_mut(&record.account_id) {
            account.characters.retain(|&c| c != id);
        }
        Ok(())
    }

    fn get_channel_list(&mut self) -> Result<Vec<ChannelRecord>> {
        Ok(self.channels.clone())
    }

    fn update_channels(&mut self, channels: &[ChannelRecord]) -> Result<()> {
        self.channels = channels.to_vec();
        Ok(())
    }

    fn add_guild(&mut self, record: &mut GuildRecord) -> Result<()> {
        record.id = self.next_guild_id;
        self.next_guild_id += 1;
        self.guilds.insert(record.id, record.clone());
        Ok(())
    }

    fn remove_guild(&mut self, id: u32) -> Result<()> {
        self.guilds.remove(&id).ok_or(StorageError::NotFound)?;
        Ok(())
    }

    fn update_guild(&mut self, record: &GuildRecord) -> Result<()> {
        if !self.guilds.contains_key(&record.id) {
            return Err(StorageError::NotFound);
        }
        self.guilds.insert(record.id, record.clone());
        Ok(())
    }

    fn get_guild_list(&mut self) -> Result<Vec<GuildRecord>> {
        let mut guilds: Vec<GuildRecord> = self.guilds.values().cloned().collect();
        guilds.sort_by_key(|g| g.id);
        Ok(guilds)
    }

    fn get_quest_var(&mut self, character_id: u32, name: &str) -> Result<Option<String>> {
        Ok(self
            .quest_vars
            .get(&(character_id, name.to_string()))
            .cloned())
    }

    fn set_quest_var(&mut self, character_id: u32, name: &str, value: &str) -> Result<()> {
        self.quest_vars
            .insert((character_id, name.to_string()), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str) -> AccountRecord {
        AccountRecord {
            id: 0,
            name: name.to_string(),
            password: "secret".into(),
            email: format!("{}@example.org", name),
            level: 0,
            banned_until: 0,
            registration_date: 0,
            characters: Vec::new(),
        }
    }

    #[test]
    fn account_lifecycle() {
        let mut store = MemoryStorage::new();
        let mut rec = account("alice");
        store.add_account(&mut rec).unwrap();
        assert_eq!(rec.id, 1);
        assert_eq!(store.get_account_by_name("alice").unwrap().id, 1);
        assert!(store.does_email_exist("alice@example.org").unwrap());
        store.del_account(1).unwrap();
        assert!(matches!(
            store.get_account_by_id(1),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn characters_link_to_their_account() {
        let mut store = MemoryStorage::new();
        let mut acc = account("bob");
        store.add_account(&mut acc).unwrap();
        let mut c = CharacterRecord {
            id: 0,
            account_id: acc.id,
            name: "Boromir".into(),
            data: CharacterData::default(),
        };
        store.add_character(&mut c).unwrap();
        assert!(store.does_character_name_exist("Boromir").unwrap());
        assert_eq!(store.get_account_by_id(acc.id).unwrap().characters, vec![c.id]);
        store.del_character(c.id).unwrap();
        assert!(store.get_account_by_id(acc.id).unwrap().characters.is_empty());
    }

    #[test]
    fn quest_vars_round_trip() {
        let mut store = MemoryStorage::new();
        assert_eq!(store.get_quest_var(1, "met_barnaby").unwrap(), None);
        store.set_quest_var(1, "met_barnaby", "1").unwrap();
        assert_eq!(
            store.get_quest_var(1, "met_barnaby").unwrap(),
            Some("1".into())
        );
    }
}
