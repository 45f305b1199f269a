//! Redis/KeyDB-backed storage.
//!
//! Key schema:
//! - `tv:account:{id}`            — bincode `AccountRecord`
//! - `tv:account:name:{name}`     — account id
//! - `tv:account:email:{email}`   — account id
//! - `tv:char:{id}`               — bincode `CharacterRecord`
//! - `tv:char:name:{name}`        — character id
//! - `tv:guild:{id}`              — bincode `GuildRecord`
//! - `tv:guild:ids`               — set of guild ids
//! - `tv:channels`                — bincode `Vec<ChannelRecord>`
//! - `tv:quest:{char}:{name}`     — quest variable value
//! - `tv:seq:{account|char|guild}` — id counters

use redis::Commands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use common::character_data::CharacterData;

use super::{
    AccountRecord, ChannelRecord, CharacterRecord, GuildRecord, Result, Storage, StorageError,
};

pub struct RedisStorage {
    connection: redis::Connection,
}

fn backend_err(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StorageError::Encoding(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StorageError::Encoding(e.to_string()))
}

impl RedisStorage {
    /// Connects synchronously; the broker is single-threaded and blocking
    /// round-trips are acceptable at its message rates.
    pub fn connect(url: &str) -> Result<RedisStorage> {
        let client = redis::Client::open(url).map_err(backend_err)?;
        let connection = client.get_connection().map_err(backend_err)?;
        log::info!("Connected to storage at {}", url);
        Ok(RedisStorage { connection })
    }

    fn next_id(&mut self, kind: &str) -> Result<u32> {
        let id: u32 = self
            .connection
            .incr(format!("tv:seq:{}", kind), 1)
            .map_err(backend_err)?;
        Ok(id)
    }

    fn get_blob<T: DeserializeOwned>(&mut self, key: &str) -> Result<T> {
        let bytes: Option<Vec<u8>> = self.connection.get(key).map_err(backend_err)?;
        match bytes {
            Some(bytes) if !bytes.is_empty() => decode(&bytes),
            _ => Err(StorageError::NotFound),
        }
    }

    fn set_blob<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes = encode(value)?;
        self.connection
            .set::<_, _, ()>(key, bytes)
            .map_err(backend_err)
    }

    fn get_id(&mut self, key: &str) -> Result<u32> {
        let id: Option<u32> = self.connection.get(key).map_err(backend_err)?;
        id.ok_or(StorageError::NotFound)
    }
}

impl Storage for RedisStorage {
    fn get_account_by_name(&mut self, name: &str) -> Result<AccountRecord> {
        let id = self.get_id(&format!("tv:account:name:{}", name.to_lowercase()))?;
        self.get_account_by_id(id)
    }

    fn get_account_by_id(&mut self, id: u32) -> Result<AccountRecord> {
        self.get_blob(&format!("tv:account:{}", id))
    }

    fn add_account(&mut self, record: &mut AccountRecord) -> Result<()> {
        record.id = self.next_id("account")?;
        self.set_blob(&format!("tv:account:{}", record.id), record)?;
        self.connection
            .set::<_, _, ()>(
                format!("tv:account:name:{}", record.name.to_lowercase()),
                record.id,
            )
            .map_err(backend_err)?;
        self.connection
            .set::<_, _, ()>(format!("tv:account:email:{}", record.email), record.id)
            .map_err(backend_err)
    }

    fn update_account(&mut self, record: &AccountRecord) -> Result<()> {
        self.set_blob(&format!("tv:account:{}", record.id), record)
    }

    fn del_account(&mut self, id: u32) -> Result<()> {
        let record = self.get_account_by_id(id)?;
        for character_id in &record.characters {
            let _ = self.del_character(*character_id);
        }
        self.connection
            .del::<_, ()>(format!("tv:account:name:{}", record.name.to_lowercase()))
            .map_err(backend_err)?;
        self.connection
            .del::<_, ()>(format!("tv:account:email:{}", record.email))
            .map_err(backend_err)?;
        self.connection
            .del::<_, ()>(format!("tv:account:{}", id))
            .map_err(backend_err)
    }

    fn does_email_exist(&mut self, email: &str) -> Result<bool> {
        self.connection
            .exists(format!("tv:account:email:{}", email))
            .map_err(backend_err)
    }

    fn does_character_name_exist(&mut self, name: &str) -> Result<bool> {
        self.connection
            .exists(format!("tv:char:name:{}", name.to_lowercase()))
            .map_err(backend_err)
    }

    fn get_character_by_id(&mut self, id: u32) -> Result<CharacterRecord> {
        self.get_blob(&format!("tv:char:{}", id))
    }

    fn get_character_by_name(&mut self, name: &str) -> Result<CharacterRecord> {
        let id = self.get_id(&format!("tv:char:name:{}", name.to_lowercase()))?;
        self.get_character_by_id(id)
    }

    fn add_character(&mut self, record: &mut CharacterRecord) -> Result<()> {
        record.id = self.next_id("char")?;
        self.set_blob(&format!("tv:char:{}", record.id), record)?;
        self.connection
            .set::<_, _, ()>(
                format!("tv:char:name:{}", record.name.to_lowercase()),
                record.id,
            )
            .map_err(backend_err)?;
        let mut account = self.get_account_by_id(record.account_id)?;
        account.characters.push(record.id);
        self.update_account(&account)
    }

    fn update_character(&mut self, id: u32, data: &CharacterData) -> Result<()> {
        let mut record = self.get_character_by_id(id)?;
        record.data = data.clone();
        self.set_blob(&format!("tv:char:{}", id), &record)
    }

    fn del_character(&mut self, id: u32) -> Result<()> {
        let record = self.get_character_by_id(id)?;
        self.connection
            .del::<_, ()>(format!("tv:char:name:{}", record.name.to_lowercase()))
            .map_err(backend_err)?;
        self.connection
            .del::<_, ()>(format!("tv:char:{}", id))
            .map_err(backend_err)?;
        if let Ok(mut account) = self.get_account_by_id(record.account_id) {
            account.characters.retain(|&c| c != id);
            self.update_account(&account)?;
        }
        Ok(())
    }

    fn get_channel_list(&mut self) -> Result<Vec<ChannelRecord>> {
        match self.get_blob("tv:channels") {
            Ok(channels) => Ok(channels),
            Err(StorageError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn update_channels(&mut self, channels: &[ChannelRecord]) -> Result<()> {
        self.set_blob("tv:channels", &channels.to_vec())
    }

    fn add_guild(&mut self, record: &mut GuildRecord) -> Result<()> {
        record.id = self.next_id("guild")?;
        self.set_blob(&format!("tv:guild:{}", record.id), record)?;
        self.connection
            .sadd::<_, _, ()>("tv:guild:ids", record.id)
            .map_err(backend_err)
    }

    fn remove_guild(&mut self, id: u32) -> Result<()> {
        self.connection
            .srem::<_, _, ()>("tv:guild:ids", id)
            .map_err(backend_err)?;
        self.connection
            .del::<_, ()>(format!("tv:guild:{}", id))
            .map_err(backend_err)
    }

    fn update_guild(&mut self, record: &GuildRecord) -> Result<()> {
        self.set_blob(&format!("tv:guild:{}", record.id), record)
    }

    fn get_guild_list(&mut self) -> Result<Vec<GuildRecord>> {
        let ids: Vec<u32> = self.connection.smembers("tv:guild:ids").map_err(backend_err)?;
        let mut guilds = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_blob(&format!("tv:guild:{}", id)) {
                Ok(guild) => guilds.push(guild),
                Err(StorageError::NotFound) => {
                    log::warn!("Guild {} in the id set but not stored", id)
                }
                Err(e) => return Err(e),
            }
        }
        guilds.sort_by_key(|g: &GuildRecord| g.id);
        Ok(guilds)
    }

    fn get_quest_var(&mut self, character_id: u32, name: &str) -> Result<Option<String>> {
        self.connection
            .get(format!("tv:quest:{}:{}", character_id, name))
            .map_err(backend_err)
    }

    fn set_quest_var(&mut self, character_id: u32, name: &str, value: &str) -> Result<()> {
        self.connection
            .set::<_, _, ()>(format!("tv:quest:{}:{}", character_id, name), value)
            .map_err(backend_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::character_data::{CharacterData, InventoryItem};

    /// The on-disk codec is not self-describing, so every persisted field
    /// must survive an encode/decode round trip exactly.
    #[test]
    fn character_record_round_trips_through_the_codec() {
        let mut record = CharacterRecord {
            id: 42,
            account_id: 7,
            name: "Wanderer".into(),
            data: CharacterData {
                account_level: 1,
                gender: 1,
                hair_style: 4,
                hair_color: 9,
                level: 12,
                map_id: 3,
                x: 330,
                y: 336,
                ..CharacterData::default()
            },
        };
        record.data.attributes = [10, 10, 10, 12, 9, 9];
        record.data.experience[0] = 1500;
        record.data.possessions.money = 250;
        record.data.possessions.equipment[2] = 501;
        record.data.possessions.inventory = vec![
            InventoryItem { item_id: 17, amount: 3 },
            InventoryItem { item_id: 501, amount: 1 },
        ];
        // Runtime-only state; never persisted.
        record.data.possessions.projectile_amount = 40;

        let bytes = encode(&record).unwrap();
        let back: CharacterRecord = decode(&bytes).unwrap();
        assert_eq!(back.data.possessions.projectile_amount, 0);

        record.data.possessions.projectile_amount = 0;
        assert_eq!(back, record);
    }

    #[test]
    fn account_record_round_trips_through_the_codec() {
        let record = AccountRecord {
            id: 9,
            name: "alice".into(),
            password: "hunter22".into(),
            email: "alice@example.org".into(),
            level: 50,
            banned_until: 0,
            registration_date: 1_700_000_000,
            characters: vec![42, 43],
        };
        let bytes = encode(&record).unwrap();
        let back: AccountRecord = decode(&bytes).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.name, record.name);
        assert_eq!(back.characters, record.characters);
    }
}
