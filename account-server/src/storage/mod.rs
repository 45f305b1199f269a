//! The character store gateway: persistence behind a narrow trait.
//!
//! The semantic operations are fixed here; the backend is a Redis/KeyDB
//! store in production and an in-memory table for tests. Records are
//! bincode-encoded through serde.

mod memory;
mod redis_store;

pub use memory::MemoryStorage;
pub use redis_store::RedisStorage;

use serde::{Deserialize, Serialize};

use common::character_data::CharacterData;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,
    #[error("backend failure: {0}")]
    Backend(String),
    #[error("encoding failure: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: u32,
    pub name: String,
    /// Password hash as provided by the client handshake layer.
    pub password: String,
    pub email: String,
    pub level: u8,
    /// Unix timestamp; 0 means not banned.
    pub banned_until: i64,
    pub registration_date: i64,
    pub characters: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: u32,
    pub account_id: u32,
    pub name: String,
    pub data: CharacterData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberRecord {
    pub character_id: u32,
    pub permissions: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildRecord {
    pub id: u32,
    pub name: String,
    pub members: Vec<GuildMemberRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: u16,
    pub name: String,
    pub topic: String,
    pub password: String,
}

/// The persisted-state contract the brokers consume. A single broker
/// process is the only writer for any given record, so the trait does not
/// concern itself with concurrent mutation.
pub trait Storage: Send {
    fn get_account_by_name(&mut self, name: &str) -> Result<AccountRecord>;
    fn get_account_by_id(&mut self, id: u32) -> Result<AccountRecord>;
    /// Assigns the record's id.
    fn add_account(&mut self, record: &mut AccountRecord) -> Result<()>;
    fn update_account(&mut self, record: &AccountRecord) -> Result<()>;
    fn del_account(&mut self, id: u32) -> Result<()>;
    fn does_email_exist(&mut self, email: &str) -> Result<bool>;
    fn does_character_name_exist(&mut self, name: &str) -> Result<bool>;

    fn get_character_by_id(&mut self, id: u32) -> Result<CharacterRecord>;
    fn get_character_by_name(&mut self, name: &str) -> Result<CharacterRecord>;
    /// Assigns the record's id and links it to its account.
    fn add_character(&mut self, record: &mut CharacterRecord) -> Result<()>;
    fn update_character(&mut self, id: u32, data: &CharacterData) -> Result<()>;
    fn del_character(&mut self, id: u32) -> Result<()>;

    fn get_channel_list(&mut self) -> Result<Vec<ChannelRecord>>;
    fn update_channels(&mut self, channels: &[ChannelRecord]) -> Result<()>;

    fn add_guild(&mut self, record: &mut GuildRecord) -> Result<()>;
    fn remove_guild(&mut self, id: u32) -> Result<()>;
    fn update_guild(&mut self, record: &GuildRecord) -> Result<()>;
    fn get_guild_list(&mut self) -> Result<Vec<GuildRecord>>;

    fn get_quest_var(&mut self, character_id: u32, name: &str) -> Result<Option<String>>;
    fn set_quest_var(&mut self, character_id: u32, name: &str, value: &str) -> Result<()>;
}
