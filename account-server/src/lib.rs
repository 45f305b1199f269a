//! The account/chat server: authentication, persistent character storage,
//! session-token minting, chat channels, guilds and parties.

pub mod broker;
pub mod config;
pub mod session;
pub mod storage;
