//! Environment-driven configuration.

use std::time::Duration;

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Where clients connect.
    pub listen_address: String,
    /// Address and port the account server hands to redirected clients.
    pub public_address: String,
    pub public_port: u16,
    /// The account server's inter-server endpoint.
    pub account_address: String,
    /// Shared secret between the servers.
    pub net_password: String,
    /// Directory with items.json, monsters.json, maps.json and map files.
    pub data_dir: String,
    /// Pending-token lifetimes (client side short, connect side long).
    pub client_token_timeout: Duration,
    pub connect_token_timeout: Duration,
    /// Log file path; empty disables the file appender.
    pub log_file: String,
}

impl Config {
    /// Loads from the environment, with `.env` honored when present.
    pub fn from_env() -> Config {
        dotenvy::dotenv().ok();
        let public_port = parse_or("GAME_PUBLIC_PORT", 9601);
        Config {
            listen_address: var_or("GAME_LISTEN", "0.0.0.0:9601"),
            public_address: var_or("GAME_PUBLIC_HOST", "127.0.0.1"),
            public_port,
            account_address: var_or("ACCOUNT_SERVER", "127.0.0.1:9602"),
            net_password: var_or("NET_PASSWORD", ""),
            data_dir: var_or("GAME_DATA_DIR", "data"),
            client_token_timeout: Duration::from_secs(parse_or("TOKEN_CLIENT_TTL_SECS", 10)),
            connect_token_timeout: Duration::from_secs(parse_or("TOKEN_CONNECT_TTL_SECS", 30)),
            log_file: var_or("GAME_LOG_FILE", "game-server.log"),
        }
    }
}
