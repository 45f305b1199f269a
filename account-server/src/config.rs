//! Environment-driven configuration.

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
    /// Where clients connect (login and chat).
    pub client_listen: String,
    /// Where game servers connect.
    pub game_listen: String,
    /// Shared secret game servers must present.
    pub net_password: String,
    /// Storage backend URL; empty selects the in-memory store.
    pub storage_url: String,
    /// Where fresh characters start.
    pub start_map: u16,
    pub start_x: u16,
    pub start_y: u16,
    /// Log file path; empty disables the file appender.
    pub log_file: String,
}

impl Config {
    pub fn from_env() -> Config {
        dotenvy::dotenv().ok();
        Config {
            client_listen: var_or("ACCOUNT_LISTEN", "0.0.0.0:9602"),
            game_listen: var_or("ACCOUNT_GAME_LISTEN", "0.0.0.0:9603"),
            net_password: var_or("NET_PASSWORD", ""),
            storage_url: var_or("STORAGE_URL", "redis://127.0.0.1:6379/0"),
            start_map: parse_or("START_MAP", 1),
            start_x: parse_or("START_X", 336),
            start_y: parse_or("START_Y", 336),
            log_file: var_or("ACCOUNT_LOG_FILE", "account-server.log"),
        }
    }
}
