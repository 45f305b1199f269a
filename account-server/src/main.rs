use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use account_server::broker::BrokerState;
use account_server::config::Config;
use account_server::session::AccountServer;
use account_server::storage::{MemoryStorage, RedisStorage, Storage};

fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    let log_file = if config.log_file.is_empty() {
        None
    } else {
        Some(config.log_file.as_str())
    };
    common::initialize_logger(log::LevelFilter::Info, log_file).unwrap_or_else(|e| {
        eprintln!("Failed to initialize logger: {}. Exiting.", e);
        process::exit(1);
    });

    log::info!("Starting Thornvale account server");
    log::info!("Process PID: {}", process::id());

    let quit_flag = Arc::new(AtomicBool::new(false));
    let quit_clone = quit_flag.clone();
    ctrlc::set_handler(move || {
        quit_clone.store(true, Ordering::SeqCst);
    })?;

    let storage: Box<dyn Storage> = if config.storage_url.is_empty() {
        log::warn!("No storage URL set; running on the in-memory store");
        Box::new(MemoryStorage::new())
    } else {
        match RedisStorage::connect(&config.storage_url) {
            Ok(storage) => Box::new(storage),
            Err(e) => {
                log::error!("Cannot reach storage: {}. Exiting.", e);
                process::exit(1);
            }
        }
    };

    let mut state = BrokerState::new(storage, &config.net_password);
    state.start_map = config.start_map;
    state.start_x = config.start_x;
    state.start_y = config.start_y;

    let mut server = AccountServer::new(&config, state)?;

    log::info!("Entering main loop...");
    while !quit_flag.load(Ordering::SeqCst) {
        server.run_once();
    }

    log::info!("Server shutdown complete.");
    Ok(())
}
