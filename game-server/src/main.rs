use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use game_server::config::Config;
use game_server::map::read_map;
use game_server::session::GameServer;
use game_server::state::GameState;

/// Loads items, monsters and maps from the data directory. `maps.json`
/// lists the hosted maps as `[{"id": 1, "name": "...", "file": "..."}]`.
fn load_game_data(state: &mut GameState, dir: &Path) -> anyhow::Result<()> {
    let items = std::fs::read_to_string(dir.join("items.json"))?;
    let count = state.items.load_json(&items)?;
    log::info!("Loaded {} item classes", count);

    let monsters = std::fs::read_to_string(dir.join("monsters.json"))?;
    let count = state.monsters.load_json(&monsters)?;
    log::info!("Loaded {} monster classes", count);

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("maps.json"))?)?;
    let entries = manifest
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("maps.json is not a list"))?;
    for entry in entries {
        let id = entry["id"].as_u64().unwrap_or(0) as u16;
        let name = entry["name"].as_str().unwrap_or("unnamed");
        let file = entry["file"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("map entry without file"))?;
        let text = std::fs::read_to_string(dir.join(file))?;
        let loaded = read_map(id, name, &text)?;
        if !loaded.npcs.is_empty() {
            log::info!("Map '{}' seeds {} NPCs", name, loaded.npcs.len());
        }
        let map_id = loaded.composite.id;
        state.maps.insert(loaded.composite);
        for seed in loaded.npcs {
            let npc =
                game_server::entity::Npc::new(seed.npc_id, &seed.name, seed.script_function);
            let entity = game_server::entity::Entity {
                map_id,
                pos: seed.pos,
                flags: game_server::entity::UpdateFlags::empty(),
                kind: game_server::entity::EntityKind::Npc(npc),
            };
            state.insert_entity(entity);
        }
    }
    Ok(())
}

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

    log::info!("Starting Thornvale game server");
    log::info!("Process PID: {}", process::id());

    let quit_flag = Arc::new(AtomicBool::new(false));
    let quit_clone = quit_flag.clone();
    ctrlc::set_handler(move || {
        quit_clone.store(true, Ordering::SeqCst);
    })?;

    let mut state = GameState::new();
    if let Err(e) = load_game_data(&mut state, Path::new(&config.data_dir)) {
        log::error!("Failed to load game data: {}. Exiting.", e);
        process::exit(1);
    }

    let mut server = GameServer::new(config, state)?;

    log::info!("Entering main game loop...");
    while !quit_flag.load(Ordering::SeqCst) {
        server.run_once();
    }

    log::info!("Shutdown signal received, logging everyone out...");
    server.close_all();
    log::info!("Server shutdown complete.");
    Ok(())
}
